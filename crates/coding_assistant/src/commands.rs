#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextAction {
    Show,
    On,
    Off,
    Clear,
    Reload,
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Quit,
    Clear,
    Pwd,
    Cd(String),
    Open(String),
    Context(ContextAction),
    Undo,
    Backups(Option<String>),
    Restore { name: String, target: String },
    Stats,
    Last,
    Save(Option<String>),
    Replace {
        target: String,
        old: String,
        new: String,
        all: bool,
    },
    Tokens(u32),
    Ctx(usize),
    /// A command that exists but was given the wrong arguments.
    Usage(&'static str),
    Unknown(String),
}

pub const HELP_TEXT: &str = "Commands:
  /help                      show this help
  /quit, /exit               leave
  /clear                     forget the conversation
  /pwd                       show the current directory
  /cd <dir>                  change directory (inside the project)
  /open <file>[:start[-end]] load a file, or a line range, into context
  /context [on|off|clear|reload]
  /undo                      revert the last file write from its backup
  /backups [file]            list backups
  /restore <backup> <file>   restore a backup over a file
  /stats                     session statistics
  /last                      resend the previous message
  /save [file]               save the conversation as markdown
  /replace <file> \"old\" \"new\" [--all]
                             replace text in a file (first match unless --all)
  /tokens <n>                set the generation limit
  /ctx <n>                   set the history budget in characters
Send a message with an empty line. Ctrl-C interrupts generation.";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut parts = trimmed.split_whitespace();
    let command = parts.next().unwrap_or(trimmed).to_string();
    let args: Vec<&str> = parts.collect();
    let rest = (!args.is_empty()).then(|| args.join(" "));

    let parsed = match command.as_str() {
        "/help" => SlashCommand::Help,
        "/quit" | "/exit" => SlashCommand::Quit,
        "/clear" => SlashCommand::Clear,
        "/pwd" => SlashCommand::Pwd,
        "/cd" => match rest {
            Some(dir) => SlashCommand::Cd(dir),
            None => SlashCommand::Usage("/cd <dir>"),
        },
        "/open" => match rest {
            Some(target) => SlashCommand::Open(target),
            None => SlashCommand::Usage("/open <file>[:start[-end]]"),
        },
        "/context" => SlashCommand::Context(match args.first().map(|arg| arg.to_ascii_lowercase()) {
            None => ContextAction::Show,
            Some(arg) => match arg.as_str() {
                "on" => ContextAction::On,
                "off" => ContextAction::Off,
                "clear" => ContextAction::Clear,
                "reload" => ContextAction::Reload,
                _ => ContextAction::Invalid(arg),
            },
        }),
        "/undo" => SlashCommand::Undo,
        "/backups" => SlashCommand::Backups(rest),
        "/restore" => match args.as_slice() {
            [name, target @ ..] if !target.is_empty() => SlashCommand::Restore {
                name: (*name).to_string(),
                target: target.join(" "),
            },
            _ => SlashCommand::Usage("/restore <backup> <file>"),
        },
        "/stats" => SlashCommand::Stats,
        "/last" => SlashCommand::Last,
        "/save" => SlashCommand::Save(rest),
        "/replace" => parse_replace(trimmed, &args),
        "/tokens" => match parse_positive(&args) {
            Some(limit) => SlashCommand::Tokens(limit),
            None => SlashCommand::Usage("/tokens <number>"),
        },
        "/ctx" => match parse_positive(&args) {
            Some(chars) => SlashCommand::Ctx(chars),
            None => SlashCommand::Usage("/ctx <number>"),
        },
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}

const REPLACE_USAGE: &str = "/replace <file> \"old text\" \"new text\" [--all]";

/// `/replace main.py "old_func" "new_func" --all`; both texts must be quoted.
fn parse_replace(input: &str, args: &[&str]) -> SlashCommand {
    let Some(target) = args.first() else {
        return SlashCommand::Usage(REPLACE_USAGE);
    };
    let Some(start) = input.find('"') else {
        return SlashCommand::Usage(REPLACE_USAGE);
    };
    // Odd segments sit between a pair of quotes.
    let quoted: Vec<&str> = input[start..].split('"').skip(1).step_by(2).collect();
    let closed = input[start..].matches('"').count() >= 4;
    match quoted.as_slice() {
        [old, new, ..] if closed && !target.starts_with('"') => SlashCommand::Replace {
            target: (*target).to_string(),
            old: (*old).to_string(),
            new: (*new).to_string(),
            all: args.contains(&"--all"),
        },
        _ => SlashCommand::Usage(REPLACE_USAGE),
    }
}

fn parse_positive<T: std::str::FromStr + Default + PartialOrd>(args: &[&str]) -> Option<T> {
    match args {
        [value] => value.parse::<T>().ok().filter(|parsed| *parsed > T::default()),
        _ => None,
    }
}
