//! Conversation snapshots: the JSON autosave and the markdown export.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mlx_code::{Message, MessageTag, Role};
use serde::{Deserialize, Serialize};

pub const AUTOSAVE_FILE_NAME: &str = "autosave.json";

#[derive(Debug, Serialize)]
struct SnapshotMessage<'a> {
    role: Role,
    content: &'a str,
    tag: MessageTag,
}

#[derive(Debug, Serialize)]
struct Snapshot<'a> {
    model: &'a str,
    root: &'a Path,
    messages: Vec<SnapshotMessage<'a>>,
}

/// Overwrites `<state_dir>/autosave.json` with the current history.
pub fn write_autosave(
    state_dir: &Path,
    model: &str,
    root: &Path,
    history: &[Message],
) -> io::Result<PathBuf> {
    fs::create_dir_all(state_dir)?;
    let snapshot = Snapshot {
        model,
        root,
        messages: history
            .iter()
            .map(|message| SnapshotMessage {
                role: message.role(),
                content: message.text(),
                tag: message.tag(),
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&snapshot).map_err(io::Error::other)?;
    let path = state_dir.join(AUTOSAVE_FILE_NAME);
    fs::write(&path, json)?;
    Ok(path)
}

#[derive(Debug, Deserialize)]
struct SavedMessage {
    role: Role,
    content: String,
    #[serde(default)]
    tag: Option<MessageTag>,
}

#[derive(Debug, Deserialize)]
struct SavedSnapshot {
    messages: Vec<SavedMessage>,
}

/// Messages left behind by a session that did not exit cleanly.
///
/// Snapshots without a `tag` field get one inferred from the text.
pub fn read_autosave(state_dir: &Path) -> io::Result<Option<Vec<(Role, String, MessageTag)>>> {
    let path = state_dir.join(AUTOSAVE_FILE_NAME);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error),
    };
    let snapshot: SavedSnapshot = serde_json::from_str(&raw)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
    let messages: Vec<(Role, String, MessageTag)> = snapshot
        .messages
        .into_iter()
        .map(|message| {
            let tag = message
                .tag
                .unwrap_or_else(|| MessageTag::infer(&message.content));
            (message.role, message.content, tag)
        })
        .collect();
    Ok((!messages.is_empty()).then_some(messages))
}

pub fn clear_autosave(state_dir: &Path) -> io::Result<()> {
    match fs::remove_file(state_dir.join(AUTOSAVE_FILE_NAME)) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error),
        _ => Ok(()),
    }
}

#[must_use]
pub fn render_transcript(model: &str, history: &[Message]) -> String {
    let mut out = format!("# mlx-code session\n\nModel: {model}\n");
    for message in history {
        let heading = match message.role() {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        out.push_str(&format!("\n## {heading}\n\n{}\n", message.text().trim_end()));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use generation_backend_mock::MockBackend;
    use mlx_code::{AssistantConfig, AssistantSession, NullSink};
    use pretty_assertions::assert_eq;

    use super::*;

    fn session_with_one_turn(dir: &Path) -> AssistantSession {
        let root = dir.join("proj");
        fs::create_dir_all(&root).expect("root should be created");
        let config = AssistantConfig::new(&root).with_state_dir(dir.join("state"));
        let mut session = AssistantSession::new(config, Arc::new(MockBackend::replying("Hi there")))
            .expect("session should open");
        let cwd = session.cwd().to_path_buf();
        session
            .ask("hello", &cwd, &mut NullSink, generation_backend::cancel_signal(), None)
            .expect("turn should succeed");
        session
    }

    #[test]
    fn autosave_writes_roles_and_contents() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let session = session_with_one_turn(dir.path());

        let path = write_autosave(
            &dir.path().join("state"),
            "mock",
            session.sandbox().root(),
            session.history(),
        )
        .expect("autosave should be written");

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).expect("autosave should be readable"))
                .expect("autosave should be JSON");
        assert_eq!(value["model"], "mock");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "hello");
        assert_eq!(value["messages"][1]["role"], "assistant");
        assert_eq!(value["messages"][1]["content"], "Hi there");
        assert_eq!(value["messages"][1]["tag"], "conversation");
    }

    #[test]
    fn autosave_reads_back_and_clears() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let session = session_with_one_turn(dir.path());
        let state = dir.path().join("state");
        write_autosave(&state, "mock", session.sandbox().root(), session.history())
            .expect("autosave should be written");

        let restored = read_autosave(&state)
            .expect("autosave should parse")
            .expect("autosave should hold messages");
        assert_eq!(
            restored,
            vec![
                (Role::User, "hello".to_string(), MessageTag::Conversation),
                (Role::Assistant, "Hi there".to_string(), MessageTag::Conversation),
            ]
        );

        clear_autosave(&state).expect("autosave should be removed");
        clear_autosave(&state).expect("clearing twice is fine");
        assert!(read_autosave(&state).expect("missing file is not an error").is_none());
    }

    #[test]
    fn autosave_keeps_tags_and_infers_missing_ones() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        fs::write(
            dir.path().join(AUTOSAVE_FILE_NAME),
            r#"{"messages": [
                {"role": "user", "content": "see utils.py", "tag": "auto_load"},
                {"role": "user", "content": "[Opened file: a.py]"},
                {"role": "assistant", "content": "```file:a.py\nx = 1\n```"},
                {"role": "assistant", "content": "plain reply"}
            ]}"#,
        )
        .expect("autosave should be written");

        let tags: Vec<MessageTag> = read_autosave(dir.path())
            .expect("autosave should parse")
            .expect("autosave should hold messages")
            .into_iter()
            .map(|(_, _, tag)| tag)
            .collect();
        assert_eq!(
            tags,
            vec![
                MessageTag::AutoLoad,
                MessageTag::FileOpen,
                MessageTag::FileEdit,
                MessageTag::Conversation,
            ]
        );
    }

    #[test]
    fn transcript_lists_turns_in_order() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let session = session_with_one_turn(dir.path());

        assert_eq!(
            render_transcript("mock", session.history()),
            "# mlx-code session\n\nModel: mock\n\n## User\n\nhello\n\n## Assistant\n\nHi there\n"
        );
    }
}
