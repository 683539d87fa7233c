use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use coding_assistant::app::App;
use coding_assistant::console::StdConsole;
use coding_assistant::providers;
use mlx_code::{AssistantConfig, AssistantSession, EnvConfig};
use signal_hook::consts::SIGINT;
use signal_hook::flag;

/// Exit status after a second Ctrl-C.
const INTERRUPT_EXIT_CODE: i32 = 130;

fn main() -> io::Result<()> {
    let cwd = std::env::current_dir().map_err(io::Error::other)?;
    let config = AssistantConfig::load(&cwd, &cwd).map_err(io::Error::other)?;
    match mlx_code::logging::init(&config.state_dir) {
        Ok(log_path) => {
            tracing::info!(
                root = %config.root.display(),
                log = %log_path.display(),
                "starting session"
            );
        }
        Err(error) => eprintln!("warning: logging disabled: {error}"),
    }

    let backend = providers::backend_from_env(&EnvConfig::from_env()).map_err(io::Error::other)?;
    let state_dir = config.state_dir.clone();
    let session = AssistantSession::new(config, backend).map_err(io::Error::other)?;

    // The first Ctrl-C raises the flag and cancels the running turn; a second
    // one, with the flag still raised, terminates the process.
    let interrupt = Arc::new(AtomicBool::new(false));
    flag::register_conditional_shutdown(SIGINT, INTERRUPT_EXIT_CODE, Arc::clone(&interrupt))?;
    flag::register(SIGINT, Arc::clone(&interrupt))?;

    let mut app = App::new(session, StdConsole, interrupt).with_autosave(state_dir);
    app.run()
}
