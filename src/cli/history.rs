use anyhow::Result;

use super::chat::{print_session_list, print_transcript};
use crate::core::config::AppConfig;
use crate::core::session::{FileStorage, SessionError, SessionStore};
use crate::core::terminal::{self, print_error, print_success};
use crate::core::transcript;

fn print_usage() {
    terminal::print_info("usage: multichat history [list | show <id> | delete <id> | clear]");
}

pub(super) fn run_history(config: &AppConfig, args: &[String]) -> Result<()> {
    let storage = FileStorage::new(config.storage_dir())?;
    let mut store = SessionStore::new(storage, config.history.max_sessions);

    match (args.first().map(String::as_str), args.get(1)) {
        (None | Some("list"), _) => {
            terminal::print_status("Stored in", &store.storage().dir().display().to_string());
            print_session_list(&store.sessions()?);
        }
        (Some("show"), Some(id)) => match store.load(id) {
            Ok(session) => {
                terminal::print_step(&session.title);
                print_transcript(transcript::restore(&session));
            }
            Err(SessionError::NotFound(id)) => print_error(&format!("session {} not found", id)),
            Err(e) => return Err(e.into()),
        },
        (Some("delete"), Some(id)) => {
            let outcome = store.delete_session(id)?;
            if outcome.removed {
                print_success(&format!("Deleted {}", id));
            } else {
                print_error(&format!("session {} not found", id));
            }
        }
        (Some("clear"), _) => {
            store.clear_all()?;
            print_success("All saved conversations removed");
        }
        (Some(other), _) => {
            if !matches!(other, "show" | "delete") {
                print_error(&format!("Unknown history command: {}", other));
            }
            print_usage();
        }
    }
    Ok(())
}
