//! Session directory commands: list, open, new, rename, archive, delete

use super::CommandResult;
use parley_proto::Session;

use crate::utils::truncate_chars;

pub struct SessionCommand;

impl SessionCommand {
    pub fn execute(command: &str, args: &str) -> CommandResult {
        match command {
            "sessions" => CommandResult::ListSessions,
            "open" if args.is_empty() => usage("/open <id>"),
            "open" => CommandResult::Open(args.to_string()),
            "new" => CommandResult::New((!args.is_empty()).then(|| args.to_string())),
            "rename" if args.is_empty() => usage("/rename <title>"),
            "rename" => CommandResult::Rename(args.to_string()),
            "archive" => CommandResult::Archive,
            "unarchive" => CommandResult::Unarchive,
            "delete" => CommandResult::Delete,
            other => CommandResult::Unknown(other.to_string()),
        }
    }
}

fn usage(form: &str) -> CommandResult {
    CommandResult::Message(format!("Usage: {}", form))
}

/// Render the session list, marking the current session and archived ones
pub fn format_sessions(sessions: &[Session], current: Option<&str>) -> String {
    if sessions.is_empty() {
        return "No sessions.".to_string();
    }

    let mut output = String::from("Sessions:\n");
    for session in sessions {
        let marker = if Some(session.id.as_str()) == current { "*" } else { " " };
        let title = if session.title.trim().is_empty() {
            "(untitled)".to_string()
        } else {
            truncate_chars(&session.title, 48)
        };
        output.push_str(&format!(
            " {} {:<12} {:<51} {}{}\n",
            marker,
            session.id,
            title,
            session.updated_at.format("%Y-%m-%d %H:%M"),
            if session.archived { "  [archived]" } else { "" }
        ));
    }
    output.push_str("\nSwitch with: /open <id>");
    output
}
