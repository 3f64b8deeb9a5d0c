//! Slash commands for interactive mode

mod session;
mod settings;

pub use session::{SessionCommand, format_sessions};
pub use settings::SettingsCommand;

use parley_proto::{GenerationConfig, StreamMode};

/// Result of parsing a slash command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Switch the send mode
    SetMode(StreamMode),
    /// Replay the last send
    Retry,
    /// Dismiss the last stream error
    ClearError,
    /// Refresh and list sessions
    ListSessions,
    /// Load a session by id
    Open(String),
    /// Create a session, optionally titled
    New(Option<String>),
    /// Rename the current session
    Rename(String),
    /// Archive the current session
    Archive,
    /// Unarchive the current session
    Unarchive,
    /// Delete the current session
    Delete,
    /// Replace the generation settings
    UpdateSettings(GenerationConfig),
    /// Show a message to the user (not sent to the server)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command. Returns `None` for ordinary input.
pub fn execute_command(input: &str, settings: &GenerationConfig) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let (command, args) = match rest.split_once(char::is_whitespace) {
        Some((command, args)) => (command.to_lowercase(), args.trim()),
        None => (rest.to_lowercase(), ""),
    };

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "quit" | "exit" | "q" => CommandResult::Exit,

        "deep" | "d" => CommandResult::SetMode(StreamMode::Deep),

        "normal" | "n" => CommandResult::SetMode(StreamMode::Normal),

        "retry" | "r" => CommandResult::Retry,

        "clear-error" => CommandResult::ClearError,

        "sessions" | "open" | "new" | "rename" | "archive" | "unarchive" | "delete" => {
            SessionCommand::execute(&command, args)
        }

        "model" | "m" | "temperature" | "temp" | "scope" => {
            SettingsCommand::execute(&command, args, settings)
        }

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?           Show this help message
  /deep, /d               Stream reasoning steps before the answer
  /normal, /n             Stream the answer only
  /retry, /r              Re-send the last message
  /clear-error            Dismiss the last error
  /sessions               List sessions
  /open <id>              Switch to a session
  /new [title]            Start a new session
  /rename <title>         Rename the current session
  /archive, /unarchive    Archive or restore the current session
  /delete                 Delete the current session
  /model, /m [name]       Show or set the model
  /temperature [value]    Show or set the temperature
  /scope [value]          Show or set the knowledge scope
  /quit, /exit, /q        Exit parley

Press Ctrl-C while a reply is streaming to stop it."#
        .to_string()
}
