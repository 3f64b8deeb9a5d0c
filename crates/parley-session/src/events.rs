//! Session event types

use parley_proto::{MessageId, StreamMode};
use serde::{Deserialize, Serialize};

use crate::consumer::StreamOutcome;

/// Events emitted by a [`crate::SessionStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A stream was opened for the current session
    StreamStarted { session_id: String, mode: StreamMode },

    /// A reasoning step was recorded
    ReasoningStep { step: String },

    /// Answer text was appended to the in-flight reply
    AnswerDelta { delta: String },

    /// The in-flight reply was renamed to its server id
    MessageIdAssigned { id: MessageId },

    /// The stream reached a terminal state
    StreamFinished { outcome: StreamOutcome },

    /// The session directory changed
    SessionsChanged,

    /// A different session (or none) became current
    CurrentSessionChanged { session_id: Option<String> },

    /// Generation settings were persisted
    ConfigSaved { session_id: String },

    /// Persisting generation settings failed
    ConfigSaveFailed { session_id: String, message: String },
}

impl SessionEvent {
    /// Check if this event ends a stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::StreamFinished { .. })
    }
}
