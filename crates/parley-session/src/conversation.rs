//! Conversation state for the current session: messages, reasoning steps,
//! streaming phase, and retry memory.
//!
//! Every transition that belongs to a stream takes that stream's epoch and
//! is ignored when the epoch is not the active one.

use parley_proto::{Message, MessageId, Role, StreamMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::handle::StreamHandle;

/// The last user text sent, kept so a failed send can be replayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryMemory {
    pub text: String,
    pub mode: StreamMode,
}

/// Streaming lifecycle of the conversation
#[derive(Debug, Clone, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    Streaming { epoch: u64, handle: StreamHandle },
    Failed { error: String },
}

/// The placeholder a stream is filling in
#[derive(Debug, Clone)]
struct Placeholder {
    epoch: u64,
    id: MessageId,
}

/// Conversation state.
///
/// Messages are shared as `Arc`s; an update replaces the entry with a new
/// value so snapshots handed out earlier never change underneath readers.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Arc<Message>>,
    reasoning_steps: Vec<String>,
    phase: StreamPhase,
    retry: Option<RetryMemory>,
    placeholder: Option<Placeholder>,
}

impl Conversation {
    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    pub fn reasoning_steps(&self) -> &[String] {
        &self.reasoning_steps
    }

    pub fn phase(&self) -> &StreamPhase {
        &self.phase
    }

    pub fn retry_memory(&self) -> Option<&RetryMemory> {
        self.retry.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.phase, StreamPhase::Streaming { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.phase {
            StreamPhase::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Start a new stream: append the user message and an empty assistant
    /// placeholder, and remember the text for retry.
    ///
    /// Any stream still active is superseded first; its placeholder gets
    /// `cancelled_text` if nothing arrived for it. Returns whether one was.
    pub fn begin(
        &mut self,
        session_id: &str,
        text: &str,
        mode: StreamMode,
        epoch: u64,
        handle: StreamHandle,
        cancelled_text: &str,
    ) -> bool {
        let superseded = self.cancel(cancelled_text);
        if superseded {
            tracing::debug!("Superseded active stream");
        }

        let placeholder = Message::assistant_placeholder(session_id);
        self.placeholder = Some(Placeholder {
            epoch,
            id: placeholder.id.clone(),
        });
        self.messages.push(Arc::new(Message::user(session_id, text)));
        self.messages.push(Arc::new(placeholder));
        self.reasoning_steps.clear();
        self.retry = Some(RetryMemory {
            text: text.to_string(),
            mode,
        });
        self.phase = StreamPhase::Streaming { epoch, handle };
        superseded
    }

    fn is_active(&self, epoch: u64) -> bool {
        matches!(self.phase, StreamPhase::Streaming { epoch: active, .. } if active == epoch)
    }

    /// Append answer text to the last message, which must be the assistant
    /// placeholder while a stream is active.
    pub fn append_fragment(&mut self, epoch: u64, fragment: &str) -> bool {
        if !self.is_active(epoch) {
            return false;
        }
        let Some(last) = self.messages.last_mut() else {
            tracing::error!("Answer fragment with no messages");
            return false;
        };
        debug_assert_eq!(last.role, Role::Assistant, "streaming into a non-assistant message");
        if last.role != Role::Assistant {
            tracing::error!("Answer fragment while last message is from {}", last.role.as_str());
            return false;
        }
        *last = Arc::new(last.with_appended(fragment));
        true
    }

    pub fn push_reasoning(&mut self, epoch: u64, step: String) -> bool {
        if !self.is_active(epoch) {
            return false;
        }
        self.reasoning_steps.push(step);
        true
    }

    /// Rename the placeholder of `epoch` to the server-assigned id.
    ///
    /// Allowed after the stream completed, but only while the placeholder
    /// still carries a locally-minted id.
    pub fn assign_id(&mut self, epoch: u64, id: MessageId) -> bool {
        let Some(placeholder) = &self.placeholder else {
            return false;
        };
        if placeholder.epoch != epoch || !placeholder.id.is_local() {
            return false;
        }
        let Some(index) = self.index_of(&placeholder.id) else {
            return false;
        };
        let renamed = self.messages[index].with_id(id.clone());
        self.messages[index] = Arc::new(renamed);
        self.placeholder = Some(Placeholder { epoch, id });
        true
    }

    /// Complete the stream of `epoch`
    pub fn finish(&mut self, epoch: u64) -> bool {
        if !self.is_active(epoch) {
            return false;
        }
        self.phase = StreamPhase::Idle;
        true
    }

    /// Fail the stream of `epoch`, keeping any partial answer
    pub fn fail(&mut self, epoch: u64, error: String, failed_text: &str) -> bool {
        if !self.is_active(epoch) {
            return false;
        }
        self.fill_empty_placeholder(failed_text);
        self.phase = StreamPhase::Failed { error };
        true
    }

    /// Cancel the active stream, if any. Partial content is kept.
    pub fn cancel(&mut self, cancelled_text: &str) -> bool {
        let StreamPhase::Streaming { handle, .. } = &self.phase else {
            return false;
        };
        handle.cancel();
        self.phase = StreamPhase::Idle;
        self.fill_empty_placeholder(cancelled_text);
        true
    }

    pub fn clear_error(&mut self) -> bool {
        if matches!(self.phase, StreamPhase::Failed { .. }) {
            self.phase = StreamPhase::Idle;
            return true;
        }
        false
    }

    /// Replace the whole conversation, as when switching sessions.
    ///
    /// Cancels any active stream and forgets reasoning steps, retry memory
    /// and the last error. Returns whether a stream was cancelled.
    pub fn reset(&mut self, messages: Vec<Message>) -> bool {
        let was_streaming = match std::mem::take(&mut self.phase) {
            StreamPhase::Streaming { handle, .. } => {
                handle.cancel();
                true
            }
            _ => false,
        };
        self.messages = messages.into_iter().map(Arc::new).collect();
        self.reasoning_steps.clear();
        self.retry = None;
        self.placeholder = None;
        was_streaming
    }

    fn index_of(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().rposition(|message| &message.id == id)
    }

    fn fill_empty_placeholder(&mut self, text: &str) {
        let Some(placeholder) = &self.placeholder else {
            return;
        };
        let Some(index) = self.index_of(&placeholder.id) else {
            return;
        };
        if self.messages[index].content.is_empty() {
            let filled = self.messages[index].with_content(text);
            self.messages[index] = Arc::new(filled);
        }
    }
}
