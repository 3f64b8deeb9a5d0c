//! Session store: the single owner of the current session's state.
//!
//! Streams, the settings reconciler and the front end all go through the
//! store's operations; nothing else mutates the conversation.

use parking_lot::Mutex;
use parley_proto::{Backend, GenerationConfig, Message, MessageId, Session, StreamMode, StreamRequest};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::{Notify, broadcast};

use crate::{
    consumer::{self, StreamOutcome, StreamSink},
    conversation::{Conversation, RetryMemory},
    directory::SessionDirectory,
    error::{Error, Result},
    events::SessionEvent,
    handle::StreamHandle,
};

/// Content given to a placeholder whose stream was cancelled before any text arrived
pub const CANCELLED_TEXT: &str = "Generation stopped.";

/// Content given to a placeholder whose stream failed before any text arrived
pub const FAILED_TEXT: &str = "Something went wrong while generating a response. Please retry.";

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Placeholder content after a cancelled stream
    pub cancelled_text: String,
    /// Placeholder content after a failed stream
    pub failed_text: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cancelled_text: CANCELLED_TEXT.to_string(),
            failed_text: FAILED_TEXT.to_string(),
        }
    }
}

/// Point-in-time copy of the store's state
#[derive(Debug, Clone)]
pub struct ConversationSnapshot {
    pub session: Option<Session>,
    pub messages: Vec<Arc<Message>>,
    pub reasoning_steps: Vec<String>,
    pub is_streaming: bool,
    pub error: Option<String>,
    pub retry: Option<RetryMemory>,
}

impl ConversationSnapshot {
    /// Content of the last message, if any
    pub fn last_content(&self) -> Option<&str> {
        self.messages.last().map(|m| m.content.as_str())
    }
}

pub(crate) struct StoreState {
    pub(crate) directory: SessionDirectory,
    pub(crate) current: Option<String>,
    pub(crate) conversation: Conversation,
    next_epoch: u64,
}

pub(crate) struct StoreInner {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) config: StoreConfig,
    pub(crate) state: Mutex<StoreState>,
    event_tx: broadcast::Sender<SessionEvent>,
    idle_notify: Notify,
}

impl StoreInner {
    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn notify_idle(&self) {
        self.idle_notify.notify_waiters();
    }
}

/// Cloneable handle to the session state.
#[derive(Clone)]
pub struct SessionStore {
    pub(crate) inner: Arc<StoreInner>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    pub fn with_config(backend: Arc<dyn Backend>, config: StoreConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(StoreInner {
                backend,
                config,
                state: Mutex::new(StoreState {
                    directory: SessionDirectory::default(),
                    current: None,
                    conversation: Conversation::default(),
                    next_epoch: 0,
                }),
                event_tx,
                idle_notify: Notify::new(),
            }),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        let state = self.inner.state.lock();
        let conversation = &state.conversation;
        ConversationSnapshot {
            session: current_of(&state),
            messages: conversation.messages().to_vec(),
            reasoning_steps: conversation.reasoning_steps().to_vec(),
            is_streaming: conversation.is_streaming(),
            error: conversation.error().map(str::to_string),
            retry: conversation.retry_memory().cloned(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.state.lock().conversation.is_streaming()
    }

    /// The session-level error left by the last failed stream
    pub fn error(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .conversation
            .error()
            .map(str::to_string)
    }

    /// Send `text` to the current session, streaming a plain answer.
    pub fn send_stream_message(&self, text: &str) -> Result<StreamHandle> {
        self.send(text, StreamMode::Normal)
    }

    /// Send `text` to the current session, streaming reasoning steps
    /// followed by the answer.
    pub fn send_stream_message_with_thinking(&self, text: &str) -> Result<StreamHandle> {
        self.send(text, StreamMode::Deep)
    }

    /// Send `text` in the given mode
    pub fn send(&self, text: &str, mode: StreamMode) -> Result<StreamHandle> {
        if text.trim().is_empty() {
            return Err(Error::Other("Message is empty".to_string()));
        }

        let mut state = self.inner.state.lock();
        let session_id = state.current.clone().ok_or(Error::NoCurrentSession)?;

        state.next_epoch += 1;
        let epoch = state.next_epoch;
        let sink = Arc::new(EpochSink {
            store: Arc::downgrade(&self.inner),
            epoch,
        });

        // The spawned task cannot touch state or emit until this lock is
        // released, by which time the new stream is active and announced.
        let run = consumer::run_stream(
            self.inner.backend.clone(),
            session_id.clone(),
            StreamRequest::new(text),
            mode,
            sink,
        );
        let superseded = state.conversation.begin(
            &session_id,
            text,
            mode,
            epoch,
            run.handle.clone(),
            &self.inner.config.cancelled_text,
        );
        if superseded {
            self.inner.emit(SessionEvent::StreamFinished {
                outcome: StreamOutcome::Cancelled,
            });
            self.inner.notify_idle();
        }
        tracing::debug!("Stream {} opened for session {} ({:?})", epoch, session_id, mode);
        self.inner.emit(SessionEvent::StreamStarted { session_id, mode });
        Ok(run.handle)
    }

    /// Cancel the active stream. Returns `false` if nothing was streaming.
    pub fn cancel_stream(&self) -> bool {
        let cancelled = self
            .inner
            .state
            .lock()
            .conversation
            .cancel(&self.inner.config.cancelled_text);
        if cancelled {
            tracing::debug!("Stream cancelled");
            self.inner.emit(SessionEvent::StreamFinished {
                outcome: StreamOutcome::Cancelled,
            });
            self.inner.notify_idle();
        }
        cancelled
    }

    /// Re-send the last text in the mode it was sent with.
    ///
    /// Returns `Ok(None)` when there is nothing to retry.
    pub fn retry_last_stream(&self) -> Result<Option<StreamHandle>> {
        let retry = self.inner.state.lock().conversation.retry_memory().cloned();
        match retry {
            Some(RetryMemory { text, mode }) => self.send(&text, mode).map(Some),
            None => Ok(None),
        }
    }

    /// Clear the error left by a failed stream
    pub fn clear_error(&self) -> bool {
        self.inner.state.lock().conversation.clear_error()
    }

    /// Wait until no stream is active
    pub async fn wait_for_idle(&self) {
        loop {
            let notified = self.inner.idle_notify.notified();
            if !self.is_streaming() {
                return;
            }
            notified.await;
        }
    }

    /// Persist generation settings for a session.
    ///
    /// On success the directory's copy of the session picks up `config`.
    pub async fn save_session_config(&self, session_id: &str, config: &GenerationConfig) -> Result<()> {
        match self.inner.backend.update_config(session_id, config).await {
            Ok(()) => {
                self.inner
                    .state
                    .lock()
                    .directory
                    .set_config(session_id, config.clone());
                tracing::debug!("Saved settings for session {}", session_id);
                self.inner.emit(SessionEvent::ConfigSaved {
                    session_id: session_id.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to save settings for session {}: {}", session_id, e);
                self.inner.emit(SessionEvent::ConfigSaveFailed {
                    session_id: session_id.to_string(),
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }
}

/// Metadata of the current session, read through the directory
pub(crate) fn current_of(state: &StoreState) -> Option<Session> {
    state
        .current
        .as_deref()
        .and_then(|id| state.directory.get(id))
        .cloned()
}

/// Routes one stream's callbacks into the store, dropping them once the
/// stream is no longer the active one.
struct EpochSink {
    store: Weak<StoreInner>,
    epoch: u64,
}

impl EpochSink {
    fn apply<F>(&self, what: &str, f: F) -> Option<Arc<StoreInner>>
    where
        F: FnOnce(&mut Conversation, &StoreConfig) -> bool,
    {
        let store = self.store.upgrade()?;
        let applied = {
            let mut state = store.state.lock();
            f(&mut state.conversation, &store.config)
        };
        if applied {
            Some(store)
        } else {
            tracing::debug!("Ignoring {} from stale stream {}", what, self.epoch);
            None
        }
    }
}

impl StreamSink for EpochSink {
    fn on_reasoning_step(&self, step: String) {
        let event = SessionEvent::ReasoningStep { step: step.clone() };
        if let Some(store) = self.apply("reasoning step", |c, _| c.push_reasoning(self.epoch, step)) {
            store.emit(event);
        }
    }

    fn on_answer_fragment(&self, fragment: String) {
        if let Some(store) = self.apply("answer fragment", |c, _| c.append_fragment(self.epoch, &fragment)) {
            store.emit(SessionEvent::AnswerDelta { delta: fragment });
        }
    }

    fn on_final_id(&self, id: MessageId) {
        let event = SessionEvent::MessageIdAssigned { id: id.clone() };
        if let Some(store) = self.apply("final id", |c, _| c.assign_id(self.epoch, id)) {
            store.emit(event);
        }
    }

    fn on_done(&self) {
        if let Some(store) = self.apply("completion", |c, _| c.finish(self.epoch)) {
            store.emit(SessionEvent::StreamFinished {
                outcome: StreamOutcome::Completed,
            });
            store.notify_idle();
        }
    }

    fn on_error(&self, error: parley_proto::Error) {
        let message = error.to_string();
        let applied = self.apply("error", |c, config| {
            c.fail(self.epoch, message.clone(), &config.failed_text)
        });
        if let Some(store) = applied {
            store.emit(SessionEvent::StreamFinished {
                outcome: StreamOutcome::Failed { message },
            });
            store.notify_idle();
        }
    }
}
