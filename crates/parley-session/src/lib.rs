//! parley-session: streaming chat session runtime
//!
//! This crate drives streamed replies into the current session's state,
//! keeps the session directory consistent, and persists generation
//! settings in the background.

pub mod consumer;
pub mod conversation;
pub mod directory;
pub mod error;
pub mod events;
pub mod handle;
pub mod reconciler;
pub mod schedule;
pub mod store;

#[cfg(test)]
mod testing;

pub use consumer::{StreamOutcome, StreamRun, StreamSink, run_stream};
pub use conversation::{Conversation, RetryMemory, StreamPhase};
pub use directory::SessionDirectory;
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use handle::StreamHandle;
pub use reconciler::{ReconcilerConfig, SettingsReconciler};
pub use schedule::Debouncer;
pub use store::{CANCELLED_TEXT, ConversationSnapshot, FAILED_TEXT, SessionStore, StoreConfig};
