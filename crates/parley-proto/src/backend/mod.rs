//! Chat backend abstraction

pub mod http;

pub use http::HttpBackend;

use async_trait::async_trait;

use crate::{
    GenerationConfig, NewSession, Result, Session, SessionDetail, StreamMode, StreamRequest,
    stream::ByteStream,
};

/// Everything the session runtime asks of the server
#[async_trait]
pub trait Backend: Send + Sync {
    /// Start a streaming reply to `request`.
    ///
    /// A non-success status is returned as an error before any byte is
    /// yielded.
    async fn open_stream(
        &self,
        session_id: &str,
        request: &StreamRequest,
        mode: StreamMode,
    ) -> Result<ByteStream>;

    /// Replace the stored generation configuration of a session
    async fn update_config(&self, session_id: &str, config: &GenerationConfig) -> Result<()>;

    /// List session summaries
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Create a session
    async fn create_session(&self, new_session: &NewSession) -> Result<Session>;

    /// Fetch a session with its message history
    async fn get_session(&self, session_id: &str) -> Result<SessionDetail>;

    /// Change a session title
    async fn rename_session(&self, session_id: &str, title: &str) -> Result<Session>;

    /// Archive or unarchive a session
    async fn set_archived(&self, session_id: &str, archived: bool) -> Result<Session>;

    /// Delete a session
    async fn delete_session(&self, session_id: &str) -> Result<()>;
}
