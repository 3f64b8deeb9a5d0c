//! reqwest implementation of [`Backend`]

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Method, RequestBuilder, Response, Url, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;

use super::Backend;
use crate::{
    error::{Error, Result},
    stream::ByteStream,
    types::{GenerationConfig, NewSession, Session, SessionDetail, StreamMode, StreamRequest},
};

/// Timeout for non-streaming requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the chat backend
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    timeout: Duration,
}

impl HttpBackend {
    /// Create a backend rooted at `base_url` (e.g. `https://host/api/chat`)
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| Error::InvalidConfig(format!("invalid base url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "base url '{}' cannot carry a path",
                base_url
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            token: None,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Attach a bearer credential to every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the timeout used for non-streaming requests
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.client.request(method, self.endpoint(segments));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = check_status(builder.timeout(self.timeout).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<()> {
        check_status(builder.timeout(self.timeout).send().await?).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!("Backend returned {}: {}", status, body);
    Err(Error::from_status(status.as_u16(), &body))
}

#[derive(Serialize)]
struct RenameBody<'a> {
    title: &'a str,
}

/// Session lists come either bare or wrapped
#[derive(Deserialize)]
#[serde(untagged)]
enum SessionList {
    Bare(Vec<Session>),
    Wrapped { sessions: Vec<Session> },
}

#[async_trait]
impl Backend for HttpBackend {
    async fn open_stream(
        &self,
        session_id: &str,
        request: &StreamRequest,
        mode: StreamMode,
    ) -> Result<ByteStream> {
        let endpoint = match mode {
            StreamMode::Normal => "stream",
            StreamMode::Deep => "stream-thinking",
        };
        tracing::debug!("Opening {:?} stream for session {}", mode, session_id);

        let response = self
            .request(Method::POST, &["sessions", session_id, "messages", endpoint])
            .header(header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(Error::from));
        Ok(Box::pin(bytes))
    }

    async fn update_config(&self, session_id: &str, config: &GenerationConfig) -> Result<()> {
        self.send_empty(
            self.request(Method::PUT, &["sessions", session_id, "config"])
                .json(config),
        )
        .await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let list: SessionList = self
            .send_json(self.request(Method::GET, &["sessions"]))
            .await?;
        Ok(match list {
            SessionList::Bare(sessions) | SessionList::Wrapped { sessions } => sessions,
        })
    }

    async fn create_session(&self, new_session: &NewSession) -> Result<Session> {
        self.send_json(self.request(Method::POST, &["sessions"]).json(new_session))
            .await
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionDetail> {
        self.send_json(self.request(Method::GET, &["sessions", session_id]))
            .await
    }

    async fn rename_session(&self, session_id: &str, title: &str) -> Result<Session> {
        self.send_json(
            self.request(Method::PATCH, &["sessions", session_id])
                .json(&RenameBody { title }),
        )
        .await
    }

    async fn set_archived(&self, session_id: &str, archived: bool) -> Result<Session> {
        let action = if archived { "archive" } else { "unarchive" };
        self.send_json(self.request(Method::POST, &["sessions", session_id, action]))
            .await
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.send_empty(self.request(Method::DELETE, &["sessions", session_id]))
            .await
    }
}
