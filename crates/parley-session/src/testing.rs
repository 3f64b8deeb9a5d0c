//! Scripted backend and recording sink shared by the unit tests

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use parley_proto::{
    Backend, ByteStream, Error, GenerationConfig, Message, MessageId, NewSession, Result, Session,
    SessionDetail, StreamMode, StreamRequest,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::consumer::StreamSink;

pub type ChunkSender = mpsc::UnboundedSender<Result<Vec<u8>>>;

/// What the next `open_stream` call produces
pub enum Reply {
    /// Non-2xx response
    Status(u16),
    /// Complete body of `data:` payloads
    Body(Vec<String>),
    /// Payloads followed by a transport failure
    BodyThenError(Vec<String>),
    /// Body chunks fed by the test
    Live(mpsc::UnboundedReceiver<Result<Vec<u8>>>),
    /// The request never gets a response
    Hang,
}

impl Reply {
    pub fn body(payloads: &[&str]) -> Self {
        Reply::Body(payloads.iter().map(|p| p.to_string()).collect())
    }
}

/// Encode payloads as `data:` lines
pub fn sse(payloads: &[String]) -> Vec<u8> {
    payloads
        .iter()
        .map(|p| format!("data: {}\n\n", p))
        .collect::<String>()
        .into_bytes()
}

pub fn data(payload: &str) -> Result<Vec<u8>> {
    Ok(format!("data: {}\n\n", payload).into_bytes())
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamCall {
    pub session_id: String,
    pub content: String,
    pub mode: StreamMode,
}

pub fn session(id: &str, title: &str) -> Session {
    let now = Utc::now();
    Session {
        id: id.into(),
        persona_id: None,
        title: title.into(),
        mode: Default::default(),
        config: GenerationConfig::default(),
        archived: false,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Default)]
pub struct MockBackend {
    replies: Mutex<VecDeque<Reply>>,
    pub streams: Mutex<Vec<StreamCall>>,
    pub config_updates: Mutex<Vec<(String, GenerationConfig)>>,
    failing_config_updates: AtomicUsize,
    config_gate: Mutex<Option<Arc<Semaphore>>>,
    sessions: Mutex<Vec<Session>>,
    histories: Mutex<HashMap<String, Vec<Message>>>,
    next_id: AtomicU64,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: Vec<Reply>) -> Self {
        let backend = Self::new();
        backend.replies.lock().extend(replies);
        backend
    }

    /// A backend whose first stream is fed through the returned sender
    pub fn live() -> (Self, ChunkSender) {
        let backend = Self::new();
        let tx = backend.push_live();
        (backend, tx)
    }

    pub fn push_reply(&self, reply: Reply) {
        self.replies.lock().push_back(reply);
    }

    pub fn push_live(&self) -> ChunkSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push_reply(Reply::Live(rx));
        tx
    }

    pub fn with_sessions(self, sessions: Vec<Session>) -> Self {
        *self.sessions.lock() = sessions;
        self
    }

    pub fn set_history(&self, session_id: &str, messages: Vec<Message>) {
        self.histories.lock().insert(session_id.into(), messages);
    }

    /// Make the next `n` config updates fail with a 500
    pub fn fail_config_updates(&self, n: usize) {
        self.failing_config_updates.store(n, Ordering::SeqCst);
    }

    /// Hold config updates until the returned semaphore hands out permits
    pub fn gate_config_updates(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.config_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn stream_calls(&self) -> Vec<StreamCall> {
        self.streams.lock().clone()
    }

    pub fn saved_configs(&self) -> Vec<(String, GenerationConfig)> {
        self.config_updates.lock().clone()
    }

    fn update_session<F: FnOnce(&mut Session)>(&self, id: &str, f: F) -> Result<Session> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::from_status(404, r#"{"detail": "Session not found"}"#))?;
        f(session);
        session.updated_at = Utc::now();
        Ok(session.clone())
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn open_stream(
        &self,
        session_id: &str,
        request: &StreamRequest,
        mode: StreamMode,
    ) -> Result<ByteStream> {
        self.streams.lock().push(StreamCall {
            session_id: session_id.into(),
            content: request.content.clone(),
            mode,
        });

        let reply = self.replies.lock().pop_front();
        match reply {
            None => Err(Error::Api("no scripted reply".into())),
            Some(Reply::Status(status)) => Err(Error::from_status(status, "")),
            Some(Reply::Body(payloads)) => {
                let chunks: Vec<Result<Vec<u8>>> = vec![Ok(sse(&payloads))];
                Ok(Box::pin(futures::stream::iter(chunks)))
            }
            Some(Reply::BodyThenError(payloads)) => {
                let chunks: Vec<Result<Vec<u8>>> = vec![
                    Ok(sse(&payloads)),
                    Err(Error::Api("connection reset".into())),
                ];
                Ok(Box::pin(futures::stream::iter(chunks)))
            }
            Some(Reply::Live(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            Some(Reply::Hang) => futures::future::pending().await,
        }
    }

    async fn update_config(&self, session_id: &str, config: &GenerationConfig) -> Result<()> {
        let gate = self.config_gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire().await.map_err(|_| Error::Aborted)?.forget();
        }
        let failing = self.failing_config_updates.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_config_updates.store(failing - 1, Ordering::SeqCst);
            return Err(Error::from_status(500, r#"{"detail": "save failed"}"#));
        }
        self.config_updates
            .lock()
            .push((session_id.into(), config.clone()));
        let _ = self.update_session(session_id, |s| s.config = config.clone());
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.sessions.lock().clone())
    }

    async fn create_session(&self, request: &NewSession) -> Result<Session> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut created = session(&format!("new-{}", n), &request.title);
        created.persona_id = request.persona_id.clone();
        created.mode = request.mode;
        created.config = request.config.clone();
        self.sessions.lock().insert(0, created.clone());
        Ok(created)
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionDetail> {
        let session = self
            .sessions
            .lock()
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
            .ok_or_else(|| Error::from_status(404, r#"{"detail": "Session not found"}"#))?;
        let messages = self
            .histories
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or_default();
        Ok(SessionDetail { session, messages })
    }

    async fn rename_session(&self, session_id: &str, title: &str) -> Result<Session> {
        self.update_session(session_id, |s| s.title = title.into())
    }

    async fn set_archived(&self, session_id: &str, archived: bool) -> Result<Session> {
        self.update_session(session_id, |s| s.archived = archived)
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|s| s.id != session_id);
        if sessions.len() == before {
            return Err(Error::from_status(404, ""));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Reasoning(String),
    Fragment(String),
    FinalId(MessageId),
    Done,
    Error(String),
}

#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    notify: Notify,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.notify.notified();
            if self.calls.lock().len() >= n {
                return;
            }
            notified.await;
        }
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().push(call);
        self.notify.notify_waiters();
    }
}

impl StreamSink for RecordingSink {
    fn on_reasoning_step(&self, step: String) {
        self.record(SinkCall::Reasoning(step));
    }

    fn on_answer_fragment(&self, fragment: String) {
        self.record(SinkCall::Fragment(fragment));
    }

    fn on_final_id(&self, id: MessageId) {
        self.record(SinkCall::FinalId(id));
    }

    fn on_done(&self) {
        self.record(SinkCall::Done);
    }

    fn on_error(&self, error: Error) {
        self.record(SinkCall::Error(error.to_string()));
    }
}
