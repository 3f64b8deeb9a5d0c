//! Stream consumer: drives one streaming request to a terminal outcome

use futures::StreamExt;
use parley_proto::{Backend, Frame, MessageId, StreamMode, StreamRequest, decode_frames};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::handle::StreamHandle;

/// Receives the effects of a stream, in frame order.
///
/// Implementations are called from the consumer task and must not block.
pub trait StreamSink: Send + Sync {
    /// A reasoning step arrived (deep mode only)
    fn on_reasoning_step(&self, step: String);

    /// Incremental answer text arrived
    fn on_answer_fragment(&self, fragment: String);

    /// The server reported the id it stored the reply under
    fn on_final_id(&self, id: MessageId);

    /// The stream completed; called exactly once for every run that was
    /// not cancelled and did not fail
    fn on_done(&self);

    /// The stream failed; terminal
    fn on_error(&self, error: parley_proto::Error);
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StreamOutcome {
    Completed,
    Failed { message: String },
    Cancelled,
}

/// A running stream: its cancel handle and the task driving it
pub struct StreamRun {
    pub handle: StreamHandle,
    pub task: JoinHandle<StreamOutcome>,
}

/// Start streaming a reply and return immediately.
///
/// Frames are dispatched to `sink` from a spawned task. Must be called from
/// within a tokio runtime.
pub fn run_stream(
    backend: Arc<dyn Backend>,
    session_id: impl Into<String>,
    request: StreamRequest,
    mode: StreamMode,
    sink: Arc<dyn StreamSink>,
) -> StreamRun {
    let handle = StreamHandle::new();
    let cancel = handle.cancel_token();
    let session_id = session_id.into();

    let task = tokio::spawn(async move {
        let outcome = drive(backend.as_ref(), &session_id, &request, mode, &cancel, sink.as_ref()).await;
        tracing::debug!("Stream for session {} ended: {:?}", session_id, outcome);
        outcome
    });

    StreamRun { handle, task }
}

async fn drive(
    backend: &dyn Backend,
    session_id: &str,
    request: &StreamRequest,
    mode: StreamMode,
    cancel: &CancellationToken,
    sink: &dyn StreamSink,
) -> StreamOutcome {
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return StreamOutcome::Cancelled,
        opened = backend.open_stream(session_id, request, mode) => opened,
    };

    let bytes = match opened {
        Ok(bytes) => bytes,
        Err(e) => return fail(cancel, sink, e),
    };

    // Returning drops the frame stream, which drops the response body and
    // aborts the connection.
    let mut frames = decode_frames(bytes);
    let mut completed = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            next = frames.next() => next,
        };

        let frame = match next {
            None => break,
            Some(Ok(frame)) => frame,
            Some(Err(e)) if completed => {
                tracing::debug!("Transport error after completion ignored: {}", e);
                break;
            }
            Some(Err(e)) => return fail(cancel, sink, e),
        };

        if cancel.is_cancelled() {
            return StreamOutcome::Cancelled;
        }

        match frame {
            // Servers may report the id after completion
            Frame::MessageId { id } => sink.on_final_id(id),
            _ if completed => {
                tracing::trace!("Ignoring frame after completion: {:?}", frame);
            }
            Frame::Thinking { content } => {
                if mode.wants_reasoning() {
                    sink.on_reasoning_step(content);
                } else {
                    tracing::trace!("Ignoring reasoning step in normal mode");
                }
            }
            Frame::Answer { content, done } => {
                if !content.is_empty() {
                    sink.on_answer_fragment(content);
                }
                if done {
                    completed = true;
                    sink.on_done();
                }
            }
            Frame::Done { message_id } => {
                completed = true;
                sink.on_done();
                if let Some(id) = message_id {
                    sink.on_final_id(id);
                }
            }
            Frame::Error { message } => {
                return fail(cancel, sink, parley_proto::Error::Api(message));
            }
        }
    }

    if cancel.is_cancelled() {
        return StreamOutcome::Cancelled;
    }
    if !completed {
        // No explicit completion marker; end of body counts as one
        sink.on_done();
    }
    StreamOutcome::Completed
}

fn fail(
    cancel: &CancellationToken,
    sink: &dyn StreamSink,
    error: parley_proto::Error,
) -> StreamOutcome {
    if cancel.is_cancelled() {
        return StreamOutcome::Cancelled;
    }
    tracing::warn!("Stream failed: {}", error);
    let message = error.to_string();
    sink.on_error(error);
    StreamOutcome::Failed { message }
}
