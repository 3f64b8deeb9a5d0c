//! Protocol frames carried by a streaming response

use serde::Deserialize;

use crate::types::MessageId;

/// Payload some servers send instead of a JSON completion record
const DONE_SENTINEL: &str = "[DONE]";

/// Fallback text for error frames that carry no message
const UNKNOWN_SERVER_ERROR: &str = "Unknown server error";

/// One decoded record from a streaming response
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Intermediate reasoning step (deep mode)
    Thinking { content: String },
    /// Incremental answer text; `done` marks it as the last fragment
    Answer { content: String, done: bool },
    /// Terminal success marker
    Done { message_id: Option<MessageId> },
    /// Server id for the assistant message being streamed
    MessageId { id: MessageId },
    /// Terminal failure with a human-readable reason
    Error { message: String },
}

impl Frame {
    /// Check if this frame ends the stream successfully
    pub fn completes(&self) -> bool {
        matches!(
            self,
            Frame::Done { .. } | Frame::Answer { done: true, .. }
        )
    }

    /// Parse a `data:` payload into a single frame.
    ///
    /// Returns `None` for anything that is not a recognised record. See
    /// [`expand`] for records that stand for more than one frame.
    pub fn parse(payload: &str) -> Option<Frame> {
        expand(payload).into_iter().next()
    }
}

/// Loose view of a wire record; every field is optional so that one shape
/// can be tried against all the known encodings.
#[derive(Debug, Default, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    content: Option<String>,
    done: Option<bool>,
    step: Option<serde_json::Value>,
    data: Option<serde_json::Value>,
    message: Option<String>,
    message_id: Option<MessageId>,
}

/// `step.content` / `data.message`, tolerating a bare string in place of the object.
fn nested_text(value: Option<serde_json::Value>, field: &str) -> Option<String> {
    match value? {
        serde_json::Value::String(text) => Some(text),
        serde_json::Value::Object(mut map) => match map.remove(field) {
            Some(serde_json::Value::String(text)) => Some(text),
            _ => None,
        },
        _ => None,
    }
}

impl RawFrame {
    fn into_frame(self) -> Option<Frame> {
        match self.kind.as_deref() {
            Some("error") => {
                let message = nested_text(self.data, "message")
                    .or(self.message)
                    .unwrap_or_else(|| UNKNOWN_SERVER_ERROR.to_string());
                Some(Frame::Error { message })
            }
            Some("thinking") => nested_text(self.step, "content")
                .or(self.content)
                .map(|content| Frame::Thinking { content }),
            Some("answer") => self.content.map(|content| Frame::Answer {
                content,
                done: self.done.unwrap_or(false),
            }),
            Some("done") => Some(Frame::Done {
                message_id: self.message_id,
            }),
            Some("message_id") => self.message_id.map(|id| Frame::MessageId { id }),
            Some(other) => {
                tracing::trace!("Dropping frame with unknown type '{}'", other);
                None
            }
            None => match (self.content, self.done) {
                (Some(content), done) => Some(Frame::Answer {
                    content,
                    done: done.unwrap_or(false),
                }),
                (None, Some(true)) => Some(Frame::Done {
                    message_id: self.message_id,
                }),
                (None, _) => self.message_id.map(|id| Frame::MessageId { id }),
            },
        }
    }
}

/// Parse a `data:` payload into the frames it stands for.
///
/// Unrecognised payloads yield no frames; callers drop them and keep
/// reading. An answer record (typed or untyped) with `"done": true` is both
/// the last fragment and the completion marker; its `message_id`, when
/// present, is reported after completion.
pub fn expand(payload: &str) -> Vec<Frame> {
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return vec![Frame::Done { message_id: None }];
    }

    let raw: RawFrame = match serde_json::from_str(payload) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::trace!("Dropping malformed frame: {}", e);
            return Vec::new();
        }
    };

    let trailing_id = match (raw.kind.as_deref(), &raw.content, raw.done) {
        (None | Some("answer"), Some(_), Some(true)) => raw.message_id.clone(),
        _ => None,
    };

    let mut frames: Vec<Frame> = raw.into_frame().into_iter().collect();
    if let Some(id) = trailing_id {
        frames.push(Frame::MessageId { id });
    }
    frames
}
