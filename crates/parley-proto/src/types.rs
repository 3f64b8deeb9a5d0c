//! Core types shared by the backend and the session runtime

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::LazyLock;

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// How a conversation is run by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    #[default]
    Quick,
    Task,
}

impl std::str::FromStr for ConversationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "task" => Ok(Self::Task),
            other => Err(format!("unknown conversation mode: {other}")),
        }
    }
}

/// Which streaming endpoint a message is sent through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Plain answer streaming
    #[default]
    Normal,
    /// Answer streaming with intermediate reasoning steps
    Deep,
}

impl StreamMode {
    /// Whether reasoning steps are expected in this mode
    pub fn wants_reasoning(&self) -> bool {
        matches!(self, StreamMode::Deep)
    }
}

/// Accept ids the backend sends as either strings or integers.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(n) => n.to_string(),
    })
}

const LOCAL_ID_PREFIX: &str = "local-";

static LOCAL_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^local-[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});

/// Message identifier.
///
/// Messages created on this side start with a locally-minted id and are
/// renamed once the server reports the id it stored them under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Mint a fresh local id
    pub fn local() -> Self {
        Self(format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    /// Wrap an id assigned by the server
    pub fn server(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Whether this id still has the locally-minted shape
    pub fn is_local(&self) -> bool {
        LOCAL_ID_PATTERN.is_match(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize_id(deserializer).map(Self)
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(deserialize_with = "deserialize_id")]
    pub session_id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a user message with a local id
    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::local(),
            session_id: session_id.into(),
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Create the empty assistant entry that a stream fills in
    pub fn assistant_placeholder(session_id: impl Into<String>) -> Self {
        Self {
            id: MessageId::local(),
            session_id: session_id.into(),
            role: Role::Assistant,
            content: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Copy of this message with `fragment` appended to its content
    pub fn with_appended(&self, fragment: &str) -> Self {
        let mut next = self.clone();
        next.content.push_str(fragment);
        next
    }

    /// Copy of this message with its content replaced
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..self.clone()
        }
    }

    /// Copy of this message carrying a different id
    pub fn with_id(&self, id: MessageId) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }
}

/// Generation settings attached to a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_mode: Option<String>,
    /// Keys this client does not interpret but must round-trip
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GenerationConfig {
    /// Canonical serialized form used to detect changes.
    ///
    /// Object keys are sorted at every level so two equal configurations
    /// always produce the same string.
    pub fn fingerprint(&self) -> String {
        match serde_json::to_value(self) {
            Ok(value) => {
                let mut out = String::new();
                write_canonical(&value, &mut out);
                out
            }
            Err(e) => {
                tracing::warn!("Failed to serialize generation config: {}", e);
                String::new()
            }
        }
    }
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Session summary as known to the directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub mode: ConversationMode,
    #[serde(default)]
    pub config: GenerationConfig,
    #[serde(default)]
    pub archived: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// A session together with its message history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session: Session,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Body of a create-session request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSession {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    pub title: String,
    pub mode: ConversationMode,
    pub config: GenerationConfig,
}

/// Body of a streaming request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequest {
    pub content: String,
}

impl StreamRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}
