//! Configuration file support

use parley_proto::{ConversationMode, GenerationConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Default server when neither the flag nor the config file names one
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// Environment variable consulted for the bearer token
pub const TOKEN_ENV: &str = "PARLEY_TOKEN";

/// Configuration for parley
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server base URL
    pub base_url: Option<String>,
    /// Bearer token (alternative to the environment variable)
    pub token: Option<String>,
    /// Persona bound to newly created sessions
    pub persona_id: Option<String>,
    /// Conversation mode for new sessions (quick, task)
    pub mode: Option<String>,
    /// Quiet period before settings changes are saved
    pub settings_debounce_ms: Option<u64>,
    /// Generation settings for new sessions
    pub generation: GenerationConfig,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Token from the config file, falling back to the environment
    pub fn token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var(TOKEN_ENV).ok())
            .filter(|t| !t.trim().is_empty())
    }

    /// Conversation mode for new sessions; unknown values fall back to the default
    pub fn conversation_mode(&self) -> ConversationMode {
        match self.mode.as_deref().map(str::parse) {
            Some(Ok(mode)) => mode,
            Some(Err(e)) => {
                eprintln!("Warning: {}", e);
                ConversationMode::default()
            }
            None => ConversationMode::default(),
        }
    }

    pub fn settings_debounce(&self) -> Option<std::time::Duration> {
        self.settings_debounce_ms.map(std::time::Duration::from_millis)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# parley configuration file
# Place at ~/.config/parley/config.toml (Linux) or set PARLEY_CONFIG_PATH

# Server base URL
base_url = "http://localhost:8000/api"

# Bearer token (optional - PARLEY_TOKEN is used when unset)
# token = "..."

# Persona bound to new sessions (optional)
# persona_id = "default"

# Conversation mode for new sessions (quick, task)
mode = "quick"

# How long settings edits must settle before they are saved
settings_debounce_ms = 800

# Generation settings for new sessions
[generation]
# model = "default"
# temperature = 0.7
# knowledge_scope = "all"
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config = Config::parse(example_config()).unwrap();
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.conversation_mode(), ConversationMode::Quick);
        assert_eq!(
            config.settings_debounce(),
            Some(std::time::Duration::from_millis(800))
        );
        assert_eq!(config.generation, GenerationConfig::default());
    }

    #[test]
    fn test_generation_table() {
        let config = Config::parse(
            r#"
mode = "task"

[generation]
model = "m1"
temperature = 0.5
top_k = 4
"#,
        )
        .unwrap();
        assert_eq!(config.conversation_mode(), ConversationMode::Task);
        assert_eq!(config.generation.model.as_deref(), Some("m1"));
        assert_eq!(config.generation.temperature, Some(0.5));
        assert_eq!(config.generation.extra["top_k"], 4);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert!(config.base_url.is_none());
        assert!(config.settings_debounce().is_none());
    }
}
