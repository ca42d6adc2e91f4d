//! Inference runtime trait and types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Role in a conversation.
///
/// Roles the runtime does not know about are kept verbatim in `Other` so a
/// host body survives a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Other(String),
}

impl From<String> for Role {
    fn from(role: String) -> Self {
        match role.as_str() {
            "system" => Self::System,
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "tool" => Self::Tool,
            _ => Self::Other(role),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::System => "system".to_string(),
            Role::User => "user".to_string(),
            Role::Assistant => "assistant".to_string(),
            Role::Tool => "tool".to_string(),
            Role::Other(role) => role,
        }
    }
}

/// Message content: plain text, or any other JSON shape (null, multimodal
/// part lists) carried through as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Other(serde_json::Value),
}

impl MessageContent {
    /// The text, if this is plain text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Other(_) => None,
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
    /// Host-specific keys (ids, timestamps, attachments) carried through
    /// untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            extra: serde_json::Map::new(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Plain-text content, or `""` when the content is not a string.
    pub fn text(&self) -> &str {
        self.content.as_text().unwrap_or_default()
    }
}

/// Residency hint sent with a load/unload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlive {
    /// Release the model immediately (`keep_alive: 0`).
    Evict,
    /// Keep the model loaded until told otherwise (`keep_alive: -1`).
    Pin,
}

impl KeepAlive {
    /// Map the boolean "keep loaded" flag onto a hint.
    pub fn from_keep_loaded(keep_loaded: bool) -> Self {
        if keep_loaded { Self::Pin } else { Self::Evict }
    }

    /// Value of the runtime's `keep_alive` field.
    pub fn wire_value(self) -> i64 {
        match self {
            Self::Evict => 0,
            Self::Pin => -1,
        }
    }
}

impl std::fmt::Display for KeepAlive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evict => write!(f, "evict"),
            Self::Pin => write!(f, "pin"),
        }
    }
}

/// Single-prompt, non-streaming generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    /// Output token cap (`num_predict`).
    pub max_tokens: u32,
}

/// Trait for inference runtimes that serve several models from shared memory.
///
/// Every method is a single request/response exchange: no retries, no
/// fallbacks. Policy about what a failure means lives in
/// [`InferenceClient`](crate::llm::InferenceClient).
#[async_trait]
pub trait InferenceRuntime: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Run a raw prompt and return the generated text.
    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError>;

    /// Load (`Pin`) or unload (`Evict`) a model.
    async fn set_keep_alive(&self, model: &str, keep_alive: KeepAlive) -> Result<(), LlmError>;

    /// Full chat completion. `Ok(None)` when the reply carried no content.
    async fn chat(&self, model: &str, messages: &[ChatMessage])
    -> Result<Option<String>, LlmError>;

    /// Models currently resident in the runtime.
    /// Default implementation returns empty list.
    async fn running_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(Vec::new())
    }
}
