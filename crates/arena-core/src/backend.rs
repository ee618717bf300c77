//! Model backend seam
//!
//! The transport to model providers lives outside this crate. The dispatcher
//! only sees [`ModelBackendClient`]: one request in, text plus token usage
//! out, or a [`BackendError`].

use crate::error::BackendError;
use crate::types::{ExperimentOptions, ModelId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Speaker of a conversational turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions framing the conversation
    System,
    /// The experimenter's prompt
    User,
    /// A model reply
    Assistant,
}

/// One conversational turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    /// System turn
    #[inline]
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// User turn
    #[inline]
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Everything a backend needs for one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRequest {
    /// Target model
    pub model: ModelId,
    /// Conversation, system turn first when present
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature, passed through verbatim
    pub temperature: f64,
    /// Completion token limit, passed through verbatim
    pub max_tokens: u32,
}

impl BackendRequest {
    /// Build a request for `model`
    ///
    /// The system prompt, when non-blank and `with_system` holds, becomes the
    /// first turn; the prompt is always the last.
    #[must_use]
    pub fn new(
        model: ModelId,
        prompt: &str,
        options: &ExperimentOptions,
        with_system: bool,
    ) -> Self {
        let mut messages = Vec::with_capacity(2);
        let system = options
            .system_prompt
            .as_deref()
            .filter(|s| with_system && !s.trim().is_empty());
        if let Some(system) = system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));

        Self {
            model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        }
    }

    /// The user prompt
    #[must_use]
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map_or("", |m| m.content.as_str())
    }

    /// The system turn, if one was sent
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
    }
}

/// What a backend returns on success
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackendResponse {
    /// Completion text
    pub text: String,
    /// Prompt tokens billed
    pub prompt_tokens: u64,
    /// Completion tokens billed
    pub completion_tokens: u64,
}

impl BackendResponse {
    /// Create response
    #[inline]
    #[must_use]
    pub fn new(text: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            text: text.into(),
            prompt_tokens,
            completion_tokens,
        }
    }
}

/// Client for model providers
///
/// Implementations must be safe to call concurrently: the dispatcher issues
/// one call per configured model at the same time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelBackendClient: Send + Sync {
    /// Run one completion
    async fn invoke(&self, request: BackendRequest) -> Result<BackendResponse, BackendError>;
}
