//! CompletionClient trait: the abstraction over the upstream model.
//!
//! A client knows how to send a system prompt plus an ordered list of turns
//! to an LLM and get a single text answer back. Retries for transient
//! failures are the client's concern, not the caller's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Turn;

/// One upstream call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Sent as the leading `system` message
    pub system_prompt: String,

    /// Conversation context followed by the current user turn
    pub messages: Vec<Turn>,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<Turn>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A successful upstream answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text, trimmed
    pub content: String,

    /// Which model actually responded
    pub model: String,

    pub usage: Option<Usage>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: String::new(),
            usage: None,
        }
    }
}

/// The upstream completion seam.
///
/// The coordinator calls `complete()` without knowing which backend is in
/// use; tests substitute scripted implementations.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// A human-readable name (e.g. "openai", "retrying(openai)").
    fn name(&self) -> &str;

    /// Send the request and get a complete answer.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;

    /// Can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
