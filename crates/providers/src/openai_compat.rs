//! OpenAI-compatible completion client.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/v1/chat/completions`.
//!
//! HTTP outcomes are folded into the closed [`ProviderError`] taxonomy:
//! 401/403 → auth, 429 → rate limit, 5xx and transport failures → network,
//! anything else unusable → protocol.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use simguide_core::error::ProviderError;
use simguide_core::message::Turn;
use simguide_core::provider::{Completion, CompletionClient, CompletionRequest, Usage};
use tracing::{debug, warn};

/// Longest slice of an error body kept in logs and error messages.
const ERROR_BODY_EXCERPT: usize = 512;

/// An OpenAI-compatible completion client.
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Create a new client. Fails only if the TLS backend cannot initialise.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.3,
            max_tokens: 400,
            client,
        })
    }

    /// Create an OpenAI client (convenience constructor).
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key, model)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Convert a request into the OpenAI message list, system prompt first.
    fn to_api_messages(request: &CompletionRequest) -> Vec<ApiMessage> {
        std::iter::once(ApiMessage {
            role: "system".into(),
            content: Some(request.system_prompt.clone()),
        })
        .chain(request.messages.iter().map(|turn: &Turn| ApiMessage {
            role: turn.role.as_str().into(),
            content: Some(turn.content.clone()),
        }))
        .collect()
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(request),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }
}

/// Map a non-success HTTP status to the error taxonomy.
fn classify_status(status: u16, headers: &HeaderMap, body: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ),
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after(headers),
        },
        500..=599 => ProviderError::Network(format!(
            "Upstream returned {status}: {}",
            excerpt(body)
        )),
        _ => ProviderError::Protocol {
            status_code: Some(status),
            message: excerpt(body).to_string(),
        },
    }
}

/// `Retry-After` in its delta-seconds form; HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_EXCERPT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Pull the answer out of a parsed response.
fn into_completion(api_response: ApiResponse) -> Result<Completion, ProviderError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Protocol {
            status_code: Some(200),
            message: "No choices in response".into(),
        })?;

    let content = choice
        .message
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ProviderError::Protocol {
            status_code: Some(200),
            message: "Response choice has no content".into(),
        })?;

    Ok(Completion {
        content,
        model: api_response.model,
        usage: api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    })
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request);

        debug!(
            provider = %self.name,
            model = %self.model,
            turns = request.messages.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if !response.status().is_success() {
            let headers = response.headers().clone();
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %excerpt(&error_body), "Provider returned error");
            return Err(classify_status(status, &headers, &error_body));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let api_response: ApiResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Protocol {
                status_code: Some(status),
                message: format!("Failed to parse response: {e}"),
            })?;

        into_completion(api_response)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
