//! Builds the upstream client stack from configuration.

use crate::openai_compat::OpenAiCompatClient;
use crate::retry::{RetryPolicy, RetryingClient};
use simguide_config::AppConfig;
use simguide_core::error::ProviderError;
use simguide_core::provider::CompletionClient;
use std::sync::Arc;
use std::time::Duration;

/// Build the configured provider wrapped in the retry policy.
///
/// Key presence is checked by the caller at startup; an empty key is passed
/// through so keyless local endpoints (Ollama, vLLM) work.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn CompletionClient>, ProviderError> {
    let base_url = config
        .api_url
        .clone()
        .unwrap_or_else(|| default_base_url(&config.provider));

    let api_key = config.api_key.clone().unwrap_or_default();

    let client = OpenAiCompatClient::new(&config.provider, base_url, api_key, &config.model)?
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens);

    Ok(Arc::new(RetryingClient::new(
        Arc::new(client),
        retry_policy(config),
    )))
}

fn retry_policy(config: &AppConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: config.upstream.max_retries,
        base_delay: Duration::from_millis(config.upstream.retry_base_delay_ms),
        attempt_timeout: Duration::from_secs(config.upstream.timeout_secs),
        ..RetryPolicy::default()
    }
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
