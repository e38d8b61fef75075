//! Bounded retry with per-attempt timeouts.
//!
//! Wraps another client and retries transient failures (network errors,
//! upstream 5xx, timed-out attempts) with exponential backoff and jitter.
//! Authentication, rate-limit and protocol errors are returned immediately.

use async_trait::async_trait;
use rand::Rng;
use simguide_core::error::ProviderError;
use simguide_core::provider::{Completion, CompletionClient, CompletionRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry knobs.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Applied to each attempt separately
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff (`base * 2^attempt`, capped) plus up to 50% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let cap = self.max_delay.as_millis() as u64;
        let delay = base.saturating_mul(1u64 << attempt.min(20)).min(cap);
        let jitter = if delay > 1 {
            rand::rng().random_range(0..=delay / 2)
        } else {
            0
        };
        Duration::from_millis(delay.saturating_add(jitter).min(cap))
    }
}

/// A client that retries its inner client on transient failure.
pub struct RetryingClient {
    name: String,
    inner: Arc<dyn CompletionClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn CompletionClient>, policy: RetryPolicy) -> Self {
        Self {
            name: format!("retrying({})", inner.name()),
            inner,
            policy,
        }
    }
}

#[async_trait]
impl CompletionClient for RetryingClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let mut attempt = 0;

        loop {
            let outcome =
                tokio::time::timeout(self.policy.attempt_timeout, self.inner.complete(request.clone()))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ProviderError::Network(format!(
                            "Provider '{}' timed out after {}s",
                            self.inner.name(),
                            self.policy.attempt_timeout.as_secs()
                        )))
                    });

            match outcome {
                Ok(completion) => {
                    if attempt > 0 {
                        debug!(provider = %self.inner.name(), attempt = attempt + 1, "Retry succeeded");
                    }
                    return Ok(completion);
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        provider = %self.inner.name(),
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
