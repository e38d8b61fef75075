//! One chat request, end to end.
//!
//! route → (canned answer | cache lookup → on miss: session context →
//! upstream call → session append) → reply.
//!
//! Session history only changes when the upstream model is actually called.
//! A cached answer is returned without touching the caller's session.

use simguide_config::AppConfig;
use simguide_core::{
    CompletionClient, CompletionRequest, Error, ProviderError, Result, SessionId, Style, Turn,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::cache::ResponseCache;
use crate::intent::{IntentRouter, RouteMode};
use crate::key::KeyDeriver;
use crate::session::SessionStore;

const DEFAULT_TTL: Duration = Duration::from_secs(600);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_BACKOFF_SECS: u64 = 8;

/// An inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub message: String,
    /// `None` is treated as [`Style::Detailed`]
    pub style: Option<Style>,
    /// `None` is an ephemeral conversation: no context read, nothing stored
    pub session_id: Option<SessionId>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            style: None,
            session_id: None,
        }
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = Some(style);
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChatReply {
    pub response: String,
    /// True when no upstream call was made on behalf of this request
    pub cached: bool,
}

pub struct RequestCoordinator {
    router: IntentRouter,
    cache: Arc<ResponseCache>,
    sessions: Arc<SessionStore>,
    client: Arc<dyn CompletionClient>,
    system_prompt: String,
    ttl: Duration,
    call_timeout: Duration,
}

impl RequestCoordinator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        router: IntentRouter,
        cache: Arc<ResponseCache>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            router,
            cache,
            sessions,
            client,
            system_prompt: String::new(),
            ttl: DEFAULT_TTL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Wire up every component from configuration.
    pub fn from_config(config: &AppConfig, client: Arc<dyn CompletionClient>) -> Self {
        let cache = Arc::new(ResponseCache::with_system_clock(config.cache.max_entries));
        let sessions = Arc::new(SessionStore::new(
            config.sessions.max_turns,
            config.sessions.max_sessions,
        ));

        let call_timeout = overall_call_timeout(
            config.upstream.timeout_secs,
            config.upstream.max_retries,
        );

        Self::new(
            client,
            IntentRouter::from_config(&config.intents),
            cache,
            sessions,
        )
        .with_system_prompt(config.system_prompt.clone())
        .with_ttl(Duration::from_secs(config.cache.ttl_secs))
        .with_call_timeout(call_timeout)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn client(&self) -> &Arc<dyn CompletionClient> {
        &self.client
    }

    pub async fn handle(&self, request: ChatRequest) -> Result<ChatReply> {
        if request.message.trim().is_empty() {
            return Err(Error::Input("message must not be empty".into()));
        }

        let routed = self.router.route(&request.message);
        if routed.mode == RouteMode::Canned {
            debug!(intent = ?routed.intent, "Answered from canned intent");
            return Ok(ChatReply {
                response: routed.payload,
                cached: false,
            });
        }

        let style = request.style.unwrap_or_default();
        let key = KeyDeriver::derive(&request.message, Some(style), routed.key_override.as_deref());
        let system_prompt = self.system_prompt_for(style);
        let session_id = request.session_id.as_ref();

        let lookup = self
            .cache
            .get_or_compute(&key, self.ttl, || async {
                self.ask_upstream(system_prompt, &routed.payload, session_id)
                    .await
            })
            .await
            .inspect_err(|e| log_provider_error(e, session_id))?;

        debug!(
            key = %key.short(),
            intent = ?routed.intent,
            outcome = ?lookup.outcome,
            "Chat handled"
        );

        Ok(ChatReply {
            cached: lookup.is_cached(),
            response: lookup.value,
        })
    }

    fn system_prompt_for(&self, style: Style) -> String {
        if self.system_prompt.is_empty() {
            return style.instruction().to_string();
        }
        format!("{} {}", self.system_prompt, style.instruction())
    }

    /// The cache-miss path. Holds the session lock from context read until
    /// both turns are appended, so same-session misses run one at a time in
    /// arrival order.
    async fn ask_upstream(
        &self,
        system_prompt: String,
        payload: &str,
        session_id: Option<&SessionId>,
    ) -> std::result::Result<String, ProviderError> {
        let mut session = match session_id {
            Some(id) => Some(self.sessions.lock(id).await),
            None => None,
        };

        let mut messages = session.as_ref().map(|s| s.to_vec()).unwrap_or_default();
        messages.push(Turn::user(payload));

        let call = self
            .client
            .complete(CompletionRequest::new(system_prompt, messages));
        let completion = tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| {
                ProviderError::Network(format!(
                    "upstream call timed out after {}s",
                    self.call_timeout.as_secs()
                ))
            })??;

        if let Some(record) = session.as_mut() {
            record.push(Turn::user(payload));
            record.push(Turn::assistant(completion.content.as_str()));
        }

        Ok(completion.content)
    }
}

/// Room for every retry attempt plus the capped backoff between them.
/// Saturates instead of overflowing on unvalidated values.
fn overall_call_timeout(timeout_secs: u64, max_retries: u32) -> Duration {
    let attempts = u64::from(max_retries).saturating_add(1);
    let secs = timeout_secs
        .saturating_mul(attempts)
        .saturating_add(MAX_BACKOFF_SECS.saturating_mul(u64::from(max_retries)));
    Duration::from_secs(secs)
}

fn log_provider_error(e: &ProviderError, session_id: Option<&SessionId>) {
    let session = session_id.map(SessionId::as_str).unwrap_or("-");
    match e {
        ProviderError::AuthenticationFailed(msg) => {
            error!(session, error = %msg, "Upstream rejected credentials; check the configured API key");
        }
        ProviderError::RateLimited { retry_after_secs } => {
            warn!(session, retry_after_secs, "Upstream rate limit reached");
        }
        ProviderError::Network(msg) => {
            warn!(session, error = %msg, "Upstream unreachable");
        }
        ProviderError::Protocol {
            status_code,
            message,
        } => {
            error!(session, status_code, error = %message, "Malformed upstream response");
        }
    }
}
