//! Error types for the simguide domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Upstream failures have their own closed taxonomy so callers branch on
//! the kind instead of matching message text.

use thiserror::Error;

/// The top-level error type for simguide operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // --- Request errors ---
    #[error("Invalid input: {0}")]
    Input(String),

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by the upstream completion provider.
///
/// `Clone` because a single failed computation is delivered to every caller
/// coalesced on the same cache key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Credential missing, invalid, or lacking permission.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limited by provider{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// Transport failure, upstream 5xx, or a timed-out attempt.
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered, but not with something we can use.
    #[error("Malformed provider response: {message}{}", status_hint(.status_code))]
    Protocol {
        status_code: Option<u16>,
        message: String,
    },
}

impl ProviderError {
    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Short machine-readable name of the error kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "auth",
            Self::RateLimited { .. } => "rate_limit",
            Self::Network(_) => "network",
            Self::Protocol { .. } => "protocol",
        }
    }
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!(", retry after {secs}s"),
        None => String::new(),
    }
}

fn status_hint(status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!(" (status: {code})"),
        None => String::new(),
    }
}
