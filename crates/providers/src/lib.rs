//! Upstream completion clients for simguide.
//!
//! All clients implement the `simguide_core::CompletionClient` trait.
//! [`build_from_config`] assembles the production stack: an
//! OpenAI-compatible HTTP client wrapped in a bounded retry policy.

pub mod openai_compat;
pub mod retry;
pub mod router;

pub use openai_compat::OpenAiCompatClient;
pub use retry::{RetryPolicy, RetryingClient};
pub use router::build_from_config;
