//! # simguide core
//!
//! Domain types, traits, and error definitions for the simguide assistant.
//! This crate has **no framework dependencies**: it defines the vocabulary
//! (turns, styles, sessions, the completion client seam) that the other
//! crates implement against.
//!
//! The upstream model is reached only through [`CompletionClient`], so the
//! request pipeline can be exercised with scripted clients in tests.

pub mod error;
pub mod message;
pub mod provider;
pub mod style;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result};
pub use message::{Role, SessionId, Turn};
pub use provider::{Completion, CompletionClient, CompletionRequest, Usage};
pub use style::Style;
