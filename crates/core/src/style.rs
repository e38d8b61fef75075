//! Answer style requested by the caller.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How the assistant should shape its answer.
///
/// The style participates in cache-key derivation, so two requests that
/// differ only in style never share a cached answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Simple,
    Advanced,
    Concise,
    #[default]
    Detailed,
}

impl Style {
    pub const ALL: [Style; 4] = [Self::Simple, Self::Advanced, Self::Concise, Self::Detailed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Advanced => "advanced",
            Self::Concise => "concise",
            Self::Detailed => "detailed",
        }
    }

    /// Instruction appended to the system prompt for this style.
    pub fn instruction(&self) -> &'static str {
        match self {
            Self::Simple => "Explain in plain language for a newcomer, avoiding jargon.",
            Self::Advanced => {
                "Assume an experienced analyst; use precise terminology and cover edge cases."
            }
            Self::Concise => "Answer briefly, in a few sentences or a short list.",
            Self::Detailed => "Give a thorough, step-by-step answer.",
        }
    }
}

impl std::fmt::Display for Style {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a style name is not one of the known variants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown style '{0}' (expected one of: simple, advanced, concise, detailed)")]
pub struct UnknownStyle(pub String);

impl FromStr for Style {
    type Err = UnknownStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|style| style.as_str() == normalized)
            .ok_or_else(|| UnknownStyle(s.to_string()))
    }
}
