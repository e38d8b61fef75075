//! Cache key derivation.
//!
//! Keys are SHA-256 digests, hex encoded (64 chars). Input-derived keys and
//! override keys hash under different domain prefixes, so an override name
//! can never collide with a user prompt that happens to spell it.

use serde::Serialize;
use sha2::{Digest, Sha256};
use simguide_core::Style;

/// Opaque fixed-length cache identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives cache keys. Stateless and unsalted: equal inputs give equal keys
/// in every process.
pub struct KeyDeriver;

impl KeyDeriver {
    /// Lowercase and trim surrounding whitespace; inner whitespace is kept.
    pub fn normalize(raw: &str) -> String {
        raw.trim().to_lowercase()
    }

    /// Derive the key for a request.
    ///
    /// With an `override_key` the result depends on the override alone, so
    /// every phrasing routed to the same intent shares one cache slot.
    pub fn derive(raw_input: &str, style: Option<Style>, override_key: Option<&str>) -> CacheKey {
        let mut hasher = Sha256::new();
        match override_key {
            Some(name) => {
                hasher.update(b"override\0");
                hasher.update(name.as_bytes());
            }
            None => {
                hasher.update(b"input\0");
                hasher.update(Self::normalize(raw_input).as_bytes());
                hasher.update(b"\0");
                hasher.update(style.map(|s| s.as_str()).unwrap_or("").as_bytes());
            }
        }
        CacheKey(hex::encode(hasher.finalize()))
    }
}
