//! The request pipeline between an inbound chat message and the upstream model.
//!
//! - [`key`]: deterministic cache keys from normalized input
//! - [`intent`]: ordered, first-match intent rules (canned answer or rewritten prompt)
//! - [`cache`]: TTL response cache with per-key request coalescing
//! - [`session`]: bounded per-user conversation history
//! - [`coordinator`]: ties the above together for one request

pub mod cache;
pub mod clock;
pub mod coordinator;
pub mod intent;
pub mod key;
pub mod session;

pub use cache::{CacheOutcome, CacheStats, Lookup, ResponseCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{ChatReply, ChatRequest, RequestCoordinator};
pub use intent::{IntentAction, IntentRouter, IntentRule, KeyStrategy, RouteMode, RoutedRequest};
pub use key::{CacheKey, KeyDeriver};
pub use session::{SessionRecord, SessionStore};
