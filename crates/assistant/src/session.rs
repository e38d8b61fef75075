//! Bounded per-user conversation history.
//!
//! Each session keeps at most `max_turns` turns, oldest dropped first. Every
//! record sits behind its own `tokio::sync::Mutex` so one request can hold a
//! session across an upstream call while other sessions proceed. The lock is
//! FIFO, which keeps appends in request-arrival order per session.
//!
//! The store itself is capped at `max_sessions`; creating one more evicts the
//! least recently used idle session. Sessions held by a request are never
//! evicted, so the cap may be exceeded while all of them are busy.

use simguide_core::{SessionId, Turn};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Ordered turns of one session, bounded to `max_turns`.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl SessionRecord {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
        }
    }

    /// Append a turn, dropping the oldest ones beyond the bound.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    /// Oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn to_vec(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

struct SessionSlot {
    record: Arc<AsyncMutex<SessionRecord>>,
    last_used: u64,
}

/// Slots plus a recency index, least recently used first.
#[derive(Default)]
struct SessionMap {
    slots: HashMap<SessionId, SessionSlot>,
    recency: BTreeMap<u64, SessionId>,
    tick: u64,
}

impl SessionMap {
    fn touch(&mut self, id: &SessionId) -> Option<Arc<AsyncMutex<SessionRecord>>> {
        let now = self.tick;
        let slot = self.slots.get_mut(id)?;
        self.tick += 1;
        self.recency.remove(&slot.last_used);
        self.recency.insert(now, id.clone());
        slot.last_used = now;
        Some(Arc::clone(&slot.record))
    }

    fn insert(&mut self, id: SessionId, record: Arc<AsyncMutex<SessionRecord>>) {
        let now = self.tick;
        self.tick += 1;
        self.recency.insert(now, id.clone());
        self.slots.insert(
            id,
            SessionSlot {
                record,
                last_used: now,
            },
        );
    }

    /// Remove the least recently used idle session, if any.
    ///
    /// A record whose Arc is shared is locked or awaited by a request.
    /// Dropping it would let a later request for the same id run alongside
    /// that one, so busy sessions are skipped.
    fn evict_idle(&mut self) -> Option<SessionId> {
        let (&tick, id) = self.recency.iter().find(|(_, id)| {
            self.slots
                .get(*id)
                .is_some_and(|slot| Arc::strong_count(&slot.record) == 1)
        })?;
        let id = id.clone();
        self.recency.remove(&tick);
        self.slots.remove(&id);
        Some(id)
    }
}

/// SessionId → [`SessionRecord`].
pub struct SessionStore {
    sessions: Mutex<SessionMap>,
    max_turns: usize,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(SessionMap::default()),
            max_turns,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Exclusive access to a session, creating it if needed.
    ///
    /// Waiters are served in the order they called `lock`.
    pub async fn lock(&self, id: &SessionId) -> OwnedMutexGuard<SessionRecord> {
        self.slot(id).lock_owned().await
    }

    pub async fn append_turn(&self, id: &SessionId, turn: Turn) {
        self.lock(id).await.push(turn);
    }

    /// Append several turns with no other writer interleaving.
    pub async fn append_turns(&self, id: &SessionId, turns: impl IntoIterator<Item = Turn>) {
        let mut record = self.lock(id).await;
        for turn in turns {
            record.push(turn);
        }
    }

    /// Snapshot of the session's turns, oldest first. Unknown ids give an
    /// empty history and are not created.
    pub async fn context(&self, id: &SessionId) -> Vec<Turn> {
        let record = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.slots.get(id).map(|slot| Arc::clone(&slot.record))
        };
        match record {
            Some(record) => record.lock().await.to_vec(),
            None => Vec::new(),
        }
    }

    /// Number of sessions held.
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .slots
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: &SessionId) -> Arc<AsyncMutex<SessionRecord>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(record) = sessions.touch(id) {
            return record;
        }

        if sessions.slots.len() >= self.max_sessions {
            match sessions.evict_idle() {
                Some(evicted) => debug!(session = %evicted, "Evicted least recently used session"),
                None => debug!(
                    sessions = sessions.slots.len(),
                    "Every session is in use; exceeding max_sessions until one frees up"
                ),
            }
        }

        let record = Arc::new(AsyncMutex::new(SessionRecord::new(self.max_turns)));
        sessions.insert(id.clone(), Arc::clone(&record));
        record
    }
}
