//! Session-scoped conversation memory.
//!
//! Sessions live in a sharded concurrent map, so different session ids never
//! wait on each other. Whole interactions for one session are serialized by a
//! separate per-session async lock handed out by [`SessionHistoryStore::lock_session`].
//! A lock entry lives only while some interaction holds or awaits it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use parley_core::config::ChatConfig;
use parley_core::types::{ConversationTurn, Role};

use crate::types::SessionHistory;

type LockMap = DashMap<String, Arc<Mutex<()>>>;

#[derive(Debug, Default)]
struct SessionEntry {
    turns: VecDeque<ConversationTurn>,
    last_used: u64,
}

/// In-memory store of conversation turns keyed by session id.
///
/// Each session keeps at most `max_stored_turns` turns (oldest dropped
/// first; `0` disables the cap). When `max_sessions` is set, creating a
/// session beyond the bound evicts the least-recently-used one.
#[derive(Debug)]
pub struct SessionHistoryStore {
    sessions: DashMap<String, SessionEntry>,
    locks: Arc<LockMap>,
    max_stored_turns: usize,
    max_sessions: Option<usize>,
    tick: AtomicU64,
}

impl SessionHistoryStore {
    pub fn new(max_stored_turns: usize, max_sessions: Option<usize>) -> Self {
        Self {
            sessions: DashMap::new(),
            locks: Arc::new(DashMap::new()),
            max_stored_turns,
            max_sessions,
            tick: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.max_stored_turns, config.max_sessions)
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// Snapshot of a session's turns, creating an empty session if absent.
    pub fn get_or_create(&self, session_id: &str) -> SessionHistory {
        let tick = self.next_tick();
        let (turns, created) = {
            let mut created = false;
            let mut entry = self
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(|| {
                    created = true;
                    SessionEntry::default()
                });
            entry.last_used = tick;
            (entry.turns.iter().cloned().collect(), created)
        };
        if created {
            self.evict_over_capacity(session_id);
        }
        SessionHistory {
            session_id: session_id.to_string(),
            turns,
        }
    }

    /// Append one turn at the end of a session, creating the session if absent.
    pub fn append(
        &self,
        session_id: &str,
        role: Role,
        content: impl Into<String>,
        sources: Option<Vec<String>>,
    ) -> ConversationTurn {
        let turn = ConversationTurn::new(role, content, sources);
        self.push(session_id, turn.clone());
        turn
    }

    fn push(&self, session_id: &str, turn: ConversationTurn) {
        let tick = self.next_tick();
        let created = {
            let mut created = false;
            let mut entry = self
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(|| {
                    created = true;
                    SessionEntry::default()
                });
            entry.last_used = tick;
            entry.turns.push_back(turn);
            if self.max_stored_turns > 0 {
                while entry.turns.len() > self.max_stored_turns {
                    entry.turns.pop_front();
                }
            }
            created
        };
        if created {
            self.evict_over_capacity(session_id);
        }
    }

    /// The last `max_turns` turns of a session, oldest first.
    ///
    /// Unknown sessions yield an empty list and are not created.
    pub fn recent(&self, session_id: &str, max_turns: usize) -> Vec<ConversationTurn> {
        if max_turns == 0 {
            return Vec::new();
        }
        let tick = self.next_tick();
        match self.sessions.get_mut(session_id) {
            Some(mut entry) => {
                entry.last_used = tick;
                let skip = entry.turns.len().saturating_sub(max_turns);
                entry.turns.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Drop a session. Clearing an unknown session is a no-op.
    pub fn clear(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            debug!(session_id, "Session cleared");
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of every live session, sorted.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Stored turn count for a session; 0 when unknown.
    pub fn turn_count(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map(|entry| entry.turns.len())
            .unwrap_or(0)
    }

    /// Acquire the interaction lock for one session.
    ///
    /// The guard is owned, so it can be held across awaits for the whole
    /// classify-answer-record sequence. Dropping the last guard or waiter
    /// for a session removes its lock entry.
    pub async fn lock_session(&self, session_id: &str) -> SessionGuard {
        // Built before waiting so a cancelled waiter still cleans up its entry.
        let mut held = SessionGuard {
            session_id: session_id.to_string(),
            locks: Arc::clone(&self.locks),
            guard: None,
        };
        let lock = Arc::clone(self.locks.entry(session_id.to_string()).or_default().value());
        held.guard = Some(lock.lock_owned().await);
        held
    }

    /// Sessions with an interaction currently holding or awaiting the lock.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    fn evict_over_capacity(&self, keep: &str) {
        let Some(max) = self.max_sessions else {
            return;
        };
        while self.sessions.len() > max.max(1) {
            let oldest = self
                .sessions
                .iter()
                .filter(|e| e.key() != keep)
                .min_by_key(|e| e.value().last_used)
                .map(|e| e.key().clone());
            match oldest {
                Some(id) => {
                    self.sessions.remove(&id);
                    debug!(session_id = %id, "Evicted least recently used session");
                }
                None => break,
            }
        }
    }
}

/// Exclusive hold on one session's interaction lock.
#[derive(Debug)]
pub struct SessionGuard {
    session_id: String,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Release first so the map holds the only reference when nobody waits.
        self.guard.take();
        self.locks
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl Default for SessionHistoryStore {
    fn default() -> Self {
        Self::from_config(&ChatConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn contents(turns: &[ConversationTurn]) -> Vec<&str> {
        turns.iter().map(|t| t.content.as_str()).collect()
    }

    #[test]
    fn test_get_or_create_creates_empty_session() {
        let store = SessionHistoryStore::default();
        let history = store.get_or_create("s1");
        assert_eq!(history.session_id, "s1");
        assert!(history.is_empty());
        assert!(store.contains("s1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_append_preserves_order_and_roles() {
        let store = SessionHistoryStore::default();
        store.append("s1", Role::User, "Hi", None);
        store.append("s1", Role::Assistant, "Hello! How can I help?", None);

        let history = store.get_or_create("s1");
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns[0].role, Role::User);
        assert_eq!(history.turns[1].role, Role::Assistant);
        assert_eq!(contents(&history.turns), vec!["Hi", "Hello! How can I help?"]);
    }

    #[test]
    fn test_recent_returns_last_n_oldest_first() {
        let store = SessionHistoryStore::default();
        for i in 0..10 {
            store.append("s1", Role::User, format!("m{}", i), None);
        }
        assert_eq!(contents(&store.recent("s1", 3)), vec!["m7", "m8", "m9"]);
        assert_eq!(store.recent("s1", 10).len(), 10);
        assert_eq!(store.recent("s1", 50).len(), 10);
        assert!(store.recent("s1", 0).is_empty());
    }

    #[test]
    fn test_recent_unknown_session_does_not_create() {
        let store = SessionHistoryStore::default();
        assert!(store.recent("ghost", 6).is_empty());
        assert!(!store.contains("ghost"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = SessionHistoryStore::default();
        store.append("s1", Role::User, "hello", None);
        store.clear("s1");
        assert!(!store.contains("s1"));
        store.clear("s1");
        store.clear("never-existed");
        assert_eq!(store.turn_count("s1"), 0);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = SessionHistoryStore::default();
        store.append("a", Role::User, "from a", None);
        store.append("b", Role::User, "from b", None);
        assert_eq!(contents(&store.recent("a", 6)), vec!["from a"]);
        assert_eq!(contents(&store.recent("b", 6)), vec!["from b"]);
        assert_eq!(store.session_ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_stored_turns_are_capped() {
        let store = SessionHistoryStore::new(4, None);
        for i in 0..7 {
            store.append("s1", Role::User, format!("m{}", i), None);
        }
        assert_eq!(store.turn_count("s1"), 4);
        assert_eq!(
            contents(&store.get_or_create("s1").turns),
            vec!["m3", "m4", "m5", "m6"]
        );
    }

    #[test]
    fn test_zero_cap_keeps_everything() {
        let store = SessionHistoryStore::new(0, None);
        for i in 0..100 {
            store.append("s1", Role::User, format!("m{}", i), None);
        }
        assert_eq!(store.turn_count("s1"), 100);
    }

    #[test]
    fn test_sources_are_kept_on_turns() {
        let store = SessionHistoryStore::default();
        let turn = store.append(
            "s1",
            Role::Assistant,
            "See the manual",
            Some(vec!["manual.pdf".to_string()]),
        );
        let stored = store.recent("s1", 1);
        assert_eq!(stored[0], turn);
        assert_eq!(stored[0].sources.as_deref(), Some(&["manual.pdf".to_string()][..]));
    }

    #[test]
    fn test_lru_eviction_drops_least_recently_used() {
        let store = SessionHistoryStore::new(50, Some(2));
        store.append("a", Role::User, "1", None);
        store.append("b", Role::User, "2", None);
        // Touch "a" so "b" becomes the eviction candidate.
        store.recent("a", 1);
        store.append("c", Role::User, "3", None);

        assert_eq!(store.len(), 2);
        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert!(store.contains("c"));
    }

    #[test]
    fn test_unbounded_by_default() {
        let store = SessionHistoryStore::default();
        for i in 0..500 {
            store.append(&format!("s{}", i), Role::User, "hi", None);
        }
        assert_eq!(store.len(), 500);
    }

    #[tokio::test]
    async fn test_lock_session_serializes_same_session() {
        let store = Arc::new(SessionHistoryStore::default());
        let guard = store.lock_session("s1").await;

        let contender = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let _guard = store.lock_session("s1").await;
                store.append("s1", Role::User, "second", None);
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.append("s1", Role::User, "first", None);
        drop(guard);
        contender.await.unwrap();

        assert_eq!(contents(&store.recent("s1", 2)), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_lock_session_other_sessions_do_not_wait() {
        let store = SessionHistoryStore::default();
        let _held = store.lock_session("s1").await;
        let other = tokio::time::timeout(Duration::from_millis(100), store.lock_session("s2")).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_lock_entries_released_with_guards() {
        let store = SessionHistoryStore::new(50, Some(2));
        for i in 0..100 {
            let guard = store.lock_session(&format!("s{}", i)).await;
            assert_eq!(store.active_locks(), 1);
            drop(guard);
        }
        assert_eq!(store.active_locks(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_lock_entry_survives_while_waiter_queued() {
        let store = Arc::new(SessionHistoryStore::default());
        let guard = store.lock_session("s1").await;

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let _guard = store.lock_session("s1").await;
                store.active_locks()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        // The waiter took over the same entry instead of a fresh one.
        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(store.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_lock_entry() {
        let store = SessionHistoryStore::default();
        let guard = store.lock_session("s1").await;
        let waited =
            tokio::time::timeout(Duration::from_millis(20), store.lock_session("s1")).await;
        assert!(waited.is_err());
        drop(guard);
        assert_eq!(store.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_appends_across_sessions() {
        let store = Arc::new(SessionHistoryStore::default());
        let mut tasks = Vec::new();
        for s in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                for i in 0..20 {
                    store.append(&format!("s{}", s), Role::User, format!("m{}", i), None);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.len(), 8);
        for s in 0..8 {
            assert_eq!(store.turn_count(&format!("s{}", s)), 20);
        }
    }
}
