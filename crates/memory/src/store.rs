//! Conversation store: bounded, in-memory rolling history per user.
//!
//! Each user gets one [`ConversationSession`], created lazily on the first
//! append and removed only by the idle evictor. Synchronization is per user:
//! the outer map is locked just long enough to find or create a session,
//! and each session sits behind its own async mutex. A caller that checks a
//! session out through [`ConversationStore::session`] holds that mutex for
//! as long as it keeps the [`SessionGuard`], which is how one user's
//! requests are serialized while other users proceed.

use concierge_core::message::{ConversationTurn, UserId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Rolling history for one user.
#[derive(Debug)]
pub struct ConversationSession {
    user_id: UserId,
    turns: VecDeque<ConversationTurn>,
    last_activity: Instant,
}

impl ConversationSession {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            turns: VecDeque::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Turns oldest first.
    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Append and truncate from the oldest end to `window` turns.
    ///
    /// A turn stamped earlier than the newest stored turn (clock skew between
    /// the platform and this host) is clamped so history stays non-decreasing.
    fn push(&mut self, mut turn: ConversationTurn, window: usize) {
        if let Some(last) = self.turns.back() {
            if turn.timestamp < last.timestamp {
                turn.timestamp = last.timestamp;
            }
        }
        self.turns.push_back(turn);
        while self.turns.len() > window.max(1) {
            self.turns.pop_front();
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Exclusive access to one user's session.
///
/// While this guard lives, no other request for the same user can read or
/// append, and the evictor skips the session.
pub struct SessionGuard {
    guard: OwnedMutexGuard<ConversationSession>,
    window: usize,
}

impl SessionGuard {
    pub fn user_id(&self) -> &UserId {
        self.guard.user_id()
    }

    /// Snapshot of the history, oldest first.
    pub fn history(&self) -> Vec<ConversationTurn> {
        self.guard.turns()
    }

    /// Append with the store's default window.
    pub fn append(&mut self, turn: ConversationTurn) {
        let window = self.window;
        self.guard.push(turn, window);
    }

    /// Append with a per-user window, never wider than the store's.
    pub fn append_bounded(&mut self, turn: ConversationTurn, window: usize) {
        let window = window.min(self.window);
        self.guard.push(turn, window);
    }

    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }
}

/// In-memory store of every user's rolling conversation.
pub struct ConversationStore {
    sessions: RwLock<HashMap<UserId, Arc<Mutex<ConversationSession>>>>,
    window: usize,
}

impl ConversationStore {
    /// Create a store keeping at most `window` turns per user.
    pub fn new(window: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            window: window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Find or create the user's session handle. The outer lock is released
    /// before the caller waits on the session itself.
    async fn handle(&self, user_id: &UserId) -> Arc<Mutex<ConversationSession>> {
        if let Some(session) = self.sessions.read().await.get(user_id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(user_id.clone()).or_insert_with(|| {
            debug!(user_id = %user_id, "Creating conversation session");
            Arc::new(Mutex::new(ConversationSession::new(user_id.clone())))
        }))
    }

    /// Check out the user's session, creating it if needed.
    ///
    /// Waits while another request holds the same user's session.
    pub async fn session(&self, user_id: &UserId) -> SessionGuard {
        let handle = self.handle(user_id).await;
        let mut guard = handle.lock_owned().await;
        guard.touch();
        SessionGuard {
            guard,
            window: self.window,
        }
    }

    /// Append one turn, truncating to the default window.
    pub async fn append(&self, user_id: &UserId, turn: ConversationTurn) {
        self.session(user_id).await.append(turn);
    }

    /// Append one turn, truncating to a per-user window.
    pub async fn append_bounded(&self, user_id: &UserId, turn: ConversationTurn, window: usize) {
        self.session(user_id).await.append_bounded(turn, window);
    }

    /// The user's turns, oldest first. Empty for unknown users; reading
    /// never creates a session.
    pub async fn history(&self, user_id: &UserId) -> Vec<ConversationTurn> {
        let handle = match self.sessions.read().await.get(user_id) {
            Some(session) => Arc::clone(session),
            None => return Vec::new(),
        };
        let session = handle.lock().await;
        session.turns()
    }

    /// Remove sessions idle longer than `threshold`. Returns how many were removed.
    ///
    /// A session that is checked out, or that someone is waiting on, is
    /// never removed.
    pub async fn evict_idle(&self, threshold: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| {
            // The map holds one reference; any other means a request has it.
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            match handle.try_lock() {
                Ok(session) => session.idle_for() <= threshold,
                Err(_) => true,
            }
        });
        before - sessions.len()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Run `evict_idle` every `interval` until the returned task is aborted.
    pub fn spawn_evictor(self: Arc<Self>, interval: Duration, threshold: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = self.evict_idle(threshold).await;
                if evicted > 0 {
                    let remaining = self.len().await;
                    info!(evicted, remaining, "Evicted idle conversations");
                }
            }
        })
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn turn(role_user: bool, text: &str, secs: i64) -> ConversationTurn {
        let role = if role_user {
            concierge_core::Role::User
        } else {
            concierge_core::Role::Assistant
        };
        ConversationTurn::new(role, text, at(secs))
    }

    #[tokio::test]
    async fn append_then_history_in_order() {
        let store = ConversationStore::new(20);
        let u = UserId::new("u1");
        store.append(&u, turn(true, "hi", 0)).await;
        store.append(&u, turn(false, "Hello!", 1)).await;

        let history = store.history(&u).await;
        let texts: Vec<&str> = history.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["hi", "Hello!"]);
    }

    #[tokio::test]
    async fn window_evicts_oldest_first() {
        let store = ConversationStore::new(4);
        let u = UserId::new("u1");
        for i in 0..4 {
            store.append(&u, turn(i % 2 == 0, &format!("t{i}"), i)).await;
        }
        store.append(&u, turn(true, "t4", 4)).await;

        let history = store.history(&u).await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].text, "t1");
        assert_eq!(history[3].text, "t4");
    }

    #[tokio::test]
    async fn per_user_window_override() {
        let store = ConversationStore::new(20);
        let u = UserId::new("u1");
        for i in 0..5 {
            store.append_bounded(&u, turn(true, &format!("t{i}"), i), 2).await;
        }
        let history = store.history(&u).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "t3");
    }

    #[tokio::test]
    async fn wider_override_is_capped_at_store_window() {
        let store = ConversationStore::new(3);
        let u = UserId::new("u1");
        for i in 0..6 {
            store.append_bounded(&u, turn(true, &format!("t{i}"), i), 1000).await;
        }
        let history = store.history(&u).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].text, "t3");
    }

    #[tokio::test]
    async fn out_of_order_timestamps_are_clamped() {
        let store = ConversationStore::new(20);
        let u = UserId::new("u1");
        store.append(&u, turn(true, "later", 10)).await;
        store.append(&u, turn(false, "earlier", 5)).await;

        let history = store.history(&u).await;
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(history[1].timestamp, at(10));
    }

    #[tokio::test]
    async fn history_of_unknown_user_is_empty_and_creates_nothing() {
        let store = ConversationStore::new(20);
        assert!(store.history(&UserId::new("ghost")).await.is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let store = ConversationStore::new(20);
        store.append(&UserId::new("a"), turn(true, "from a", 0)).await;
        store.append(&UserId::new("b"), turn(true, "from b", 0)).await;

        let a = store.history(&UserId::new("a")).await;
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].text, "from a");
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn checked_out_session_serializes_same_user() {
        let store = Arc::new(ConversationStore::new(20));
        let u = UserId::new("u1");

        let mut guard = store.session(&u).await;
        guard.append(turn(true, "first", 0));

        let waiter = {
            let store = store.clone();
            let u = u.clone();
            tokio::spawn(async move {
                store.append(&u, turn(true, "second", 1)).await;
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        guard.append(turn(false, "reply", 0));
        drop(guard);

        waiter.await.unwrap();
        let texts: Vec<String> = store.history(&u).await.into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["first", "reply", "second"]);
    }

    #[tokio::test]
    async fn other_users_not_blocked_by_checkout() {
        let store = ConversationStore::new(20);
        let _guard = store.session(&UserId::new("busy")).await;
        store.append(&UserId::new("free"), turn(true, "hi", 0)).await;
        assert_eq!(store.history(&UserId::new("free")).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_removes_stale_sessions() {
        let store = ConversationStore::new(20);
        store.append(&UserId::new("old"), turn(true, "hi", 0)).await;
        tokio::time::advance(Duration::from_secs(120)).await;
        store.append(&UserId::new("new"), turn(true, "hi", 0)).await;

        let evicted = store.evict_idle(Duration::from_secs(60)).await;
        assert_eq!(evicted, 1);
        assert!(store.history(&UserId::new("old")).await.is_empty());
        assert_eq!(store.history(&UserId::new("new")).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_skips_checked_out_session() {
        let store = ConversationStore::new(20);
        let u = UserId::new("busy");
        let guard = store.session(&u).await;
        tokio::time::advance(Duration::from_secs(3600)).await;

        assert_eq!(store.evict_idle(Duration::from_secs(60)).await, 0);
        drop(guard);
        assert_eq!(store.evict_idle(Duration::from_secs(60)).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evictor_task_runs_on_interval() {
        let store = Arc::new(ConversationStore::new(20));
        store.append(&UserId::new("u"), turn(true, "hi", 0)).await;

        let task = store
            .clone()
            .spawn_evictor(Duration::from_secs(30), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(store.is_empty().await);
        task.abort();
    }
}
