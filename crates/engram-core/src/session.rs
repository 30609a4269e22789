//! Conversation tracker.
//!
//! Per-session state for deduplication and query expansion: a bounded FIFO
//! of recent queries and an LRU-capped set of memory ids already surfaced in
//! the session. State is partitioned by session id; access within a session
//! is serialized by a per-session mutex.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use tokio::sync::Mutex;

/// One remembered query.
#[derive(Debug, Clone)]
pub struct RecentQuery {
    pub text: String,
    pub vector: Option<Vec<f32>>,
    pub at: DateTime<Utc>,
}

struct SessionState {
    recent_queries: VecDeque<RecentQuery>,
    shown_ids: LruCache<String, ()>,
    last_touch: DateTime<Utc>,
}

impl SessionState {
    fn new(shown_cap: usize) -> Self {
        Self {
            recent_queries: VecDeque::new(),
            shown_ids: LruCache::new(
                NonZeroUsize::new(shown_cap.max(1)).expect("cap is at least 1"),
            ),
            last_touch: Utc::now(),
        }
    }
}

/// Session-partitioned tracker with TTL-based expiry.
pub struct ConversationTracker {
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
    query_window: usize,
    shown_cap: usize,
    ttl: Duration,
}

impl ConversationTracker {
    pub fn new(query_window: usize, shown_cap: usize, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            query_window: query_window.max(1),
            shown_cap,
            ttl,
        }
    }

    async fn session(&self, session_id: &str) -> Arc<Mutex<SessionState>> {
        let mut sessions = self.sessions.lock().await;
        // Opportunistic expiry of idle sessions on the way in.
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(48));
        sessions.retain(|_, state| {
            state
                .try_lock()
                .map(|s| s.last_touch >= cutoff)
                .unwrap_or(true)
        });
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::new(self.shown_cap))))
            .clone()
    }

    /// Recent queries, most recent last.
    pub async fn get_recent_queries(&self, session_id: &str) -> Vec<RecentQuery> {
        let session = self.session(session_id).await;
        let mut state = session.lock().await;
        state.last_touch = Utc::now();
        state.recent_queries.iter().cloned().collect()
    }

    /// Ids already surfaced in this session.
    pub async fn get_shown_memory_ids(&self, session_id: &str) -> Vec<String> {
        let session = self.session(session_id).await;
        let mut state = session.lock().await;
        state.last_touch = Utc::now();
        state.shown_ids.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Record a query and the result ids that were shown for it.
    pub async fn track_query(
        &self,
        session_id: &str,
        query: &str,
        results_shown: &[String],
        query_vector: Option<Vec<f32>>,
    ) {
        let session = self.session(session_id).await;
        let mut state = session.lock().await;
        state.last_touch = Utc::now();
        state.recent_queries.push_back(RecentQuery {
            text: query.to_string(),
            vector: query_vector,
            at: Utc::now(),
        });
        while state.recent_queries.len() > self.query_window {
            state.recent_queries.pop_front();
        }
        for id in results_shown {
            state.shown_ids.put(id.clone(), ());
        }
    }

    /// Number of live sessions (after expiry).
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ConversationTracker {
        ConversationTracker::new(3, 100, Duration::from_secs(48 * 3600))
    }

    #[tokio::test]
    async fn test_track_and_read_back() {
        let tracker = tracker();
        tracker
            .track_query("s1", "auth flow", &["a".to_string(), "b".to_string()], None)
            .await;

        let queries = tracker.get_recent_queries("s1").await;
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].text, "auth flow");

        let shown = tracker.get_shown_memory_ids("s1").await;
        assert_eq!(shown.len(), 2);
        assert!(shown.contains(&"a".to_string()));
    }

    #[tokio::test]
    async fn test_query_window_is_fifo_bounded() {
        let tracker = tracker();
        for i in 0..5 {
            tracker
                .track_query("s1", &format!("q{i}"), &[], None)
                .await;
        }
        let queries = tracker.get_recent_queries("s1").await;
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0].text, "q2");
        assert_eq!(queries[2].text, "q4");
    }

    #[tokio::test]
    async fn test_shown_ids_lru_capped() {
        let tracker = ConversationTracker::new(3, 2, Duration::from_secs(3600));
        tracker
            .track_query(
                "s1",
                "q",
                &["a".to_string(), "b".to_string(), "c".to_string()],
                None,
            )
            .await;
        let shown = tracker.get_shown_memory_ids("s1").await;
        assert_eq!(shown.len(), 2);
        assert!(!shown.contains(&"a".to_string()));
    }

    #[tokio::test]
    async fn test_sessions_are_partitioned() {
        let tracker = tracker();
        tracker.track_query("s1", "q1", &["a".to_string()], None).await;
        tracker.track_query("s2", "q2", &["b".to_string()], None).await;
        assert_eq!(tracker.get_shown_memory_ids("s1").await, vec!["a"]);
        assert_eq!(tracker.get_shown_memory_ids("s2").await, vec!["b"]);
        assert_eq!(tracker.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_expired_sessions_are_dropped() {
        let tracker = ConversationTracker::new(3, 10, Duration::from_secs(0));
        tracker.track_query("s1", "q", &[], None).await;
        // TTL of zero expires the session on the next access.
        tracker.get_recent_queries("s2").await;
        assert!(tracker.get_shown_memory_ids("s1").await.is_empty());
    }
}
