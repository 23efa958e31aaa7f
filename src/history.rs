//! Conversation history and per-session rate limiting
//!
//! Both stores are keyed by session id and must tolerate concurrent access
//! across simultaneous sessions. The store is injected into the pipeline as
//! a trait object so tests run against the in-memory implementation and a
//! persistent backend can be swapped in without touching the orchestrator.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::models::ChatTurn;

/// Session-scoped conversation history
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Full retained history for a session, oldest turn first
    async fn history(&self, session_id: &str) -> Vec<ChatTurn>;

    /// Append a completed question/answer exchange, trimming to the
    /// retention bound
    async fn append_exchange(&self, session_id: &str, question: &str, answer: &str);

    /// Drop all history for a session
    async fn clear(&self, session_id: &str);
}

/// In-memory conversation store backed by a concurrent map
pub struct InMemoryConversationStore {
    sessions: DashMap<String, Vec<ChatTurn>>,
    retention_turns: usize,
}

impl InMemoryConversationStore {
    pub fn new(retention_turns: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            retention_turns,
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn history(&self, session_id: &str) -> Vec<ChatTurn> {
        self.sessions
            .get(session_id)
            .map(|turns| turns.clone())
            .unwrap_or_default()
    }

    async fn append_exchange(&self, session_id: &str, question: &str, answer: &str) {
        let mut turns = self.sessions.entry(session_id.to_string()).or_default();
        turns.push(ChatTurn::user(question));
        turns.push(ChatTurn::assistant(answer));

        // FIFO eviction beyond the retention bound
        if turns.len() > self.retention_turns {
            let excess = turns.len() - self.retention_turns;
            turns.drain(..excess);
        }

        debug!(
            "Saved exchange for session {session_id} ({} turns retained)",
            turns.len()
        );
    }

    async fn clear(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

/// Simple per-session request counter for quota enforcement
pub struct SessionRateLimiter {
    counts: DashMap<String, u32>,
    max_requests: u32,
}

impl SessionRateLimiter {
    pub fn new(max_requests: u32) -> Self {
        Self {
            counts: DashMap::new(),
            max_requests,
        }
    }

    /// Count one request against the session's quota. Returns `false` once
    /// the quota is exhausted; exhausted sessions are not counted further.
    pub fn check_and_increment(&self, session_id: &str) -> bool {
        let mut count = self.counts.entry(session_id.to_string()).or_insert(0);
        if *count >= self.max_requests {
            tracing::warn!("Rate limit reached for session {session_id}");
            return false;
        }
        *count += 1;
        debug!("Rate limit: {}/{} for {session_id}", *count, self.max_requests);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_history_empty_for_unknown_session() {
        let store = InMemoryConversationStore::new(20);
        assert!(store.history("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn test_append_keeps_exchange_order() {
        let store = InMemoryConversationStore::new(20);
        store.append_exchange("s1", "first question", "first answer").await;
        store.append_exchange("s1", "second question", "second answer").await;

        let turns = store.history("s1").await;
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].content, "first question");
        assert_eq!(turns[3].content, "second answer");
    }

    #[tokio::test]
    async fn test_retention_bound_keeps_most_recent() {
        let store = InMemoryConversationStore::new(20);
        for i in 0..30 {
            store
                .append_exchange("s1", &format!("q{i}"), &format!("a{i}"))
                .await;
        }

        let turns = store.history("s1").await;
        assert_eq!(turns.len(), 20);
        // 30 exchanges = 60 turns; the retained window starts at exchange 20
        assert_eq!(turns[0].content, "q20");
        assert_eq!(turns[19].content, "a29");
    }

    #[tokio::test]
    async fn test_sessions_do_not_interfere() {
        let store = InMemoryConversationStore::new(20);
        store.append_exchange("s1", "q", "a").await;
        store.append_exchange("s2", "other", "answer").await;
        store.clear("s1").await;

        assert!(store.history("s1").await.is_empty());
        assert_eq!(store.history("s2").await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_lose_turns() {
        let store = Arc::new(InMemoryConversationStore::new(1000));
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .append_exchange("shared", &format!("q{i}"), &format!("a{i}"))
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.history("shared").await.len(), 100);
    }

    #[test]
    fn test_rate_limiter_enforces_quota() {
        let limiter = SessionRateLimiter::new(3);
        assert!(limiter.check_and_increment("s1"));
        assert!(limiter.check_and_increment("s1"));
        assert!(limiter.check_and_increment("s1"));
        assert!(!limiter.check_and_increment("s1"));
        // Other sessions keep their own budget
        assert!(limiter.check_and_increment("s2"));
    }
}
