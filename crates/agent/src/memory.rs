use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

/// One conversation turn held in working memory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryTurn {
    pub role: String,
    pub content: String,
    pub timestamp_ms: i64,
}

impl MemoryTurn {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Session-scoped context store the runtime appends conversation turns to.
/// An external collaborator in production (TTL-bearing store); the in-memory
/// implementation below backs tests and the standalone daemon.
#[async_trait]
pub trait WorkingMemory: Send + Sync {
    async fn append(&self, session: &str, turn: MemoryTurn);
    async fn turns(&self, session: &str) -> Vec<MemoryTurn>;
}

pub struct InMemoryWorkingMemory {
    limit_per_session: usize,
    sessions: Mutex<HashMap<String, Vec<MemoryTurn>>>,
}

impl InMemoryWorkingMemory {
    pub fn new(limit_per_session: usize) -> Self {
        Self {
            limit_per_session,
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl WorkingMemory for InMemoryWorkingMemory {
    async fn append(&self, session: &str, turn: MemoryTurn) {
        let mut sessions = self.sessions.lock().expect("memory lock poisoned");
        let turns = sessions.entry(session.to_string()).or_default();
        turns.push(turn);
        let excess = turns.len().saturating_sub(self.limit_per_session);
        if excess > 0 {
            turns.drain(..excess);
        }
    }

    async fn turns(&self, session: &str) -> Vec<MemoryTurn> {
        self.sessions
            .lock()
            .expect("memory lock poisoned")
            .get(session)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_turns_are_bounded_per_session() {
        let memory = InMemoryWorkingMemory::new(2);
        for i in 0..4 {
            memory
                .append("s1", MemoryTurn::new("user", &format!("m{}", i)))
                .await;
        }
        let turns = memory.turns("s1").await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "m2");
        assert!(memory.turns("other").await.is_empty());
    }
}
