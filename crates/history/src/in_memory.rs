//! In-memory history log: for tests and `--ephemeral` chats.

use async_trait::async_trait;
use rustedtavern_core::error::HistoryError;
use rustedtavern_core::history::{HistoryEntry, HistoryKey, HistoryLog};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Keeps every stream in a `Vec`. Nothing survives the process.
pub struct InMemoryHistoryLog {
    streams: RwLock<HashMap<HistoryKey, Vec<HistoryEntry>>>,
}

impl InMemoryHistoryLog {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Total records across all streams.
    pub async fn len(&self) -> usize {
        self.streams.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryHistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryLog for InMemoryHistoryLog {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(
        &self,
        key: &HistoryKey,
        user_turn: HistoryEntry,
        reply_turn: HistoryEntry,
    ) -> Result<(), HistoryError> {
        let mut streams = self.streams.write().await;
        let stream = streams.entry(key.clone()).or_default();

        let user_turn = user_turn.not_before(stream.last().map(|e| e.timestamp));
        let reply_turn = reply_turn.not_before(Some(user_turn.timestamp));
        stream.push(user_turn);
        stream.push(reply_turn);
        Ok(())
    }

    async fn read_window(
        &self,
        key: &HistoryKey,
        depth: usize,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let mut streams = self.streams.write().await;
        let stream = streams.entry(key.clone()).or_default();
        let start = stream.len().saturating_sub(depth);
        Ok(stream[start..].to_vec())
    }

    async fn clear(&self, key: &HistoryKey) -> Result<(), HistoryError> {
        if let Some(stream) = self.streams.write().await.get_mut(key) {
            stream.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rustedtavern_core::scope::ScopeId;

    fn key() -> HistoryKey {
        HistoryKey::new(ScopeId::private("7"), "Nia")
    }

    #[tokio::test]
    async fn window_and_clear() {
        let log = InMemoryHistoryLog::new();
        let now = Utc::now();
        for n in 0..3 {
            log.append(
                &key(),
                HistoryEntry::user("Sam", format!("q{n}"), now),
                HistoryEntry::reply("Nia", format!("a{n}"), now),
            )
            .await
            .unwrap();
        }

        let window = log.read_window(&key(), 2).await.unwrap();
        let texts: Vec<&str> = window.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["q2", "a2"]);
        assert_eq!(log.len().await, 6);

        log.clear(&key()).await.unwrap();
        assert!(log.read_window(&key(), 8).await.unwrap().is_empty());
        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn reply_is_never_older_than_user_turn() {
        let log = InMemoryHistoryLog::new();
        let now = Utc::now();
        log.append(
            &key(),
            HistoryEntry::user("Sam", "hi", now),
            HistoryEntry::reply("Nia", "hello", now - Duration::seconds(30)),
        )
        .await
        .unwrap();

        let window = log.read_window(&key(), 2).await.unwrap();
        assert!(window[0].timestamp <= window[1].timestamp);
    }
}
