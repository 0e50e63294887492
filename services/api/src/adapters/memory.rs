//! services/api/src/adapters/memory.rs
//!
//! In-process Session Store, used when no Redis URL is configured. Sessions are
//! lost on restart. Expiry is checked on read, and expired entries are pruned on
//! every write.

use async_trait::async_trait;
use bar_bot_core::domain::Session;
use bar_bot_core::ports::{PortResult, SessionStore};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
pub struct InMemorySessionStore {
    entries: Mutex<HashMap<String, (Session, Instant)>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries held, live or not yet pruned.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, phone: &str) -> PortResult<Option<Session>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(phone) {
            Some((session, expires_at)) if *expires_at > Instant::now() => Ok(Some(session.clone())),
            Some(_) => {
                entries.remove(phone);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, phone: &str, session: &Session, ttl: Duration) -> PortResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        // Phones that never come back would otherwise stay forever.
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(phone.to_string(), (session.clone(), now + ttl));
        Ok(())
    }

    async fn delete(&self, phone: &str) -> PortResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(phone);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bar_bot_core::domain::DialogueState;

    #[tokio::test(start_paused = true)]
    async fn sessions_expire_after_their_ttl() {
        let store = InMemorySessionStore::new();
        let session = Session {
            state: DialogueState::Browsing,
            ..Session::fresh()
        };
        store.set("254700000001", &session, Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.get("254700000001").await.unwrap(), Some(session.clone()));

        // Writing again slides the expiry forward.
        store.set("254700000001", &session, Duration::from_secs(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get("254700000001").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("254700000001").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn writing_prunes_sessions_that_never_came_back() {
        let store = InMemorySessionStore::new();
        store.set("254700000001", &Session::fresh(), Duration::from_secs(60)).await.unwrap();
        store.set("254700000002", &Session::fresh(), Duration::from_secs(600)).await.unwrap();
        assert_eq!(store.entry_count(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        store.set("254700000003", &Session::fresh(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.entry_count(), 2);
        assert!(store.get("254700000002").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_removes_the_session() {
        let store = InMemorySessionStore::new();
        store
            .set("254700000001", &Session::fresh(), Duration::from_secs(60))
            .await
            .unwrap();
        store.delete("254700000001").await.unwrap();
        assert!(store.get("254700000001").await.unwrap().is_none());
    }
}
