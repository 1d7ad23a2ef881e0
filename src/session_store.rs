//! Volatile session store with TTL expiry

use crate::error::SessionStoreError;
use crate::model::UserId;
use crate::runtime::SessionStore;
use crate::state_machine::Session;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Sessions kept in process memory.
///
/// Expired sessions read as not found even before the sweeper removes them.
#[derive(Debug, Default, Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<Mutex<HashMap<UserId, Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<UserId, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Remove every session expired at `now`, returning how many were dropped
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired_at(now));
        before - sessions.len()
    }

    /// Periodically purge expired sessions until `shutdown` fires
    pub fn spawn_expiry_sweeper(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = store.purge_expired(Utc::now());
                        if purged > 0 {
                            tracing::debug!(purged, "Expired sessions removed");
                        }
                    }
                }
            }
            tracing::debug!("Session expiry sweeper stopped");
        })
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, user_id: UserId) -> Result<Session, SessionStoreError> {
        self.sessions()
            .get(&user_id)
            .filter(|session| !session.is_expired_at(Utc::now()))
            .cloned()
            .ok_or(SessionStoreError::NotFound(user_id))
    }

    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        self.sessions().insert(session.user_id, session.clone());
        Ok(())
    }

    async fn expire(&self, user_id: UserId) -> Result<(), SessionStoreError> {
        self.sessions().remove(&user_id);
        Ok(())
    }
}
