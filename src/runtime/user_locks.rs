//! Keyed per-user mutual exclusion
//!
//! One event pipeline per user runs at a time; pipelines for different users
//! never wait on each other.

use crate::model::UserId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

type UserMutex = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<UserId, UserMutex>>,
}

/// Held for the duration of one user's pipeline
pub struct UserLockGuard<'a> {
    owner: &'a UserLocks,
    user_id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: UserId) -> UserLockGuard<'_> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(user_id).or_default())
        };
        let guard = mutex.lock_owned().await;
        UserLockGuard {
            owner: self,
            user_id,
            guard: Some(guard),
        }
    }

    /// Number of users with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, user_id: UserId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map holds a reference once nobody waits or holds the lock
        if locks
            .get(&user_id)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&user_id);
        }
    }
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.owner.release(self.user_id);
    }
}
