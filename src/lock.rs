//! Cross-instance per-lock-id mutual exclusion.
//!
//! A lock record is a conditional create on `(lock_id, "lock")` holding the
//! event id of the current holder; at most one create succeeds per lock id
//! until a release. Unlock deletes the record unconditionally, so unlocking
//! an unheld lock is a no-op.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::store::{ConditionalStore, StoreError, StoreKey};

#[derive(Error, Debug)]
pub enum LockError {
    #[error("already locked: {lock_id}")]
    AlreadyLocked { lock_id: String },

    #[error("lock store error: {0}")]
    Store(StoreError),
}

#[async_trait]
pub trait Locker: Send + Sync {
    async fn lock(&self, lock_id: &str, event_id: &str) -> Result<(), LockError>;
    async fn unlock(&self, lock_id: &str) -> Result<(), LockError>;
}

/// Default locker used when no backend is configured. Every call succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLocker;

#[async_trait]
impl Locker for NullLocker {
    async fn lock(&self, _lock_id: &str, _event_id: &str) -> Result<(), LockError> {
        Ok(())
    }

    async fn unlock(&self, _lock_id: &str) -> Result<(), LockError> {
        Ok(())
    }
}

/// Locker over a conditional key-value store.
pub struct KvLocker {
    store: Arc<dyn ConditionalStore>,
}

impl KvLocker {
    pub fn new(store: Arc<dyn ConditionalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Locker for KvLocker {
    async fn lock(&self, lock_id: &str, event_id: &str) -> Result<(), LockError> {
        match self.store.create(StoreKey::lock(lock_id), event_id).await {
            Ok(()) => Ok(()),
            Err(StoreError::AlreadyExists { .. }) => Err(LockError::AlreadyLocked {
                lock_id: lock_id.to_string(),
            }),
            Err(err) => Err(LockError::Store(err)),
        }
    }

    async fn unlock(&self, lock_id: &str) -> Result<(), LockError> {
        self.store
            .remove(StoreKey::lock(lock_id))
            .await
            .map_err(LockError::Store)
    }
}
