//! TTL-bounded per-message-id dedup set.
//!
//! `set` is a conditional create on `(job_id, "throttle")` whose payload is
//! the unix-seconds expiry `now + retention_period`; a conflict means the
//! message was already seen inside the retention window and maps to
//! [`ThrottleError::Duplicate`]. Records are never unset on the job path;
//! the sweeper reclaims them after expiry, so a crashed instance still yields
//! its dedup slot eventually.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::store::{ConditionalStore, RecordKind, StoreError, StoreKey};

/// How often the sweeper looks for expired throttle records.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// The sweeper consumes at most one fifth of the table's write capacity.
pub const DELETE_CAPACITY_RATE: i64 = 5;

/// Pause between delete batches within one sweep.
pub const BATCH_PAUSE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ThrottleError {
    #[error("duplicated message id")]
    Duplicate,

    #[error("throttle store error: {0}")]
    Store(StoreError),
}

#[async_trait]
pub trait Throttle: Send + Sync {
    async fn set(&self, job_id: &str) -> Result<(), ThrottleError>;
    async fn unset(&self, job_id: &str) -> Result<(), ThrottleError>;
}

/// Default throttle used when no backend is configured. Every call succeeds
/// and nothing is ever deduplicated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullThrottle;

#[async_trait]
impl Throttle for NullThrottle {
    async fn set(&self, _job_id: &str) -> Result<(), ThrottleError> {
        Ok(())
    }

    async fn unset(&self, _job_id: &str) -> Result<(), ThrottleError> {
        Ok(())
    }
}

/// Throttle over a conditional key-value store.
pub struct KvThrottle {
    store: Arc<dyn ConditionalStore>,
    retention_period: Duration,
}

impl KvThrottle {
    pub fn new(store: Arc<dyn ConditionalStore>, retention_period: Duration) -> Self {
        Self {
            store,
            retention_period,
        }
    }
}

#[async_trait]
impl Throttle for KvThrottle {
    async fn set(&self, job_id: &str) -> Result<(), ThrottleError> {
        let expires_at = Utc::now().timestamp() + self.retention_period.as_secs() as i64;

        match self
            .store
            .create(StoreKey::throttle(job_id), &expires_at.to_string())
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::AlreadyExists { .. }) => Err(ThrottleError::Duplicate),
            Err(err) => Err(ThrottleError::Store(err)),
        }
    }

    async fn unset(&self, job_id: &str) -> Result<(), ThrottleError> {
        self.store
            .remove(StoreKey::throttle(job_id))
            .await
            .map_err(ThrottleError::Store)
    }
}

/// Periodic garbage collector for expired throttle records.
pub struct Sweeper {
    store: Arc<dyn ConditionalStore>,
    batch: usize,
}

impl Sweeper {
    /// Reads the store's write capacity once and derives the delete batch
    /// size from it. A capacity query failure here is fatal to startup.
    pub async fn new(store: Arc<dyn ConditionalStore>) -> Result<Self, StoreError> {
        let capacity = store.write_capacity().await?;
        let batch = if capacity < DELETE_CAPACITY_RATE {
            1
        } else {
            (capacity / DELETE_CAPACITY_RATE) as usize
        };

        Ok(Self { store, batch })
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    /// Run hourly sweeps until the token is cancelled.
    pub async fn run(self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("stopping throttle sweeper");
                    return;
                }
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// One sweep: query expired ids, then delete them in batches with a pause
    /// between batches. A delete failure re-queues the id into the remaining
    /// work set; the sweep ends when the set empties.
    pub async fn sweep_once(&self) {
        let cutoff = Utc::now().timestamp();
        let mut work = match self.store.expired(RecordKind::Throttle, cutoff).await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(error = %err, "failed to query expired throttle records");
                return;
            }
        };

        if work.is_empty() {
            return;
        }

        tracing::info!(expired = work.len(), batch = self.batch, "sweeping throttle records");

        loop {
            let take = self.batch.min(work.len());
            let chunk: Vec<String> = work.drain(..take).collect();

            for id in chunk {
                if let Err(err) = self.store.remove(StoreKey::throttle(&id)).await {
                    tracing::warn!(job_id = %id, error = %err, "failed to delete throttle record, re-queueing");
                    work.push(id);
                }
            }

            if work.is_empty() {
                break;
            }

            tokio::time::sleep(BATCH_PAUSE).await;
        }
    }
}
