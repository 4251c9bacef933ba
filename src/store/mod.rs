//! Conditional key-value store contract.
//!
//! The lock and throttle layers are built on a store that supports a
//! conditional create: a put that succeeds only when no record exists for the
//! key, and signals the conflict distinguishably. Records are keyed by an id
//! plus a record kind, and throttle records carry a unix-seconds expiry that
//! a secondary index makes sweepable.

pub mod dynamo;

use async_trait::async_trait;
use thiserror::Error;

pub use dynamo::DynamoStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Lock,
    Throttle,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Lock => "lock",
            RecordKind::Throttle => "throttle",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StoreKey<'a> {
    pub id: &'a str,
    pub kind: RecordKind,
}

impl<'a> StoreKey<'a> {
    pub fn lock(id: &'a str) -> Self {
        Self {
            id,
            kind: RecordKind::Lock,
        }
    }

    pub fn throttle(id: &'a str) -> Self {
        Self {
            id,
            kind: RecordKind::Throttle,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// The conditional create lost: a record already exists for the key.
    #[error("record already exists: {id} ({kind})")]
    AlreadyExists { id: String, kind: RecordKind },

    #[error("store i/o error: {0}")]
    Io(String),
}

#[async_trait]
pub trait ConditionalStore: Send + Sync {
    /// Create a record for `key` holding `payload`, only if none exists.
    /// Returns [`StoreError::AlreadyExists`] when the condition fails.
    async fn create(&self, key: StoreKey<'_>, payload: &str) -> Result<(), StoreError>;

    /// Delete the record for `key` unconditionally. Deleting a missing record
    /// is not an error.
    async fn remove(&self, key: StoreKey<'_>) -> Result<(), StoreError>;

    /// Ids of records of `kind` whose expiry payload is at or before `cutoff`
    /// (unix seconds).
    async fn expired(&self, kind: RecordKind, cutoff: i64) -> Result<Vec<String>, StoreError>;

    /// The store's declared write capacity units.
    async fn write_capacity(&self) -> Result<i64, StoreError>;
}
