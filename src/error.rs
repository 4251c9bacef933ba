use thiserror::Error;

use crate::queue::QueueError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum KickerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("stats listener error: {0}")]
    StatsListener(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KickerError>;
