//! Live worker occupancy and invocation counters, exposed over HTTP.
//!
//! Readings are near-coincident samples of the live counters, not an atomic
//! snapshot; a v2 response can straddle an invocation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::KickerSection;

pub const DEFAULT_STATS_PORT: u16 = 8061;

/// Shared worker occupancy and invocation counters.
///
/// Occupancy is a bounded token set: a worker holds one permit for the length
/// of an execution, so `busy + idle == capacity` at any instant.
pub struct Stats {
    capacity: usize,
    busy: Arc<Semaphore>,
    succeeded: AtomicU64,
    failed: AtomicU64,
    errored: AtomicU64,
}

impl Stats {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            busy: Arc::new(Semaphore::new(capacity)),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            errored: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a busy token for the duration of one execution. The pool size
    /// equals the worker count, so a worker never blocks on its own job.
    pub async fn checkout(&self) -> OwnedSemaphorePermit {
        self.busy
            .clone()
            .acquire_owned()
            .await
            .expect("stats semaphore closed")
    }

    pub fn busy_workers(&self) -> usize {
        self.capacity - self.busy.available_permits()
    }

    pub fn idle_workers(&self) -> usize {
        self.busy.available_permits()
    }

    pub fn incr_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_errored(&self) {
        self.errored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn errored(&self) -> u64 {
        self.errored.load(Ordering::Relaxed)
    }
}

#[derive(Serialize)]
pub struct StatsV1Response {
    idle_worker: u32,
    busy_worker: u32,
}

#[derive(Serialize)]
pub struct WorkerGauges {
    busy: u64,
    idle: u64,
}

#[derive(Serialize)]
pub struct InvocationCounters {
    succeeded: u64,
    failed: u64,
    errored: u64,
}

#[derive(Serialize)]
pub struct StatsV2Response {
    workers: WorkerGauges,
    invocations: InvocationCounters,
}

pub fn router(stats: Arc<Stats>) -> Router {
    Router::new()
        .route("/stats/metrics", get(metrics_v1_handler))
        .route("/stats/metrics/v2", get(metrics_v2_handler))
        .with_state(stats)
}

pub async fn metrics_v1_handler(State(stats): State<Arc<Stats>>) -> Json<StatsV1Response> {
    Json(StatsV1Response {
        idle_worker: stats.idle_workers() as u32,
        busy_worker: stats.busy_workers() as u32,
    })
}

pub async fn metrics_v2_handler(State(stats): State<Arc<Stats>>) -> Json<StatsV2Response> {
    Json(StatsV2Response {
        workers: WorkerGauges {
            busy: stats.busy_workers() as u64,
            idle: stats.idle_workers() as u64,
        },
        invocations: InvocationCounters {
            succeeded: stats.succeeded(),
            failed: stats.failed(),
            errored: stats.errored(),
        },
    })
}

/// Stats API listener: unix domain socket or TCP, never both.
pub enum StatsListener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// Bind the stats listener from the kicker configuration. Binding failures
/// are fatal to startup.
pub async fn bind(kicker: &KickerSection) -> std::io::Result<StatsListener> {
    if !kicker.stats_socket.is_empty() {
        let listener = UnixListener::bind(&kicker.stats_socket)?;
        tracing::info!(socket = %kicker.stats_socket, "stats api listening on unix socket");
        return Ok(StatsListener::Unix(listener));
    }

    let port = if kicker.stats_port == 0 {
        DEFAULT_STATS_PORT
    } else {
        kicker.stats_port
    };
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "stats api listening on tcp");
    Ok(StatsListener::Tcp(listener))
}

/// Serve the stats API until the token is cancelled.
pub async fn serve(listener: StatsListener, stats: Arc<Stats>, token: CancellationToken) {
    let app = router(stats);

    let result = match listener {
        StatsListener::Tcp(l) => {
            axum::serve(l, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        }
        StatsListener::Unix(l) => {
            axum::serve(l, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        }
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "stats server failed");
    }
}
