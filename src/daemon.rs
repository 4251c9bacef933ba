//! Supervisor: wires the queue, lock, throttle, worker pool and stats server
//! together and performs ordered shutdown.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::ingest::Ingester;
use crate::lock::{Locker, NullLocker};
use crate::queue::MessageQueue;
use crate::stats::{self, Stats};
use crate::throttle::{NullThrottle, Sweeper, Throttle};
use crate::worker::Worker;

pub struct Daemon {
    config: Config,
    queue: Arc<dyn MessageQueue>,
    locker: Arc<dyn Locker>,
    throttle: Arc<dyn Throttle>,
    sweeper: Option<Sweeper>,
    stats: Arc<Stats>,
}

impl Daemon {
    /// Build a daemon with the null lock and throttle implementations; call
    /// the setters to install real backends.
    pub fn new(config: Config, queue: Arc<dyn MessageQueue>) -> Self {
        let capacity = if config.kicker.max_concurrent_num == 0 {
            crate::config::DEFAULT_MAX_CONCURRENT_NUM
        } else {
            config.kicker.max_concurrent_num
        };

        Self {
            config,
            queue,
            locker: Arc::new(NullLocker),
            throttle: Arc::new(NullThrottle),
            sweeper: None,
            stats: Arc::new(Stats::new(capacity)),
        }
    }

    pub fn set_locker(&mut self, locker: Arc<dyn Locker>) {
        self.locker = locker;
    }

    pub fn set_throttle(&mut self, throttle: Arc<dyn Throttle>) {
        self.throttle = throttle;
    }

    pub fn set_sweeper(&mut self, sweeper: Sweeper) {
        self.sweeper = Some(sweeper);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// Run until `token` is cancelled and the pipeline has drained.
    ///
    /// Cancellation is cooperative: the ingester stops polling and closes the
    /// job channel, workers finish their in-flight jobs and exit, then the
    /// stats server and the throttle sweeper are stopped.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        self.config.validate()?;

        let listener = stats::bind(&self.config.kicker).await?;

        // Stats server and sweeper outlive the drain; they get their own
        // token, cancelled after the workers exit.
        let aux_token = CancellationToken::new();
        let stats_handle = tokio::spawn(stats::serve(
            listener,
            self.stats.clone(),
            aux_token.clone(),
        ));
        let sweeper_handle = self
            .sweeper
            .map(|sweeper| tokio::spawn(sweeper.run(aux_token.clone())));

        let (jobs_tx, jobs_rx) = async_channel::bounded(1);

        let ingester = Ingester::new(
            self.queue.clone(),
            jobs_tx,
            self.config.kicker.life_time_trigger.clone(),
        );

        let mut handles = Vec::with_capacity(self.stats.capacity() + 1);
        handles.push(tokio::spawn(ingester.run(token.clone())));

        for worker_id in 0..self.stats.capacity() {
            let worker = Worker::new(
                worker_id,
                jobs_rx.clone(),
                self.stats.clone(),
                self.locker.clone(),
                self.throttle.clone(),
            );
            handles.push(tokio::spawn(worker.run()));
        }
        drop(jobs_rx);

        for result in futures::future::join_all(handles).await {
            if let Err(err) = result {
                tracing::error!(error = %err, "task panicked");
            }
        }
        tracing::info!("stopped job kicker daemon");

        aux_token.cancel();
        let _ = stats_handle.await;
        if let Some(handle) = sweeper_handle {
            let _ = handle.await;
        }

        Ok(())
    }
}
