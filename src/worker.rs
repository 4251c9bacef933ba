//! Fixed-size worker pool consuming from the job channel.

use std::sync::Arc;

use crate::job::{Job, JobError};
use crate::lock::Locker;
use crate::stats::Stats;
use crate::throttle::{Throttle, ThrottleError};

pub struct Worker {
    id: usize,
    jobs: async_channel::Receiver<Job>,
    stats: Arc<Stats>,
    locker: Arc<dyn Locker>,
    throttle: Arc<dyn Throttle>,
}

impl Worker {
    pub fn new(
        id: usize,
        jobs: async_channel::Receiver<Job>,
        stats: Arc<Stats>,
        locker: Arc<dyn Locker>,
        throttle: Arc<dyn Throttle>,
    ) -> Self {
        Self {
            id,
            jobs,
            stats,
            locker,
            throttle,
        }
    }

    /// Read jobs until the channel closes. Each job is first registered with
    /// the throttle; a duplicate is dropped without execution. Other throttle
    /// failures are logged but do not prevent execution.
    pub async fn run(self) {
        tracing::info!(worker_id = self.id, "spawned worker");

        while let Ok(job) = self.jobs.recv().await {
            match self.throttle.set(job.job_id()).await {
                Ok(()) => {}
                Err(ThrottleError::Duplicate) => {
                    tracing::warn!(worker_id = self.id, job_id = %job.job_id(), "duplicated message, dropping job");
                    continue;
                }
                Err(err) => {
                    tracing::error!(worker_id = self.id, job_id = %job.job_id(), error = %err, "throttle set failed");
                }
            }

            self.execute_job(job).await;
        }

        tracing::info!(worker_id = self.id, "terminated worker");
    }

    async fn execute_job(&self, job: Job) {
        let _busy = self.stats.checkout().await;

        tracing::info!(
            worker_id = self.id,
            event_id = %job.event_id(),
            command = %job.command(),
            "CMD"
        );

        match job.execute(self.locker.as_ref()).await {
            Ok(output) => {
                self.stats.incr_succeeded();
                tracing::debug!(
                    event_id = %job.event_id(),
                    output = %String::from_utf8_lossy(&output),
                    "command finished"
                );
            }
            Err(JobError::CommandFailed { status, output }) => {
                self.stats.incr_errored();
                tracing::error!(
                    event_id = %job.event_id(),
                    %status,
                    output = %String::from_utf8_lossy(&output),
                    "error when invoking command"
                );
            }
            Err(err @ JobError::OverLifetime) => {
                self.stats.incr_errored();
                tracing::error!(event_id = %job.event_id(), error = %err, "job expired");
            }
            Err(err) => {
                self.stats.incr_failed();
                tracing::error!(event_id = %job.event_id(), error = %err, "failed to invoke command");
            }
        }
    }
}
