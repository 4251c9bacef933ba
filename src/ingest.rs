//! Queue ingestion: long-poll the queue, turn messages into jobs, hand them
//! to the worker pool.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::job::Job;
use crate::queue::{MessageQueue, ReceiveOptions};

/// The ingester owns the only sender half of the job channel; dropping it on
/// cancellation is what closes the channel and drains the workers.
pub struct Ingester {
    queue: Arc<dyn MessageQueue>,
    jobs: async_channel::Sender<Job>,
    trigger: String,
}

impl Ingester {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        jobs: async_channel::Sender<Job>,
        trigger: String,
    ) -> Self {
        Self {
            queue,
            jobs,
            trigger,
        }
    }

    /// Poll until cancelled. Receive errors are transient: they are logged
    /// and the loop continues. Messages are deleted after handoff whether or
    /// not they parsed; a malformed message is dropped, not redelivered.
    pub async fn run(self, token: CancellationToken) {
        let opts = ReceiveOptions::default();

        loop {
            if token.is_cancelled() {
                tracing::info!("cancel ingester, closing job channel");
                return;
            }

            let messages = match self.queue.receive(&opts).await {
                Ok(messages) => messages,
                Err(err) => {
                    tracing::error!(error = %err, "failed to receive messages");
                    continue;
                }
            };

            for msg in messages {
                tracing::debug!(
                    message_id = %msg.id,
                    sent_timestamp = %msg.sent_at,
                    body = %msg.body,
                    "received message"
                );

                match Job::from_message(&msg, &self.trigger) {
                    Ok(job) => {
                        // Blocks when the workers are saturated; this is the
                        // backpressure point. Send only fails when every
                        // receiver is gone.
                        if self.jobs.send(job).await.is_err() {
                            tracing::warn!("job channel closed, dropping message");
                        }
                    }
                    Err(err) => {
                        tracing::error!(message_id = %msg.id, error = %err, "failed to parse message");
                    }
                }

                if let Err(err) = self.queue.delete(&msg.receipt).await {
                    tracing::error!(message_id = %msg.id, error = %err, "failed to delete message");
                }
            }
        }
    }
}
