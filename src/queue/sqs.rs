//! AWS SQS implementation of the queue contract.

use std::time::Duration;

use aws_sdk_sqs::types::{Message, MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{MessageQueue, QueueError, QueueMessage, ReceiveOptions};

/// Build the queue URL from account coordinates.
pub fn queue_url(region: &str, account_id: &str, queue_name: &str) -> String {
    format!(
        "https://sqs.{}.amazonaws.com/{}/{}",
        region, account_id, queue_name
    )
}

pub struct SqsQueue {
    client: Client,
    url: String,
}

impl SqsQueue {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn to_queue_message(msg: &Message) -> Result<QueueMessage, QueueError> {
        let id = msg
            .message_id()
            .ok_or_else(|| QueueError::Attribute("MessageId".into()))?
            .to_string();
        let receipt = msg
            .receipt_handle()
            .ok_or_else(|| QueueError::Attribute("ReceiptHandle".into()))?
            .to_string();
        let body = msg
            .body()
            .ok_or_else(|| QueueError::Attribute("Body".into()))?
            .to_string();

        let sent_millis: i64 = msg
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::SentTimestamp))
            .ok_or_else(|| QueueError::Attribute("SentTimestamp".into()))?
            .parse()
            .map_err(|_| QueueError::Attribute("SentTimestamp".into()))?;
        let sent_at = DateTime::<Utc>::from_timestamp_millis(sent_millis)
            .ok_or_else(|| QueueError::Attribute("SentTimestamp".into()))?;

        Ok(QueueMessage {
            id,
            receipt,
            body,
            sent_at,
        })
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn receive(&self, opts: &ReceiveOptions) -> Result<Vec<QueueMessage>, QueueError> {
        let out = self
            .client
            .receive_message()
            .queue_url(&self.url)
            .max_number_of_messages(opts.max_messages)
            .wait_time_seconds(opts.wait_time.as_secs() as i32)
            .visibility_timeout(opts.visibility_timeout.as_secs() as i32)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|err| QueueError::Io(err.into_service_error().to_string()))?;

        out.messages().iter().map(Self::to_queue_message).collect()
    }

    async fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|err| QueueError::Io(err.into_service_error().to_string()))?;

        Ok(())
    }

    async fn retention_period(&self) -> Result<Duration, QueueError> {
        let out = self
            .client
            .get_queue_attributes()
            .queue_url(&self.url)
            .attribute_names(QueueAttributeName::MessageRetentionPeriod)
            .send()
            .await
            .map_err(|err| QueueError::Io(err.into_service_error().to_string()))?;

        let seconds: u64 = out
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::MessageRetentionPeriod))
            .ok_or_else(|| QueueError::Attribute("MessageRetentionPeriod".into()))?
            .parse()
            .map_err(|_| QueueError::Attribute("MessageRetentionPeriod".into()))?;

        Ok(Duration::from_secs(seconds))
    }
}
