//! DynamoDB-backed conditional store.
//!
//! One table holds both lock and throttle records, keyed by `(Id, Type)`.
//! The conditional create is an `UpdateItem` guarded by
//! `attribute_not_exists(...)` on the payload attribute, which is what makes
//! the cross-instance mutex and the dedup marker race-free: DynamoDB
//! linearizes the conditional writes and reports the losing write as a
//! conditional check failure.

use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;

use async_trait::async_trait;

use super::{ConditionalStore, RecordKind, StoreError, StoreKey};

/// Secondary index over `(Type, Expired)` used by the throttle sweeper.
pub const GLOBAL_SECONDARY_INDEX: &str = "TypeExpiredIndex";

pub struct DynamoStore {
    client: Client,
    table: String,
}

impl DynamoStore {
    pub fn new(client: Client, table: String) -> Self {
        Self { client, table }
    }

    fn payload_attr(kind: RecordKind) -> &'static str {
        match kind {
            RecordKind::Lock => "EventId",
            RecordKind::Throttle => "Expired",
        }
    }

    fn payload_value(kind: RecordKind, payload: &str) -> AttributeValue {
        match kind {
            RecordKind::Lock => AttributeValue::S(payload.to_string()),
            RecordKind::Throttle => AttributeValue::N(payload.to_string()),
        }
    }
}

#[async_trait]
impl ConditionalStore for DynamoStore {
    async fn create(&self, key: StoreKey<'_>, payload: &str) -> Result<(), StoreError> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("Id", AttributeValue::S(key.id.to_string()))
            .key("Type", AttributeValue::S(key.kind.as_str().to_string()))
            .expression_attribute_names("#payload", Self::payload_attr(key.kind))
            .expression_attribute_values(":payload", Self::payload_value(key.kind, payload))
            .condition_expression("attribute_not_exists(#payload)")
            .update_expression("SET #payload = :payload")
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_conditional_check_failed_exception() {
                    Err(StoreError::AlreadyExists {
                        id: key.id.to_string(),
                        kind: key.kind,
                    })
                } else {
                    Err(StoreError::Io(service_err.to_string()))
                }
            }
        }
    }

    async fn remove(&self, key: StoreKey<'_>) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .key("Id", AttributeValue::S(key.id.to_string()))
            .key("Type", AttributeValue::S(key.kind.as_str().to_string()))
            .send()
            .await
            .map_err(|err| StoreError::Io(err.into_service_error().to_string()))?;

        Ok(())
    }

    async fn expired(&self, kind: RecordKind, cutoff: i64) -> Result<Vec<String>, StoreError> {
        let out = self
            .client
            .query()
            .table_name(&self.table)
            .index_name(GLOBAL_SECONDARY_INDEX)
            .expression_attribute_names("#type", "Type")
            .expression_attribute_names("#expired", "Expired")
            .expression_attribute_values(":type", AttributeValue::S(kind.as_str().to_string()))
            .expression_attribute_values(":expired", AttributeValue::N(cutoff.to_string()))
            .key_condition_expression("#type = :type AND #expired <= :expired")
            .send()
            .await
            .map_err(|err| StoreError::Io(err.into_service_error().to_string()))?;

        let ids = out
            .items()
            .iter()
            .filter_map(|item| item.get("Id").and_then(|v| v.as_s().ok()).cloned())
            .collect();

        Ok(ids)
    }

    async fn write_capacity(&self) -> Result<i64, StoreError> {
        let out = self
            .client
            .describe_table()
            .table_name(&self.table)
            .send()
            .await
            .map_err(|err| StoreError::Io(err.into_service_error().to_string()))?;

        let capacity = out
            .table()
            .and_then(|t| t.provisioned_throughput())
            .and_then(|p| p.write_capacity_units())
            .ok_or_else(|| {
                StoreError::Io(format!("table {} has no write capacity metadata", self.table))
            })?;

        Ok(capacity)
    }
}
