use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType, TableStatus,
};
use aws_sdk_dynamodb::Client;
use dashmap::DashMap;
use tracing::{debug, info};

use super::CheckpointStore;
use crate::error::{Error, Result};

const SHARD_KEY: &str = "ShardID";
const CHECKPOINT_ATTRIBUTE: &str = "Checkpoint";
const OWNER_ATTRIBUTE: &str = "AssignedTo";

const TABLE_WAIT_ATTEMPTS: usize = 60;
const TABLE_WAIT_INTERVAL: Duration = Duration::from_secs(1);

/// Checkpoints kept in a DynamoDB table with one item per shard.
///
/// Positions already read or written are served from memory; the worker
/// owning this store is the only writer for its shards.
pub struct DynamoCheckpointStore {
    client: Client,
    table_name: String,
    worker_id: String,
    positions: DashMap<String, String>,
}

impl DynamoCheckpointStore {
    pub fn new(
        client: Client,
        table_name: impl Into<String>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            worker_id: worker_id.into(),
            positions: DashMap::new(),
        }
    }

    /// Creates the table if it is missing and waits for it to become active.
    pub async fn ensure_table(&self) -> Result<()> {
        if let Err(e) = self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
        {
            let err = e.into_service_error();
            if !err.is_resource_not_found_exception() {
                return Err(Error::checkpoint(err));
            }
            self.create_table().await?;
        }

        self.wait_until_active().await
    }

    async fn create_table(&self) -> Result<()> {
        info!(table = %self.table_name, "Creating checkpoint table");

        let attribute = AttributeDefinition::builder()
            .attribute_name(SHARD_KEY)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(Error::checkpoint)?;
        let key = KeySchemaElement::builder()
            .attribute_name(SHARD_KEY)
            .key_type(KeyType::Hash)
            .build()
            .map_err(Error::checkpoint)?;

        let created = self
            .client
            .create_table()
            .table_name(&self.table_name)
            .attribute_definitions(attribute)
            .key_schema(key)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = e.into_service_error();
                if err.is_resource_in_use_exception() {
                    Ok(())
                } else {
                    Err(Error::checkpoint(err))
                }
            }
        }
    }

    async fn wait_until_active(&self) -> Result<()> {
        for _ in 0..TABLE_WAIT_ATTEMPTS {
            let output = self
                .client
                .describe_table()
                .table_name(&self.table_name)
                .send()
                .await
                .map_err(Error::checkpoint)?;

            if output.table().and_then(|t| t.table_status()) == Some(&TableStatus::Active) {
                return Ok(());
            }
            tokio::time::sleep(TABLE_WAIT_INTERVAL).await;
        }

        Err(Error::Checkpoint(format!(
            "table {} did not become active",
            self.table_name
        )))
    }
}

#[async_trait]
impl CheckpointStore for DynamoCheckpointStore {
    async fn get(&self, shard_id: &str) -> Result<Option<String>> {
        let cached = self.positions.get(shard_id).map(|p| p.value().clone());
        if cached.is_some() {
            return Ok(cached);
        }

        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(SHARD_KEY, AttributeValue::S(shard_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(Error::checkpoint)?;

        let position = output
            .item()
            .and_then(|item| item.get(CHECKPOINT_ATTRIBUTE))
            .and_then(|value| value.as_s().ok())
            .cloned();

        if let Some(position) = &position {
            self.positions.insert(shard_id.to_string(), position.clone());
        }
        Ok(position)
    }

    async fn put(&self, shard_id: &str, sequence_number: &str) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .item(SHARD_KEY, AttributeValue::S(shard_id.to_string()))
            .item(CHECKPOINT_ATTRIBUTE, AttributeValue::S(sequence_number.to_string()))
            .item(OWNER_ATTRIBUTE, AttributeValue::S(self.worker_id.clone()))
            .send()
            .await
            .map_err(Error::checkpoint)?;

        debug!(
            table = %self.table_name,
            shard_id = %shard_id,
            position = %sequence_number,
            "Checkpoint stored"
        );
        self.positions
            .insert(shard_id.to_string(), sequence_number.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::config::{BehaviorVersion, Credentials, Region};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TABLE: &str = "orders-source";
    const SHARD: &str = "shardId-000000000000";
    const AMZ_JSON: &str = "application/x-amz-json-1.0";

    fn store(server: &MockServer) -> DynamoCheckpointStore {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-west-2"))
            .endpoint_url(server.uri())
            .credentials_provider(Credentials::new("test", "test", None, None, "test"))
            .build();
        DynamoCheckpointStore::new(Client::from_conf(config), TABLE, "orders-source")
    }

    fn target(operation: &str) -> wiremock::matchers::HeaderExactMatcher {
        header("x-amz-target", format!("DynamoDB_20120810.{}", operation).as_str())
    }

    fn ok(body: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.to_string(), AMZ_JSON)
    }

    #[tokio::test]
    async fn test_get_reads_stored_checkpoint_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(target("GetItem"))
            .and(body_partial_json(json!({
                "TableName": TABLE,
                "Key": {"ShardID": {"S": SHARD}}
            })))
            .respond_with(ok(json!({
                "Item": {"ShardID": {"S": SHARD}, "Checkpoint": {"S": "1234567"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store(&server);
        assert_eq!(store.get(SHARD).await.unwrap().as_deref(), Some("1234567"));
        assert_eq!(store.get(SHARD).await.unwrap().as_deref(), Some("1234567"));
    }

    #[tokio::test]
    async fn test_get_unknown_shard() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(target("GetItem"))
            .respond_with(ok(json!({})))
            .mount(&server)
            .await;

        assert_eq!(store(&server).get(SHARD).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_writes_item() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(target("PutItem"))
            .and(body_partial_json(json!({
                "TableName": TABLE,
                "Item": {
                    "ShardID": {"S": SHARD},
                    "Checkpoint": {"S": "1234567"},
                    "AssignedTo": {"S": "orders-source"}
                }
            })))
            .respond_with(ok(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(target("GetItem"))
            .respond_with(ok(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let store = store(&server);
        store.put(SHARD, "1234567").await.unwrap();
        assert_eq!(store.get(SHARD).await.unwrap().as_deref(), Some("1234567"));
    }

    #[tokio::test]
    async fn test_ensure_table_creates_missing_table() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(target("DescribeTable"))
            .respond_with(ResponseTemplate::new(400).set_body_raw(
                json!({
                    "__type": "com.amazonaws.dynamodb.v20120810#ResourceNotFoundException",
                    "message": "Requested resource not found"
                })
                .to_string(),
                AMZ_JSON,
            ))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(target("DescribeTable"))
            .respond_with(ok(json!({
                "Table": {"TableName": TABLE, "TableStatus": "ACTIVE"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(target("CreateTable"))
            .and(body_partial_json(json!({
                "TableName": TABLE,
                "KeySchema": [{"AttributeName": "ShardID", "KeyType": "HASH"}],
                "BillingMode": "PAY_PER_REQUEST"
            })))
            .respond_with(ok(json!({
                "TableDescription": {"TableName": TABLE, "TableStatus": "CREATING"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        store(&server).ensure_table().await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_table_keeps_existing_table() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(target("DescribeTable"))
            .respond_with(ok(json!({
                "Table": {"TableName": TABLE, "TableStatus": "ACTIVE"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(target("CreateTable"))
            .respond_with(ok(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        store(&server).ensure_table().await.unwrap();
    }
}
