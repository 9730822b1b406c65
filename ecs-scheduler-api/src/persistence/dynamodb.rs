//! DynamoDB-compatible key-value table backend.
//!
//! Speaks the DynamoDB JSON 1.0 POST protocol. Items hold the job id under
//! `job-id` and the JSON payload as a string under `json-data`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{merge_document, JobStore, StoreError, StoreResult};

const KEY_NAME: &str = "job-id";
const DATA_NAME: &str = "json-data";

pub struct DynamoDbStore {
    client: reqwest::Client,
    endpoint: String,
    table: String,
}

impl DynamoDbStore {
    pub fn new(endpoint: String, table: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            table,
        }
    }

    /// Create the table when it does not exist yet.
    pub async fn ensure_table(&self) -> StoreResult<()> {
        let describe = self
            .call("DescribeTable", &json!({"TableName": self.table}))
            .await;
        if describe.is_ok() {
            return Ok(());
        }
        warn!("DynamoDB table not found; creating table \"{}\"", self.table);
        self.call(
            "CreateTable",
            &json!({
                "TableName": self.table,
                "AttributeDefinitions": [{"AttributeName": KEY_NAME, "AttributeType": "S"}],
                "KeySchema": [{"AttributeName": KEY_NAME, "KeyType": "HASH"}],
                "ProvisionedThroughput": {"ReadCapacityUnits": 5, "WriteCapacityUnits": 5},
            }),
        )
        .await?;
        Ok(())
    }

    async fn call(&self, target: &str, body: &Value) -> StoreResult<Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Amz-Target", format!("DynamoDB_20120810.{target}"))
            .header("Content-Type", "application/x-amz-json-1.0")
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "DynamoDB {target} failed: HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    fn parse_item(item: &Value) -> StoreResult<(String, Value)> {
        let job_id = item[KEY_NAME]["S"]
            .as_str()
            .ok_or_else(|| StoreError::Backend("item is missing its key attribute".to_string()))?;
        let data = item[DATA_NAME]["S"]
            .as_str()
            .ok_or_else(|| StoreError::Backend("item is missing its data attribute".to_string()))?;
        Ok((job_id.to_string(), serde_json::from_str(data)?))
    }

    async fn store_item(&self, job_id: &str, data: &Value) -> StoreResult<()> {
        self.call(
            "PutItem",
            &json!({
                "TableName": self.table,
                "Item": {
                    KEY_NAME: {"S": job_id},
                    DATA_NAME: {"S": serde_json::to_string(data)?},
                },
            }),
        )
        .await?;
        Ok(())
    }

    async fn get_item(&self, job_id: &str) -> StoreResult<Value> {
        let response = self
            .call(
                "GetItem",
                &json!({
                    "TableName": self.table,
                    "Key": {KEY_NAME: {"S": job_id}},
                }),
            )
            .await?;
        let item = response
            .get("Item")
            .ok_or_else(|| StoreError::Backend(format!("no stored item for id {job_id}")))?;
        Self::parse_item(item).map(|(_, data)| data)
    }
}

#[async_trait]
impl JobStore for DynamoDbStore {
    async fn load_all(&self) -> StoreResult<Vec<Value>> {
        info!("Loading jobs from DynamoDB table {}...", self.table);
        let mut records = Vec::new();
        let mut exclusive_start: Option<Value> = None;
        loop {
            let mut body = json!({"TableName": self.table});
            if let Some(key) = &exclusive_start {
                body["ExclusiveStartKey"] = key.clone();
            }
            let batch = self.call("Scan", &body).await?;
            for item in batch["Items"].as_array().unwrap_or(&Vec::new()) {
                let (job_id, mut doc) = Self::parse_item(item)?;
                if let Value::Object(map) = &mut doc {
                    map.insert("id".to_string(), json!(job_id));
                }
                records.push(doc);
            }
            exclusive_start = batch.get("LastEvaluatedKey").cloned();
            if exclusive_start.is_none() {
                break;
            }
        }
        Ok(records)
    }

    async fn create(&self, job_id: &str, job_data: &Value) -> StoreResult<()> {
        self.store_item(job_id, job_data).await
    }

    async fn update(&self, job_id: &str, job_data: &Value) -> StoreResult<()> {
        let mut current = self.get_item(job_id).await?;
        merge_document(&mut current, job_data);
        self.store_item(job_id, &current).await
    }

    async fn delete(&self, job_id: &str) -> StoreResult<()> {
        self.call(
            "DeleteItem",
            &json!({
                "TableName": self.table,
                "Key": {KEY_NAME: {"S": job_id}},
            }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_item() {
        let item = json!({
            "job-id": {"S": "alpha"},
            "json-data": {"S": "{\"taskCount\":3}"},
        });
        let (job_id, data) = DynamoDbStore::parse_item(&item).unwrap();
        assert_eq!(job_id, "alpha");
        assert_eq!(data["taskCount"], 3);
    }

    #[test]
    fn test_parse_item_missing_attributes() {
        assert!(DynamoDbStore::parse_item(&json!({})).is_err());
        assert!(DynamoDbStore::parse_item(&json!({"job-id": {"S": "a"}})).is_err());
    }
}
