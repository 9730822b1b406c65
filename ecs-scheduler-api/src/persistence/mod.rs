//! Job data store contract and built-in backends.
//!
//! Every backend stores one JSON record per job id and preserves the
//! payload byte-for-byte (modulo key ordering, which is sorted). The
//! backend is chosen from the execution environment by [`resolve`].

mod dynamodb;
mod elasticsearch;
mod s3;
mod sqlite;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::config::Config;

pub use dynamodb::DynamoDbStore;
pub use elasticsearch::ElasticsearchStore;
pub use s3::S3Store;
pub use sqlite::SqliteStore;

/// Errors raised by store backends, wrapped by the registry into
/// `JobError::Persistence`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Uniform persistence contract satisfied by every backend.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load every job record. Each record carries its `id` field.
    async fn load_all(&self) -> StoreResult<Vec<Value>>;

    /// Create a new record for the given id.
    async fn create(&self, job_id: &str, job_data: &Value) -> StoreResult<()>;

    /// Merge the given fields into the existing record.
    async fn update(&self, job_id: &str, job_data: &Value) -> StoreResult<()>;

    /// Remove the record for the given id.
    async fn delete(&self, job_id: &str) -> StoreResult<()>;
}

/// Choose and create a data store from the current execution environment.
///
/// The environment chain wins over the YAML config file; with neither
/// present the null store is used and jobs will not survive a restart.
pub async fn resolve(config: &Config) -> StoreResult<Box<dyn JobStore>> {
    if let Some(db_file) = &config.store.sqlite_file {
        return Ok(Box::new(SqliteStore::connect(db_file).await?));
    }
    if let Some(bucket) = &config.store.s3_bucket {
        return Ok(Box::new(S3Store::new(
            config.s3_endpoint(),
            bucket.clone(),
            config.store.s3_prefix.clone(),
        )));
    }
    if let Some(table) = &config.store.dynamodb_table {
        let store = DynamoDbStore::new(config.dynamodb_endpoint(), table.clone());
        store.ensure_table().await?;
        return Ok(Box::new(store));
    }
    if let Some(index) = &config.store.elasticsearch_index {
        let hosts = config.store.elasticsearch_hosts.clone();
        if hosts.is_empty() {
            return Err(StoreError::Backend(
                "ECSS_ELASTICSEARCH_HOSTS is required with ECSS_ELASTICSEARCH_INDEX".to_string(),
            ));
        }
        let store = ElasticsearchStore::new(hosts, index.clone());
        store.ensure_index().await?;
        return Ok(Box::new(store));
    }

    if let Some(config_file) = &config.store.config_file {
        let contents = std::fs::read_to_string(config_file)?;
        let file: StoreConfigFile = serde_yaml::from_str(&contents)
            .map_err(|e| StoreError::Backend(format!("invalid store config file: {e}")))?;
        if let Some(es) = file.elasticsearch {
            let store = ElasticsearchStore::new(es.hosts, es.index);
            store.ensure_index().await?;
            return Ok(Box::new(store));
        }
    }

    Ok(Box::new(NullStore::new()))
}

#[derive(Debug, serde::Deserialize)]
struct StoreConfigFile {
    elasticsearch: Option<ElasticsearchFileConfig>,
}

#[derive(Debug, serde::Deserialize)]
struct ElasticsearchFileConfig {
    index: String,
    hosts: Vec<String>,
}

/// Null data store.
///
/// Loads nothing and saves nothing, which effectively makes the registry
/// an in-memory store.
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        warn!(
            "!!! Warning !!!: No registered persistence layer found; using null data store! \
             Jobs will not be saved when the application terminates!"
        );
        Self
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for NullStore {
    async fn load_all(&self) -> StoreResult<Vec<Value>> {
        Ok(Vec::new())
    }

    async fn create(&self, _job_id: &str, _job_data: &Value) -> StoreResult<()> {
        Ok(())
    }

    async fn update(&self, _job_id: &str, _job_data: &Value) -> StoreResult<()> {
        Ok(())
    }

    async fn delete(&self, _job_id: &str) -> StoreResult<()> {
        Ok(())
    }
}

/// Shallow-merge update fields into the current stored document.
pub(crate) fn merge_document(current: &mut Value, updates: &Value) {
    if let (Value::Object(current), Value::Object(updates)) = (current, updates) {
        for (key, value) in updates {
            current.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_null_store_round_trip() {
        let store = NullStore::new();
        store.create("a", &json!({"schedule": "* * *"})).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
        store.delete("a").await.unwrap();
    }

    #[test]
    fn test_merge_document_is_shallow() {
        let mut current = json!({"taskCount": 1, "trigger": {"type": "sqs", "queueName": "q"}});
        merge_document(&mut current, &json!({"taskCount": 3, "trigger": {"type": "noop"}}));
        assert_eq!(current["taskCount"], 3);
        assert_eq!(current["trigger"], json!({"type": "noop"}));
    }
}
