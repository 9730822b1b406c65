//! SQLite job store.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use tracing::info;

use super::{merge_document, JobStore, StoreError, StoreResult};

/// Embedded SQL store keeping one JSON row per job.
pub struct SqliteStore {
    db_file: String,
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if necessary) the database file and ensure the jobs
    /// table exists.
    pub async fn connect(db_file: &str) -> StoreResult<Self> {
        if let Some(parent) = Path::new(db_file).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{db_file}"))?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (id TEXT PRIMARY KEY NOT NULL, data TEXT NOT NULL)",
        )
        .execute(&pool)
        .await?;
        Ok(Self {
            db_file: db_file.to_string(),
            pool,
        })
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn load_all(&self) -> StoreResult<Vec<Value>> {
        info!("Loading jobs from SQLite database {}", self.db_file);
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT id, data FROM jobs")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(id, data)| {
                let mut doc: Value = serde_json::from_str(&data)?;
                if let Value::Object(map) = &mut doc {
                    map.insert("id".to_string(), json!(id));
                }
                Ok(doc)
            })
            .collect()
    }

    async fn create(&self, job_id: &str, job_data: &Value) -> StoreResult<()> {
        sqlx::query("INSERT INTO jobs (id, data) VALUES (?1, ?2)")
            .bind(job_id)
            .bind(serde_json::to_string(job_data)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update(&self, job_id: &str, job_data: &Value) -> StoreResult<()> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM jobs WHERE id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        let (data,) = row.ok_or_else(|| {
            StoreError::Backend(format!("no stored job row for id {job_id}"))
        })?;
        let mut current: Value = serde_json::from_str(&data)?;
        merge_document(&mut current, job_data);
        sqlx::query("UPDATE jobs SET data = ?1 WHERE id = ?2")
            .bind(serde_json::to_string(&current)?)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, job_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let db_file = dir.path().join("jobs.db");
        let store = SqliteStore::connect(db_file.to_str().unwrap()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let (_dir, store) = temp_store().await;
        store
            .create("alpha", &json!({"schedule": "* * *", "taskCount": 2}))
            .await
            .unwrap();

        let records = store.load_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "alpha");
        assert_eq!(records[0]["taskCount"], 2);
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let (_dir, store) = temp_store().await;
        store.create("alpha", &json!({})).await.unwrap();
        assert!(store.create("alpha", &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_update_merges_row() {
        let (_dir, store) = temp_store().await;
        store
            .create("alpha", &json!({"schedule": "* * *", "taskCount": 2}))
            .await
            .unwrap();
        store.update("alpha", &json!({"taskCount": 5})).await.unwrap();

        let records = store.load_all().await.unwrap();
        assert_eq!(records[0]["taskCount"], 5);
        assert_eq!(records[0]["schedule"], "* * *");
    }

    #[tokio::test]
    async fn test_delete_removes_row() {
        let (_dir, store) = temp_store().await;
        store.create("alpha", &json!({})).await.unwrap();
        store.delete("alpha").await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
