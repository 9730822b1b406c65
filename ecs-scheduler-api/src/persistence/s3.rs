//! S3-compatible object store backend.
//!
//! One JSON object per job at `<prefix>/<id>.json`. Talks plain HTTP to an
//! S3-compatible endpoint; request signing is left to a fronting proxy or
//! an endpoint that does not require it.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{merge_document, JobStore, StoreError, StoreResult};

const JOB_EXT: &str = ".json";

pub struct S3Store {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    prefix: String,
}

impl S3Store {
    pub fn new(endpoint: String, bucket: String, prefix: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            bucket,
            prefix: prefix.unwrap_or_default(),
        }
    }

    fn object_key(&self, job_id: &str) -> String {
        if self.prefix.is_empty() {
            format!("{job_id}{JOB_EXT}")
        } else {
            format!("{}/{job_id}{JOB_EXT}", self.prefix.trim_end_matches('/'))
        }
    }

    fn object_url(&self, job_id: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, self.object_key(job_id))
    }

    /// Keep only keys directly under the configured prefix with the job
    /// object extension.
    fn job_id_from_key(&self, key: &str) -> Option<String> {
        let (prefix, name) = match key.rsplit_once('/') {
            Some((prefix, name)) => (prefix, name),
            None => ("", key),
        };
        if prefix != self.prefix.trim_end_matches('/') {
            return None;
        }
        name.strip_suffix(JOB_EXT).map(str::to_string)
    }

    async fn list_keys(&self) -> StoreResult<Vec<String>> {
        let url = format!("{}/{}", self.endpoint, self.bucket);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("prefix".to_string(), self.prefix.clone()),
            ];
            if let Some(token) = &continuation {
                query.push(("continuation-token".to_string(), token.clone()));
            }
            let response = self.client.get(&url).query(&query).send().await?;
            if !response.status().is_success() {
                return Err(StoreError::Backend(format!(
                    "S3 list failed: HTTP {}",
                    response.status()
                )));
            }
            let body = response.text().await?;
            keys.extend(extract_tag_values(&body, "Key"));
            continuation = extract_tag_values(&body, "NextContinuationToken").pop();
            if continuation.is_none() {
                break;
            }
        }
        Ok(keys)
    }

    async fn load_object(&self, job_id: &str) -> StoreResult<Value> {
        let response = self.client.get(self.object_url(job_id)).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "S3 get failed for {job_id}: HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn store_object(&self, job_id: &str, data: &Value) -> StoreResult<()> {
        let response = self
            .client
            .put(self.object_url(job_id))
            .header("Content-Type", "application/json")
            .body(serde_json::to_string(data)?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "S3 put failed for {job_id}: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for S3Store {
    async fn load_all(&self) -> StoreResult<Vec<Value>> {
        if self.prefix.is_empty() {
            info!("Loading jobs from S3 bucket {}...", self.bucket);
        } else {
            info!(
                "Loading jobs from S3 bucket {}, prefix {}...",
                self.bucket, self.prefix
            );
        }
        let mut records = Vec::new();
        for key in self.list_keys().await? {
            let Some(job_id) = self.job_id_from_key(&key) else {
                continue;
            };
            let mut doc = self.load_object(&job_id).await?;
            if let Value::Object(map) = &mut doc {
                map.insert("id".to_string(), json!(job_id));
            }
            records.push(doc);
        }
        Ok(records)
    }

    async fn create(&self, job_id: &str, job_data: &Value) -> StoreResult<()> {
        self.store_object(job_id, job_data).await
    }

    async fn update(&self, job_id: &str, job_data: &Value) -> StoreResult<()> {
        let mut current = self.load_object(job_id).await?;
        merge_document(&mut current, job_data);
        self.store_object(job_id, &current).await
    }

    async fn delete(&self, job_id: &str) -> StoreResult<()> {
        let response = self.client.delete(self.object_url(job_id)).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "S3 delete failed for {job_id}: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Pull the text contents of every `<tag>...</tag>` element. The S3 list
/// response is flat enough that full XML parsing buys nothing.
fn extract_tag_values(body: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut values = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(&open) {
        rest = &rest[start + open.len()..];
        let Some(end) = rest.find(&close) else {
            break;
        };
        values.push(rest[..end].to_string());
        rest = &rest[end + close.len()..];
    }
    values
}
