//! Elasticsearch search-index backend.
//!
//! One document per job id. Bulk loading walks the scroll API so a large
//! registry does not need a single oversized page.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{JobStore, StoreError, StoreResult};

const SCROLL_PERIOD: &str = "1m";
const SCROLL_PAGE_SIZE: u32 = 100;

pub struct ElasticsearchStore {
    client: reqwest::Client,
    hosts: Vec<String>,
    index: String,
}

impl ElasticsearchStore {
    pub fn new(hosts: Vec<String>, index: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            hosts,
            index,
        }
    }

    fn url(&self, path: &str) -> String {
        let host = self.hosts[0].trim_end_matches('/');
        format!("{host}/{path}")
    }

    /// Create a timestamped index behind the configured alias when the
    /// alias does not resolve yet.
    pub async fn ensure_index(&self) -> StoreResult<()> {
        let response = self.client.head(self.url(&self.index)).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        let index_name = format!("{}-{}", self.index, Utc::now().format("%Y%m%d-%H%M%S"));
        warn!(
            "Elasticsearch index not found; creating index \"{index_name}\" with alias \"{}\"",
            self.index
        );
        let response = self
            .client
            .put(self.url(&index_name))
            .json(&json!({
                "settings": {"number_of_shards": 3},
                "aliases": {&self.index: {}},
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "Elasticsearch index create failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn check(&self, operation: &str, response: reqwest::Response) -> StoreResult<Value> {
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "Elasticsearch {operation} failed: HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    fn collect_hits(page: &Value, records: &mut Vec<Value>) -> usize {
        let hits = page["hits"]["hits"].as_array().cloned().unwrap_or_default();
        for hit in &hits {
            let mut doc = hit["_source"].clone();
            if let (Value::Object(map), Some(id)) = (&mut doc, hit["_id"].as_str()) {
                map.insert("id".to_string(), json!(id));
            }
            records.push(doc);
        }
        hits.len()
    }
}

#[async_trait]
impl JobStore for ElasticsearchStore {
    async fn load_all(&self) -> StoreResult<Vec<Value>> {
        info!("Loading jobs from elasticsearch index {}...", self.index);
        let mut records = Vec::new();

        let response = self
            .client
            .post(self.url(&format!("{}/_search", self.index)))
            .query(&[("scroll", SCROLL_PERIOD)])
            .json(&json!({"size": SCROLL_PAGE_SIZE, "query": {"match_all": {}}}))
            .send()
            .await?;
        let mut page = self.check("search", response).await?;

        while Self::collect_hits(&page, &mut records) > 0 {
            let Some(scroll_id) = page["_scroll_id"].as_str() else {
                break;
            };
            let response = self
                .client
                .post(self.url("_search/scroll"))
                .json(&json!({"scroll": SCROLL_PERIOD, "scroll_id": scroll_id}))
                .send()
                .await?;
            page = self.check("scroll", response).await?;
        }
        Ok(records)
    }

    async fn create(&self, job_id: &str, job_data: &Value) -> StoreResult<()> {
        let response = self
            .client
            .put(self.url(&format!("{}/_create/{job_id}", self.index)))
            .json(job_data)
            .send()
            .await?;
        self.check("create", response).await?;
        Ok(())
    }

    async fn update(&self, job_id: &str, job_data: &Value) -> StoreResult<()> {
        let response = self
            .client
            .post(self.url(&format!("{}/_update/{job_id}", self.index)))
            .query(&[("retry_on_conflict", "3")])
            .json(&json!({"doc": job_data}))
            .send()
            .await?;
        self.check("update", response).await?;
        Ok(())
    }

    async fn delete(&self, job_id: &str) -> StoreResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("{}/_doc/{job_id}", self.index)))
            .send()
            .await?;
        self.check("delete", response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let store = ElasticsearchStore::new(
            vec!["http://localhost:9200/".to_string()],
            "jobs".to_string(),
        );
        assert_eq!(store.url("jobs/_doc/alpha"), "http://localhost:9200/jobs/_doc/alpha");
    }

    #[test]
    fn test_collect_hits_attaches_ids() {
        let page = json!({
            "hits": {"hits": [
                {"_id": "alpha", "_source": {"schedule": "* * *"}},
                {"_id": "beta", "_source": {"schedule": "1 2 3"}},
            ]}
        });
        let mut records = Vec::new();
        assert_eq!(ElasticsearchStore::collect_hits(&page, &mut records), 2);
        assert_eq!(records[0]["id"], "alpha");
        assert_eq!(records[1]["schedule"], "1 2 3");
    }

    #[test]
    fn test_collect_hits_empty_page() {
        let mut records = Vec::new();
        let page = json!({"hits": {"hits": []}});
        assert_eq!(ElasticsearchStore::collect_hits(&page, &mut records), 0);
    }
}
