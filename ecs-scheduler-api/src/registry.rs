//! In-memory job registry backed by a persistent store.
//!
//! The registry is the authoritative view of all jobs. Every mutation
//! validates first, persists second, and only then changes the in-memory
//! map, so a store failure never leaves the two out of sync. A single
//! RwLock serializes mutations; reads hand out cloned snapshots.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use ecs_scheduler_common::{Job, JobError, Result, TaskInfo};

use crate::persistence::JobStore;
use crate::schema;

pub struct JobRegistry {
    store: Box<dyn JobStore>,
    jobs: RwLock<HashMap<String, Job>>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry").finish_non_exhaustive()
    }
}

impl JobRegistry {
    /// Create a registry populated from the given store.
    ///
    /// Every stored record passes through create validation; one bad
    /// record aborts the load. The schedule is reparsed on the way in, so
    /// a stale stored `parsedSchedule` is silently replaced.
    pub async fn load(store: Box<dyn JobStore>) -> Result<Self> {
        let records = store.load_all().await.map_err(|e| JobError::Persistence {
            job_id: None,
            source: Box::new(e),
        })?;

        let mut jobs = HashMap::with_capacity(records.len());
        for record in records {
            let details = schema::load_create(&record)?;
            jobs.insert(details.id.clone(), Job::new(details));
        }
        Ok(Self {
            store,
            jobs: RwLock::new(jobs),
        })
    }

    /// The total number of jobs.
    pub async fn total(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Snapshot of all jobs.
    pub async fn get_all(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Get a job by id.
    pub async fn get(&self, job_id: &str) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Validate and create a new job, persisting it before it becomes
    /// visible.
    pub async fn create(&self, job_data: &Value) -> Result<Job> {
        let details = schema::load_create(job_data)?;
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&details.id) {
            return Err(JobError::AlreadyExists(details.id));
        }

        let doc = dump_details(&details)?;
        self.store
            .create(&details.id, &doc)
            .await
            .map_err(|e| JobError::Persistence {
                job_id: Some(details.id.clone()),
                source: Box::new(e),
            })?;

        let job = Job::new(details);
        jobs.insert(job.id().to_string(), job.clone());
        Ok(job)
    }

    /// Delete a job from the store and the registry.
    pub async fn delete(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if !jobs.contains_key(job_id) {
            return Err(JobError::NotFound(job_id.to_string()));
        }
        self.store
            .delete(job_id)
            .await
            .map_err(|e| JobError::Persistence {
                job_id: Some(job_id.to_string()),
                source: Box::new(e),
            })?;
        jobs.remove(job_id);
        Ok(())
    }

    /// Validate and apply a partial update, persisting the changed fields.
    ///
    /// The reserved `id` field is silently ignored when present in the
    /// input.
    pub async fn update(&self, job_id: &str, fields: &Value) -> Result<Job> {
        let patch = schema::load_update(job_id, fields)?;
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        self.store
            .update(job_id, &Value::Object(patch.dump()))
            .await
            .map_err(|e| JobError::Persistence {
                job_id: Some(job_id.to_string()),
                source: Box::new(e),
            })?;

        patch.apply(&mut job.details);
        Ok(job.clone())
    }

    /// Set runtime-only fields on a job without touching the store.
    ///
    /// Fields belonging to the persistence schema are rejected; they must
    /// go through [`JobRegistry::update`]. The job id is reserved.
    pub async fn annotate(&self, job_id: &str, fields: Map<String, Value>) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        let persisted: Vec<String> = fields
            .keys()
            .filter(|k| schema::PERSISTED_FIELDS.contains(&k.as_str()))
            .cloned()
            .collect();
        if !persisted.is_empty() {
            return Err(JobError::FieldsRequirePersistence {
                job_id: job_id.to_string(),
                fields: persisted,
            });
        }
        if fields.contains_key("id") {
            return Err(JobError::ImmutableFields {
                job_id: job_id.to_string(),
                fields: vec!["id".to_string()],
            });
        }

        for (key, value) in fields {
            match key.as_str() {
                "lastRun" => {
                    job.annotations.last_run = Some(parse_annotation(job_id, &key, value)?);
                }
                "estimatedNextRun" => {
                    job.annotations.estimated_next_run =
                        Some(parse_annotation(job_id, &key, value)?);
                }
                "lastRunTasks" => {
                    let tasks: Vec<TaskInfo> = parse_annotation(job_id, &key, value)?;
                    job.annotations.last_run_tasks = Some(tasks);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn dump_details(details: &ecs_scheduler_common::JobDetails) -> Result<Value> {
    let mut doc = serde_json::to_value(details).map_err(|e| JobError::Persistence {
        job_id: Some(details.id.clone()),
        source: Box::new(e),
    })?;
    // The id is the record key, not part of the payload.
    if let Value::Object(map) = &mut doc {
        map.remove("id");
    }
    Ok(doc)
}

fn parse_annotation<T: serde::de::DeserializeOwned>(
    job_id: &str,
    field: &str,
    value: Value,
) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| JobError::invalid_field(Some(job_id.to_string()), field, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::NullStore;
    use serde_json::json;

    async fn registry() -> JobRegistry {
        JobRegistry::load(Box::new(NullStore)).await.unwrap()
    }

    fn create_payload(id: &str) -> Value {
        json!({"taskDefinition": id, "schedule": "0 0 12 * * *"})
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = registry().await;
        let job = registry.create(&create_payload("alpha")).await.unwrap();
        assert_eq!(job.id(), "alpha");
        assert_eq!(registry.total().await, 1);

        let fetched = registry.get("alpha").await.unwrap();
        assert_eq!(fetched.details.schedule, "0 0 12 * * *");
    }

    #[tokio::test]
    async fn test_create_duplicate_id() {
        let registry = registry().await;
        registry.create(&create_payload("alpha")).await.unwrap();
        let err = registry.create(&create_payload("alpha")).await.unwrap_err();
        assert!(matches!(err, JobError::AlreadyExists(id) if id == "alpha"));
        assert_eq!(registry.total().await, 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let registry = registry().await;
        let err = registry.get("ghost").await.unwrap_err();
        assert!(matches!(err, JobError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_delete() {
        let registry = registry().await;
        registry.create(&create_payload("alpha")).await.unwrap();
        registry.delete("alpha").await.unwrap();
        assert_eq!(registry.total().await, 0);
        assert!(registry.delete("alpha").await.is_err());
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let registry = registry().await;
        registry.create(&create_payload("alpha")).await.unwrap();
        let job = registry
            .update("alpha", &json!({"taskCount": 4, "suspended": true}))
            .await
            .unwrap();
        assert_eq!(job.details.task_count, 4);
        assert!(job.details.suspended);
        // Schedule untouched by the partial update.
        assert_eq!(job.details.schedule, "0 0 12 * * *");
    }

    #[tokio::test]
    async fn test_update_ignores_id_field() {
        let registry = registry().await;
        registry.create(&create_payload("alpha")).await.unwrap();
        let job = registry
            .update("alpha", &json!({"id": "renamed", "taskCount": 2}))
            .await
            .unwrap();
        assert_eq!(job.id(), "alpha");
        assert!(registry.get("renamed").await.is_err());
    }

    #[tokio::test]
    async fn test_annotate_rejects_persisted_fields() {
        let registry = registry().await;
        registry.create(&create_payload("alpha")).await.unwrap();
        let mut fields = Map::new();
        fields.insert("taskCount".to_string(), json!(3));
        let err = registry.annotate("alpha", fields).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::FieldsRequirePersistence { fields, .. } if fields == vec!["taskCount"]
        ));
    }

    #[tokio::test]
    async fn test_annotate_rejects_id() {
        let registry = registry().await;
        registry.create(&create_payload("alpha")).await.unwrap();
        let mut fields = Map::new();
        fields.insert("id".to_string(), json!("renamed"));
        let err = registry.annotate("alpha", fields).await.unwrap_err();
        assert!(matches!(err, JobError::ImmutableFields { .. }));
        assert_eq!(registry.get("alpha").await.unwrap().id(), "alpha");
    }

    #[tokio::test]
    async fn test_annotate_sets_runtime_fields() {
        let registry = registry().await;
        registry.create(&create_payload("alpha")).await.unwrap();
        let mut fields = Map::new();
        fields.insert("lastRun".to_string(), json!("2026-03-01T12:00:00+00:00"));
        fields.insert(
            "lastRunTasks".to_string(),
            json!([{"taskId": "t1", "hostId": "h1"}]),
        );
        registry.annotate("alpha", fields).await.unwrap();

        let job = registry.get("alpha").await.unwrap();
        assert_eq!(
            job.annotations.last_run.unwrap().to_rfc3339(),
            "2026-03-01T12:00:00+00:00"
        );
        assert_eq!(job.annotations.last_run_tasks.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_validation_failure_not_inserted() {
        let registry = registry().await;
        let err = registry
            .create(&json!({"taskDefinition": "alpha"}))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidData { .. }));
        assert_eq!(registry.total().await, 0);
    }
}
