//! Common test fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use ecs_scheduler_api::ecs::{
    ClientError, RunTaskRequest, RunTaskResponse, TaskDetail, TaskFailure, TaskRunner,
};
use ecs_scheduler_api::ops::OpsConsumer;
use ecs_scheduler_api::persistence::{JobStore, StoreError, StoreResult};
use ecs_scheduler_api::sqs::QueueClient;
use ecs_scheduler_common::JobOperation;

/// In-memory job store with optional write failures.
pub struct MemoryStore {
    pub records: Arc<Mutex<HashMap<String, Value>>>,
    pub fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            fail_writes: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            fail_writes: true,
        }
    }

    /// A second store view over the same records, for reload tests.
    pub fn reopen(&self) -> Self {
        Self {
            records: self.records.clone(),
            fail_writes: self.fail_writes,
        }
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes {
            Err(StoreError::Backend("store is down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn load_all(&self) -> StoreResult<Vec<Value>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .map(|(id, data)| {
                let mut doc = data.clone();
                if let Value::Object(map) = &mut doc {
                    map.insert("id".to_string(), json!(id));
                }
                doc
            })
            .collect())
    }

    async fn create(&self, job_id: &str, job_data: &Value) -> StoreResult<()> {
        self.check_writable()?;
        self.records
            .lock()
            .await
            .insert(job_id.to_string(), job_data.clone());
        Ok(())
    }

    async fn update(&self, job_id: &str, job_data: &Value) -> StoreResult<()> {
        self.check_writable()?;
        let mut records = self.records.lock().await;
        let current = records
            .get_mut(job_id)
            .ok_or_else(|| StoreError::Backend(format!("no record for {job_id}")))?;
        if let (Value::Object(current), Value::Object(updates)) = (current, job_data) {
            for (key, value) in updates {
                current.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, job_id: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.records.lock().await.remove(job_id);
        Ok(())
    }
}

/// Fake task runner recording every launch request.
pub struct FakeRunner {
    /// Task handles reported as running.
    pub running: Mutex<Vec<String>>,
    /// Full task descriptions served by describe_tasks.
    pub descriptions: Mutex<Vec<TaskDetail>>,
    /// Every run_task request received.
    pub run_requests: Mutex<Vec<RunTaskRequest>>,
    /// Failures attached to each run_task response.
    pub failures: Mutex<Vec<TaskFailure>>,
    next_task: Mutex<u32>,
}

impl FakeRunner {
    pub fn new(running: Vec<&str>) -> Self {
        Self {
            running: Mutex::new(running.into_iter().map(str::to_string).collect()),
            descriptions: Mutex::new(Vec::new()),
            run_requests: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            next_task: Mutex::new(0),
        }
    }

    pub async fn requested_counts(&self) -> Vec<u32> {
        self.run_requests.lock().await.iter().map(|r| r.count).collect()
    }
}

#[async_trait]
impl TaskRunner for FakeRunner {
    async fn list_running_tasks(
        &self,
        _cluster: &str,
        _family: &str,
    ) -> std::result::Result<Vec<String>, ClientError> {
        Ok(self.running.lock().await.clone())
    }

    async fn describe_tasks(
        &self,
        _cluster: &str,
        _task_arns: &[String],
    ) -> std::result::Result<Vec<TaskDetail>, ClientError> {
        Ok(self.descriptions.lock().await.clone())
    }

    async fn run_task(
        &self,
        request: &RunTaskRequest,
    ) -> std::result::Result<RunTaskResponse, ClientError> {
        self.run_requests.lock().await.push(request.clone());
        let mut next_task = self.next_task.lock().await;
        let tasks = (0..request.count)
            .map(|_| {
                *next_task += 1;
                TaskDetail {
                    task_arn: format!("arn:task/{next_task}"),
                    container_instance_arn: format!("arn:host/{next_task}"),
                    ..Default::default()
                }
            })
            .collect();
        Ok(RunTaskResponse {
            tasks,
            failures: self.failures.lock().await.clone(),
        })
    }
}

/// Fake queue metrics client.
pub struct FakeQueue {
    pub messages: u64,
}

#[async_trait]
impl QueueClient for FakeQueue {
    async fn approximate_message_count(
        &self,
        _queue_name: &str,
    ) -> std::result::Result<u64, ClientError> {
        Ok(self.messages)
    }
}

/// Ops consumer recording everything it is told.
pub struct RecordingConsumer {
    pub operations: Mutex<Vec<JobOperation>>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self {
            operations: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OpsConsumer for RecordingConsumer {
    async fn notify(&self, op: JobOperation) -> ecs_scheduler_common::Result<()> {
        self.operations.lock().await.push(op);
        Ok(())
    }
}
