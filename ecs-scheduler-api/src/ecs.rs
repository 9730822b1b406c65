//! Cluster task-runner client.
//!
//! The scheduler drives ECS through a narrow contract so the executor can
//! be tested against fakes. The HTTP implementation speaks the runner's
//! JSON POST protocol directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Errors from the task-runner and queue clients.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Api(String),
}

/// One container override in the runner's native shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverride {
    pub name: String,
    #[serde(default)]
    pub environment: Vec<EnvironmentEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOverrides {
    #[serde(default)]
    pub container_overrides: Vec<ContainerOverride>,
}

/// A running task as described by the runner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    #[serde(default)]
    pub task_arn: String,
    #[serde(default)]
    pub container_instance_arn: String,
    #[serde(default)]
    pub overrides: TaskOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailure {
    #[serde(default)]
    pub arn: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskResponse {
    #[serde(default)]
    pub tasks: Vec<TaskDetail>,
    #[serde(default)]
    pub failures: Vec<TaskFailure>,
}

/// Arguments for one task launch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTaskRequest {
    pub cluster: String,
    pub task_definition: String,
    pub count: u32,
    pub started_by: String,
    pub overrides: Option<Vec<ContainerOverride>>,
}

/// Narrow task-runner contract used by the executor.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// List handles of tasks in the given family that are currently
    /// running.
    async fn list_running_tasks(
        &self,
        cluster: &str,
        family: &str,
    ) -> Result<Vec<String>, ClientError>;

    /// Fetch full descriptions for the given task handles.
    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> Result<Vec<TaskDetail>, ClientError>;

    /// Launch `count` tasks of the given definition.
    async fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskResponse, ClientError>;
}

/// HTTP task-runner client.
pub struct EcsHttpClient {
    client: reqwest::Client,
    endpoint: String,
}

impl EcsHttpClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    async fn call(&self, target: &str, body: &serde_json::Value) -> Result<serde_json::Value, ClientError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(
                "X-Amz-Target",
                format!("AmazonEC2ContainerServiceV20141113.{target}"),
            )
            .header("Content-Type", "application/x-amz-json-1.1")
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Api(format!(
                "ECS {target} failed: HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TaskRunner for EcsHttpClient {
    async fn list_running_tasks(
        &self,
        cluster: &str,
        family: &str,
    ) -> Result<Vec<String>, ClientError> {
        let response = self
            .call(
                "ListTasks",
                &json!({
                    "cluster": cluster,
                    "family": family,
                    "desiredStatus": "RUNNING",
                }),
            )
            .await?;
        Ok(response["taskArns"]
            .as_array()
            .map(|arns| {
                arns.iter()
                    .filter_map(|a| a.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> Result<Vec<TaskDetail>, ClientError> {
        let response = self
            .call(
                "DescribeTasks",
                &json!({"cluster": cluster, "tasks": task_arns}),
            )
            .await?;
        serde_json::from_value(response["tasks"].clone())
            .map_err(|e| ClientError::Api(format!("invalid DescribeTasks response: {e}")))
    }

    async fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskResponse, ClientError> {
        let mut body = json!({
            "cluster": request.cluster,
            "taskDefinition": request.task_definition,
            "count": request.count,
            "startedBy": request.started_by,
        });
        if let Some(overrides) = &request.overrides {
            body["overrides"] = json!({"containerOverrides": overrides});
        }
        let response = self.call("RunTask", &body).await?;
        serde_json::from_value(response)
            .map_err(|e| ClientError::Api(format!("invalid RunTask response: {e}")))
    }
}
