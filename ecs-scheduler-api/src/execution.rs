//! Per-firing job execution.
//!
//! Every firing reconciles the job's desired task count against what the
//! runner reports as already running and launches only the difference, in
//! batches the runner will accept.

use std::sync::Arc;

use tracing::{info, warn};

use ecs_scheduler_common::{JobDetails, TaskInfo, TaskOverride, OVERRIDE_TAG};

use crate::ecs::{ClientError, ContainerOverride, EnvironmentEntry, RunTaskRequest, TaskDetail, TaskRunner};
use crate::triggers::TriggerRegistry;

/// The runner accepts at most this many tasks per launch call.
const MAX_TASK_COUNT: u32 = 10;

/// What a firing did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Verified the runner state; no new tasks were needed.
    CheckedTasks = 0,
    /// Started new tasks.
    StartedTasks = 1,
}

/// The result of a job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub outcome: RunOutcome,
    pub task_info: Vec<TaskInfo>,
}

/// The executor run by all scheduled jobs.
pub struct JobExecutor {
    runner: Arc<dyn TaskRunner>,
    triggers: TriggerRegistry,
    cluster: String,
    started_by: String,
}

impl JobExecutor {
    pub fn new(
        runner: Arc<dyn TaskRunner>,
        triggers: TriggerRegistry,
        cluster: String,
        started_by: String,
    ) -> Self {
        Self {
            runner,
            triggers,
            cluster,
            started_by,
        }
    }

    /// Run one firing for the given job.
    pub async fn run(&self, details: &JobDetails) -> Result<JobResult, ClientError> {
        let task_name = details.task_name();
        let running_tasks = self
            .runner
            .list_running_tasks(&self.cluster, task_name)
            .await?;
        let running_count = self.running_count(details, &running_tasks).await?;

        let trigger = self
            .triggers
            .get(details.trigger.as_ref().map(|t| t.trigger_type.as_str()));
        let expected_count = trigger.determine_task_count(details).await?;
        let needed_count = expected_count.saturating_sub(running_count);

        if needed_count == 0 {
            info!(
                "Checked status for \"{}\" and no additional tasks were needed",
                details.id
            );
            return Ok(JobResult {
                outcome: RunOutcome::CheckedTasks,
                task_info: Vec::new(),
            });
        }

        let task_info = self.launch_tasks(task_name, needed_count, details).await?;
        info!(
            "Launched {} \"{}\" tasks for job {}",
            needed_count, task_name, details.id
        );
        Ok(JobResult {
            outcome: RunOutcome::StartedTasks,
            task_info,
        })
    }

    /// Count running tasks belonging to this job.
    ///
    /// Jobs with overrides share a task definition with sibling jobs, so
    /// only tasks tagged with this job's id count.
    async fn running_count(
        &self,
        details: &JobDetails,
        task_arns: &[String],
    ) -> Result<u32, ClientError> {
        if task_arns.is_empty() || details.overrides.is_none() {
            return Ok(task_arns.len() as u32);
        }
        let tasks = self.runner.describe_tasks(&self.cluster, task_arns).await?;
        Ok(tasks
            .iter()
            .filter(|task| is_overridden_by_job(task, &details.id))
            .count() as u32)
    }

    async fn launch_tasks(
        &self,
        task_name: &str,
        needed_count: u32,
        details: &JobDetails,
    ) -> Result<Vec<TaskInfo>, ClientError> {
        let mut request = RunTaskRequest {
            cluster: self.cluster.clone(),
            task_definition: task_name.to_string(),
            count: 0,
            started_by: self.started_by.clone(),
            overrides: details
                .overrides
                .as_deref()
                .map(|overrides| tag_overrides(overrides, &details.id)),
        };

        let mut task_info = Vec::new();
        let mut remaining = needed_count;
        while remaining > 0 {
            request.count = remaining.min(MAX_TASK_COUNT);
            let response = self.runner.run_task(&request).await?;
            if !response.failures.is_empty() {
                warn!(
                    "Task \"{}\" start failures: {:?}",
                    task_name, response.failures
                );
            }
            task_info.extend(response.tasks.iter().map(|task| TaskInfo {
                task_id: task.task_arn.clone(),
                host_id: task.container_instance_arn.clone(),
            }));
            remaining = remaining.saturating_sub(MAX_TASK_COUNT);
        }
        Ok(task_info)
    }
}

fn is_overridden_by_job(task: &TaskDetail, job_id: &str) -> bool {
    task.overrides.container_overrides.iter().any(|overrides| {
        overrides
            .environment
            .iter()
            .any(|env| env.name == OVERRIDE_TAG && env.value == job_id)
    })
}

/// Copy the job's overrides into the runner's shape, tagging every
/// container with the job id so its tasks can be recognized later. The
/// job's own override list is left untouched.
fn tag_overrides(overrides: &[TaskOverride], job_id: &str) -> Vec<ContainerOverride> {
    overrides
        .iter()
        .map(|o| {
            let mut environment: Vec<EnvironmentEntry> = o
                .environment
                .iter()
                .map(|(name, value)| EnvironmentEntry {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect();
            environment.push(EnvironmentEntry {
                name: OVERRIDE_TAG.to_string(),
                value: job_id.to_string(),
            });
            ContainerOverride {
                name: o.container_name.clone(),
                environment,
            }
        })
        .collect()
}
