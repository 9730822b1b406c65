//! Schedule event handler.
//!
//! Reacts to engine lifecycle events by annotating registry entries with
//! run statistics. Handler failures are logged and swallowed; nothing
//! that happens here may take down the dispatcher or the firing tasks.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

use ecs_scheduler_common::JobError;

use super::engine::{CronEngine, SchedulerEvent};
use crate::execution::RunOutcome;
use crate::registry::JobRegistry;

pub struct ScheduleEventHandler {
    engine: Arc<CronEngine>,
    registry: Arc<JobRegistry>,
}

impl ScheduleEventHandler {
    pub fn new(engine: Arc<CronEngine>, registry: Arc<JobRegistry>) -> Self {
        Self { engine, registry }
    }

    /// Consume engine events until the engine goes away.
    pub async fn run(self, mut events: UnboundedReceiver<SchedulerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
    }

    async fn handle(&self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Added { job_id } | SchedulerEvent::Modified { job_id } => {
                self.update_job_stats(&job_id, Map::new()).await;
            }
            SchedulerEvent::Executed {
                job_id,
                scheduled_run_time,
                result,
            } => match result.outcome {
                RunOutcome::CheckedTasks => {
                    self.update_job_stats(&job_id, Map::new()).await;
                }
                RunOutcome::StartedTasks => {
                    let mut fields = Map::new();
                    fields.insert("lastRun".to_string(), json!(scheduled_run_time));
                    fields.insert("lastRunTasks".to_string(), json!(result.task_info));
                    self.update_job_stats(&job_id, fields).await;
                }
            },
            SchedulerEvent::Failed { job_id, error } => match error {
                Some(error) => {
                    error!(error = %error, "Job {job_id} failed with exception");
                }
                None => error!("Job {job_id} failed but no exception was recorded"),
            },
            SchedulerEvent::Missed {
                job_id,
                scheduled_run_time,
            } => {
                error!("Job {job_id} was supposed to run at {scheduled_run_time} but was missed");
            }
            other => {
                warn!("Unexpected job event raised: {other:?}");
            }
        }
    }

    /// Annotate the stored job with the engine's next-run estimate plus
    /// any run statistics from the event.
    async fn update_job_stats(&self, job_id: &str, mut fields: Map<String, Value>) {
        let next_fire = match self.engine.job_next_fire(job_id).await {
            Some(next_fire) => next_fire,
            None => {
                warn!("Job {job_id} not found in scheduler from which to get updated stats");
                return;
            }
        };
        if let Some(next_fire) = next_fire {
            fields.insert("estimatedNextRun".to_string(), json!(next_fire));
        }

        if fields.is_empty() {
            info!("No job updates needed");
            return;
        }
        match self.registry.annotate(job_id, fields).await {
            Ok(()) => {}
            Err(JobError::NotFound(_)) => {
                warn!("Stored job {job_id} not found to update stats");
            }
            Err(error) => {
                error!(error = %error, "Unable to annotate job stats for {job_id}");
            }
        }
    }
}
