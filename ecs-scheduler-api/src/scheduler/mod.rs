//! The job scheduler.
//!
//! Owns the cron engine and keeps it in sync with the job registry: jobs
//! are inserted at startup and whenever the web api posts an operation to
//! the ops queue.

mod engine;
mod events;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{error, info};

use ecs_scheduler_common::{FieldErrors, Job, JobError, JobOperation, Result};

use crate::cron::CronRule;
use crate::execution::JobExecutor;
use crate::ops::OpsConsumer;
use crate::registry::JobRegistry;

pub use engine::{CronEngine, SchedulerEvent, MISFIRE_GRACE_SECONDS};

pub struct Scheduler {
    registry: Arc<JobRegistry>,
    engine: Arc<CronEngine>,
}

impl Scheduler {
    /// Create the scheduler and spawn its event handler.
    pub fn new(registry: Arc<JobRegistry>, executor: JobExecutor) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(CronEngine::new(Arc::new(executor), events_tx));
        let handler = events::ScheduleEventHandler::new(engine.clone(), registry.clone());
        tokio::spawn(handler.run(events_rx));
        Self { registry, engine }
    }

    /// Insert every registered job and start the engine.
    pub async fn start(&self) -> Result<()> {
        let mut job_count = 0;
        for job in self.registry.get_all().await {
            self.insert_job(&job).await?;
            job_count += 1;
        }
        self.engine.start();
        info!("Scheduler started with {job_count} initial jobs");
        Ok(())
    }

    /// Stop the scheduler. A stopped scheduler cannot be restarted; create
    /// a fresh instance instead.
    pub fn stop(&self) {
        self.engine.stop();
    }

    /// Apply a job operation from the ops queue.
    pub async fn notify(&self, op: JobOperation) -> Result<()> {
        match op {
            JobOperation::Add(job_id) | JobOperation::Modify(job_id) => {
                let job = self.registry.get(&job_id).await?;
                self.insert_job(&job).await
            }
            JobOperation::Remove(job_id) => {
                if !self.engine.remove_job(&job_id).await {
                    error!("Unable to find job {job_id} for removal");
                }
                Ok(())
            }
        }
    }

    /// The engine's next fire estimate, mainly for tests and diagnostics.
    pub async fn next_fire(&self, job_id: &str) -> Option<Option<DateTime<Utc>>> {
        self.engine.job_next_fire(job_id).await
    }

    /// Build the firing entry for a job and hand it to the engine,
    /// replacing any previous entry for the same id.
    async fn insert_job(&self, job: &Job) -> Result<()> {
        let details = &job.details;
        let timezone = details
            .timezone
            .as_deref()
            .and_then(|tz| tz.parse().ok())
            .unwrap_or(chrono_tz::UTC);

        let rule = CronRule::new(&details.parsed_schedule, timezone).map_err(|messages| {
            let mut errors = FieldErrors::new();
            errors.insert("parsedSchedule".to_string(), messages);
            JobError::InvalidData {
                job_id: Some(details.id.clone()),
                errors,
            }
        })?;

        // Resume from the last recorded run when there is one.
        let start = job
            .annotations
            .last_run
            .or(details.schedule_start)
            .map(|dt| dt.with_timezone(&Utc));
        let end = details.schedule_end.map(|dt| dt.with_timezone(&Utc));

        self.engine
            .add_job(
                details.clone(),
                rule.with_bounds(start, end),
                job.suspended(),
            )
            .await;
        Ok(())
    }
}

#[async_trait]
impl OpsConsumer for Scheduler {
    async fn notify(&self, op: JobOperation) -> Result<()> {
        Scheduler::notify(self, op).await
    }
}
