//! Common types shared between the ECS scheduler web api and scheduler daemon

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Environment variable name attached to container overrides so running
/// tasks can be traced back to the job that started them.
pub const OVERRIDE_TAG: &str = "ECS_SCHEDULER_OVERRIDE_TAG";

/// Named cron fields derived from a job's schedule expression.
///
/// Field names match the scheduler's trigger arguments and are persisted
/// verbatim alongside the raw schedule string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSchedule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
}

/// Trigger configuration for scaling a job from an external signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    #[serde(rename = "type")]
    pub trigger_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages_per_task: Option<u32>,
}

/// Per-container environment overlay applied when launching a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOverride {
    pub container_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

/// Identifying information for a task started by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task_id: String,
    pub host_id: String,
}

/// The persisted job record.
///
/// This is the shape that round-trips to storage; transient runtime state
/// lives in [`JobAnnotations`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<String>,
    pub schedule: String,
    pub parsed_schedule: ParsedSchedule,
    #[serde(default = "default_task_count")]
    pub task_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_start: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_end: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub suspended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Vec<TaskOverride>>,
}

fn default_task_count() -> u32 {
    1
}

impl JobDetails {
    /// The task definition name used when talking to the task runner,
    /// falling back to the job id.
    pub fn task_name(&self) -> &str {
        self.task_definition.as_deref().unwrap_or(&self.id)
    }
}

/// Transient runtime state layered on top of a persisted job.
///
/// These fields are written by the schedule event handler and are never
/// stored; they reset when the registry is reloaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAnnotations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_tasks: Option<Vec<TaskInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_next_run: Option<DateTime<FixedOffset>>,
}

/// A scheduled job: the persisted record plus its runtime annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub details: JobDetails,
    pub annotations: JobAnnotations,
}

impl Job {
    pub fn new(details: JobDetails) -> Self {
        Self {
            details,
            annotations: JobAnnotations::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.details.id
    }

    pub fn suspended(&self) -> bool {
        self.details.suspended
    }
}

/// A job operation communicating registry changes from the web api to the
/// scheduler daemon via the ops queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOperation {
    Add(String),
    Modify(String),
    Remove(String),
}

impl JobOperation {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Add(id) | Self::Modify(id) | Self::Remove(id) => id,
        }
    }
}

/// Job pagination parameters.
///
/// `total` is the number of jobs across all pages and is used to calculate
/// next and prev page frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub skip: i64,
    pub count: i64,
    pub total: i64,
}

impl Pagination {
    pub fn new(skip: i64, count: i64, total: i64) -> Self {
        Self { skip, count, total }
    }

    /// Resolve this page frame into renderable values.
    ///
    /// A frame yields a link only when there are jobs to page over and the
    /// frame does not fall entirely before the first or after the last job.
    /// Negative skip values clamp to zero when rendered.
    pub fn frame(&self) -> Option<Pagination> {
        if self.total <= 0 || self.skip + self.count <= 0 || self.skip >= self.total {
            None
        } else {
            Some(Pagination {
                skip: self.skip.max(0),
                count: self.count,
                total: self.total,
            })
        }
    }
}

/// Field-level validation errors keyed by field name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Job storage and scheduling error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid job data for {}: {errors:?}", .job_id.as_deref().unwrap_or("<unknown>"))]
    InvalidData {
        job_id: Option<String>,
        errors: FieldErrors,
    },

    #[error("Persistence failure for job {}", .job_id.as_deref().unwrap_or("<registry>"))]
    Persistence {
        job_id: Option<String>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Fields require persistence for job {job_id}: {fields:?}")]
    FieldsRequirePersistence { job_id: String, fields: Vec<String> },

    #[error("Immutable fields for job {job_id}: {fields:?}")]
    ImmutableFields { job_id: String, fields: Vec<String> },
}

impl JobError {
    /// Single-field convenience constructor for [`JobError::InvalidData`].
    pub fn invalid_field(
        job_id: Option<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.into(), vec![message.into()]);
        Self::InvalidData { job_id, errors }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
