//! Job payload validation and serialization.
//!
//! Create and update payloads arrive as raw JSON and are validated field by
//! field, collecting all errors into a [`FieldErrors`] map so the web api
//! can report every problem at once. The same create validation runs over
//! records loaded from storage.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use chrono_tz::Tz;
use regex::Regex;
use serde_json::{json, Map, Value};

use ecs_scheduler_common::{
    FieldErrors, Job, JobDetails, JobError, ParsedSchedule, TaskOverride, TriggerSpec,
};

use crate::cron::{self, CronRule};

pub const MIN_TASKS: u32 = 1;
pub const MAX_TASKS: u32 = 50;

/// Field names belonging to the persistence schema.
///
/// Writing any of these through `annotate` is an error; they must go
/// through `update` so storage stays consistent. The job id is handled
/// separately as a reserved field.
pub const PERSISTED_FIELDS: &[&str] = &[
    "taskDefinition",
    "schedule",
    "parsedSchedule",
    "taskCount",
    "maxCount",
    "scheduleStart",
    "scheduleEnd",
    "timezone",
    "suspended",
    "trigger",
    "overrides",
];

const REQUIRED_MSG: &str = "Missing data for required field.";

fn revision_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":\d*").unwrap())
}

/// Task definition names double as job ids and must be plain family names:
/// no revision suffix, path separators, or extensions.
pub fn validate_task_definition_name(value: &str) -> Result<(), String> {
    if revision_pattern().is_match(value) {
        return Err("task definition names cannot contain revision numbers".to_string());
    }
    if value.contains('/') || value.contains('.') {
        return Err("task definition names cannot contain '/' or '.'".to_string());
    }
    Ok(())
}

/// Parse an ISO-8601 timestamp; naive values are treated as UTC.
pub fn parse_datetime(value: &str) -> Result<DateTime<FixedOffset>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc().fixed_offset());
    }
    Err("Not a valid datetime.".to_string())
}

/// Validated fields of a job update request. All fields are optional; an
/// `id` key in the input is reserved and silently ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub task_definition: Option<String>,
    pub schedule: Option<(String, ParsedSchedule)>,
    pub task_count: Option<u32>,
    pub max_count: Option<u32>,
    pub schedule_start: Option<DateTime<FixedOffset>>,
    pub schedule_end: Option<DateTime<FixedOffset>>,
    pub timezone: Option<String>,
    pub suspended: Option<bool>,
    pub trigger: Option<TriggerSpec>,
    pub overrides: Option<Vec<TaskOverride>>,
}

impl JobPatch {
    /// The storage representation of the patch: only the fields that were
    /// actually supplied, with `parsedSchedule` tracking any new schedule.
    pub fn dump(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        if let Some(task_definition) = &self.task_definition {
            doc.insert("taskDefinition".into(), json!(task_definition));
        }
        if let Some((schedule, parsed)) = &self.schedule {
            doc.insert("schedule".into(), json!(schedule));
            doc.insert("parsedSchedule".into(), json!(parsed));
        }
        if let Some(task_count) = self.task_count {
            doc.insert("taskCount".into(), json!(task_count));
        }
        if let Some(max_count) = self.max_count {
            doc.insert("maxCount".into(), json!(max_count));
        }
        if let Some(start) = &self.schedule_start {
            doc.insert("scheduleStart".into(), json!(start));
        }
        if let Some(end) = &self.schedule_end {
            doc.insert("scheduleEnd".into(), json!(end));
        }
        if let Some(timezone) = &self.timezone {
            doc.insert("timezone".into(), json!(timezone));
        }
        if let Some(suspended) = self.suspended {
            doc.insert("suspended".into(), json!(suspended));
        }
        if let Some(trigger) = &self.trigger {
            doc.insert("trigger".into(), json!(trigger));
        }
        if let Some(overrides) = &self.overrides {
            doc.insert("overrides".into(), json!(overrides));
        }
        doc
    }

    /// Merge the patch into an in-memory job record.
    pub fn apply(self, details: &mut JobDetails) {
        if let Some(task_definition) = self.task_definition {
            details.task_definition = Some(task_definition);
        }
        if let Some((schedule, parsed)) = self.schedule {
            details.schedule = schedule;
            details.parsed_schedule = parsed;
        }
        if let Some(task_count) = self.task_count {
            details.task_count = task_count;
        }
        if let Some(max_count) = self.max_count {
            details.max_count = Some(max_count);
        }
        if let Some(start) = self.schedule_start {
            details.schedule_start = Some(start);
        }
        if let Some(end) = self.schedule_end {
            details.schedule_end = Some(end);
        }
        if let Some(timezone) = self.timezone {
            details.timezone = Some(timezone);
        }
        if let Some(suspended) = self.suspended {
            details.suspended = suspended;
        }
        if let Some(trigger) = self.trigger {
            details.trigger = Some(trigger);
        }
        if let Some(overrides) = self.overrides {
            details.overrides = Some(overrides);
        }
    }
}

/// Validate a job creation payload into a persisted record.
///
/// The schedule is parsed (with `?` wildcards substituted) and the derived
/// fields checked against the cron rule builder; any client-supplied
/// `parsedSchedule` is ignored and re-derived.
pub fn load_create(value: &Value) -> ecs_scheduler_common::Result<JobDetails> {
    let Some(obj) = value.as_object() else {
        return Err(JobError::invalid_field(None, "_schema", "Invalid input type."));
    };
    let mut errors = FieldErrors::new();

    let task_definition = opt_string(obj, "taskDefinition", &mut errors);
    if !obj.contains_key("taskDefinition") {
        push(&mut errors, "taskDefinition", REQUIRED_MSG);
    }
    if let Some(name) = &task_definition {
        if let Err(msg) = validate_task_definition_name(name) {
            push(&mut errors, "taskDefinition", &msg);
        }
    }

    let explicit_id = opt_string(obj, "id", &mut errors);
    if let Some(id) = &explicit_id {
        if let Err(msg) = validate_task_definition_name(id) {
            push(&mut errors, "id", &msg);
        }
    }
    let id = explicit_id.or_else(|| task_definition.clone());

    let schedule = load_schedule(obj, &mut errors);
    if !obj.contains_key("schedule") {
        push(&mut errors, "schedule", REQUIRED_MSG);
    }

    let task_count = opt_task_count(obj, "taskCount", &mut errors).unwrap_or(MIN_TASKS);
    let max_count = opt_task_count(obj, "maxCount", &mut errors);
    let schedule_start = opt_datetime(obj, "scheduleStart", &mut errors);
    let schedule_end = opt_datetime(obj, "scheduleEnd", &mut errors);
    let timezone = opt_timezone(obj, &mut errors);
    let suspended = opt_bool(obj, "suspended", &mut errors).unwrap_or(false);
    let trigger = opt_trigger(obj, &mut errors);
    let overrides = opt_overrides(obj, &mut errors);

    if !errors.is_empty() {
        return Err(JobError::InvalidData { job_id: id, errors });
    }
    let (schedule, parsed_schedule) = schedule.unwrap_or_default();
    Ok(JobDetails {
        // Guarded by the required-field checks above.
        id: id.unwrap_or_default(),
        task_definition,
        schedule,
        parsed_schedule,
        task_count,
        max_count,
        schedule_start,
        schedule_end,
        timezone,
        suspended,
        trigger,
        overrides,
    })
}

/// Validate a job update payload. No field is required.
pub fn load_update(id: &str, value: &Value) -> ecs_scheduler_common::Result<JobPatch> {
    let Some(obj) = value.as_object() else {
        return Err(JobError::invalid_field(
            Some(id.to_string()),
            "_schema",
            "Invalid input type.",
        ));
    };
    let mut errors = FieldErrors::new();

    let task_definition = opt_string(obj, "taskDefinition", &mut errors);
    if let Some(name) = &task_definition {
        if let Err(msg) = validate_task_definition_name(name) {
            push(&mut errors, "taskDefinition", &msg);
        }
    }

    let patch = JobPatch {
        task_definition,
        schedule: load_schedule(obj, &mut errors),
        task_count: opt_task_count(obj, "taskCount", &mut errors),
        max_count: opt_task_count(obj, "maxCount", &mut errors),
        schedule_start: opt_datetime(obj, "scheduleStart", &mut errors),
        schedule_end: opt_datetime(obj, "scheduleEnd", &mut errors),
        timezone: opt_timezone(obj, &mut errors),
        suspended: opt_bool(obj, "suspended", &mut errors),
        trigger: opt_trigger(obj, &mut errors),
        overrides: opt_overrides(obj, &mut errors),
    };

    if errors.is_empty() {
        Ok(patch)
    } else {
        Err(JobError::InvalidData {
            job_id: Some(id.to_string()),
            errors,
        })
    }
}

/// The REST representation of a job: public fields plus annotations and an
/// item link. `parsedSchedule` stays internal.
pub fn job_response(job: &Job) -> Result<Value, serde_json::Error> {
    let mut doc = match serde_json::to_value(&job.details)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    doc.remove("parsedSchedule");
    if let Value::Object(annotations) = serde_json::to_value(&job.annotations)? {
        doc.extend(annotations);
    }
    doc.insert("link".into(), job_link(job.id()));
    Ok(Value::Object(doc))
}

pub fn job_link(job_id: &str) -> Value {
    json!({
        "rel": "item",
        "title": format!("Job for {job_id}"),
        "href": format!("/jobs/{job_id}"),
    })
}

fn push(errors: &mut FieldErrors, field: &str, message: &str) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.to_string());
}

fn opt_string(obj: &Map<String, Value>, field: &str, errors: &mut FieldErrors) -> Option<String> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            push(errors, field, "Not a valid string.");
            None
        }
    }
}

fn opt_bool(obj: &Map<String, Value>, field: &str, errors: &mut FieldErrors) -> Option<bool> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => {
            push(errors, field, "Not a valid boolean.");
            None
        }
    }
}

fn opt_integer(obj: &Map<String, Value>, field: &str, errors: &mut FieldErrors) -> Option<u64> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => match n.as_u64() {
            Some(v) => Some(v),
            None => {
                push(errors, field, "Not a valid integer.");
                None
            }
        },
        Some(_) => {
            push(errors, field, "Not a valid integer.");
            None
        }
    }
}

fn opt_task_count(obj: &Map<String, Value>, field: &str, errors: &mut FieldErrors) -> Option<u32> {
    let value = opt_integer(obj, field, errors)?;
    if value < MIN_TASKS as u64 || value > MAX_TASKS as u64 {
        push(
            errors,
            field,
            &format!("Must be between {MIN_TASKS} and {MAX_TASKS}."),
        );
        return None;
    }
    Some(value as u32)
}

fn opt_datetime(
    obj: &Map<String, Value>,
    field: &str,
    errors: &mut FieldErrors,
) -> Option<DateTime<FixedOffset>> {
    let raw = opt_string(obj, field, errors)?;
    match parse_datetime(&raw) {
        Ok(dt) => Some(dt),
        Err(msg) => {
            push(errors, field, &msg);
            None
        }
    }
}

fn opt_timezone(obj: &Map<String, Value>, errors: &mut FieldErrors) -> Option<String> {
    let raw = opt_string(obj, "timezone", errors)?;
    match Tz::from_str(&raw) {
        Ok(_) => Some(raw),
        Err(_) => {
            push(errors, "timezone", "Unknown timezone.");
            None
        }
    }
}

fn load_schedule(
    obj: &Map<String, Value>,
    errors: &mut FieldErrors,
) -> Option<(String, ParsedSchedule)> {
    let raw = opt_string(obj, "schedule", errors)?;
    let (rewritten, parsed) = match cron::parse_schedule(&raw) {
        Ok(result) => result,
        Err(msg) => {
            push(errors, "schedule", &msg);
            return None;
        }
    };
    // The derived fields must build a valid firing rule.
    match CronRule::new(&parsed, chrono_tz::UTC) {
        Ok(_) => Some((rewritten, parsed)),
        Err(messages) => {
            for message in messages {
                push(errors, "parsedSchedule", &message);
            }
            None
        }
    }
}

fn opt_trigger(obj: &Map<String, Value>, errors: &mut FieldErrors) -> Option<TriggerSpec> {
    let value = match obj.get("trigger") {
        None | Some(Value::Null) => return None,
        Some(Value::Object(o)) => o,
        Some(_) => {
            push(errors, "trigger", "Not a valid mapping.");
            return None;
        }
    };

    let trigger_type = opt_string(value, "type", errors);
    if !value.contains_key("type") {
        push(errors, "trigger", "trigger requires \"type\" field");
    }
    let queue_name = opt_string(value, "queueName", errors);
    let messages_per_task = match opt_integer(value, "messagesPerTask", errors) {
        Some(v) if v >= 1 => Some(v as u32),
        Some(_) => {
            push(errors, "trigger", "messagesPerTask must be at least 1");
            None
        }
        None => None,
    };

    let trigger_type = trigger_type?;
    if trigger_type == "sqs" && queue_name.is_none() {
        push(errors, "trigger", "sqs trigger type requires \"queueName\" field");
        return None;
    }
    Some(TriggerSpec {
        trigger_type,
        queue_name,
        messages_per_task,
    })
}

fn opt_overrides(obj: &Map<String, Value>, errors: &mut FieldErrors) -> Option<Vec<TaskOverride>> {
    let list = match obj.get("overrides") {
        None | Some(Value::Null) => return None,
        Some(Value::Array(list)) => list,
        Some(_) => {
            push(errors, "overrides", "Not a valid list.");
            return None;
        }
    };

    let mut overrides = Vec::with_capacity(list.len());
    for entry in list {
        let Some(entry) = entry.as_object() else {
            push(errors, "overrides", "Not a valid mapping.");
            continue;
        };
        let Some(container_name) = opt_string(entry, "containerName", errors) else {
            push(errors, "overrides", "override requires \"containerName\" field");
            continue;
        };
        let mut environment = BTreeMap::new();
        match entry.get("environment") {
            None | Some(Value::Null) => {}
            Some(Value::Object(env)) => {
                for (name, value) in env {
                    match value.as_str() {
                        Some(v) => {
                            environment.insert(name.clone(), v.to_string());
                        }
                        None => push(errors, "overrides", "environment values must be strings"),
                    }
                }
            }
            Some(_) => push(errors, "overrides", "Not a valid mapping."),
        }
        overrides.push(TaskOverride {
            container_name,
            environment,
        });
    }
    Some(overrides)
}
