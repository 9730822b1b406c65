//! Job REST resources.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Map, Value};
use tracing::error;

use ecs_scheduler_common::{JobOperation, Pagination};

use crate::error::ApiError;
use crate::schema;
use crate::state::AppState;

const DEFAULT_SKIP: i64 = 0;
const DEFAULT_COUNT: i64 = 10;

/// Paginated list of scheduled jobs.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let pagination = parse_pagination(&params)?;

    let mut jobs = state.registry.get_all().await;
    jobs.sort_by(|a, b| a.id().cmp(b.id()));
    let total = jobs.len() as i64;

    let page: Result<Vec<Value>, _> = jobs
        .iter()
        .skip(pagination.skip as usize)
        .take(pagination.count as usize)
        .map(schema::job_response)
        .collect();
    let page = page.map_err(|e| ApiError::Internal(format!("Job serialization failed: {e}")))?;

    let mut body = Map::new();
    body.insert("jobs".to_string(), Value::Array(page));
    let prev = Pagination::new(
        pagination.skip - pagination.count,
        pagination.count,
        total,
    );
    if let Some(link) = pagination_link(&prev) {
        body.insert("prev".to_string(), json!(link));
    }
    let next = Pagination::new(
        pagination.skip + pagination.count,
        pagination.count,
        total,
    );
    if let Some(link) = pagination_link(&next) {
        body.insert("next".to_string(), json!(link));
    }
    Ok(Json(Value::Object(body)))
}

/// Create a new scheduled job.
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let payload = parse_json_body(&headers, &body)?;
    let job = state.registry.create(&payload).await?;

    let response = committed_response(job.id());
    post_operation(&state, JobOperation::Add(job.id().to_string()), &response).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// The job for the given id.
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job = state.registry.get(&job_id).await?;
    let response = schema::job_response(&job)
        .map_err(|e| ApiError::Internal(format!("Job serialization failed: {e}")))?;
    Ok(Json(response))
}

/// Update the specified job.
pub async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let payload = parse_json_body(&headers, &body)?;
    state.registry.update(&job_id, &payload).await?;

    let response = committed_response(&job_id);
    post_operation(&state, JobOperation::Modify(job_id), &response).await?;
    Ok(Json(response))
}

/// Delete and unschedule the specified job.
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.registry.delete(&job_id).await?;

    let response = json!({"id": job_id});
    post_operation(&state, JobOperation::Remove(job_id), &response).await?;
    Ok(Json(response))
}

/// Enforce the json content-type constraint, then parse the body.
fn parse_json_body(headers: &HeaderMap, body: &Bytes) -> Result<Value, ApiError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return Err(ApiError::UnsupportedMediaType);
    }
    Ok(serde_json::from_slice(body)?)
}

fn committed_response(job_id: &str) -> Value {
    json!({
        "id": job_id,
        "link": schema::job_link(job_id),
    })
}

/// Hand the operation to the scheduler after the store change committed.
///
/// A consumer failure surfaces as a 500 carrying the already-committed
/// item so the caller knows the persistence side succeeded.
async fn post_operation(
    state: &AppState,
    op: JobOperation,
    response: &Value,
) -> Result<(), ApiError> {
    if let Err(e) = state.ops_queue.post(op).await {
        error!(error = %e, "Exception when posting job operation to ops queue");
        return Err(ApiError::DeliveryFailed {
            item: response.clone(),
        });
    }
    Ok(())
}

fn parse_pagination(params: &HashMap<String, String>) -> Result<Pagination, ApiError> {
    let mut errors = ecs_scheduler_common::FieldErrors::new();
    let mut field = |name: &str, default: i64| -> i64 {
        match params.get(name) {
            None => default,
            Some(raw) => match raw.parse::<i64>() {
                Ok(value) => value.max(0),
                Err(_) => {
                    errors
                        .entry(name.to_string())
                        .or_default()
                        .push("Not a valid integer.".to_string());
                    default
                }
            },
        }
    };
    let skip = field("skip", DEFAULT_SKIP);
    let count = field("count", DEFAULT_COUNT);
    if errors.is_empty() {
        Ok(Pagination::new(skip, count, 0))
    } else {
        Err(ApiError::Validation(errors))
    }
}

/// Render a page frame as a collection url, omitting default values.
fn pagination_link(page_frame: &Pagination) -> Option<String> {
    let frame = page_frame.frame()?;
    let mut params = Vec::new();
    if frame.skip != DEFAULT_SKIP {
        params.push(format!("skip={}", frame.skip));
    }
    if frame.count != DEFAULT_COUNT {
        params.push(format!("count={}", frame.count));
    }
    if params.is_empty() {
        Some("/jobs".to_string())
    } else {
        Some(format!("/jobs?{}", params.join("&")))
    }
}
