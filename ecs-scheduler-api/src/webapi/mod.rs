//! Web api router.

pub mod home;
pub mod jobs;
pub mod spec;

use std::sync::Arc;

use axum::{
    http::header,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(home::home))
        .route("/spec", get(spec::swagger_spec))
        .route("/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route(
            "/jobs/:job_id",
            get(jobs::get_job)
                .put(jobs::update_job)
                .delete(jobs::delete_job),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
