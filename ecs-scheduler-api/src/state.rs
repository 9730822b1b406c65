//! Application State
//!
//! Shared state for the ECS scheduler web api

use std::sync::Arc;

use crate::ops::OpsQueue;
use crate::registry::JobRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub ops_queue: Arc<OpsQueue>,
}
