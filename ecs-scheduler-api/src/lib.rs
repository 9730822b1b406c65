//! ECS Scheduler Library
//!
//! Schedules and supervises containerized batch tasks on an ECS cluster.
//! This module exposes the scheduling engine, registry, and web api for
//! use by the binary and by tests.

// Core modules
pub mod config;
pub mod error;
pub mod logging;

// Application state
pub mod state;
pub use state::AppState;

// Job model validation and schedules
pub mod cron;
pub mod schema;

// Job storage
pub mod persistence;
pub mod registry;

// Scheduling engine
pub mod execution;
pub mod ops;
pub mod scheduler;
pub mod triggers;

// External service clients
pub mod ecs;
pub mod sqs;

// Web api
pub mod webapi;
