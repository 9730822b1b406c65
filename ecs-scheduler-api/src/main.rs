//! ECS Scheduler service entry point.
//!
//! Wires the pieces together in dependency order: configuration, logging,
//! the job store and registry, the scheduler daemon, the ops queue, and
//! finally the web api.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use ecs_scheduler_api::config::Config;
use ecs_scheduler_api::ecs::EcsHttpClient;
use ecs_scheduler_api::execution::JobExecutor;
use ecs_scheduler_api::logging;
use ecs_scheduler_api::ops::OpsQueue;
use ecs_scheduler_api::persistence;
use ecs_scheduler_api::registry::JobRegistry;
use ecs_scheduler_api::scheduler::Scheduler;
use ecs_scheduler_api::sqs::SqsHttpClient;
use ecs_scheduler_api::state::AppState;
use ecs_scheduler_api::triggers::TriggerRegistry;
use ecs_scheduler_api::webapi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    let _log_guard = logging::init(&config.logging)?;

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(anyhow::anyhow!("Invalid configuration: {}", e));
    }
    info!("ECS Scheduler v{}", env!("CARGO_PKG_VERSION"));

    let store = persistence::resolve(&config).await?;
    let registry = Arc::new(JobRegistry::load(store).await?);
    info!("Loaded {} jobs from the job store", registry.total().await);

    info!("Starting scheduld...");
    let runner = Arc::new(EcsHttpClient::new(config.ecs_endpoint()));
    let queues = Arc::new(SqsHttpClient::new(config.sqs_endpoint()));
    let executor = JobExecutor::new(
        runner,
        TriggerRegistry::new(queues),
        config.runner.cluster.clone(),
        config.runner.name.clone(),
    );
    let scheduler = Arc::new(Scheduler::new(registry.clone(), executor));

    let ops_queue = Arc::new(OpsQueue::new());
    ops_queue.register(scheduler.clone()).await;
    scheduler.start().await?;

    info!("Setting up webapi...");
    let state = Arc::new(AppState {
        registry,
        ops_queue,
    });
    let app = webapi::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Web api listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down scheduler...");
    scheduler.stop();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
