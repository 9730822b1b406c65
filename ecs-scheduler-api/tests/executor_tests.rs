//! Executor reconciliation and launch tests.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{FakeQueue, FakeRunner};
use ecs_scheduler_api::ecs::{ContainerOverride, EnvironmentEntry, TaskDetail, TaskOverrides};
use ecs_scheduler_api::execution::{JobExecutor, RunOutcome};
use ecs_scheduler_api::schema;
use ecs_scheduler_api::triggers::TriggerRegistry;
use ecs_scheduler_common::{JobDetails, OVERRIDE_TAG};

fn executor(runner: Arc<FakeRunner>, messages: u64) -> JobExecutor {
    JobExecutor::new(
        runner,
        TriggerRegistry::new(Arc::new(FakeQueue { messages })),
        "test-cluster".to_string(),
        "test-scheduler".to_string(),
    )
}

fn details(value: serde_json::Value) -> JobDetails {
    schema::load_create(&value).unwrap()
}

#[tokio::test]
async fn test_launches_only_the_needed_tasks() {
    let runner = Arc::new(FakeRunner::new(vec!["arn:task/existing"]));
    let executor = executor(runner.clone(), 0);
    let job = details(json!({
        "taskDefinition": "alpha",
        "schedule": "* * *",
        "taskCount": 3,
    }));

    let result = executor.run(&job).await.unwrap();
    assert_eq!(result.outcome, RunOutcome::StartedTasks);
    assert_eq!(result.task_info.len(), 2);
    assert_eq!(runner.requested_counts().await, vec![2]);

    let requests = runner.run_requests.lock().await;
    assert_eq!(requests[0].cluster, "test-cluster");
    assert_eq!(requests[0].task_definition, "alpha");
    assert_eq!(requests[0].started_by, "test-scheduler");
    assert!(requests[0].overrides.is_none());
}

#[tokio::test]
async fn test_no_tasks_needed_checks_only() {
    let runner = Arc::new(FakeRunner::new(vec!["arn:task/1", "arn:task/2"]));
    let executor = executor(runner.clone(), 0);
    let job = details(json!({
        "taskDefinition": "alpha",
        "schedule": "* * *",
        "taskCount": 2,
    }));

    let result = executor.run(&job).await.unwrap();
    assert_eq!(result.outcome, RunOutcome::CheckedTasks);
    assert!(result.task_info.is_empty());
    assert!(runner.run_requests.lock().await.is_empty());
}

#[tokio::test]
async fn test_large_launches_batch_at_ten() {
    let runner = Arc::new(FakeRunner::new(vec![]));
    let executor = executor(runner.clone(), 0);
    let job = details(json!({
        "taskDefinition": "alpha",
        "schedule": "* * *",
        "taskCount": 13,
    }));

    let result = executor.run(&job).await.unwrap();
    assert_eq!(result.outcome, RunOutcome::StartedTasks);
    assert_eq!(result.task_info.len(), 13);
    assert_eq!(runner.requested_counts().await, vec![10, 3]);
}

#[tokio::test]
async fn test_overrides_are_tagged_with_the_job_id() {
    let runner = Arc::new(FakeRunner::new(vec![]));
    let executor = executor(runner.clone(), 0);
    let job = details(json!({
        "id": "beta",
        "taskDefinition": "shared",
        "schedule": "* * *",
        "taskCount": 3,
        "overrides": [{"containerName": "c", "environment": {"FOO": "1"}}],
    }));

    let result = executor.run(&job).await.unwrap();
    assert_eq!(result.outcome, RunOutcome::StartedTasks);
    assert_eq!(runner.requested_counts().await, vec![3]);

    let requests = runner.run_requests.lock().await;
    let overrides = requests[0].overrides.as_ref().unwrap();
    assert_eq!(
        *overrides,
        vec![ContainerOverride {
            name: "c".to_string(),
            environment: vec![
                EnvironmentEntry {
                    name: "FOO".to_string(),
                    value: "1".to_string()
                },
                EnvironmentEntry {
                    name: OVERRIDE_TAG.to_string(),
                    value: "beta".to_string()
                },
            ],
        }]
    );

    // The job's own override definition was not mutated.
    let environment = &job.overrides.as_ref().unwrap()[0].environment;
    assert_eq!(environment.len(), 1);
    assert!(!environment.contains_key(OVERRIDE_TAG));
}

#[tokio::test]
async fn test_override_aware_running_count() {
    let runner = Arc::new(FakeRunner::new(vec!["arn:task/1", "arn:task/2"]));
    // Two tasks of the shared definition are running, but only one belongs
    // to this job.
    *runner.descriptions.lock().await = vec![
        tagged_task("arn:task/1", "beta"),
        tagged_task("arn:task/2", "other-job"),
    ];
    let executor = executor(runner.clone(), 0);
    let job = details(json!({
        "id": "beta",
        "taskDefinition": "shared",
        "schedule": "* * *",
        "taskCount": 3,
        "overrides": [{"containerName": "c", "environment": {}}],
    }));

    let result = executor.run(&job).await.unwrap();
    assert_eq!(result.outcome, RunOutcome::StartedTasks);
    // running = 1 tagged task, so 3 - 1 = 2 launches.
    assert_eq!(runner.requested_counts().await, vec![2]);
}

#[tokio::test]
async fn test_sqs_trigger_scales_the_expected_count() {
    let runner = Arc::new(FakeRunner::new(vec![]));
    let executor = executor(runner.clone(), 45);
    let job = details(json!({
        "taskDefinition": "alpha",
        "schedule": "* * *",
        "taskCount": 1,
        "trigger": {"type": "sqs", "queueName": "work", "messagesPerTask": 10},
    }));

    let result = executor.run(&job).await.unwrap();
    // ceil(45 / 10) = 5 tasks needed.
    assert_eq!(result.outcome, RunOutcome::StartedTasks);
    assert_eq!(runner.requested_counts().await, vec![5]);
}

#[tokio::test]
async fn test_sqs_trigger_empty_queue_starts_nothing() {
    let runner = Arc::new(FakeRunner::new(vec![]));
    let executor = executor(runner.clone(), 0);
    let job = details(json!({
        "taskDefinition": "alpha",
        "schedule": "* * *",
        "taskCount": 4,
        "trigger": {"type": "sqs", "queueName": "work", "messagesPerTask": 10},
    }));

    let result = executor.run(&job).await.unwrap();
    assert_eq!(result.outcome, RunOutcome::CheckedTasks);
    assert!(runner.run_requests.lock().await.is_empty());
}

fn tagged_task(arn: &str, job_id: &str) -> TaskDetail {
    TaskDetail {
        task_arn: arn.to_string(),
        container_instance_arn: "arn:host/1".to_string(),
        overrides: TaskOverrides {
            container_overrides: vec![ContainerOverride {
                name: "c".to_string(),
                environment: vec![EnvironmentEntry {
                    name: OVERRIDE_TAG.to_string(),
                    value: job_id.to_string(),
                }],
            }],
        },
    }
}
