//! Job triggers.
//!
//! A trigger decides how many concurrent tasks a job should have at firing
//! time. Jobs without an explicit trigger (or with an unknown trigger
//! name) use the no-op trigger.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use ecs_scheduler_common::JobDetails;

use crate::ecs::ClientError;
use crate::sqs::QueueClient;

#[async_trait]
pub trait Trigger: Send + Sync {
    /// Determine the number of tasks that should be running for the job.
    async fn determine_task_count(&self, details: &JobDetails) -> Result<u32, ClientError>;
}

/// The no-op trigger, used for jobs with no explicit trigger set.
pub struct NoOpTrigger;

#[async_trait]
impl Trigger for NoOpTrigger {
    async fn determine_task_count(&self, details: &JobDetails) -> Result<u32, ClientError> {
        Ok(details
            .max_count
            .unwrap_or(u32::MAX)
            .min(details.task_count))
    }
}

/// Queue-depth trigger: scale the task count from the number of messages
/// waiting on the configured queue. An empty queue means no tasks at all.
pub struct SqsTrigger {
    queues: Arc<dyn QueueClient>,
}

impl SqsTrigger {
    pub fn new(queues: Arc<dyn QueueClient>) -> Self {
        Self { queues }
    }
}

#[async_trait]
impl Trigger for SqsTrigger {
    async fn determine_task_count(&self, details: &JobDetails) -> Result<u32, ClientError> {
        let trigger = details.trigger.as_ref();
        let queue_name = trigger
            .and_then(|t| t.queue_name.as_deref())
            .ok_or_else(|| {
                ClientError::Api(format!("job {} sqs trigger has no queue name", details.id))
            })?;

        let message_count = self.queues.approximate_message_count(queue_name).await?;
        if message_count == 0 {
            return Ok(0);
        }

        let scaled = match trigger.and_then(|t| t.messages_per_task) {
            Some(factor) => message_count.div_ceil(factor as u64).min(u32::MAX as u64) as u32,
            None => 0,
        };
        Ok(details
            .max_count
            .unwrap_or(u32::MAX)
            .min(scaled.max(details.task_count)))
    }
}

/// Named trigger lookup. Unknown names resolve to the no-op trigger.
pub struct TriggerRegistry {
    triggers: HashMap<&'static str, Arc<dyn Trigger>>,
    fallback: Arc<dyn Trigger>,
}

impl TriggerRegistry {
    pub fn new(queues: Arc<dyn QueueClient>) -> Self {
        let fallback: Arc<dyn Trigger> = Arc::new(NoOpTrigger);
        let mut triggers: HashMap<&'static str, Arc<dyn Trigger>> = HashMap::new();
        triggers.insert("noop", fallback.clone());
        triggers.insert("sqs", Arc::new(SqsTrigger::new(queues)));
        Self { triggers, fallback }
    }

    pub fn get(&self, trigger_name: Option<&str>) -> Arc<dyn Trigger> {
        trigger_name
            .and_then(|name| self.triggers.get(name).cloned())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecs_scheduler_common::{ParsedSchedule, TriggerSpec};
    use tokio::sync::Mutex;

    fn details(task_count: u32, max_count: Option<u32>, trigger: Option<TriggerSpec>) -> JobDetails {
        JobDetails {
            id: "alpha".to_string(),
            task_definition: Some("alpha".to_string()),
            schedule: "* * *".to_string(),
            parsed_schedule: ParsedSchedule::default(),
            task_count,
            max_count,
            schedule_start: None,
            schedule_end: None,
            timezone: None,
            suspended: false,
            trigger,
            overrides: None,
        }
    }

    fn sqs_spec(messages_per_task: Option<u32>) -> Option<TriggerSpec> {
        Some(TriggerSpec {
            trigger_type: "sqs".to_string(),
            queue_name: Some("work".to_string()),
            messages_per_task,
        })
    }

    struct FakeQueue {
        messages: Mutex<u64>,
    }

    #[async_trait]
    impl QueueClient for FakeQueue {
        async fn approximate_message_count(&self, _queue_name: &str) -> Result<u64, ClientError> {
            Ok(*self.messages.lock().await)
        }
    }

    fn registry(messages: u64) -> TriggerRegistry {
        TriggerRegistry::new(Arc::new(FakeQueue {
            messages: Mutex::new(messages),
        }))
    }

    #[tokio::test]
    async fn test_noop_respects_max_count() {
        let trigger = NoOpTrigger;
        assert_eq!(
            trigger.determine_task_count(&details(3, None, None)).await.unwrap(),
            3
        );
        assert_eq!(
            trigger
                .determine_task_count(&details(10, Some(4), None))
                .await
                .unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn test_sqs_empty_queue_means_zero() {
        let trigger = registry(0).get(Some("sqs"));
        assert_eq!(
            trigger
                .determine_task_count(&details(3, None, sqs_spec(Some(10))))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_sqs_scales_by_messages_per_task() {
        let trigger = registry(95).get(Some("sqs"));
        // ceil(95 / 10) = 10 tasks.
        assert_eq!(
            trigger
                .determine_task_count(&details(3, None, sqs_spec(Some(10))))
                .await
                .unwrap(),
            10
        );
    }

    #[tokio::test]
    async fn test_sqs_floors_at_task_count_and_caps_at_max() {
        let trigger = registry(5).get(Some("sqs"));
        // Scaled count of 1 is below taskCount.
        assert_eq!(
            trigger
                .determine_task_count(&details(3, None, sqs_spec(Some(10))))
                .await
                .unwrap(),
            3
        );

        let trigger = registry(500).get(Some("sqs"));
        assert_eq!(
            trigger
                .determine_task_count(&details(3, Some(20), sqs_spec(Some(1))))
                .await
                .unwrap(),
            20
        );
    }

    #[tokio::test]
    async fn test_sqs_without_scaling_factor() {
        let trigger = registry(500).get(Some("sqs"));
        // No messagesPerTask: scaled count is zero, floor is taskCount.
        assert_eq!(
            trigger
                .determine_task_count(&details(3, None, sqs_spec(None)))
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_unknown_trigger_resolves_to_noop() {
        let registry = registry(500);
        let trigger = registry.get(Some("celestial"));
        assert_eq!(
            trigger
                .determine_task_count(&details(2, None, None))
                .await
                .unwrap(),
            2
        );
        let trigger = registry.get(None);
        assert_eq!(
            trigger
                .determine_task_count(&details(2, None, None))
                .await
                .unwrap(),
            2
        );
    }
}
