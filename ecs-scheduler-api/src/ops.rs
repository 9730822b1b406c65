//! In-process operations queue.
//!
//! The web api posts job operations here after persistence succeeds; the
//! scheduler registers itself as the single consumer during startup.
//! Operations posted before a consumer is registered are dropped, so
//! wire-up order matters.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use ecs_scheduler_common::{JobOperation, Result};

/// A consumer of job operations.
#[async_trait]
pub trait OpsConsumer: Send + Sync {
    async fn notify(&self, op: JobOperation) -> Result<()>;
}

/// An operations queue directly wired to the scheduler daemon.
///
/// Supports a single consumer at a time; registering replaces any prior
/// consumer.
pub struct OpsQueue {
    consumer: RwLock<Option<Arc<dyn OpsConsumer>>>,
}

impl OpsQueue {
    pub fn new() -> Self {
        Self {
            consumer: RwLock::new(None),
        }
    }

    /// Register the consumer for this queue, replacing any existing one.
    pub async fn register(&self, consumer: Arc<dyn OpsConsumer>) {
        *self.consumer.write().await = Some(consumer);
    }

    /// Forward an operation to the registered consumer.
    ///
    /// Consumer failures propagate to the caller; with no consumer the
    /// operation is silently dropped.
    pub async fn post(&self, op: JobOperation) -> Result<()> {
        let consumer = self.consumer.read().await.clone();
        match consumer {
            Some(consumer) => consumer.notify(op).await,
            None => Ok(()),
        }
    }
}

impl Default for OpsQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecs_scheduler_common::JobError;
    use tokio::sync::Mutex;

    struct RecordingConsumer {
        seen: Mutex<Vec<JobOperation>>,
        fail: bool,
    }

    #[async_trait]
    impl OpsConsumer for RecordingConsumer {
        async fn notify(&self, op: JobOperation) -> Result<()> {
            if self.fail {
                return Err(JobError::NotFound(op.job_id().to_string()));
            }
            self.seen.lock().await.push(op);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_post_without_consumer_is_dropped() {
        let queue = OpsQueue::new();
        queue
            .post(JobOperation::Add("alpha".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_post_forwards_to_consumer() {
        let queue = OpsQueue::new();
        let consumer = Arc::new(RecordingConsumer {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        queue.register(consumer.clone()).await;

        queue
            .post(JobOperation::Add("alpha".to_string()))
            .await
            .unwrap();
        queue
            .post(JobOperation::Remove("alpha".to_string()))
            .await
            .unwrap();

        let seen = consumer.seen.lock().await;
        assert_eq!(
            *seen,
            vec![
                JobOperation::Add("alpha".to_string()),
                JobOperation::Remove("alpha".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_consumer_failure_propagates() {
        let queue = OpsQueue::new();
        queue
            .register(Arc::new(RecordingConsumer {
                seen: Mutex::new(Vec::new()),
                fail: true,
            }))
            .await;
        let err = queue
            .post(JobOperation::Add("alpha".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_register_replaces_consumer() {
        let queue = OpsQueue::new();
        let first = Arc::new(RecordingConsumer {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let second = Arc::new(RecordingConsumer {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        queue.register(first.clone()).await;
        queue.register(second.clone()).await;

        queue
            .post(JobOperation::Modify("alpha".to_string()))
            .await
            .unwrap();
        assert!(first.seen.lock().await.is_empty());
        assert_eq!(second.seen.lock().await.len(), 1);
    }
}
