//! Queue-depth client used by the sqs trigger.

use async_trait::async_trait;
use serde_json::json;

use crate::ecs::ClientError;

/// Narrow queue metrics contract.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// The approximate number of visible messages on the named queue.
    async fn approximate_message_count(&self, queue_name: &str) -> Result<u64, ClientError>;
}

/// HTTP queue client.
pub struct SqsHttpClient {
    client: reqwest::Client,
    endpoint: String,
}

impl SqsHttpClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    async fn call(&self, target: &str, body: &serde_json::Value) -> Result<serde_json::Value, ClientError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Amz-Target", format!("AmazonSQS.{target}"))
            .header("Content-Type", "application/x-amz-json-1.0")
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Api(format!(
                "SQS {target} failed: HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl QueueClient for SqsHttpClient {
    async fn approximate_message_count(&self, queue_name: &str) -> Result<u64, ClientError> {
        let response = self
            .call("GetQueueUrl", &json!({"QueueName": queue_name}))
            .await?;
        let queue_url = response["QueueUrl"]
            .as_str()
            .ok_or_else(|| ClientError::Api(format!("no queue url for queue {queue_name}")))?
            .to_string();

        let response = self
            .call(
                "GetQueueAttributes",
                &json!({
                    "QueueUrl": queue_url,
                    "AttributeNames": ["ApproximateNumberOfMessages"],
                }),
            )
            .await?;
        response["Attributes"]["ApproximateNumberOfMessages"]
            .as_str()
            .and_then(|count| count.parse().ok())
            .ok_or_else(|| {
                ClientError::Api(format!("no message count attribute for queue {queue_name}"))
            })
    }
}
