// AWS SQS implementation of the pipeline's queue seam.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use std::time::Duration;
use trigger_pipeline::{QueueClient, RawMessage};

/// SQS allows at most 10 messages per receive call.
const MAX_RECEIVE_BATCH: i32 = 10;

/// `QueueClient` backed by AWS SQS. Credentials come from the usual AWS
/// environment (env vars, profile, instance role).
pub struct SqsQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsQueue {
    /// Build a client bound to one queue in one region.
    pub async fn connect(region: impl Into<String>, queue_url: impl Into<String>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.into()))
            .load()
            .await;
        Self {
            client: aws_sdk_sqs::Client::new(&config),
            queue_url: queue_url.into(),
        }
    }
}

#[async_trait]
impl QueueClient for SqsQueue {
    async fn receive(
        &self,
        wait: Duration,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<RawMessage>> {
        let mut request = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .wait_time_seconds(whole_seconds(wait))
            .max_number_of_messages(MAX_RECEIVE_BATCH);
        if let Some(visibility) = visibility_timeout {
            request = request.visibility_timeout(whole_seconds(visibility));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("ReceiveMessage call failed for {}", self.queue_url))?;

        let mut messages = Vec::new();
        for message in response.messages.unwrap_or_default() {
            match (message.message_id, message.body, message.receipt_handle) {
                (Some(id), Some(body), Some(receipt_handle)) => {
                    messages.push(RawMessage::new(id, body, receipt_handle));
                }
                _ => {
                    tracing::warn!("Dropping received message missing id, body or receipt handle");
                }
            }
        }
        Ok(messages)
    }

    async fn delete(&self, message: &RawMessage) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt_handle)
            .send()
            .await
            .with_context(|| format!("DeleteMessage call failed for message {}", message.id))?;
        Ok(())
    }

    fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

/// SQS duration parameters are `i32` seconds; a plain cast would wrap an
/// oversized configured duration into a negative, rejected value.
fn whole_seconds(duration: Duration) -> i32 {
    duration.as_secs().min(i32::MAX as u64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_durations_clamp_instead_of_wrapping() {
        assert_eq!(whole_seconds(Duration::from_secs(20)), 20);
        assert_eq!(whole_seconds(Duration::ZERO), 0);
        assert_eq!(
            whole_seconds(Duration::from_secs(u32::MAX as u64)),
            i32::MAX
        );
    }
}
