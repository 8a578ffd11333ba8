// Queue source: leases messages from the work queue and deletes handled
// ones. The drain loop and the delete loop run concurrently as two
// supervisor workers; either one failing tears down the whole pipeline,
// because queue connectivity problems should stop all processing rather
// than degrade silently.

use crate::error::PipelineError;
use crate::message::RawMessage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Abstract queue operations the source needs.
///
/// Implemented over AWS SQS in the listener crate; tests use in-memory
/// fakes.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Long-poll receive. Blocks server-side for up to `wait` and returns
    /// an empty batch when no message arrived in time (not an error).
    /// `visibility_timeout` of `None` means "use the queue default".
    async fn receive(
        &self,
        wait: Duration,
        visibility_timeout: Option<Duration>,
    ) -> anyhow::Result<Vec<RawMessage>>;

    /// Delete a message by its receipt handle.
    async fn delete(&self, message: &RawMessage) -> anyhow::Result<()>;

    /// The queue identity, used for error context.
    fn queue_url(&self) -> &str;
}

/// Configuration for the queue source loops.
#[derive(Debug, Clone)]
pub struct QueueSourceConfig {
    /// Long-poll wait passed to every receive call.
    pub wait_time: Duration,
    /// Per-receive visibility timeout override; `None` uses the queue
    /// default.
    pub visibility_timeout: Option<Duration>,
}

/// Leases messages from the queue and issues delete calls for handled
/// handles. Holds no state beyond configuration; both loops borrow the
/// same source through an `Arc`.
pub struct QueueSource {
    client: Arc<dyn QueueClient>,
    config: QueueSourceConfig,
}

impl QueueSource {
    pub fn new(client: Arc<dyn QueueClient>, config: QueueSourceConfig) -> Self {
        Self { client, config }
    }

    /// Drain loop: repeatedly long-poll the queue and forward every
    /// received message downstream, one at a time, blocking on
    /// backpressure.
    ///
    /// Ends cleanly on cancellation or when the downstream consumer is
    /// gone. A transport failure on the receive call is fatal.
    pub async fn drain(
        &self,
        message_tx: mpsc::Sender<RawMessage>,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                received = self.client.receive(self.config.wait_time, self.config.visibility_timeout) => {
                    received.map_err(|source| PipelineError::Receive {
                        queue_url: self.client.queue_url().to_string(),
                        source,
                    })?
                }
            };

            if batch.is_empty() {
                tracing::debug!("Long poll returned no messages");
                continue;
            }

            for message in batch {
                tracing::debug!(id = %message.id, "Received message");
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    sent = message_tx.send(message) => {
                        if sent.is_err() {
                            // Dispatcher has shut down; nothing left to feed.
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Delete loop: consume handles of handled messages and issue delete
    /// calls. Ends cleanly on cancellation or when every producer has
    /// dropped its sender. A transport failure on delete is fatal.
    pub async fn delete(
        &self,
        mut delete_rx: mpsc::Receiver<RawMessage>,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                received = delete_rx.recv() => match received {
                    Some(message) => message,
                    None => return Ok(()),
                },
            };

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                deleted = self.client.delete(&message) => {
                    deleted.map_err(|source| PipelineError::Delete {
                        queue_url: self.client.queue_url().to_string(),
                        message_id: message.id.clone(),
                        source,
                    })?;
                    tracing::info!(id = %message.id, "Deleted message");
                }
            }
        }
    }
}
