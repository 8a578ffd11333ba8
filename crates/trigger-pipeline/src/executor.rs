// Executor: runs classified commands one at a time. Success forwards the
// originating message handle for deletion; failure forwards the command to
// the failure sink and deliberately leaves the message undeleted, so the
// queue's lease expiry redelivers it for a future attempt. There is no
// other retry or backoff.

use crate::command::Command;
use crate::message::RawMessage;
use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Executor loop. Ends cleanly on cancellation or when the upstream
/// channel closes.
pub async fn run(
    mut command_rx: mpsc::Receiver<Box<dyn Command>>,
    delete_tx: mpsc::Sender<RawMessage>,
    failed_tx: mpsc::Sender<Box<dyn Command>>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            received = command_rx.recv() => match received {
                Some(command) => command,
                None => return Ok(()),
            },
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            outcome = command.execute(&cancel) => outcome,
        };

        let keep_running = match outcome {
            Ok(()) => {
                let message = command.source_message().clone();
                tracing::info!(
                    id = %message.id,
                    kind = command.kind(),
                    "Command executed, scheduling message for deletion"
                );
                forward(&delete_tx, message, &cancel).await
            }
            Err(err) => {
                tracing::warn!(
                    id = %command.source_message().id,
                    kind = command.kind(),
                    "Command execution failed: {err:#}"
                );
                forward(&failed_tx, command, &cancel).await
            }
        };
        if !keep_running {
            return Ok(());
        }
    }
}

async fn forward<T>(tx: &mpsc::Sender<T>, value: T, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(value) => sent.is_ok(),
    }
}
