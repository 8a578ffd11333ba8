// Terminal observers for the two non-success outcomes.
//
// Unparseable garbage will never become parseable, so the unrecognized sink
// still forwards the handle for deletion; redelivering it is pure waste.
// Failed commands are only logged here: leaving the message undeleted lets
// the queue redeliver it after the visibility timeout, possibly to a
// different process instance.

use crate::command::Command;
use crate::message::RawMessage;
use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Logs messages no parser recognized and forwards their handles for
/// deletion.
pub async fn log_unrecognized(
    mut unrecognized_rx: mpsc::Receiver<RawMessage>,
    delete_tx: mpsc::Sender<RawMessage>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            received = unrecognized_rx.recv() => match received {
                Some(message) => message,
                None => return Ok(()),
            },
        };

        tracing::info!(
            id = %message.id,
            body = %message.body,
            "Discarding message no parser can handle"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            sent = delete_tx.send(message) => {
                if sent.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

/// Logs commands whose execution failed. Deliberately does not forward the
/// handle for deletion.
pub async fn log_failures(
    mut failed_rx: mpsc::Receiver<Box<dyn Command>>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            received = failed_rx.recv() => match received {
                Some(command) => command,
                None => return Ok(()),
            },
        };

        tracing::warn!(
            id = %command.source_message().id,
            kind = command.kind(),
            "Command failed to process, leaving message for queue redelivery"
        );
    }
}
