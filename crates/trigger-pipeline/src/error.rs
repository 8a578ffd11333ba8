// Fatal pipeline error types.

use thiserror::Error;

/// Errors that tear down the whole pipeline.
///
/// Only queue transport failures live here. A queue that cannot be received
/// from or deleted against is an operational condition that needs an
/// operator, so these propagate to the supervisor and stop the process
/// instead of entering a silent retry loop. Both variants carry the
/// original cause; constructing one without a cause is unrepresentable.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The long-poll receive call against the queue failed.
    #[error("cannot receive messages from queue {queue_url}")]
    Receive {
        queue_url: String,
        #[source]
        source: anyhow::Error,
    },

    /// A delete call for a handled message failed.
    #[error("unable to delete message {message_id} from queue {queue_url}")]
    Delete {
        queue_url: String,
        message_id: String,
        #[source]
        source: anyhow::Error,
    },
}
