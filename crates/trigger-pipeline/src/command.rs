// Parser and command seams between the pipeline and the message formats it
// carries. The pipeline never looks inside a payload itself; format-specific
// parsers classify messages and hand back executable commands.

use crate::message::RawMessage;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Returned by a parser to signal "not my format".
///
/// Parsing is pure classification, so a rejection is normal routing
/// signal rather than a pipeline fault. The reason is kept only for
/// debug-level logging.
#[derive(Debug, thiserror::Error)]
#[error("message does not match the {parser} format: {reason}")]
pub struct ParseRejected {
    pub parser: &'static str,
    pub reason: String,
}

impl ParseRejected {
    pub fn new(parser: &'static str, reason: impl Into<String>) -> Self {
        Self {
            parser,
            reason: reason.into(),
        }
    }
}

/// A message classified into an executable command.
///
/// Every command keeps a copy of its originating queue message so the
/// executor can forward the handle for deletion after a successful run.
#[async_trait]
pub trait Command: Send + Sync {
    /// Short command name used in log lines.
    fn kind(&self) -> &'static str;

    /// Execute the command.
    ///
    /// Returning an error leaves the source message undeleted; the queue
    /// redelivers it after the visibility timeout. That lease expiry is the
    /// only retry mechanism in the system.
    async fn execute(&self, cancel: &CancellationToken) -> anyhow::Result<()>;

    /// The queue message this command was parsed from.
    fn source_message(&self) -> &RawMessage;
}

/// A format-specific attempt to turn a raw message into a command.
///
/// Parsers are tried in a fixed priority order and the first success wins.
/// Implementations must be side-effect free: any error means "not my
/// format", never "malformed input I own".
pub trait MessageParser: Send + Sync {
    /// Parser name used in log lines.
    fn name(&self) -> &'static str;

    fn parse(&self, message: &RawMessage) -> Result<Box<dyn Command>, ParseRejected>;
}
