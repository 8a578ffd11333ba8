// trigger-pipeline: the ingestion-classification-execution-acknowledgement
// core of the build trigger daemon.
//
// Data flows one direction through point-to-point channels:
//   queue source -> dispatcher -> { unrecognized sink | executor }
//                -> { delete channel -> queue source delete loop | failure sink }
//
// All loops run as workers under one Supervisor sharing a single
// cancellation scope. Queue transport failures are fatal to the whole
// pipeline; command execution failures are per-message and leave the
// message undeleted so the queue redelivers it after its lease expires.

pub mod command;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod message;
pub mod queue;
pub mod sink;
pub mod supervisor;


pub use command::{Command, MessageParser, ParseRejected};
pub use dispatcher::Dispatcher;
pub use error::PipelineError;
pub use message::RawMessage;
pub use queue::{QueueClient, QueueSource, QueueSourceConfig};
pub use supervisor::Supervisor;
