// trigger-listener: the build trigger daemon binary.
//
// Architecture:
//   main -> config -> App::run -> Supervisor { queue drain + delete loops,
//   dispatcher, executor, sinks } over the SQS queue client, with the two
//   webhook command parsers and the CircleCI / Conduit / git collaborators.

pub mod app;
pub mod clients;
pub mod commands;
pub mod config;
pub mod repo;
pub mod report;
pub mod sqs;
