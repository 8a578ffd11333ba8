// Composition root: builds the collaborators, wires the pipeline channels
// and runs the worker loops under one supervisor until a signal or a fatal
// queue error stops them.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use trigger_common::HttpClientFactory;
use trigger_pipeline::{
    executor, sink, Dispatcher, MessageParser, QueueSource, QueueSourceConfig, Supervisor,
};

use crate::clients::{CircleClient, ConduitClient};
use crate::commands::{BuildRequestParser, BuildResultParser, Services};
use crate::config::Config;
use crate::repo::GitWorkspace;
use crate::sqs::SqsQueue;

/// Every stage blocks on its downstream neighbour; a slow executor
/// backpressures all the way to the queue receive call.
const CHANNEL_CAPACITY: usize = 1;

pub struct App {
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the daemon until SIGINT/SIGTERM or a fatal pipeline error.
    pub async fn run(self) -> Result<()> {
        let scope = CancellationToken::new();
        spawn_signal_handlers(scope.clone());

        let http = HttpClientFactory::create_client()?;
        let services = Services {
            conduit: Arc::new(ConduitClient::new(
                self.config.phab_api_token.clone(),
                self.config.phab_url.clone(),
                http.clone(),
            )),
            circle: Arc::new(CircleClient::new(self.config.circle_token.clone(), http)),
            workspace: Arc::new(GitWorkspace::new().context("cannot set up clone workspace")?),
        };

        let queue = Arc::new(
            SqsQueue::connect(self.config.region.clone(), self.config.queue_url.clone()).await,
        );
        let source = Arc::new(QueueSource::new(
            queue,
            QueueSourceConfig {
                wait_time: self.config.wait_time,
                visibility_timeout: self.config.visibility_timeout,
            },
        ));

        // Request parsing is tried first; result payloads never carry the
        // querystring group, so the order only matters for log noise.
        let parsers: Vec<Box<dyn MessageParser>> = vec![
            Box::new(BuildRequestParser::new(services.clone())),
            Box::new(BuildResultParser::new(services)),
        ];
        let dispatcher = Dispatcher::new(parsers);

        let (message_tx, message_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (unrecognized_tx, unrecognized_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (delete_tx, delete_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (failed_tx, failed_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let sink_delete_tx = delete_tx.clone();

        let drain_source = source.clone();
        Supervisor::new()
            .worker("queue-drain", move |cancel| async move {
                drain_source
                    .drain(message_tx, cancel)
                    .await
                    .map_err(anyhow::Error::from)
            })
            .worker("queue-delete", move |cancel| async move {
                source
                    .delete(delete_rx, cancel)
                    .await
                    .map_err(anyhow::Error::from)
            })
            .worker("dispatcher", move |cancel| async move {
                dispatcher
                    .run(message_rx, command_tx, unrecognized_tx, cancel)
                    .await
            })
            .worker("executor", move |cancel| {
                executor::run(command_rx, delete_tx, failed_tx, cancel)
            })
            .worker("unrecognized-sink", move |cancel| {
                sink::log_unrecognized(unrecognized_rx, sink_delete_tx, cancel)
            })
            .worker("failure-sink", move |cancel| {
                sink::log_failures(failed_rx, cancel)
            })
            .run(scope)
            .await
    }
}

/// Cancel the pipeline scope on SIGINT or SIGTERM. A failure to install a
/// handler is logged and ignored; the daemon can still be stopped by its
/// supervisor killing the process.
fn spawn_signal_handlers(scope: CancellationToken) {
    tokio::spawn(async move {
        let interrupt = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for interrupt signal: {err}");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => {
                    tracing::warn!("Cannot listen for terminate signal: {err}");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = interrupt => tracing::info!("Interrupt received, shutting down"),
            _ = terminate => tracing::info!("Terminate received, shutting down"),
        }
        scope.cancel();
    });
}
