// Dispatcher: offers each raw message to an ordered list of parsers and
// routes it onward. First successful parse wins; a message no parser claims
// goes to the unrecognized channel. Parser rejections are normal routing
// signal, so this loop only ever ends through cancellation, local shutdown
// or channel closure.

use crate::command::{Command, MessageParser};
use crate::message::RawMessage;
use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Classifies raw messages into commands using a fixed priority order of
/// parsers.
pub struct Dispatcher {
    parsers: Vec<Box<dyn MessageParser>>,
    /// Local shutdown signal, distinct from the pipeline scope: stops this
    /// loop without cancelling the rest of the pipeline, letting in-flight
    /// work drain.
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(parsers: Vec<Box<dyn MessageParser>>) -> Self {
        Self {
            parsers,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the dispatch loop without touching the pipeline
    /// scope. Callers that prefer unconditional cancellation can ignore it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Dispatch loop. Ends cleanly on scope cancellation, local shutdown or
    /// when the upstream channel closes.
    pub async fn run(
        &self,
        mut message_rx: mpsc::Receiver<RawMessage>,
        command_tx: mpsc::Sender<Box<dyn Command>>,
        unrecognized_tx: mpsc::Sender<RawMessage>,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.shutdown.cancelled() => return Ok(()),
                received = message_rx.recv() => match received {
                    Some(message) => message,
                    None => return Ok(()),
                },
            };

            if !self
                .dispatch(message, &command_tx, &unrecognized_tx, &cancel)
                .await
            {
                return Ok(());
            }
        }
    }

    /// Route one message. Returns `false` when the loop should stop
    /// (cancellation or a closed downstream channel observed mid-send).
    async fn dispatch(
        &self,
        message: RawMessage,
        command_tx: &mpsc::Sender<Box<dyn Command>>,
        unrecognized_tx: &mpsc::Sender<RawMessage>,
        cancel: &CancellationToken,
    ) -> bool {
        for parser in &self.parsers {
            match parser.parse(&message) {
                Ok(command) => {
                    tracing::info!(
                        id = %message.id,
                        parser = parser.name(),
                        kind = command.kind(),
                        "Message classified"
                    );
                    return self.forward(command_tx, command, cancel).await;
                }
                Err(rejected) => {
                    tracing::debug!(id = %message.id, "Parser rejected message: {rejected}");
                }
            }
        }

        tracing::info!(id = %message.id, "No parser recognized message");
        self.forward(unrecognized_tx, message, cancel).await
    }

    /// Blocking send respecting scope cancellation and local shutdown.
    async fn forward<T>(
        &self,
        tx: &mpsc::Sender<T>,
        value: T,
        cancel: &CancellationToken,
    ) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = self.shutdown.cancelled() => false,
            sent = tx.send(value) => sent.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ParseRejected;
    use async_trait::async_trait;

    struct TestCommand {
        label: &'static str,
        source: RawMessage,
    }

    #[async_trait]
    impl Command for TestCommand {
        fn kind(&self) -> &'static str {
            self.label
        }

        async fn execute(&self, _cancel: &CancellationToken) -> Result<()> {
            Ok(())
        }

        fn source_message(&self) -> &RawMessage {
            &self.source
        }
    }

    /// Claims every message whose body contains its tag.
    struct TagParser {
        tag: &'static str,
    }

    impl MessageParser for TagParser {
        fn name(&self) -> &'static str {
            self.tag
        }

        fn parse(&self, message: &RawMessage) -> Result<Box<dyn Command>, ParseRejected> {
            if message.body.contains(self.tag) {
                Ok(Box::new(TestCommand {
                    label: self.tag,
                    source: message.clone(),
                }))
            } else {
                Err(ParseRejected::new(self.tag, "tag not present"))
            }
        }
    }

    fn dispatcher(tags: &[&'static str]) -> Dispatcher {
        Dispatcher::new(
            tags.iter()
                .map(|tag| Box::new(TagParser { tag }) as Box<dyn MessageParser>)
                .collect(),
        )
    }

    async fn run_one(
        dispatcher: Dispatcher,
        message: RawMessage,
    ) -> (Option<Box<dyn Command>>, Option<RawMessage>) {
        let (message_tx, message_rx) = mpsc::channel(1);
        let (command_tx, mut command_rx) = mpsc::channel(1);
        let (unrecognized_tx, mut unrecognized_rx) = mpsc::channel(1);

        message_tx.send(message).await.unwrap();
        drop(message_tx);
        dispatcher
            .run(message_rx, command_tx, unrecognized_tx, CancellationToken::new())
            .await
            .unwrap();

        (command_rx.recv().await, unrecognized_rx.recv().await)
    }

    #[tokio::test]
    async fn earlier_parser_wins_when_both_match() {
        let message = RawMessage::new("m1", "alpha beta", "rh1");
        let (command, unrecognized) = run_one(dispatcher(&["alpha", "beta"]), message).await;
        assert_eq!(command.expect("classified").kind(), "alpha");
        assert!(unrecognized.is_none());

        let message = RawMessage::new("m1", "alpha beta", "rh1");
        let (command, _) = run_one(dispatcher(&["beta", "alpha"]), message).await;
        assert_eq!(command.expect("classified").kind(), "beta");
    }

    #[tokio::test]
    async fn second_parser_claims_what_the_first_rejects() {
        let message = RawMessage::new("m2", "beta only", "rh2");
        let (command, unrecognized) = run_one(dispatcher(&["alpha", "beta"]), message).await;
        assert_eq!(command.expect("classified").kind(), "beta");
        assert!(unrecognized.is_none());
    }

    #[tokio::test]
    async fn unmatched_message_goes_to_unrecognized_channel() {
        let message = RawMessage::new("m3", "gamma", "rh3");
        let (command, unrecognized) = run_one(dispatcher(&["alpha", "beta"]), message).await;
        assert!(command.is_none());
        assert_eq!(unrecognized.expect("routed").id, "m3");
    }

    #[tokio::test]
    async fn local_shutdown_stops_the_loop_without_scope_cancellation() {
        let dispatcher = dispatcher(&["alpha"]);
        let shutdown = dispatcher.shutdown_token();
        let (_message_tx, message_rx) = mpsc::channel::<RawMessage>(1);
        let (command_tx, _command_rx) = mpsc::channel(1);
        let (unrecognized_tx, _unrecognized_rx) = mpsc::channel(1);

        let scope = CancellationToken::new();
        let handle = tokio::spawn(async move {
            dispatcher
                .run(message_rx, command_tx, unrecognized_tx, scope)
                .await
        });

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
