// Supervisor: runs the pipeline's worker loops under one cancellable scope.
// The first worker to fail cancels the scope so every sibling unwinds, and
// its error is the one reported. Panics are not swallowed; they cancel the
// scope and then crash the process, because a panicking worker is a
// programmer error rather than an operational failure.

use anyhow::Result;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type WorkerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type WorkerFn = Box<dyn FnOnce(CancellationToken) -> WorkerFuture + Send>;

/// Runs a set of long-lived worker functions concurrently under one shared
/// cancellation scope.
///
/// `run` consumes the supervisor, so an instance cannot be started twice.
pub struct Supervisor {
    workers: Vec<(&'static str, WorkerFn)>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
        }
    }

    /// Register a named worker. The function receives the shared scope and
    /// is expected to exit promptly (without an error) once that scope is
    /// cancelled.
    pub fn worker<F, Fut>(mut self, name: &'static str, start: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.workers
            .push((name, Box::new(move |cancel| Box::pin(start(cancel)))));
        self
    }

    /// Start every worker and wait for the pipeline to finish.
    ///
    /// Returns `Ok(())` when all workers return cleanly (including after an
    /// external cancellation of `scope`), or the first worker error
    /// observed. Worker errors cancel the shared scope; cancellation itself
    /// is never reported as a failure.
    pub async fn run(self, scope: CancellationToken) -> Result<()> {
        let cancel = scope.child_token();
        let worker_count = self.workers.len();
        // Buffered so every worker can report without blocking; only the
        // first delivery is consumed.
        let (error_tx, mut error_rx) = mpsc::channel::<anyhow::Error>(worker_count.max(1));

        let mut handles = Vec::with_capacity(worker_count);
        for (name, start) in self.workers {
            let future = start(cancel.clone());
            let task_cancel = cancel.clone();
            let error_tx = error_tx.clone();
            handles.push(tokio::spawn(async move {
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(Ok(())) => {
                        tracing::debug!(worker = name, "Worker finished");
                    }
                    Ok(Err(err)) => {
                        tracing::error!(worker = name, "Worker failed, cancelling siblings: {err:#}");
                        let _ = error_tx.try_send(err);
                        task_cancel.cancel();
                    }
                    Err(panic) => {
                        tracing::error!(worker = name, "Worker panicked, cancelling siblings");
                        task_cancel.cancel();
                        std::panic::resume_unwind(panic);
                    }
                }
            }));
        }
        drop(error_tx);

        let mut panic_payload = None;
        for handle in handles {
            if let Err(join_err) = handle.await {
                cancel.cancel();
                if join_err.is_panic() && panic_payload.is_none() {
                    panic_payload = Some(join_err.into_panic());
                }
            }
        }

        // All siblings have unwound; let the panic crash the process.
        if let Some(payload) = panic_payload {
            std::panic::resume_unwind(payload);
        }

        match error_rx.recv().await {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
