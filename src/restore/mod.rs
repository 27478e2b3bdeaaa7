pub(crate) mod logic;
pub(crate) mod migrate;
pub(crate) mod preflight;
pub(crate) mod service;

use std::sync::Arc;
use tokio::sync::oneshot;

use crate::errors::{RestoreError, Result};
pub use logic::{RestoreOrchestrator, RestoreOutcome, RestoreRequest};

/// Public entry point for the restore process.
///
/// Restores are run one at a time on a blocking worker; each accepted request
/// yields exactly one `RestoreOutcome` through its `RestoreHandle`.
#[derive(Clone)]
pub struct RestoreScheduler {
    orchestrator: Arc<RestoreOrchestrator>,
}

/// Completion signal for a submitted restore.
pub struct RestoreHandle {
    rx: oneshot::Receiver<RestoreOutcome>,
}

impl RestoreHandle {
    pub async fn outcome(self) -> RestoreOutcome {
        self.rx
            .await
            .unwrap_or(RestoreOutcome::Failure(RestoreError::WorkerLost))
    }
}

impl RestoreScheduler {
    pub fn new(orchestrator: RestoreOrchestrator) -> Self {
        RestoreScheduler {
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Starts a restore in the background.
    ///
    /// Fails with `AlreadyRunning` if a previous restore has not finished yet.
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: RestoreRequest) -> Result<RestoreHandle> {
        let guard = self.orchestrator.try_acquire()?;
        let (tx, rx) = oneshot::channel();
        let orchestrator = Arc::clone(&self.orchestrator);

        log::info!("[Restore] Accepted restore request for {}", request.backup_dir().display());
        tokio::task::spawn_blocking(move || {
            let outcome = orchestrator.restore_with_guard(&request, guard);
            if tx.send(outcome).is_err() {
                log::warn!("[Restore] Restore finished but nobody is waiting for the outcome");
            }
        });

        Ok(RestoreHandle { rx })
    }
}
