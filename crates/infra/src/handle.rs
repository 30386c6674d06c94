//! Caller-side handle on a spawned provisioning run.

use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tracing::info;

use shopforge_core::RunId;
use shopforge_saga::{
    OverallStatus, ProgressEvent, ProgressObserver, SagaError, SagaRun,
};

/// A run shared between its driver task, the deployment poller and callers.
/// Writers hold the lock only to apply transitions, never across external calls.
pub type SharedRun = Arc<RwLock<SagaRun>>;

/// Coarse lifecycle signal of a run, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Steps are executing synchronously.
    Running,
    /// The deployment was accepted; the poller is waiting for it to go live.
    Accepted,
    Finished(OverallStatus),
}

impl RunPhase {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunPhase::Finished(_))
    }
}

/// Move the phase forward. A finished phase is never overwritten.
pub(crate) fn advance_phase(tx: &watch::Sender<RunPhase>, next: RunPhase) {
    tx.send_if_modified(|current| {
        if current.is_finished() || *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

/// Resolves once the run reached a terminal status.
pub(crate) async fn wait_finished(rx: &mut watch::Receiver<RunPhase>) {
    if rx.wait_for(RunPhase::is_finished).await.is_err() {
        // Sender gone: nobody can finish the run any more.
        std::future::pending::<()>().await;
    }
}

#[derive(Clone)]
pub struct RunHandle {
    run_id: RunId,
    run: SharedRun,
    phase: Arc<watch::Sender<RunPhase>>,
    observer: Arc<dyn ProgressObserver>,
}

impl RunHandle {
    pub(crate) fn new(
        run: SharedRun,
        run_id: RunId,
        phase: Arc<watch::Sender<RunPhase>>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            run_id,
            run,
            phase,
            observer,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    /// Point-in-time copy of the run.
    pub async fn snapshot(&self) -> SagaRun {
        self.run.read().await.clone()
    }

    /// Wait until control would return to a synchronous caller: the deployment
    /// was accepted, or the run already finished.
    pub async fn accepted(&self) -> SagaRun {
        let mut rx = self.phase.subscribe();
        let _ = rx.wait_for(|p| *p != RunPhase::Running).await;
        self.snapshot().await
    }

    /// Wait for the terminal status.
    pub async fn finished(&self) -> SagaRun {
        let mut rx = self.phase.subscribe();
        wait_finished(&mut rx).await;
        self.snapshot().await
    }

    /// Stop the run. Further steps don't execute, the poller stops, and results
    /// of calls already in flight are discarded.
    pub async fn cancel(&self) -> Result<SagaRun, SagaError> {
        let (transition, finished, snapshot) = {
            let mut run = self.run.write().await;
            let transition = run.cancel()?;
            (transition, run.finished_event(), run.clone())
        };
        advance_phase(&self.phase, RunPhase::Finished(OverallStatus::Cancelled));

        if let Some(transition) = transition {
            self.observer.emit(&ProgressEvent::Step(transition));
        }
        if let Some(finished) = finished {
            self.observer.emit(&finished);
        }
        info!(run_id = %self.run_id, "provisioning run cancelled");
        Ok(snapshot)
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("phase", &self.phase())
            .finish()
    }
}
