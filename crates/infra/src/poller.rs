//! Deployment status poller.
//!
//! Once `create-deployment` has been accepted, the poller queries the hosting
//! deployer right away and then on a fixed interval until the deployment reaches a terminal status,
//! the run finishes (cancellation), or the attempt/duration bound is hit.
//!
//! - At most one status query is in flight per run: queries are issued from a
//!   single loop and awaited before the next tick.
//! - A failed query is logged and retried on the next tick; only an explicit
//!   `ERROR`/`CANCELED` status (or the bound) fails the step.
//! - The poller writes only the deployment step's result and the run's terminal
//!   fields.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use shopforge_saga::{
    DeploymentStatus, FailureKind, ProgressEvent, ProgressObserver, SagaError, StepFailure,
    StepId, StepPayload, StepTransition,
};

use crate::clients::{DeploymentStatusReport, HostingDeployer};
use crate::handle::{RunPhase, SharedRun, wait_finished};

const STEP: StepId = StepId::CreateDeployment;

/// Shortest interval the poller accepts; smaller values are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Delay between two status queries (`pollIntervalMs`).
    pub interval: Duration,
    pub max_attempts: u32,
    pub max_duration: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5_000),
            max_attempts: 120,
            max_duration: Duration::from_secs(600),
        }
    }
}

/// How polling ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The deployment is live; step 7 is completed.
    Ready,
    /// Step 7 failed (terminal deployer status or polling bound); the run is `Failed`.
    Failed,
    /// The run finished under the poller (cancelled); nothing was written.
    Halted,
}

pub struct DeploymentPoller {
    hosting: Arc<dyn HostingDeployer>,
    config: PollerConfig,
    observer: Arc<dyn ProgressObserver>,
}

impl DeploymentPoller {
    pub fn new(
        hosting: Arc<dyn HostingDeployer>,
        mut config: PollerConfig,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        config.interval = config.interval.max(MIN_POLL_INTERVAL);
        Self {
            hosting,
            config,
            observer,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Poll until step 7 reaches a terminal state or the run finishes.
    pub async fn poll(
        &self,
        run: &SharedRun,
        phase: &mut watch::Receiver<RunPhase>,
    ) -> Result<PollOutcome, SagaError> {
        let (run_id, deployment_id) = {
            let guard = run.read().await;
            if guard.is_terminal() {
                return Ok(PollOutcome::Halted);
            }
            match guard.deployment() {
                Some(handle) => (guard.id(), handle.deployment_id.clone()),
                None => return Err(SagaError::StepNotRunning(STEP)),
            }
        };

        let started = Instant::now();
        // First tick completes immediately.
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts: u32 = 0;

        info!(run_id = %run_id, deployment_id = %deployment_id, interval_ms = self.config.interval.as_millis() as u64, "polling deployment status");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_finished(phase) => {
                    debug!(run_id = %run_id, deployment_id = %deployment_id, "run finished; polling stopped");
                    return Ok(PollOutcome::Halted);
                }
            }

            if attempts >= self.config.max_attempts || started.elapsed() >= self.config.max_duration {
                let failure = StepFailure::new(
                    FailureKind::DeploymentTimeout,
                    format!(
                        "deployment {deployment_id} not ready after {attempts} status checks ({}s)",
                        started.elapsed().as_secs()
                    ),
                );
                let outcome = self.fail(run, &failure).await?;
                if outcome == PollOutcome::Failed {
                    warn!(run_id = %run_id, deployment_id = %deployment_id, attempts, "deployment polling gave up");
                }
                return Ok(outcome);
            }

            attempts += 1;
            let report = match self.hosting.get_deployment_status(&deployment_id).await {
                Ok(report) => report,
                Err(err) => {
                    warn!(
                        run_id = %run_id,
                        deployment_id = %deployment_id,
                        attempt = attempts,
                        error = %err,
                        "deployment status query failed; retrying on next tick"
                    );
                    continue;
                }
            };

            match self.apply(run, report).await? {
                Some(PollOutcome::Ready) => {
                    info!(run_id = %run_id, deployment_id = %deployment_id, attempts, "deployment ready");
                    return Ok(PollOutcome::Ready);
                }
                Some(PollOutcome::Failed) => {
                    warn!(run_id = %run_id, deployment_id = %deployment_id, attempts, "deployment ended in a failure status");
                    return Ok(PollOutcome::Failed);
                }
                Some(PollOutcome::Halted) => return Ok(PollOutcome::Halted),
                None => {}
            }
        }
    }

    /// Fold one report into the run. `None` means "keep polling".
    async fn apply(
        &self,
        run: &SharedRun,
        report: DeploymentStatusReport,
    ) -> Result<Option<PollOutcome>, SagaError> {
        let (transition, outcome) = {
            let mut guard = run.write().await;
            if guard.is_terminal() {
                // Cancelled while the query was in flight.
                return Ok(Some(PollOutcome::Halted));
            }
            guard.observe_deployment(report.status.clone(), report.url.clone());
            let handle = guard
                .deployment()
                .cloned()
                .ok_or(SagaError::StepNotRunning(STEP))?;

            match &report.status {
                DeploymentStatus::Ready => {
                    let message = match &handle.url {
                        Some(url) => format!("deployment ready at {url}"),
                        None => "deployment ready".to_string(),
                    };
                    let transition =
                        guard.complete_step(STEP, Some(StepPayload::Deployment(handle)), message)?;
                    (transition, Some(PollOutcome::Ready))
                }
                status if status.is_failure() => {
                    let failure = StepFailure::new(
                        FailureKind::DeploymentTerminal,
                        format!("deployment {} ended with status {status}", handle.deployment_id),
                    );
                    (guard.fail_step(STEP, &failure)?, Some(PollOutcome::Failed))
                }
                status => {
                    debug!(run_id = %guard.id(), deployment_id = %handle.deployment_id, status = %status, "deployment still in progress");
                    (
                        guard.progress_step(STEP, format!("deployment status: {status}"))?,
                        None,
                    )
                }
            }
        };
        self.emit(transition);
        Ok(outcome)
    }

    async fn fail(&self, run: &SharedRun, failure: &StepFailure) -> Result<PollOutcome, SagaError> {
        let transition = {
            let mut guard = run.write().await;
            if guard.is_terminal() {
                return Ok(PollOutcome::Halted);
            }
            guard.fail_step(STEP, failure)?
        };
        self.emit(transition);
        Ok(PollOutcome::Failed)
    }

    fn emit(&self, transition: StepTransition) {
        self.observer.emit(&ProgressEvent::Step(transition));
    }
}

impl std::fmt::Debug for DeploymentPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentPoller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
