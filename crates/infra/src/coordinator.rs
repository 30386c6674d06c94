//! Provisioning saga coordinator.
//!
//! Orchestrates one run:
//! 1. `select-plan` .. `create-indexes` run synchronously, in order
//! 2. `create-deployment` either completes on the spot (local/mock deployment)
//!    or is accepted, at which point callers waiting on `RunHandle::accepted`
//!    get control back and the deployment poller takes over
//! 3. once the deployment is live, `configure-environment` and `finalize` run
//!    and the run is marked `Completed`
//!
//! Any failing step fails the run immediately; there is no compensation, and
//! resources created by earlier steps are left in place.

use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};

use shopforge_core::RunId;
use shopforge_saga::{
    PROVISIONING_STEPS, ProgressEvent, ProgressObserver, ProvisioningInput, ProvisioningRequest,
    SagaError, SagaRun, StepFailure, StepId, TracingObserver, ValidationError,
};

use crate::actions::default_actions;
use crate::clients::ProvisioningClients;
use crate::executor::{StepAction, StepExecutor, StepOutcome};
use crate::handle::{RunHandle, RunPhase, SharedRun, advance_phase};
use crate::poller::{DeploymentPoller, PollOutcome, PollerConfig};
use crate::retry::StepPolicy;

/// How the driver task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drive {
    /// The driver itself moved the run to a terminal status.
    Finished,
    /// The run was finished by someone else (cancellation).
    Discarded,
}

struct Inner {
    executor: StepExecutor,
    poller: DeploymentPoller,
    observer: Arc<dyn ProgressObserver>,
}

/// Starts provisioning runs. Cheap to clone; every run is independent.
#[derive(Clone)]
pub struct SagaCoordinator {
    inner: Arc<Inner>,
}

impl SagaCoordinator {
    pub fn builder(clients: ProvisioningClients) -> SagaCoordinatorBuilder {
        SagaCoordinatorBuilder::new(clients)
    }

    /// Validate the caller's input and start a run. Nothing is called when
    /// validation fails.
    pub fn submit(&self, input: ProvisioningInput) -> Result<RunHandle, ValidationError> {
        match ProvisioningRequest::validate(input) {
            Ok(request) => Ok(self.start(request)),
            Err(err) => {
                warn!(field = err.field(), error = %err, "provisioning request rejected");
                Err(err)
            }
        }
    }

    /// Start a run in the background. Must be called within a tokio runtime.
    pub fn start(&self, request: ProvisioningRequest) -> RunHandle {
        let run_id = RunId::new();
        info!(
            run_id = %run_id,
            plan_id = %request.plan_id(),
            merchant_email = %request.merchant_email(),
            "provisioning run started"
        );

        let run: SharedRun = Arc::new(RwLock::new(SagaRun::new(run_id, request)));
        let (phase, _) = watch::channel(RunPhase::Running);
        let phase = Arc::new(phase);
        let handle = RunHandle::new(
            run.clone(),
            run_id,
            phase.clone(),
            self.inner.observer.clone(),
        );

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.drive(run, phase).await });
        handle
    }

    /// Start a run and wait until the deployment was accepted (or the run
    /// already finished).
    pub async fn provision(&self, input: ProvisioningInput) -> Result<RunHandle, ValidationError> {
        let handle = self.submit(input)?;
        handle.accepted().await;
        Ok(handle)
    }

    pub fn observer(&self) -> &Arc<dyn ProgressObserver> {
        &self.inner.observer
    }
}

impl std::fmt::Debug for SagaCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaCoordinator")
            .field("executor", &self.inner.executor)
            .field("poller", &self.inner.poller)
            .finish()
    }
}

impl Inner {
    async fn drive(&self, run: SharedRun, phase: Arc<watch::Sender<RunPhase>>) {
        let mut rx = phase.subscribe();
        let drive = match self.drive_steps(&run, &phase, &mut rx).await {
            Ok(drive) => drive,
            Err(err) => {
                let run_id = run.read().await.id();
                error!(run_id = %run_id, error = %err, "provisioning run hit an illegal transition");
                self.fail_internal(&run, StepFailure::from(err)).await
            }
        };
        if drive == Drive::Discarded {
            return;
        }

        let (finished, status) = {
            let guard = run.read().await;
            (guard.finished_event(), guard.overall_status())
        };
        if !status.is_terminal() {
            return;
        }
        advance_phase(&phase, RunPhase::Finished(status));
        if let Some(event) = finished {
            self.observer.emit(&event);
        }
    }

    async fn drive_steps(
        &self,
        run: &SharedRun,
        phase: &watch::Sender<RunPhase>,
        rx: &mut watch::Receiver<RunPhase>,
    ) -> Result<Drive, SagaError> {
        for step in PROVISIONING_STEPS.iter().map(|s| s.id) {
            match self.executor.execute(run, step, rx).await? {
                StepOutcome::Completed(_) => {}
                StepOutcome::Accepted(_) if step == StepId::CreateDeployment => {
                    advance_phase(phase, RunPhase::Accepted);
                    match self.poller.poll(run, rx).await? {
                        PollOutcome::Ready => {}
                        PollOutcome::Failed => return Ok(Drive::Finished),
                        PollOutcome::Halted => return Ok(Drive::Discarded),
                    }
                }
                StepOutcome::Accepted(_) => {
                    let failure =
                        StepFailure::internal(format!("step {step} cannot complete asynchronously"));
                    return Ok(self.fail_internal(run, failure).await);
                }
                StepOutcome::Failed(_) => return Ok(Drive::Finished),
                StepOutcome::Discarded => return Ok(Drive::Discarded),
            }
        }

        let mut guard = run.write().await;
        match guard.finish() {
            Ok(()) => {
                info!(run_id = %guard.id(), "provisioning run completed");
                Ok(Drive::Finished)
            }
            Err(SagaError::RunFinished(_)) => Ok(Drive::Discarded),
            Err(err) => Err(err),
        }
    }

    /// Fail the run at its current step with an internal failure, so the
    /// failing step is visible in the result log.
    async fn fail_internal(&self, run: &SharedRun, failure: StepFailure) -> Drive {
        let transitions = {
            let mut guard = run.write().await;
            if guard.is_terminal() {
                return Drive::Discarded;
            }
            let mut transitions = Vec::new();
            let step = match guard.running_step() {
                Some(step) => Some(step),
                None => match guard.next_step() {
                    Some(next) => match guard.begin_step(next) {
                        Ok(t) => {
                            transitions.push(t);
                            Some(next)
                        }
                        Err(err) => {
                            error!(run_id = %guard.id(), error = %err, "cannot record internal failure");
                            None
                        }
                    },
                    None => None,
                },
            };
            if let Some(step) = step {
                match guard.fail_step(step, &failure) {
                    Ok(t) => transitions.push(t),
                    Err(err) => {
                        error!(run_id = %guard.id(), error = %err, "cannot record internal failure")
                    }
                }
            }
            transitions
        };
        for transition in transitions {
            self.observer.emit(&ProgressEvent::Step(transition));
        }
        Drive::Finished
    }
}

/// Builder for [`SagaCoordinator`].
pub struct SagaCoordinatorBuilder {
    clients: ProvisioningClients,
    observer: Option<Arc<dyn ProgressObserver>>,
    default_policy: StepPolicy,
    policies: Vec<(StepId, StepPolicy)>,
    actions: Vec<(StepId, Arc<dyn StepAction>)>,
    poller: PollerConfig,
}

impl SagaCoordinatorBuilder {
    fn new(clients: ProvisioningClients) -> Self {
        Self {
            clients,
            observer: None,
            default_policy: StepPolicy::default(),
            policies: Vec::new(),
            actions: Vec::new(),
            poller: PollerConfig::default(),
        }
    }

    /// Where progress goes. Defaults to [`TracingObserver`].
    pub fn observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn default_policy(mut self, policy: StepPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn step_policy(mut self, step: StepId, policy: StepPolicy) -> Self {
        self.policies.push((step, policy));
        self
    }

    /// Replace the built-in action of `step`.
    pub fn action(mut self, step: StepId, action: Arc<dyn StepAction>) -> Self {
        self.actions.push((step, action));
        self
    }

    pub fn poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    pub fn build(self) -> SagaCoordinator {
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(TracingObserver));

        let mut executor = StepExecutor::new(observer.clone());
        executor.set_default_policy(self.default_policy);
        for (step, action) in default_actions(&self.clients).into_iter().chain(self.actions) {
            executor.register(step, action);
        }
        for (step, policy) in self.policies {
            executor.set_policy(step, policy);
        }

        let poller = DeploymentPoller::new(self.clients.hosting.clone(), self.poller, observer.clone());

        SagaCoordinator {
            inner: Arc::new(Inner {
                executor,
                poller,
                observer,
            }),
        }
    }
}

impl std::fmt::Debug for SagaCoordinatorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaCoordinatorBuilder")
            .field("default_policy", &self.default_policy)
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}
