//! Step executor: runs one step of a run with its timeout and retry policy.
//!
//! For every attempt: mark the step `running`, invoke the registered action
//! without holding the run lock, then apply the outcome. Observers are notified
//! after the lock is released. Retry is never implicit; it comes from the step's
//! `StepPolicy`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use shopforge_core::RunId;
use shopforge_saga::{
    FailureKind, ProgressEvent, ProgressObserver, ProvisioningContext, ProvisioningRequest,
    SagaError, SagaRun, StepFailure, StepId, StepPayload, StepResult, StepTransition,
};

use crate::handle::{RunPhase, SharedRun, wait_finished};
use crate::retry::StepPolicy;

/// What an action gets to see: the immutable request and a copy of the context.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub run_id: RunId,
    pub step: StepId,
    pub attempt: u32,
    pub request: ProvisioningRequest,
    pub context: ProvisioningContext,
}

/// Successful return of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutput {
    Completed {
        payload: Option<StepPayload>,
        message: String,
    },
    /// The side effect was accepted and finishes asynchronously; the step stays
    /// `running` until something else completes it.
    Accepted {
        payload: StepPayload,
        message: String,
    },
}

impl StepOutput {
    pub fn completed(payload: StepPayload, message: impl Into<String>) -> Self {
        StepOutput::Completed {
            payload: Some(payload),
            message: message.into(),
        }
    }

    pub fn accepted(payload: StepPayload, message: impl Into<String>) -> Self {
        StepOutput::Accepted {
            payload,
            message: message.into(),
        }
    }
}

/// The body of a step. Actions call into external clients; they never touch the
/// run directly.
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn run(&self, input: &StepInput) -> Result<StepOutput, StepFailure>;
}

/// Result of `StepExecutor::execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed(StepResult),
    Accepted(StepResult),
    Failed(StepResult),
    /// The run finished (cancelled) while the step was in flight; whatever the
    /// action returned was dropped.
    Discarded,
}

impl StepOutcome {
    pub fn result(&self) -> Option<&StepResult> {
        match self {
            StepOutcome::Completed(r) | StepOutcome::Accepted(r) | StepOutcome::Failed(r) => {
                Some(r)
            }
            StepOutcome::Discarded => None,
        }
    }
}

pub struct StepExecutor {
    actions: HashMap<StepId, Arc<dyn StepAction>>,
    policies: HashMap<StepId, StepPolicy>,
    default_policy: StepPolicy,
    observer: Arc<dyn ProgressObserver>,
}

impl StepExecutor {
    pub fn new(observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            actions: HashMap::new(),
            policies: HashMap::new(),
            default_policy: StepPolicy::default(),
            observer,
        }
    }

    /// Register (or replace) the action of `step`.
    pub fn register(&mut self, step: StepId, action: Arc<dyn StepAction>) {
        self.actions.insert(step, action);
    }

    pub fn set_policy(&mut self, step: StepId, policy: StepPolicy) {
        self.policies.insert(step, policy);
    }

    pub fn set_default_policy(&mut self, policy: StepPolicy) {
        self.default_policy = policy;
    }

    pub fn policy(&self, step: StepId) -> &StepPolicy {
        self.policies.get(&step).unwrap_or(&self.default_policy)
    }

    pub fn observer(&self) -> &Arc<dyn ProgressObserver> {
        &self.observer
    }

    /// Run `step` to a terminal outcome (or to acceptance).
    ///
    /// Returns `Err` only for an illegal transition, which means the caller drove
    /// steps out of order.
    pub async fn execute(
        &self,
        run: &SharedRun,
        step: StepId,
        phase: &mut watch::Receiver<RunPhase>,
    ) -> Result<StepOutcome, SagaError> {
        let policy = self.policy(step).clone();
        let action = self.actions.get(&step).cloned();

        loop {
            let (input, begun, action) = {
                let mut guard = run.write().await;
                if guard.is_terminal() {
                    return Ok(StepOutcome::Discarded);
                }
                let begun = guard.begin_step(step)?;

                let checked = match &action {
                    None => Err(StepFailure::internal(format!(
                        "no action registered for step {step}"
                    ))),
                    Some(action) => guard
                        .context()
                        .check_requirements(step)
                        .map(|()| action.clone()),
                };
                let action = match checked {
                    Ok(action) => action,
                    Err(failure) => {
                        let run_id = guard.id();
                        let failed = guard.fail_step(step, &failure)?;
                        let result = current_result(&guard, step)?;
                        drop(guard);
                        self.emit(begun);
                        self.emit(failed);
                        warn!(run_id = %run_id, step = %step, error = %failure, "step rejected before execution");
                        return Ok(StepOutcome::Failed(result));
                    }
                };

                let input = StepInput {
                    run_id: guard.id(),
                    step,
                    attempt: begun.attempt,
                    request: guard.request().clone(),
                    context: guard.context().clone(),
                };
                (input, begun, action)
            };
            self.emit(begun);

            debug!(run_id = %input.run_id, step = %step, attempt = input.attempt, "step started");
            let outcome = match tokio::time::timeout(policy.timeout, action.run(&input)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StepFailure::new(
                    FailureKind::Timeout,
                    format!(
                        "step {step} did not finish within {}ms",
                        policy.timeout.as_millis()
                    ),
                )),
            };

            match outcome {
                Ok(StepOutput::Completed { payload, message }) => {
                    let applied = {
                        let mut guard = run.write().await;
                        discard_if_finished(guard.complete_step(step, payload, message))?
                            .map(|t| current_result(&guard, step).map(|r| (t, r)))
                            .transpose()?
                    };
                    let Some((transition, result)) = applied else {
                        debug!(run_id = %input.run_id, step = %step, "run finished while step was in flight; result discarded");
                        return Ok(StepOutcome::Discarded);
                    };
                    self.emit(transition);
                    info!(run_id = %input.run_id, step = %step, message = result.message.as_deref().unwrap_or(""), "step completed");
                    return Ok(StepOutcome::Completed(result));
                }
                Ok(StepOutput::Accepted { payload, message }) => {
                    let applied = {
                        let mut guard = run.write().await;
                        discard_if_finished(guard.accept_step(step, payload, message))?
                            .map(|t| current_result(&guard, step).map(|r| (t, r)))
                            .transpose()?
                    };
                    let Some((transition, result)) = applied else {
                        return Ok(StepOutcome::Discarded);
                    };
                    self.emit(transition);
                    info!(run_id = %input.run_id, step = %step, "step accepted; completion is asynchronous");
                    return Ok(StepOutcome::Accepted(result));
                }
                Err(failure) if policy.retry.should_retry(input.attempt, failure.kind) => {
                    let delay = policy.retry.delay_for_attempt(input.attempt);
                    let deferred = {
                        let mut guard = run.write().await;
                        discard_if_finished(guard.defer_retry(step, &failure, delay))?
                    };
                    let Some(transition) = deferred else {
                        return Ok(StepOutcome::Discarded);
                    };
                    self.emit(transition);
                    warn!(
                        run_id = %input.run_id,
                        step = %step,
                        attempt = input.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "step attempt failed; retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = wait_finished(phase) => return Ok(StepOutcome::Discarded),
                    }
                }
                Err(failure) => {
                    let applied = {
                        let mut guard = run.write().await;
                        discard_if_finished(guard.fail_step(step, &failure))?
                            .map(|t| current_result(&guard, step).map(|r| (t, r)))
                            .transpose()?
                    };
                    let Some((transition, result)) = applied else {
                        return Ok(StepOutcome::Discarded);
                    };
                    self.emit(transition);
                    warn!(run_id = %input.run_id, step = %step, attempt = input.attempt, error = %failure, "step failed");
                    return Ok(StepOutcome::Failed(result));
                }
            }
        }
    }

    fn emit(&self, transition: StepTransition) {
        self.observer.emit(&ProgressEvent::Step(transition));
    }
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut steps: Vec<&StepId> = self.actions.keys().collect();
        steps.sort();
        f.debug_struct("StepExecutor")
            .field("actions", &steps)
            .field("default_policy", &self.default_policy)
            .finish_non_exhaustive()
    }
}

/// A transition rejected because the run already finished means the result
/// arrived too late; anything else is a real ordering error.
fn discard_if_finished<T>(applied: Result<T, SagaError>) -> Result<Option<T>, SagaError> {
    match applied {
        Ok(t) => Ok(Some(t)),
        Err(SagaError::RunFinished(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn current_result(run: &SagaRun, step: StepId) -> Result<StepResult, SagaError> {
    run.result(step)
        .cloned()
        .ok_or(SagaError::StepNotRunning(step))
}
