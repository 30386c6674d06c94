//! `SagaRun`: the aggregate root of one provisioning attempt.
//!
//! State machine: `NotStarted → Running(step_index) → {Completed | Failed | Cancelled}`.
//!
//! Invariants enforced by the transition methods:
//! - results are appended in execution order, one per step
//! - a step never starts before its predecessor has `completed`
//! - `Failed` iff some result is `error`; `Completed` iff all nine are `completed`
//! - nothing changes once the run is terminal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopforge_core::RunId;

use crate::context::ProvisioningContext;
use crate::deployment::{DeploymentHandle, DeploymentStatus};
use crate::error::{SagaError, StepFailure};
use crate::observer::{ProgressEvent, StepTransition};
use crate::request::ProvisioningRequest;
use crate::result::{StepPayload, StepResult, StepStatus};
use crate::step::{PROVISIONING_STEPS, StepId};

/// Overall status of a run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OverallStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OverallStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Running => "running",
            OverallStatus::Completed => "completed",
            OverallStatus::Failed => "failed",
            OverallStatus::Cancelled => "cancelled",
        }
    }
}

/// Coordinator's view of where a run is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CoordinatorState {
    NotStarted,
    Running { step_index: usize },
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct SagaRun {
    id: RunId,
    request: ProvisioningRequest,
    results: Vec<StepResult>,
    overall_status: OverallStatus,
    context: ProvisioningContext,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl SagaRun {
    pub fn new(id: RunId, request: ProvisioningRequest) -> Self {
        Self {
            id,
            request,
            results: Vec::with_capacity(PROVISIONING_STEPS.len()),
            overall_status: OverallStatus::Running,
            context: ProvisioningContext::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn request(&self) -> &ProvisioningRequest {
        &self.request
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn result(&self, step: StepId) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step_id == step)
    }

    pub fn overall_status(&self) -> OverallStatus {
        self.overall_status
    }

    pub fn is_terminal(&self) -> bool {
        self.overall_status.is_terminal()
    }

    pub fn context(&self) -> &ProvisioningContext {
        &self.context
    }

    pub fn deployment(&self) -> Option<&DeploymentHandle> {
        self.context.deployment.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn state(&self) -> CoordinatorState {
        match self.overall_status {
            OverallStatus::Completed => CoordinatorState::Completed,
            OverallStatus::Failed => CoordinatorState::Failed,
            OverallStatus::Cancelled => CoordinatorState::Cancelled,
            OverallStatus::Running if self.results.is_empty() => CoordinatorState::NotStarted,
            OverallStatus::Running => CoordinatorState::Running {
                step_index: self.results.len() - 1,
            },
        }
    }

    /// First step that has not completed yet (None once everything completed).
    pub fn next_step(&self) -> Option<StepId> {
        PROVISIONING_STEPS
            .iter()
            .map(|s| s.id)
            .find(|id| !self.result(*id).is_some_and(StepResult::is_completed))
    }

    /// The step currently `running`, if any.
    pub fn running_step(&self) -> Option<StepId> {
        self.results
            .iter()
            .find(|r| r.status == StepStatus::Running)
            .map(|r| r.step_id)
    }

    /// The single failing step and its message, if the run failed.
    pub fn failure(&self) -> Option<(StepId, &str)> {
        self.results
            .iter()
            .find(|r| r.status == StepStatus::Error)
            .map(|r| (r.step_id, r.message.as_deref().unwrap_or("")))
    }

    pub fn completed_steps(&self) -> Vec<StepId> {
        self.results
            .iter()
            .filter(|r| r.is_completed())
            .map(|r| r.step_id)
            .collect()
    }

    /// Status of every step in table order; steps never started are `pending`.
    pub fn step_statuses(&self) -> Vec<(StepId, StepStatus)> {
        PROVISIONING_STEPS
            .iter()
            .map(|s| {
                let status = self
                    .result(s.id)
                    .map(|r| r.status)
                    .unwrap_or(StepStatus::Pending);
                (s.id, status)
            })
            .collect()
    }

    /// Check the status invariants (used by tests and debug assertions).
    pub fn invariants_hold(&self) -> bool {
        let any_error = self.results.iter().any(|r| r.status == StepStatus::Error);
        let all_completed = self.results.len() == PROVISIONING_STEPS.len()
            && self.results.iter().all(StepResult::is_completed);
        let ordered = self
            .results
            .iter()
            .zip(PROVISIONING_STEPS.iter())
            .all(|(r, s)| r.step_id == s.id);

        ordered
            && (self.overall_status == OverallStatus::Failed) == any_error
            && (self.overall_status == OverallStatus::Completed) == all_completed
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark `step` running. Starting a step that is already running counts as a
    /// new attempt of the same step.
    pub fn begin_step(&mut self, step: StepId) -> Result<StepTransition, SagaError> {
        self.ensure_active()?;

        if let Some(pred) = step.predecessor() {
            if !self.result(pred).is_some_and(StepResult::is_completed) {
                return Err(SagaError::PredecessorIncomplete {
                    step,
                    predecessor: pred,
                });
            }
        }

        match self.results.iter_mut().find(|r| r.step_id == step) {
            Some(existing) if existing.status == StepStatus::Running => existing.restart(),
            Some(_) => return Err(SagaError::StepAlreadyCompleted(step)),
            None => self.results.push(StepResult::started(step)),
        }

        Ok(self.transition(step))
    }

    /// Record a progress message on a running step.
    pub fn progress_step(
        &mut self,
        step: StepId,
        message: impl Into<String>,
    ) -> Result<StepTransition, SagaError> {
        self.running_mut(step)?.progress(message);
        Ok(self.transition(step))
    }

    pub fn complete_step(
        &mut self,
        step: StepId,
        payload: Option<StepPayload>,
        message: impl Into<String>,
    ) -> Result<StepTransition, SagaError> {
        self.running_mut(step)?;
        if let Some(p) = &payload {
            self.context.absorb(p);
        }
        self.running_mut(step)?.complete(payload, message);
        Ok(self.transition(step))
    }

    /// The step's side effect was accepted but finishes asynchronously. The step
    /// stays `running`; its payload is already visible to the context.
    pub fn accept_step(
        &mut self,
        step: StepId,
        payload: StepPayload,
        message: impl Into<String>,
    ) -> Result<StepTransition, SagaError> {
        self.running_mut(step)?;
        self.context.absorb(&payload);
        let result = self.running_mut(step)?;
        result.payload = Some(payload);
        result.progress(message);
        Ok(self.transition(step))
    }

    /// Record a failed attempt that will be retried; the step stays `running`.
    pub fn defer_retry(
        &mut self,
        step: StepId,
        failure: &StepFailure,
        delay: std::time::Duration,
    ) -> Result<StepTransition, SagaError> {
        let result = self.running_mut(step)?;
        let attempt = result.attempts;
        result.progress(format!(
            "attempt {attempt} failed ({failure}); retrying in {}ms",
            delay.as_millis()
        ));
        Ok(self.transition(step))
    }

    /// Fail `step` and with it the run. No later step will execute.
    pub fn fail_step(
        &mut self,
        step: StepId,
        failure: &StepFailure,
    ) -> Result<StepTransition, SagaError> {
        self.running_mut(step)?.fail(failure);
        self.overall_status = OverallStatus::Failed;
        self.finished_at = Some(Utc::now());
        Ok(self.transition(step))
    }

    /// Fold a deployment status report into the handle (and the deploy step's
    /// payload).
    pub fn observe_deployment(&mut self, status: DeploymentStatus, url: Option<String>) {
        if let Some(handle) = self.context.deployment.as_mut() {
            handle.observe(status, url);
            let snapshot = handle.clone();
            if let Some(result) = self
                .results
                .iter_mut()
                .find(|r| r.step_id == StepId::CreateDeployment)
            {
                result.payload = Some(StepPayload::Deployment(snapshot));
            }
        }
    }

    /// Stop the run. The running step (if any) becomes `cancelled`.
    pub fn cancel(&mut self) -> Result<Option<StepTransition>, SagaError> {
        self.ensure_active()?;
        let running = self.running_step();
        if let Some(step) = running {
            self.running_mut(step)?.cancel();
        }
        self.overall_status = OverallStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        Ok(running.map(|step| self.transition(step)))
    }

    /// Mark the run `Completed`. Every step must have completed.
    pub fn finish(&mut self) -> Result<(), SagaError> {
        self.ensure_active()?;
        if let Some(step) = self.next_step() {
            return Err(SagaError::Incomplete(step));
        }
        self.overall_status = OverallStatus::Completed;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Terminal event for observers (None while running).
    pub fn finished_event(&self) -> Option<ProgressEvent> {
        self.is_terminal().then(|| ProgressEvent::RunFinished {
            run_id: self.id,
            status: self.overall_status,
            failed_step: self.failure().map(|(s, _)| s),
            at: self.finished_at.unwrap_or_else(Utc::now),
        })
    }

    fn ensure_active(&self) -> Result<(), SagaError> {
        if self.is_terminal() {
            Err(SagaError::RunFinished(self.overall_status.as_str()))
        } else {
            Ok(())
        }
    }

    fn running_mut(&mut self, step: StepId) -> Result<&mut StepResult, SagaError> {
        self.ensure_active()?;
        self.results
            .iter_mut()
            .find(|r| r.step_id == step && r.status == StepStatus::Running)
            .ok_or(SagaError::StepNotRunning(step))
    }

    fn transition(&self, step: StepId) -> StepTransition {
        let result = self.result(step);
        StepTransition {
            run_id: self.id,
            step_id: step,
            phase: step.step().phase,
            status: result.map(|r| r.status).unwrap_or(StepStatus::Pending),
            message: result.and_then(|r| r.message.clone()),
            attempt: result.map(|r| r.attempts).unwrap_or(0),
            at: result.map(|r| r.timestamp).unwrap_or_else(Utc::now),
        }
    }
}
