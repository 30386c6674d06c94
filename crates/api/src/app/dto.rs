use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopforge_core::RunId;
use shopforge_saga::{
    DeploymentHandle, OverallStatus, ProvisioningInput, SagaRun, StepId, StepResult,
};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct StartProvisioningRequest {
    pub plan_id: String,
    pub merchant_name: String,
    pub merchant_email: String,
    #[serde(default)]
    pub custom_subdomain: Option<String>,
}

impl From<StartProvisioningRequest> for ProvisioningInput {
    fn from(value: StartProvisioningRequest) -> Self {
        ProvisioningInput {
            plan_id: value.plan_id,
            merchant_name: value.merchant_name,
            merchant_email: value.merchant_email,
            custom_subdomain: value.custom_subdomain,
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FailureView {
    pub step_id: StepId,
    pub message: String,
}

/// Full operator view of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunView {
    pub run_id: RunId,
    pub status: OverallStatus,
    pub plan_id: String,
    pub merchant_email: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub results: Vec<StepResult>,
    pub completed_steps: Vec<StepId>,
    pub failure: Option<FailureView>,
    pub deployment: Option<DeploymentHandle>,
}

impl From<&SagaRun> for RunView {
    fn from(run: &SagaRun) -> Self {
        Self {
            run_id: run.id(),
            status: run.overall_status(),
            plan_id: run.request().plan_id().to_string(),
            merchant_email: run.request().merchant_email().to_string(),
            started_at: run.started_at(),
            finished_at: run.finished_at(),
            results: run.results().to_vec(),
            completed_steps: run.completed_steps(),
            failure: run.failure().map(|(step_id, message)| FailureView {
                step_id,
                message: message.to_string(),
            }),
            deployment: run.deployment().cloned(),
        }
    }
}

/// One line of `GET /provisioning`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: OverallStatus,
    pub merchant_email: String,
    pub started_at: DateTime<Utc>,
    pub current_step: Option<StepId>,
    pub failed_step: Option<StepId>,
}

impl From<&SagaRun> for RunSummary {
    fn from(run: &SagaRun) -> Self {
        Self {
            run_id: run.id(),
            status: run.overall_status(),
            merchant_email: run.request().merchant_email().to_string(),
            started_at: run.started_at(),
            current_step: run.running_step(),
            failed_step: run.failure().map(|(step, _)| step),
        }
    }
}
