//! Error taxonomy for provisioning runs.
//!
//! - `ValidationError`: the request is malformed; the saga never starts.
//! - `StepFailure`: what gets attached to a step's `error` result. Everything a
//!   step can go wrong with (client errors, timeouts, missing inputs, terminal
//!   deployment states) is normalized into this one shape.
//! - `SagaError`: an illegal transition of the run state machine. These indicate a
//!   coordinator bug, never a business failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use shopforge_core::DomainError;

use crate::context::ContextKey;
use crate::step::StepId;

/// Precondition failure on a `ProvisioningInput`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("plan id must not be empty")]
    EmptyPlanId,

    #[error("invalid merchant name: {0}")]
    MerchantName(String),

    #[error("invalid merchant email: {0}")]
    MerchantEmail(String),

    #[error("invalid custom subdomain: {0}")]
    CustomSubdomain(String),
}

impl ValidationError {
    /// Input field the error refers to (for API responses).
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::EmptyPlanId => "plan_id",
            ValidationError::MerchantName(_) => "merchant_name",
            ValidationError::MerchantEmail(_) => "merchant_email",
            ValidationError::CustomSubdomain(_) => "custom_subdomain",
        }
    }
}

/// Normalized category of a step failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Conflict,
    Unavailable,
    PlanNotFound,
    QuotaExceeded,
    SubdomainTaken,
    MissingDependency,
    Timeout,
    DeploymentTerminal,
    DeploymentTimeout,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::Conflict => "conflict",
            FailureKind::Unavailable => "unavailable",
            FailureKind::PlanNotFound => "plan_not_found",
            FailureKind::QuotaExceeded => "quota_exceeded",
            FailureKind::SubdomainTaken => "subdomain_taken",
            FailureKind::MissingDependency => "missing_dependency",
            FailureKind::Timeout => "timeout",
            FailureKind::DeploymentTerminal => "deployment_terminal",
            FailureKind::DeploymentTimeout => "deployment_timeout",
            FailureKind::Internal => "internal",
        }
    }
}

impl core::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure attached to a step's `error` result.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn missing(step: StepId, keys: &[ContextKey]) -> Self {
        let names = keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ");
        Self::new(
            FailureKind::MissingDependency,
            format!("step {step} is missing required inputs: {names}"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}

impl From<DomainError> for StepFailure {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                StepFailure::new(FailureKind::Validation, msg)
            }
        }
    }
}

/// Illegal transition of a `SagaRun`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SagaError {
    #[error("run already finished with status {0}")]
    RunFinished(&'static str),

    #[error("step {step} cannot start before {predecessor} has completed")]
    PredecessorIncomplete { step: StepId, predecessor: StepId },

    #[error("step {0} has already completed")]
    StepAlreadyCompleted(StepId),

    #[error("step {0} is not running")]
    StepNotRunning(StepId),

    #[error("cannot finish run: step {0} has not completed")]
    Incomplete(StepId),
}

impl From<SagaError> for StepFailure {
    fn from(value: SagaError) -> Self {
        StepFailure::internal(value.to_string())
    }
}
