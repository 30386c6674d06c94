//! Per-step outcome records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopforge_core::{DatabaseName, MerchantId, Plan, SubscriptionId};

use crate::deployment::DeploymentHandle;
use crate::error::{FailureKind, StepFailure};
use crate::step::StepId;

/// Status of one step within one run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Error | StepStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Error => "error",
            StepStatus::Cancelled => "cancelled",
        }
    }
}

/// Data a step hands forward to later steps (and to the operator view).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepPayload {
    Plan(Plan),
    Merchant {
        merchant_id: MerchantId,
    },
    Subscription {
        subscription_id: SubscriptionId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    },
    Database {
        database_name: DatabaseName,
        collections_created: u32,
    },
    Schema {
        collections: Vec<String>,
    },
    Indexes {
        indexes_created: u32,
    },
    Deployment(DeploymentHandle),
    Environment {
        variables: Vec<String>,
    },
    Finalized {
        store_url: Option<String>,
    },
}

/// Outcome of executing one step for one run.
///
/// Created when the step starts running and updated in place afterwards; never
/// removed from the run's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: StepId,
    pub status: StepStatus,
    pub message: Option<String>,
    pub payload: Option<StepPayload>,
    /// Failure category when `status == Error`.
    pub failure_kind: Option<FailureKind>,
    /// Number of times the step's action has been started.
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    /// Time of the last update.
    pub timestamp: DateTime<Utc>,
}

impl StepResult {
    pub fn started(step_id: StepId) -> Self {
        let now = Utc::now();
        Self {
            step_id,
            status: StepStatus::Running,
            message: None,
            payload: None,
            failure_kind: None,
            attempts: 1,
            started_at: now,
            timestamp: now,
        }
    }

    pub(crate) fn restart(&mut self) {
        self.status = StepStatus::Running;
        self.failure_kind = None;
        self.attempts += 1;
        self.message = Some(format!("retrying (attempt {})", self.attempts));
        self.timestamp = Utc::now();
    }

    pub(crate) fn progress(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
        self.timestamp = Utc::now();
    }

    pub(crate) fn complete(&mut self, payload: Option<StepPayload>, message: impl Into<String>) {
        self.status = StepStatus::Completed;
        self.payload = payload;
        self.message = Some(message.into());
        self.timestamp = Utc::now();
    }

    pub(crate) fn fail(&mut self, failure: &StepFailure) {
        self.status = StepStatus::Error;
        self.failure_kind = Some(failure.kind);
        self.message = Some(failure.message.clone());
        self.timestamp = Utc::now();
    }

    pub(crate) fn cancel(&mut self) {
        self.status = StepStatus::Cancelled;
        self.message = Some("cancelled by caller".to_string());
        self.timestamp = Utc::now();
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}
