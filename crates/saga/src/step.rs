//! The fixed provisioning step sequence.

use serde::{Deserialize, Serialize};

use crate::context::ContextKey;

/// Stable identifier of a provisioning step.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepId {
    SelectPlan,
    CreateMerchant,
    CreateSubscription,
    CreateDatabase,
    InitializeSchema,
    CreateIndexes,
    CreateDeployment,
    ConfigureEnvironment,
    Finalize,
}

impl StepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::SelectPlan => "select-plan",
            StepId::CreateMerchant => "create-merchant",
            StepId::CreateSubscription => "create-subscription",
            StepId::CreateDatabase => "create-database",
            StepId::InitializeSchema => "initialize-schema",
            StepId::CreateIndexes => "create-indexes",
            StepId::CreateDeployment => "create-deployment",
            StepId::ConfigureEnvironment => "configure-environment",
            StepId::Finalize => "finalize",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        PROVISIONING_STEPS
            .iter()
            .map(|step| step.id)
            .find(|id| id.as_str() == raw)
    }

    /// Context values this step reads. Checked before the step's action runs.
    pub fn requires(&self) -> &'static [ContextKey] {
        match self {
            StepId::SelectPlan | StepId::CreateMerchant => &[],
            StepId::CreateSubscription => &[ContextKey::Plan, ContextKey::MerchantId],
            StepId::CreateDatabase => &[ContextKey::MerchantId],
            StepId::InitializeSchema | StepId::CreateIndexes => &[ContextKey::DatabaseName],
            StepId::CreateDeployment => &[ContextKey::MerchantId, ContextKey::DatabaseName],
            StepId::ConfigureEnvironment => &[
                ContextKey::MerchantId,
                ContextKey::DatabaseName,
                ContextKey::Deployment,
            ],
            StepId::Finalize => &[ContextKey::Deployment],
        }
    }

    /// Step definition from the provisioning table.
    pub fn step(&self) -> &'static SagaStep {
        // The table is indexed by declaration order.
        &PROVISIONING_STEPS[*self as usize]
    }

    /// The step that must complete before this one may start.
    pub fn predecessor(&self) -> Option<StepId> {
        let idx = *self as usize;
        idx.checked_sub(1).map(|i| PROVISIONING_STEPS[i].id)
    }
}

impl core::fmt::Display for StepId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reporting group of a step. Has no effect on execution order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Provision,
    Deploy,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Provision => "provision",
            Phase::Deploy => "deploy",
        }
    }
}

/// One unit of work in the saga (static description, no state).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStep {
    pub id: StepId,
    pub order: u8,
    pub phase: Phase,
}

/// Provisioning steps in execution order.
pub const PROVISIONING_STEPS: [SagaStep; 9] = [
    SagaStep { id: StepId::SelectPlan, order: 1, phase: Phase::Setup },
    SagaStep { id: StepId::CreateMerchant, order: 2, phase: Phase::Setup },
    SagaStep { id: StepId::CreateSubscription, order: 3, phase: Phase::Setup },
    SagaStep { id: StepId::CreateDatabase, order: 4, phase: Phase::Provision },
    SagaStep { id: StepId::InitializeSchema, order: 5, phase: Phase::Provision },
    SagaStep { id: StepId::CreateIndexes, order: 6, phase: Phase::Provision },
    SagaStep { id: StepId::CreateDeployment, order: 7, phase: Phase::Deploy },
    SagaStep { id: StepId::ConfigureEnvironment, order: 8, phase: Phase::Deploy },
    SagaStep { id: StepId::Finalize, order: 9, phase: Phase::Deploy },
];
