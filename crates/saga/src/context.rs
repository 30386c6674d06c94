//! Typed accumulator of step payloads.
//!
//! Each completed step contributes one payload; later steps read what they declared
//! in `StepId::requires`. Missing inputs are detected before a step's action runs.

use serde::{Deserialize, Serialize};

use shopforge_core::{DatabaseName, MerchantId, Plan, SubscriptionId};

use crate::deployment::DeploymentHandle;
use crate::error::{FailureKind, StepFailure};
use crate::result::StepPayload;
use crate::step::StepId;

/// A named value in the provisioning context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKey {
    Plan,
    MerchantId,
    SubscriptionId,
    DatabaseName,
    Deployment,
}

impl ContextKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKey::Plan => "plan",
            ContextKey::MerchantId => "merchant_id",
            ContextKey::SubscriptionId => "subscription_id",
            ContextKey::DatabaseName => "database_name",
            ContextKey::Deployment => "deployment",
        }
    }
}

/// Values produced so far by a run's completed steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningContext {
    pub plan: Option<Plan>,
    pub merchant_id: Option<MerchantId>,
    pub subscription_id: Option<SubscriptionId>,
    pub database_name: Option<DatabaseName>,
    pub deployment: Option<DeploymentHandle>,
}

impl ProvisioningContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, key: ContextKey) -> bool {
        match key {
            ContextKey::Plan => self.plan.is_some(),
            ContextKey::MerchantId => self.merchant_id.is_some(),
            ContextKey::SubscriptionId => self.subscription_id.is_some(),
            ContextKey::DatabaseName => self.database_name.is_some(),
            ContextKey::Deployment => self.deployment.is_some(),
        }
    }

    /// Fail with `missing_dependency` unless every input of `step` is present.
    pub fn check_requirements(&self, step: StepId) -> Result<(), StepFailure> {
        let missing: Vec<ContextKey> = step
            .requires()
            .iter()
            .copied()
            .filter(|k| !self.has(*k))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StepFailure::missing(step, &missing))
        }
    }

    /// Fold a completed step's payload into the context.
    pub fn absorb(&mut self, payload: &StepPayload) {
        match payload {
            StepPayload::Plan(plan) => self.plan = Some(plan.clone()),
            StepPayload::Merchant { merchant_id } => self.merchant_id = Some(*merchant_id),
            StepPayload::Subscription { subscription_id, .. } => {
                self.subscription_id = Some(*subscription_id)
            }
            StepPayload::Database { database_name, .. } => {
                self.database_name = Some(database_name.clone())
            }
            StepPayload::Deployment(handle) => self.deployment = Some(handle.clone()),
            StepPayload::Schema { .. }
            | StepPayload::Indexes { .. }
            | StepPayload::Environment { .. }
            | StepPayload::Finalized { .. } => {}
        }
    }

    pub fn plan(&self) -> Result<&Plan, StepFailure> {
        self.plan
            .as_ref()
            .ok_or_else(|| missing_key(ContextKey::Plan))
    }

    pub fn merchant_id(&self) -> Result<MerchantId, StepFailure> {
        self.merchant_id.ok_or_else(|| missing_key(ContextKey::MerchantId))
    }

    pub fn database_name(&self) -> Result<&DatabaseName, StepFailure> {
        self.database_name
            .as_ref()
            .ok_or_else(|| missing_key(ContextKey::DatabaseName))
    }

    pub fn deployment(&self) -> Result<&DeploymentHandle, StepFailure> {
        self.deployment
            .as_ref()
            .ok_or_else(|| missing_key(ContextKey::Deployment))
    }
}

fn missing_key(key: ContextKey) -> StepFailure {
    StepFailure::new(
        FailureKind::MissingDependency,
        format!("{} has not been produced yet", key.as_str()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirements_are_checked_before_running() {
        let ctx = ProvisioningContext::new();
        let err = ctx.check_requirements(StepId::CreateSubscription).unwrap_err();
        assert_eq!(err.kind, FailureKind::MissingDependency);
        assert!(err.message.contains("plan"));
        assert!(err.message.contains("merchant_id"));

        assert!(ctx.check_requirements(StepId::SelectPlan).is_ok());
        assert!(ctx.check_requirements(StepId::CreateMerchant).is_ok());
    }

    #[test]
    fn absorbing_payloads_satisfies_later_steps() {
        let mut ctx = ProvisioningContext::new();
        let merchant_id = MerchantId::new();
        ctx.absorb(&StepPayload::Merchant { merchant_id });
        ctx.absorb(&StepPayload::Database {
            database_name: DatabaseName::parse("store_acme").unwrap(),
            collections_created: 0,
        });

        assert_eq!(ctx.merchant_id().unwrap(), merchant_id);
        assert!(ctx.check_requirements(StepId::CreateDatabase).is_ok());
        assert!(ctx.check_requirements(StepId::InitializeSchema).is_ok());
        assert!(ctx.check_requirements(StepId::CreateDeployment).is_ok());
        assert!(ctx.check_requirements(StepId::ConfigureEnvironment).is_err());
    }
}
