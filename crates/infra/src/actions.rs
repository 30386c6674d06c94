//! The provisioning steps' actions, one per `StepId`.
//!
//! Each action reads what it needs from `StepInput` (request + context), makes
//! at most one kind of external call, and returns the payload later steps
//! depend on.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use shopforge_core::MerchantStatus;
use shopforge_saga::{
    DeploymentHandle, FailureKind, StepFailure, StepId, StepPayload,
};

use crate::clients::{
    BillingService, DatabaseProvisioner, DeploymentRequest, HostingDeployer, MerchantRegistry,
    PlanCatalog, ProvisioningClients,
};
use crate::executor::{StepAction, StepInput, StepOutput};

/// Status merchants are registered with.
pub const INITIAL_MERCHANT_STATUS: MerchantStatus = MerchantStatus::Active;

/// Default action for every step, wired to `clients`.
pub fn default_actions(clients: &ProvisioningClients) -> Vec<(StepId, Arc<dyn StepAction>)> {
    vec![
        (
            StepId::SelectPlan,
            Arc::new(SelectPlan {
                plans: clients.plans.clone(),
            }),
        ),
        (
            StepId::CreateMerchant,
            Arc::new(CreateMerchant {
                merchants: clients.merchants.clone(),
            }),
        ),
        (
            StepId::CreateSubscription,
            Arc::new(CreateSubscription {
                billing: clients.billing.clone(),
            }),
        ),
        (
            StepId::CreateDatabase,
            Arc::new(CreateDatabase {
                databases: clients.databases.clone(),
            }),
        ),
        (
            StepId::InitializeSchema,
            Arc::new(InitializeSchema {
                databases: clients.databases.clone(),
            }),
        ),
        (
            StepId::CreateIndexes,
            Arc::new(CreateIndexes {
                databases: clients.databases.clone(),
            }),
        ),
        (
            StepId::CreateDeployment,
            Arc::new(CreateDeployment {
                hosting: clients.hosting.clone(),
            }),
        ),
        (
            StepId::ConfigureEnvironment,
            Arc::new(ConfigureEnvironment {
                hosting: clients.hosting.clone(),
            }),
        ),
        (StepId::Finalize, Arc::new(Finalize)),
    ]
}

pub struct SelectPlan {
    plans: Arc<dyn PlanCatalog>,
}

#[async_trait]
impl StepAction for SelectPlan {
    async fn run(&self, input: &StepInput) -> Result<StepOutput, StepFailure> {
        let plan_id = input.request.plan_id();
        let plan = self.plans.resolve_plan(plan_id).await?;
        if !plan.is_subscribable() {
            return Err(StepFailure::new(
                FailureKind::PlanNotFound,
                format!("plan {plan_id} is no longer offered"),
            ));
        }
        let message = format!("plan {} selected ({})", plan.id, plan.name);
        Ok(StepOutput::completed(StepPayload::Plan(plan), message))
    }
}

pub struct CreateMerchant {
    merchants: Arc<dyn MerchantRegistry>,
}

#[async_trait]
impl StepAction for CreateMerchant {
    async fn run(&self, input: &StepInput) -> Result<StepOutput, StepFailure> {
        let merchant_id = self
            .merchants
            .create_merchant(
                input.request.merchant_name(),
                input.request.merchant_email(),
                INITIAL_MERCHANT_STATUS,
            )
            .await?;
        Ok(StepOutput::completed(
            StepPayload::Merchant { merchant_id },
            format!("merchant {merchant_id} registered"),
        ))
    }
}

pub struct CreateSubscription {
    billing: Arc<dyn BillingService>,
}

#[async_trait]
impl StepAction for CreateSubscription {
    async fn run(&self, input: &StepInput) -> Result<StepOutput, StepFailure> {
        let plan = input.context.plan()?;
        let merchant_id = input.context.merchant_id()?;
        let (period_start, period_end) = plan.interval.period_from(Utc::now());

        let subscription_id = self
            .billing
            .create_subscription(merchant_id, &plan.id, period_start, period_end)
            .await?;
        Ok(StepOutput::completed(
            StepPayload::Subscription {
                subscription_id,
                period_start,
                period_end,
            },
            format!(
                "subscription {subscription_id} active until {}",
                period_end.format("%Y-%m-%d")
            ),
        ))
    }
}

pub struct CreateDatabase {
    databases: Arc<dyn DatabaseProvisioner>,
}

#[async_trait]
impl StepAction for CreateDatabase {
    async fn run(&self, input: &StepInput) -> Result<StepOutput, StepFailure> {
        let merchant_id = input.context.merchant_id()?;
        let created = self.databases.create_database(merchant_id).await?;
        let message = format!("database {} created", created.database_name);
        Ok(StepOutput::completed(
            StepPayload::Database {
                database_name: created.database_name,
                collections_created: created.collections_created,
            },
            message,
        ))
    }
}

pub struct InitializeSchema {
    databases: Arc<dyn DatabaseProvisioner>,
}

#[async_trait]
impl StepAction for InitializeSchema {
    async fn run(&self, input: &StepInput) -> Result<StepOutput, StepFailure> {
        let database = input.context.database_name()?;
        let collections = self.databases.initialize_schema(database).await?;
        let message = format!("{} collections seeded", collections.len());
        Ok(StepOutput::completed(
            StepPayload::Schema { collections },
            message,
        ))
    }
}

pub struct CreateIndexes {
    databases: Arc<dyn DatabaseProvisioner>,
}

#[async_trait]
impl StepAction for CreateIndexes {
    async fn run(&self, input: &StepInput) -> Result<StepOutput, StepFailure> {
        let database = input.context.database_name()?;
        let indexes_created = self.databases.create_indexes(database).await?;
        Ok(StepOutput::completed(
            StepPayload::Indexes { indexes_created },
            format!("{indexes_created} indexes created"),
        ))
    }
}

/// Completes on the spot for local/mock deployments; otherwise the step is only
/// accepted and the deployment poller finishes it.
pub struct CreateDeployment {
    hosting: Arc<dyn HostingDeployer>,
}

#[async_trait]
impl StepAction for CreateDeployment {
    async fn run(&self, input: &StepInput) -> Result<StepOutput, StepFailure> {
        let request = DeploymentRequest {
            merchant_id: input.context.merchant_id()?,
            merchant_name: input.request.merchant_name().clone(),
            merchant_email: input.request.merchant_email().clone(),
            database_name: input.context.database_name()?.clone(),
            custom_subdomain: input.request.custom_subdomain().cloned(),
        };
        let created = self.hosting.create_deployment(&request).await?;

        if created.status.is_failure() {
            return Err(StepFailure::new(
                FailureKind::DeploymentTerminal,
                format!(
                    "deployment {} was rejected with status {}",
                    created.deployment_id, created.status
                ),
            ));
        }

        let handle = DeploymentHandle::new(created.deployment_id, created.status, created.url)
            .with_dns_instructions(created.dns_instructions);

        if handle.is_immediately_live() {
            let message = match &handle.url {
                Some(url) => format!("deployment {} live at {url}", handle.deployment_id),
                None => format!("deployment {} live", handle.deployment_id),
            };
            Ok(StepOutput::completed(StepPayload::Deployment(handle), message))
        } else {
            let message = format!(
                "deployment {} accepted ({})",
                handle.deployment_id, handle.last_known_status
            );
            Ok(StepOutput::accepted(StepPayload::Deployment(handle), message))
        }
    }
}

pub struct ConfigureEnvironment {
    hosting: Arc<dyn HostingDeployer>,
}

/// Runtime variables pushed to the storefront instance.
pub fn environment_for(input: &StepInput) -> Result<Vec<(String, String)>, StepFailure> {
    let deployment = input.context.deployment()?;
    let mut vars = vec![
        (
            "MERCHANT_ID".to_string(),
            input.context.merchant_id()?.to_string(),
        ),
        (
            "DATABASE_NAME".to_string(),
            input.context.database_name()?.to_string(),
        ),
        (
            "STORE_URL".to_string(),
            deployment.url.clone().unwrap_or_default(),
        ),
        ("PLAN_ID".to_string(), input.request.plan_id().to_string()),
    ];
    if let Some(subscription_id) = input.context.subscription_id {
        vars.push(("SUBSCRIPTION_ID".to_string(), subscription_id.to_string()));
    }
    Ok(vars)
}

#[async_trait]
impl StepAction for ConfigureEnvironment {
    async fn run(&self, input: &StepInput) -> Result<StepOutput, StepFailure> {
        let deployment_id = input.context.deployment()?.deployment_id.clone();
        let vars = environment_for(input)?;
        self.hosting
            .configure_environment(&deployment_id, &vars)
            .await?;
        let variables: Vec<String> = vars.into_iter().map(|(key, _)| key).collect();
        let message = format!("{} variables set on {deployment_id}", variables.len());
        Ok(StepOutput::completed(
            StepPayload::Environment { variables },
            message,
        ))
    }
}

pub struct Finalize;

#[async_trait]
impl StepAction for Finalize {
    async fn run(&self, input: &StepInput) -> Result<StepOutput, StepFailure> {
        let deployment = input.context.deployment()?;
        let store_url = deployment.url.clone();
        let message = match &store_url {
            Some(url) => format!("store is live at {url}"),
            None => "store is live".to_string(),
        };
        Ok(StepOutput::completed(
            StepPayload::Finalized { store_url },
            message,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopforge_core::RunId;
    use shopforge_saga::{
        DeploymentStatus, ProvisioningContext, ProvisioningInput, ProvisioningRequest,
    };

    use crate::clients::{ClientError, InMemoryBackend, Operation};

    fn input(step: StepId, context: ProvisioningContext) -> StepInput {
        StepInput {
            run_id: RunId::new(),
            step,
            attempt: 1,
            request: ProvisioningRequest::validate(ProvisioningInput {
                plan_id: "pro".into(),
                merchant_name: "Acme".into(),
                merchant_email: "a@acme.com".into(),
                custom_subdomain: None,
            })
            .unwrap(),
            context,
        }
    }

    fn action(clients: &ProvisioningClients, step: StepId) -> Arc<dyn StepAction> {
        default_actions(clients)
            .into_iter()
            .find(|(id, _)| *id == step)
            .map(|(_, action)| action)
            .unwrap()
    }

    #[test]
    fn every_step_has_a_default_action() {
        let clients = ProvisioningClients::in_memory(Arc::new(InMemoryBackend::new()));
        let steps: Vec<StepId> = default_actions(&clients).into_iter().map(|(s, _)| s).collect();
        let expected: Vec<StepId> = shopforge_saga::PROVISIONING_STEPS.iter().map(|s| s.id).collect();
        assert_eq!(steps, expected);
    }

    #[tokio::test]
    async fn inactive_plans_are_not_selectable() {
        let clients = ProvisioningClients::in_memory(Arc::new(InMemoryBackend::new()));
        let mut input = input(StepId::SelectPlan, ProvisioningContext::new());
        input.request = ProvisioningRequest::validate(ProvisioningInput {
            plan_id: "legacy".into(),
            merchant_name: "Acme".into(),
            merchant_email: "a@acme.com".into(),
            custom_subdomain: None,
        })
        .unwrap();

        let err = action(&clients, StepId::SelectPlan)
            .run(&input)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::PlanNotFound);
    }

    #[tokio::test]
    async fn queued_deployments_are_only_accepted() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.script_deployment("d1", "QUEUED", None);
        let clients = ProvisioningClients::in_memory(backend);

        let mut context = ProvisioningContext::new();
        context.merchant_id = Some(shopforge_core::MerchantId::new());
        context.database_name = Some(shopforge_core::DatabaseName::parse("tenant_x").unwrap());

        let output = action(&clients, StepId::CreateDeployment)
            .run(&input(StepId::CreateDeployment, context))
            .await
            .unwrap();
        match output {
            StepOutput::Accepted {
                payload: StepPayload::Deployment(handle),
                ..
            } => {
                assert_eq!(handle.deployment_id.as_str(), "d1");
                assert_eq!(handle.last_known_status, DeploymentStatus::Queued);
            }
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[tokio::test]
    async fn deployments_rejected_on_creation_fail_the_step() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.script_deployment("d1", "Error", None);
        let clients = ProvisioningClients::in_memory(backend);

        let mut context = ProvisioningContext::new();
        context.merchant_id = Some(shopforge_core::MerchantId::new());
        context.database_name = Some(shopforge_core::DatabaseName::parse("tenant_x").unwrap());

        let err = action(&clients, StepId::CreateDeployment)
            .run(&input(StepId::CreateDeployment, context))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::DeploymentTerminal);
    }

    #[tokio::test]
    async fn client_errors_surface_with_their_kind() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.fail_once(
            Operation::CreateMerchant,
            ClientError::Conflict("email taken".into()),
        );
        let clients = ProvisioningClients::in_memory(backend);

        let err = action(&clients, StepId::CreateMerchant)
            .run(&input(StepId::CreateMerchant, ProvisioningContext::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Conflict);
        assert_eq!(err.message, "conflict: email taken");
    }

    #[test]
    fn environment_lists_runtime_variables() {
        let mut context = ProvisioningContext::new();
        context.merchant_id = Some(shopforge_core::MerchantId::new());
        context.database_name = Some(shopforge_core::DatabaseName::parse("tenant_x").unwrap());
        context.deployment = Some(DeploymentHandle::new(
            shopforge_core::DeploymentId::parse("d1").unwrap(),
            DeploymentStatus::Ready,
            Some("acme.example.com".into()),
        ));

        let vars = environment_for(&input(StepId::ConfigureEnvironment, context)).unwrap();
        let keys: Vec<&str> = vars.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["MERCHANT_ID", "DATABASE_NAME", "STORE_URL", "PLAN_ID"]);
        assert_eq!(vars[2].1, "acme.example.com");
        assert_eq!(vars[3].1, "pro");
    }
}
