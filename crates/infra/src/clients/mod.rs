//! External service clients consumed by the provisioning saga.
//!
//! Every backend is an independently owned remote system and every call is
//! fallible. The traits here are the only surface the step actions see; adapters
//! live in the submodules:
//!
//! - `in_memory`: dev mode and tests (scripted failures, scripted deployment status)
//! - `http`: reqwest adapters for the registry, billing service and deployer
//! - `postgres`: sqlx adapter for the tenant database provisioner

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shopforge_core::{
    DatabaseName, DeploymentId, MerchantEmail, MerchantId, MerchantName, MerchantStatus, Plan,
    PlanId, Subdomain, SubscriptionId,
};
use shopforge_saga::{DeploymentStatus, FailureKind, StepFailure};

pub mod http;
pub mod in_memory;
pub mod postgres;
pub mod schema;

pub use in_memory::{InMemoryBackend, Operation};

/// Error returned by an external client call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("rejected: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("subdomain already taken: {0}")]
    SubdomainTaken(String),

    /// The request never produced a usable response (connect error, bad body).
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ClientError::Validation(_) => FailureKind::Validation,
            ClientError::Conflict(_) => FailureKind::Conflict,
            ClientError::Unavailable(_) | ClientError::Transport(_) => FailureKind::Unavailable,
            ClientError::PlanNotFound(_) => FailureKind::PlanNotFound,
            ClientError::QuotaExceeded(_) => FailureKind::QuotaExceeded,
            ClientError::SubdomainTaken(_) => FailureKind::SubdomainTaken,
        }
    }
}

impl From<ClientError> for StepFailure {
    fn from(value: ClientError) -> Self {
        StepFailure::new(value.kind(), value.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

// ─────────────────────────────────────────────────────────────────────────────
// Contracts
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves plan ids to billing plans.
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn resolve_plan(&self, plan_id: &PlanId) -> ClientResult<Plan>;
}

#[async_trait]
pub trait MerchantRegistry: Send + Sync {
    async fn create_merchant(
        &self,
        name: &MerchantName,
        email: &MerchantEmail,
        initial_status: MerchantStatus,
    ) -> ClientResult<MerchantId>;
}

#[async_trait]
pub trait BillingService: Send + Sync {
    async fn create_subscription(
        &self,
        merchant_id: MerchantId,
        plan_id: &PlanId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> ClientResult<SubscriptionId>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseCreated {
    pub database_name: DatabaseName,
    pub collections_created: u32,
}

#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    async fn create_database(&self, merchant_id: MerchantId) -> ClientResult<DatabaseCreated>;

    /// Seed the storefront collections; returns their names.
    async fn initialize_schema(&self, database: &DatabaseName) -> ClientResult<Vec<String>>;

    /// Apply the storefront index definitions; returns how many were created.
    async fn create_indexes(&self, database: &DatabaseName) -> ClientResult<u32>;
}

/// Everything the deployer needs to stand up a storefront instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentRequest {
    pub merchant_id: MerchantId,
    pub merchant_name: MerchantName,
    pub merchant_email: MerchantEmail,
    pub database_name: DatabaseName,
    pub custom_subdomain: Option<Subdomain>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentCreated {
    pub deployment_id: DeploymentId,
    pub url: Option<String>,
    pub status: DeploymentStatus,
    pub dns_instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStatusReport {
    pub status: DeploymentStatus,
    pub url: Option<String>,
}

#[async_trait]
pub trait HostingDeployer: Send + Sync {
    async fn create_deployment(
        &self,
        request: &DeploymentRequest,
    ) -> ClientResult<DeploymentCreated>;

    async fn get_deployment_status(
        &self,
        deployment_id: &DeploymentId,
    ) -> ClientResult<DeploymentStatusReport>;

    /// Replace the runtime environment of a deployed instance.
    async fn configure_environment(
        &self,
        deployment_id: &DeploymentId,
        variables: &[(String, String)],
    ) -> ClientResult<()>;
}

/// The full set of clients a coordinator runs against.
#[derive(Clone)]
pub struct ProvisioningClients {
    pub plans: Arc<dyn PlanCatalog>,
    pub merchants: Arc<dyn MerchantRegistry>,
    pub billing: Arc<dyn BillingService>,
    pub databases: Arc<dyn DatabaseProvisioner>,
    pub hosting: Arc<dyn HostingDeployer>,
}

impl ProvisioningClients {
    /// Every client backed by the same in-memory backend.
    pub fn in_memory(backend: Arc<InMemoryBackend>) -> Self {
        Self {
            plans: backend.clone(),
            merchants: backend.clone(),
            billing: backend.clone(),
            databases: backend.clone(),
            hosting: backend,
        }
    }
}

impl std::fmt::Debug for ProvisioningClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningClients").finish_non_exhaustive()
    }
}
