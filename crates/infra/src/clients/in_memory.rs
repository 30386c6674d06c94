//! In-memory implementation of every external client.
//!
//! Used in dev mode (no service URLs configured) and by tests. Failures and
//! deployment status sequences can be scripted per operation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use shopforge_core::{
    BillingInterval, DatabaseName, DeploymentId, MerchantEmail, MerchantId, MerchantName,
    MerchantStatus, Plan, PlanId, SubscriptionId,
};
use shopforge_saga::{DeploymentStatus, StepId};

use super::schema::{STOREFRONT_INDEXES, collection_names, tenant_database_name};
use super::{
    BillingService, ClientError, ClientResult, DatabaseCreated, DatabaseProvisioner,
    DeploymentCreated, DeploymentRequest, DeploymentStatusReport, HostingDeployer,
    MerchantRegistry, PlanCatalog,
};

/// One external call, used as the key for scripted behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ResolvePlan,
    CreateMerchant,
    CreateSubscription,
    CreateDatabase,
    InitializeSchema,
    CreateIndexes,
    CreateDeployment,
    GetDeploymentStatus,
    ConfigureEnvironment,
}

impl Operation {
    /// The call a step makes, if it makes one.
    pub fn for_step(step: StepId) -> Option<Operation> {
        match step {
            StepId::SelectPlan => Some(Operation::ResolvePlan),
            StepId::CreateMerchant => Some(Operation::CreateMerchant),
            StepId::CreateSubscription => Some(Operation::CreateSubscription),
            StepId::CreateDatabase => Some(Operation::CreateDatabase),
            StepId::InitializeSchema => Some(Operation::InitializeSchema),
            StepId::CreateIndexes => Some(Operation::CreateIndexes),
            StepId::CreateDeployment => Some(Operation::CreateDeployment),
            StepId::ConfigureEnvironment => Some(Operation::ConfigureEnvironment),
            StepId::Finalize => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerchantRecord {
    pub id: MerchantId,
    pub name: MerchantName,
    pub email: MerchantEmail,
    pub status: MerchantStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    pub id: SubscriptionId,
    pub merchant_id: MerchantId,
    pub plan_id: PlanId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRecord {
    pub name: DatabaseName,
    pub merchant_id: MerchantId,
    pub collections: Vec<String>,
    pub indexes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub merchant_id: MerchantId,
    pub status: DeploymentStatus,
    pub url: Option<String>,
    pub environment: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct State {
    plans: HashMap<PlanId, Plan>,
    merchants: Vec<MerchantRecord>,
    subscriptions: Vec<SubscriptionRecord>,
    databases: Vec<DatabaseRecord>,
    deployments: HashMap<DeploymentId, DeploymentRecord>,
    taken_subdomains: HashSet<String>,
    database_quota: Option<usize>,

    one_shot_failures: HashMap<Operation, VecDeque<ClientError>>,
    persistent_failures: HashMap<Operation, ClientError>,
    latency: HashMap<Operation, Duration>,
    calls: HashMap<Operation, u32>,

    next_deployment: Option<DeploymentCreated>,
    status_script: VecDeque<ClientResult<DeploymentStatusReport>>,
    last_status: Option<DeploymentStatusReport>,
    deployment_seq: u64,
}

impl State {
    fn scripted_failure(&mut self, op: Operation) -> ClientResult<()> {
        if let Some(err) = self
            .one_shot_failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        match self.persistent_failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Shared fake of all five backends.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    status_in_flight: AtomicUsize,
    status_max_in_flight: AtomicUsize,
}

impl InMemoryBackend {
    /// Backend seeded with the default plan catalog.
    pub fn new() -> Self {
        let backend = Self::default();
        for plan in default_plans() {
            backend.add_plan(plan);
        }
        backend
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Scripting
    // ─────────────────────────────────────────────────────────────────────

    pub fn add_plan(&self, plan: Plan) {
        self.state().plans.insert(plan.id.clone(), plan);
    }

    /// Fail the next call of `op` (queued behind earlier one-shot failures).
    pub fn fail_once(&self, op: Operation, error: ClientError) {
        self.state()
            .one_shot_failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fail every call of `op` until `clear_failures`.
    pub fn fail_always(&self, op: Operation, error: ClientError) {
        self.state().persistent_failures.insert(op, error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.one_shot_failures.clear();
        state.persistent_failures.clear();
    }

    /// Delay every call of `op`.
    pub fn set_latency(&self, op: Operation, latency: Duration) {
        self.state().latency.insert(op, latency);
    }

    pub fn reserve_subdomain(&self, subdomain: &str) {
        self.state()
            .taken_subdomains
            .insert(subdomain.to_ascii_lowercase());
    }

    pub fn set_database_quota(&self, max_databases: usize) {
        self.state().database_quota = Some(max_databases);
    }

    /// Response of the next `create_deployment` call.
    pub fn script_deployment(&self, deployment_id: &str, status: &str, url: Option<&str>) {
        let created = DeploymentId::parse(deployment_id).map(|id| DeploymentCreated {
            deployment_id: id,
            url: url.map(str::to_string),
            status: DeploymentStatus::parse(status),
            dns_instructions: None,
        });
        if let Ok(created) = created {
            self.state().next_deployment = Some(created);
        }
    }

    /// Responses of subsequent status queries, in order. Once exhausted the last
    /// successful report repeats.
    pub fn script_statuses<I>(&self, reports: I)
    where
        I: IntoIterator<Item = ClientResult<(&'static str, Option<&'static str>)>>,
    {
        let mut state = self.state();
        state.status_script.extend(reports.into_iter().map(|r| {
            r.map(|(status, url)| DeploymentStatusReport {
                status: DeploymentStatus::parse(status),
                url: url.map(str::to_string),
            })
        }));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────

    pub fn calls(&self, op: Operation) -> u32 {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.state().calls.values().sum()
    }

    /// Highest number of status queries that were ever in flight at once.
    pub fn max_concurrent_status_queries(&self) -> usize {
        self.status_max_in_flight.load(Ordering::SeqCst)
    }

    pub fn merchants(&self) -> Vec<MerchantRecord> {
        self.state().merchants.clone()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionRecord> {
        self.state().subscriptions.clone()
    }

    pub fn databases(&self) -> Vec<DatabaseRecord> {
        self.state().databases.clone()
    }

    pub fn deployment(&self, id: &DeploymentId) -> Option<DeploymentRecord> {
        self.state().deployments.get(id).cloned()
    }

    async fn call(&self, op: Operation) -> ClientResult<()> {
        let latency = {
            let mut state = self.state();
            *state.calls.entry(op).or_default() += 1;
            state.latency.get(&op).copied()
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.state().scripted_failure(op)
    }
}

fn default_plans() -> Vec<Plan> {
    let plan = |id: &str, name: &str, price_cents, interval, active| -> Option<Plan> {
        Some(Plan {
            id: PlanId::parse(id).ok()?,
            name: name.to_string(),
            price_cents,
            currency: "usd".to_string(),
            interval,
            active,
        })
    };
    [
        plan("starter", "Starter", 1_900, BillingInterval::Monthly, true),
        plan("pro", "Pro", 4_900, BillingInterval::Monthly, true),
        plan("enterprise", "Enterprise", 99_000, BillingInterval::Yearly, true),
        plan("legacy", "Legacy", 990, BillingInterval::Monthly, false),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn local_store_url(request: &DeploymentRequest) -> String {
    match &request.custom_subdomain {
        Some(sub) => format!("http://{sub}.localhost:3000"),
        None => format!("http://localhost:3000/stores/{}", request.merchant_id),
    }
}

#[async_trait]
impl PlanCatalog for InMemoryBackend {
    async fn resolve_plan(&self, plan_id: &PlanId) -> ClientResult<Plan> {
        self.call(Operation::ResolvePlan).await?;
        self.state()
            .plans
            .get(plan_id)
            .cloned()
            .ok_or_else(|| ClientError::PlanNotFound(plan_id.to_string()))
    }
}

#[async_trait]
impl MerchantRegistry for InMemoryBackend {
    async fn create_merchant(
        &self,
        name: &MerchantName,
        email: &MerchantEmail,
        initial_status: MerchantStatus,
    ) -> ClientResult<MerchantId> {
        self.call(Operation::CreateMerchant).await?;
        let mut state = self.state();
        if state.merchants.iter().any(|m| &m.email == email) {
            return Err(ClientError::Conflict(format!(
                "a merchant with email {email} already exists"
            )));
        }
        let id = MerchantId::new();
        state.merchants.push(MerchantRecord {
            id,
            name: name.clone(),
            email: email.clone(),
            status: initial_status,
        });
        Ok(id)
    }
}

#[async_trait]
impl BillingService for InMemoryBackend {
    async fn create_subscription(
        &self,
        merchant_id: MerchantId,
        plan_id: &PlanId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> ClientResult<SubscriptionId> {
        self.call(Operation::CreateSubscription).await?;
        let mut state = self.state();
        if !state.plans.get(plan_id).is_some_and(|p| p.active) {
            return Err(ClientError::PlanNotFound(plan_id.to_string()));
        }
        if state
            .subscriptions
            .iter()
            .any(|s| s.merchant_id == merchant_id)
        {
            return Err(ClientError::Conflict(format!(
                "merchant {merchant_id} already has a subscription"
            )));
        }
        let id = SubscriptionId::new();
        state.subscriptions.push(SubscriptionRecord {
            id,
            merchant_id,
            plan_id: plan_id.clone(),
            period_start,
            period_end,
        });
        Ok(id)
    }
}

#[async_trait]
impl DatabaseProvisioner for InMemoryBackend {
    async fn create_database(&self, merchant_id: MerchantId) -> ClientResult<DatabaseCreated> {
        self.call(Operation::CreateDatabase).await?;
        let mut state = self.state();
        if state
            .database_quota
            .is_some_and(|quota| state.databases.len() >= quota)
        {
            return Err(ClientError::QuotaExceeded(format!(
                "database quota of {} reached",
                state.databases.len()
            )));
        }
        let name = tenant_database_name(merchant_id)?;
        state.databases.push(DatabaseRecord {
            name: name.clone(),
            merchant_id,
            collections: Vec::new(),
            indexes: 0,
        });
        Ok(DatabaseCreated {
            database_name: name,
            collections_created: 0,
        })
    }

    async fn initialize_schema(&self, database: &DatabaseName) -> ClientResult<Vec<String>> {
        self.call(Operation::InitializeSchema).await?;
        let mut state = self.state();
        let record = state
            .databases
            .iter_mut()
            .find(|d| &d.name == database)
            .ok_or_else(|| ClientError::Validation(format!("unknown database {database}")))?;
        record.collections = collection_names();
        Ok(record.collections.clone())
    }

    async fn create_indexes(&self, database: &DatabaseName) -> ClientResult<u32> {
        self.call(Operation::CreateIndexes).await?;
        let mut state = self.state();
        let record = state
            .databases
            .iter_mut()
            .find(|d| &d.name == database)
            .ok_or_else(|| ClientError::Validation(format!("unknown database {database}")))?;
        if record.collections.is_empty() {
            return Err(ClientError::Validation(format!(
                "database {database} has no schema yet"
            )));
        }
        record.indexes = STOREFRONT_INDEXES.len() as u32;
        Ok(record.indexes)
    }
}

#[async_trait]
impl HostingDeployer for InMemoryBackend {
    async fn create_deployment(
        &self,
        request: &DeploymentRequest,
    ) -> ClientResult<DeploymentCreated> {
        self.call(Operation::CreateDeployment).await?;
        let mut state = self.state();

        if let Some(sub) = &request.custom_subdomain {
            if !state.taken_subdomains.insert(sub.as_str().to_string()) {
                return Err(ClientError::SubdomainTaken(sub.to_string()));
            }
        }

        let created = match state.next_deployment.take() {
            Some(scripted) => scripted,
            None => {
                state.deployment_seq += 1;
                let id = DeploymentId::parse(format!("mock-{}", state.deployment_seq))
                    .map_err(|e| ClientError::Validation(e.to_string()))?;
                DeploymentCreated {
                    deployment_id: id,
                    url: Some(local_store_url(request)),
                    status: DeploymentStatus::Ready,
                    dns_instructions: request
                        .custom_subdomain
                        .as_ref()
                        .map(|sub| format!("CNAME {sub} -> cname.localhost")),
                }
            }
        };

        state.deployments.insert(
            created.deployment_id.clone(),
            DeploymentRecord {
                id: created.deployment_id.clone(),
                merchant_id: request.merchant_id,
                status: created.status.clone(),
                url: created.url.clone(),
                environment: Vec::new(),
            },
        );
        Ok(created)
    }

    async fn get_deployment_status(
        &self,
        deployment_id: &DeploymentId,
    ) -> ClientResult<DeploymentStatusReport> {
        let in_flight = self.status_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.status_max_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        let outcome = self.call(Operation::GetDeploymentStatus).await;
        self.status_in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome?;

        let mut state = self.state();
        let report = match state.status_script.pop_front() {
            Some(scripted) => scripted?,
            None => match &state.last_status {
                Some(last) => last.clone(),
                None => {
                    let record = state.deployments.get(deployment_id).ok_or_else(|| {
                        ClientError::Validation(format!("unknown deployment {deployment_id}"))
                    })?;
                    DeploymentStatusReport {
                        status: record.status.clone(),
                        url: record.url.clone(),
                    }
                }
            },
        };
        state.last_status = Some(report.clone());
        if let Some(record) = state.deployments.get_mut(deployment_id) {
            record.status = report.status.clone();
            if report.url.is_some() {
                record.url = report.url.clone();
            }
        }
        Ok(report)
    }

    async fn configure_environment(
        &self,
        deployment_id: &DeploymentId,
        variables: &[(String, String)],
    ) -> ClientResult<()> {
        self.call(Operation::ConfigureEnvironment).await?;
        let mut state = self.state();
        let record = state.deployments.get_mut(deployment_id).ok_or_else(|| {
            ClientError::Validation(format!("unknown deployment {deployment_id}"))
        })?;
        record.environment = variables.to_vec();
        Ok(())
    }
}
