//! Infrastructure layer: external service clients and the provisioning runtime.
//!
//! - `clients`: contracts for the plan catalog, merchant registry, billing,
//!   tenant databases and hosting, with in-memory, HTTP and Postgres adapters
//! - `executor` + `actions`: runs one step with its timeout and retry policy
//! - `coordinator`: drives a run through every step on a background task
//! - `poller`: waits for an accepted deployment to go live
//! - `config`: `SHOPFORGE_*` environment configuration

pub mod actions;
pub mod clients;
pub mod config;
pub mod coordinator;
pub mod executor;
pub mod handle;
pub mod observers;
pub mod poller;
pub mod retry;

pub use clients::{ClientError, InMemoryBackend, Operation, ProvisioningClients};
pub use config::{ConfigError, ProvisioningConfig};
pub use coordinator::{SagaCoordinator, SagaCoordinatorBuilder};
pub use executor::{StepAction, StepExecutor, StepInput, StepOutcome, StepOutput};
pub use handle::{RunHandle, RunPhase};
pub use observers::BroadcastObserver;
pub use poller::{DeploymentPoller, PollOutcome, PollerConfig};
pub use retry::{BackoffStrategy, RetryPolicy, StepPolicy};

#[cfg(test)]
mod integration_tests;
