//! Provisioning saga mechanics (no IO).
//!
//! - A fixed, ordered table of steps (`PROVISIONING_STEPS`)
//! - A per-run aggregate (`SagaRun`) that owns the step result log and the overall
//!   status, and refuses out-of-order transitions
//! - A typed accumulator (`ProvisioningContext`) that carries payloads forward
//!   between steps
//! - An observer contract (`ProgressObserver`) for anything that wants to watch
//!   transitions (logs, SSE, tests)
//!
//! Infra is responsible for actually calling external services, timing, retries and
//! polling; it drives a `SagaRun` through the transitions defined here.

pub mod context;
pub mod deployment;
pub mod error;
pub mod observer;
pub mod request;
pub mod result;
pub mod run;
pub mod step;

pub use context::{ContextKey, ProvisioningContext};
pub use deployment::{DeploymentHandle, DeploymentStatus, is_immediately_live};
pub use error::{FailureKind, SagaError, StepFailure, ValidationError};
pub use observer::{
    FanoutObserver, InMemoryObserver, NoopObserver, ProgressEvent, ProgressObserver,
    StepTransition, TracingObserver,
};
pub use request::{ProvisioningInput, ProvisioningRequest};
pub use result::{StepPayload, StepResult, StepStatus};
pub use run::{CoordinatorState, OverallStatus, SagaRun};
pub use step::{PROVISIONING_STEPS, Phase, SagaStep, StepId};
