//! `shopforge-core`: domain primitives for tenant provisioning.
//!
//! Typed ids, validated merchant values and billing plans. No IO.

pub mod error;
pub mod id;
pub mod merchant;
pub mod plan;

pub use error::{DomainError, DomainResult};
pub use id::{DatabaseName, DeploymentId, MerchantId, PlanId, RunId, SubscriptionId};
pub use merchant::{MerchantEmail, MerchantName, MerchantStatus, Subdomain};
pub use plan::{BillingInterval, Plan};
