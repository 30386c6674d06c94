//! Strongly-typed identifiers used across the provisioning domain.
//!
//! Two families:
//! - ids we mint ourselves (`RunId`) or that the merchant/billing services hand back
//!   as UUIDs (`MerchantId`, `SubscriptionId`);
//! - opaque string identifiers owned by other systems (`PlanId`, `DatabaseName`,
//!   `DeploymentId`). We never interpret these beyond "non-empty".

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of one provisioning attempt (a saga run).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

/// Identifier of a merchant record in the merchant registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MerchantId(Uuid);

/// Identifier of a subscription in the billing service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(RunId, "RunId");
impl_uuid_newtype!(MerchantId, "MerchantId");
impl_uuid_newtype!(SubscriptionId, "SubscriptionId");

/// Reference to a billing plan (e.g. `"pro"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

/// Name of a tenant database created by the database provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseName(String);

/// Identifier of a hosting deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap a raw identifier. Surrounding whitespace is trimmed; empty values
            /// are rejected.
            pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
                let trimmed = raw.as_ref().trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{} must not be empty", $name)));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_newtype!(PlanId, "PlanId");
impl_string_newtype!(DatabaseName, "DatabaseName");
impl_string_newtype!(DeploymentId, "DeploymentId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_round_trip_through_strings() {
        let id = MerchantId::new();
        let parsed: MerchantId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn uuid_id_parse_error_names_the_type() {
        let err = "not-a-uuid".parse::<SubscriptionId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(msg) if msg.starts_with("SubscriptionId")));
    }

    #[test]
    fn string_ids_are_trimmed_and_non_empty() {
        assert_eq!(PlanId::parse("  pro ").unwrap().as_str(), "pro");
        assert!(DeploymentId::parse("   ").is_err());
        assert!(DatabaseName::parse("").is_err());
    }

    #[test]
    fn string_ids_serialize_transparently() {
        let id = DeploymentId::parse("d1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"d1\"");
    }
}
