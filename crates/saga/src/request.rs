//! Provisioning request: raw input and its validated form.

use serde::{Deserialize, Serialize};

use shopforge_core::{MerchantEmail, MerchantName, PlanId, Subdomain};

use crate::error::ValidationError;

/// Tenant intent as received from a caller (unvalidated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningInput {
    pub plan_id: String,
    pub merchant_name: String,
    pub merchant_email: String,
    #[serde(default)]
    pub custom_subdomain: Option<String>,
}

/// Validated input to a saga run. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningRequest {
    plan_id: PlanId,
    merchant_name: MerchantName,
    merchant_email: MerchantEmail,
    custom_subdomain: Option<Subdomain>,
}

impl ProvisioningRequest {
    /// Check every precondition. No external service is consulted.
    ///
    /// A blank `custom_subdomain` is treated as absent.
    pub fn validate(input: ProvisioningInput) -> Result<Self, ValidationError> {
        let plan_id = PlanId::parse(&input.plan_id).map_err(|_| ValidationError::EmptyPlanId)?;
        let merchant_name = MerchantName::parse(&input.merchant_name)
            .map_err(|e| ValidationError::MerchantName(e.to_string()))?;
        let merchant_email = MerchantEmail::parse(&input.merchant_email)
            .map_err(|e| ValidationError::MerchantEmail(e.to_string()))?;
        let custom_subdomain = match input.custom_subdomain.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                Subdomain::parse(raw).map_err(|e| ValidationError::CustomSubdomain(e.to_string()))?,
            ),
        };

        Ok(Self {
            plan_id,
            merchant_name,
            merchant_email,
            custom_subdomain,
        })
    }

    pub fn plan_id(&self) -> &PlanId {
        &self.plan_id
    }

    pub fn merchant_name(&self) -> &MerchantName {
        &self.merchant_name
    }

    pub fn merchant_email(&self) -> &MerchantEmail {
        &self.merchant_email
    }

    pub fn custom_subdomain(&self) -> Option<&Subdomain> {
        self.custom_subdomain.as_ref()
    }
}

impl TryFrom<ProvisioningInput> for ProvisioningRequest {
    type Error = ValidationError;

    fn try_from(value: ProvisioningInput) -> Result<Self, Self::Error> {
        Self::validate(value)
    }
}
