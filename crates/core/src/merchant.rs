//! Merchant-facing value objects: display name, contact email, storefront subdomain.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Maximum length of a single DNS label.
pub const MAX_LABEL_LEN: usize = 63;

/// Merchant display name (non-empty after trimming).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MerchantName(String);

impl MerchantName {
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("merchant name must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for MerchantName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Merchant contact email, lower-cased.
///
/// Syntax check only: one `@`, a non-empty local part, and a dotted domain whose
/// labels are non-empty. Deliverability is the registry's problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MerchantEmail(String);

impl MerchantEmail {
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let candidate = raw.as_ref().trim();
        let invalid = || DomainError::validation(format!("invalid merchant email: {candidate:?}"));

        if candidate.is_empty() || candidate.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let (local, domain) = candidate.split_once('@').ok_or_else(invalid)?;
        if local.is_empty() || domain.contains('@') {
            return Err(invalid());
        }
        if !domain.contains('.') || domain.split('.').any(str::is_empty) {
            return Err(invalid());
        }

        Ok(Self(candidate.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for MerchantEmail {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Custom storefront subdomain: a single hostname label.
///
/// 1..=63 characters of ASCII letters, digits and `-`, not starting or ending with
/// `-`. Stored lower-cased since DNS labels are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subdomain(String);

impl Subdomain {
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let label = raw.as_ref();
        if !is_hostname_label(label) {
            return Err(DomainError::validation(format!(
                "custom subdomain {label:?} is not a valid hostname label"
            )));
        }
        Ok(Self(label.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Subdomain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// RFC 1123 hostname label check.
pub fn is_hostname_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_LABEL_LEN {
        return false;
    }
    if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}

/// Lifecycle status of a merchant record in the registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MerchantStatus {
    Pending,
    Active,
    Suspended,
}

impl MerchantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MerchantStatus::Pending => "pending",
            MerchantStatus::Active => "active",
            MerchantStatus::Suspended => "suspended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merchant_name_is_trimmed() {
        assert_eq!(MerchantName::parse("  Acme ").unwrap().as_str(), "Acme");
        assert!(MerchantName::parse(" \t ").is_err());
    }

    #[test]
    fn emails_are_validated_and_normalized() {
        assert_eq!(
            MerchantEmail::parse("Owner@Acme.com").unwrap().as_str(),
            "owner@acme.com"
        );
        for bad in ["", "acme.com", "@acme.com", "a@acme", "a@@acme.com", "a b@acme.com", "a@acme..com"] {
            assert!(MerchantEmail::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn subdomain_rejects_spaces_and_punctuation() {
        assert!(Subdomain::parse("My Store!").is_err());
        assert!(Subdomain::parse("-acme").is_err());
        assert!(Subdomain::parse("acme-").is_err());
        assert!(Subdomain::parse("").is_err());
        assert!(Subdomain::parse(&"a".repeat(64)).is_err());
    }

    #[test]
    fn subdomain_is_lower_cased() {
        assert_eq!(Subdomain::parse("Acme-Store2").unwrap().as_str(), "acme-store2");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: every well-formed label is accepted.
            #[test]
            fn well_formed_labels_are_accepted(label in "[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?") {
                prop_assert!(Subdomain::parse(&label).is_ok());
            }

            /// Property: any label containing a character outside [A-Za-z0-9-] is rejected.
            #[test]
            fn labels_with_foreign_characters_are_rejected(
                prefix in "[a-z0-9]{0,10}",
                bad in "[ !_.@/#]",
                suffix in "[a-z0-9]{0,10}",
            ) {
                let label = format!("{prefix}{bad}{suffix}");
                prop_assert!(Subdomain::parse(&label).is_err());
            }
        }
    }
}
