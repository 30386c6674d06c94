//! Hosting deployment status and handle.
//!
//! The hosting deployer speaks in status strings (`"QUEUED"`, `"ready"`, ...). They
//! are parsed into `DeploymentStatus` here and nowhere else.

use serde::{Deserialize, Serialize};

use shopforge_core::DeploymentId;

/// Last known state of a hosting deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeploymentStatus {
    Queued,
    Building,
    Ready,
    Error,
    Canceled,
    /// Any status word the deployer reports that we do not model. Non-terminal.
    Other(String),
}

impl DeploymentStatus {
    /// Case-insensitive parse of a deployer status word.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        match upper.as_str() {
            "QUEUED" => DeploymentStatus::Queued,
            "BUILDING" => DeploymentStatus::Building,
            "READY" => DeploymentStatus::Ready,
            "ERROR" => DeploymentStatus::Error,
            "CANCELED" | "CANCELLED" => DeploymentStatus::Canceled,
            _ => DeploymentStatus::Other(upper),
        }
    }

    /// `READY`, `ERROR` and `CANCELED` end polling.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Ready | DeploymentStatus::Error | DeploymentStatus::Canceled
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, DeploymentStatus::Error | DeploymentStatus::Canceled)
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeploymentStatus::Queued => "QUEUED",
            DeploymentStatus::Building => "BUILDING",
            DeploymentStatus::Ready => "READY",
            DeploymentStatus::Error => "ERROR",
            DeploymentStatus::Canceled => "CANCELED",
            DeploymentStatus::Other(s) => s,
        }
    }
}

impl core::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for DeploymentStatus {
    fn from(value: String) -> Self {
        DeploymentStatus::parse(&value)
    }
}

impl From<DeploymentStatus> for String {
    fn from(value: DeploymentStatus) -> Self {
        value.as_str().to_string()
    }
}

/// An asynchronous deployment in progress (or done).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentHandle {
    pub deployment_id: DeploymentId,
    pub last_known_status: DeploymentStatus,
    pub url: Option<String>,
    /// DNS records the merchant must add for a custom subdomain, if any.
    pub dns_instructions: Option<String>,
}

impl DeploymentHandle {
    pub fn new(deployment_id: DeploymentId, status: DeploymentStatus, url: Option<String>) -> Self {
        Self {
            deployment_id,
            last_known_status: status,
            url,
            dns_instructions: None,
        }
    }

    pub fn with_dns_instructions(mut self, instructions: Option<String>) -> Self {
        self.dns_instructions = instructions;
        self
    }

    /// Record a status report from the deployer. A missing url keeps the old one.
    pub fn observe(&mut self, status: DeploymentStatus, url: Option<String>) {
        self.last_known_status = status;
        if url.is_some() {
            self.url = url;
        }
    }

    /// Whether the create response already describes a live deployment, so no
    /// status polling is needed.
    pub fn is_immediately_live(&self) -> bool {
        is_immediately_live(&self.deployment_id, self.url.as_deref(), &self.last_known_status)
    }
}

const LOCAL_HOST_MARKERS: [&str; 2] = ["localhost", "127.0.0.1"];
const MOCK_ID_PREFIXES: [&str; 2] = ["mock-", "local-"];

/// Local/mock deployments (and deployments already `READY`) are live on creation.
pub fn is_immediately_live(id: &DeploymentId, url: Option<&str>, status: &DeploymentStatus) -> bool {
    if *status == DeploymentStatus::Ready {
        return true;
    }
    let local_url = url
        .map(|u| {
            let u = u.to_ascii_lowercase();
            LOCAL_HOST_MARKERS.iter().any(|m| u.contains(m))
        })
        .unwrap_or(false);
    let mock_id = {
        let id = id.as_str().to_ascii_lowercase();
        MOCK_ID_PREFIXES.iter().any(|p| id.starts_with(p))
    };
    local_url || mock_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(s: &str) -> DeploymentId {
        DeploymentId::parse(s).unwrap()
    }

    #[test]
    fn terminal_matching_ignores_case() {
        for raw in ["ready", "READY", "Ready"] {
            assert_eq!(DeploymentStatus::parse(raw), DeploymentStatus::Ready);
        }
        assert!(DeploymentStatus::parse("error").is_failure());
        assert!(DeploymentStatus::parse("Canceled").is_terminal());
    }

    #[test]
    fn unknown_words_are_in_progress() {
        let status = DeploymentStatus::parse("initializing");
        assert_eq!(status, DeploymentStatus::Other("INITIALIZING".to_string()));
        assert!(!status.is_terminal());
        assert!(!DeploymentStatus::Queued.is_terminal());
        assert!(!DeploymentStatus::Building.is_terminal());
    }

    #[test]
    fn status_serializes_as_its_word() {
        let json = serde_json::to_string(&DeploymentStatus::Building).unwrap();
        assert_eq!(json, "\"BUILDING\"");
        let back: DeploymentStatus = serde_json::from_str("\"ready\"").unwrap();
        assert_eq!(back, DeploymentStatus::Ready);
    }

    #[test]
    fn local_urls_and_mock_ids_are_live() {
        let queued = DeploymentStatus::Queued;
        assert!(is_immediately_live(&id("d1"), Some("http://localhost:3000"), &queued));
        assert!(is_immediately_live(&id("d1"), Some("http://127.0.0.1:8080"), &queued));
        assert!(is_immediately_live(&id("mock-42"), None, &queued));
        assert!(!is_immediately_live(&id("d1"), Some("https://acme.example.com"), &queued));
        assert!(!is_immediately_live(&id("d1"), None, &queued));
    }

    #[test]
    fn observe_keeps_url_when_report_has_none() {
        let mut handle = DeploymentHandle::new(id("d1"), DeploymentStatus::Queued, Some("acme.example.com".into()));
        handle.observe(DeploymentStatus::Building, None);
        assert_eq!(handle.url.as_deref(), Some("acme.example.com"));
        assert_eq!(handle.last_known_status, DeploymentStatus::Building);
    }

    proptest! {
        /// Property: parsing is insensitive to the case of every character.
        #[test]
        fn parse_is_case_insensitive(word in prop::sample::select(vec!["queued", "building", "ready", "error", "canceled"]), mask in any::<u16>()) {
            let mixed: String = word
                .chars()
                .enumerate()
                .map(|(i, c)| if mask & (1 << (i % 16)) != 0 { c.to_ascii_uppercase() } else { c })
                .collect();
            prop_assert_eq!(DeploymentStatus::parse(&mixed), DeploymentStatus::parse(word));
        }
    }
}
