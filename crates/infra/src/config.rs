//! Provisioning configuration, loaded from `SHOPFORGE_*` environment variables.
//!
//! Every field has a default. A service whose URL is unset is served by the
//! in-memory backend, so an empty environment gives a fully working dev setup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use tracing::info;

use crate::clients::http::{HttpBillingService, HttpHostingDeployer, HttpMerchantRegistry};
use crate::clients::postgres::PostgresDatabaseProvisioner;
use crate::clients::{InMemoryBackend, ProvisioningClients};
use crate::poller::PollerConfig;
use crate::retry::StepPolicy;

pub const MERCHANT_REGISTRY_URL: &str = "SHOPFORGE_MERCHANT_REGISTRY_URL";
pub const BILLING_URL: &str = "SHOPFORGE_BILLING_URL";
pub const HOSTING_URL: &str = "SHOPFORGE_HOSTING_URL";
pub const HOSTING_TOKEN: &str = "SHOPFORGE_HOSTING_TOKEN";
pub const TENANT_DATABASE_URL: &str = "SHOPFORGE_TENANT_DATABASE_URL";
pub const POLL_INTERVAL_MS: &str = "SHOPFORGE_POLL_INTERVAL_MS";
pub const POLL_MAX_ATTEMPTS: &str = "SHOPFORGE_POLL_MAX_ATTEMPTS";
pub const POLL_MAX_DURATION_SECS: &str = "SHOPFORGE_POLL_MAX_DURATION_SECS";
pub const STEP_TIMEOUT_SECS: &str = "SHOPFORGE_STEP_TIMEOUT_SECS";
pub const HTTP_TIMEOUT_SECS: &str = "SHOPFORGE_HTTP_TIMEOUT_SECS";
pub const BIND: &str = "SHOPFORGE_BIND";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },

    #[error("{var} must be a socket address, got {value:?}")]
    InvalidAddress { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    pub merchant_registry_url: Option<String>,
    pub billing_url: Option<String>,
    pub hosting_url: Option<String>,
    pub hosting_token: Option<String>,
    pub tenant_database_url: Option<String>,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub poll_max_duration: Duration,
    pub step_timeout: Duration,
    pub http_timeout: Duration,
    pub bind: SocketAddr,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        let poller = PollerConfig::default();
        Self {
            merchant_registry_url: None,
            billing_url: None,
            hosting_url: None,
            hosting_token: None,
            tenant_database_url: None,
            poll_interval: poller.interval,
            poll_max_attempts: poller.max_attempts,
            poll_max_duration: poller.max_duration,
            step_timeout: StepPolicy::default().timeout,
            http_timeout: Duration::from_secs(15),
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl ProvisioningConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let bind = match get(BIND) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidAddress {
                var: BIND,
                value: raw,
            })?,
            None => defaults.bind,
        };

        Ok(Self {
            merchant_registry_url: get(MERCHANT_REGISTRY_URL),
            billing_url: get(BILLING_URL),
            hosting_url: get(HOSTING_URL),
            hosting_token: get(HOSTING_TOKEN),
            tenant_database_url: get(TENANT_DATABASE_URL),
            poll_interval: positive(get(POLL_INTERVAL_MS), POLL_INTERVAL_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            poll_max_attempts: positive(get(POLL_MAX_ATTEMPTS), POLL_MAX_ATTEMPTS)?
                .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
                .unwrap_or(defaults.poll_max_attempts),
            poll_max_duration: positive(get(POLL_MAX_DURATION_SECS), POLL_MAX_DURATION_SECS)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_max_duration),
            step_timeout: positive(get(STEP_TIMEOUT_SECS), STEP_TIMEOUT_SECS)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.step_timeout),
            http_timeout: positive(get(HTTP_TIMEOUT_SECS), HTTP_TIMEOUT_SECS)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            bind,
        })
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            max_attempts: self.poll_max_attempts,
            max_duration: self.poll_max_duration,
        }
    }

    pub fn default_step_policy(&self) -> StepPolicy {
        StepPolicy::new(self.step_timeout)
    }
}

fn positive(raw: Option<String>, var: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::Zero { var }),
        Ok(n) => Ok(Some(n)),
        Err(_) => Err(ConfigError::InvalidNumber { var, value: raw }),
    }
}

impl ProvisioningClients {
    /// Real adapters for every configured service; in-memory for the rest.
    pub fn from_config(config: &ProvisioningConfig) -> anyhow::Result<Self> {
        let mut clients = ProvisioningClients::in_memory(Arc::new(InMemoryBackend::new()));

        let needs_http = config.merchant_registry_url.is_some()
            || config.billing_url.is_some()
            || config.hosting_url.is_some();
        if needs_http {
            let http = reqwest::Client::builder()
                .timeout(config.http_timeout)
                .build()
                .context("building HTTP client")?;

            if let Some(url) = &config.merchant_registry_url {
                clients.merchants = Arc::new(HttpMerchantRegistry::new(http.clone(), url));
                info!(url = %url, "merchant registry: http");
            }
            if let Some(url) = &config.billing_url {
                clients.billing = Arc::new(HttpBillingService::new(http.clone(), url));
                info!(url = %url, "billing service: http");
            }
            if let Some(url) = &config.hosting_url {
                clients.hosting = Arc::new(HttpHostingDeployer::new(
                    http,
                    url,
                    config.hosting_token.clone(),
                ));
                info!(url = %url, "hosting deployer: http");
            }
        }

        if let Some(url) = &config.tenant_database_url {
            let provisioner = PostgresDatabaseProvisioner::connect_lazy(url)
                .with_context(|| format!("invalid {TENANT_DATABASE_URL}"))?;
            clients.databases = Arc::new(provisioner);
            info!("database provisioner: postgres");
        }

        Ok(clients)
    }
}
