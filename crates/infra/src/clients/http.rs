//! HTTP adapters (reqwest) for the merchant registry, billing service and
//! hosting deployer.
//!
//! All three speak JSON. Non-2xx responses are mapped to `ClientError` by the
//! `error` code in the body when present, by status code otherwise.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use shopforge_core::{
    DeploymentId, MerchantEmail, MerchantId, MerchantName, MerchantStatus, PlanId, SubscriptionId,
};
use shopforge_saga::DeploymentStatus;

use super::{
    BillingService, ClientError, ClientResult, DeploymentCreated, DeploymentRequest,
    DeploymentStatusReport, HostingDeployer, MerchantRegistry,
};

/// Base URL + optional bearer token shared by the adapters.
#[derive(Debug, Clone)]
struct Endpoint {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl Endpoint {
    fn new(client: reqwest::Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<R> {
        let req = self.authorize(self.client.post(self.url(path)).json(body));
        decode(send(req).await?).await
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> ClientResult<R> {
        let req = self.authorize(self.client.get(self.url(path)));
        decode(send(req).await?).await
    }

    async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ClientResult<()> {
        let req = self.authorize(self.client.put(self.url(path)).json(body));
        let resp = send(req).await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(resp).await)
        }
    }
}

async fn send(req: RequestBuilder) -> ClientResult<Response> {
    req.send().await.map_err(|e| {
        if e.is_timeout() {
            ClientError::Unavailable(format!("request timed out: {e}"))
        } else {
            ClientError::Transport(e.to_string())
        }
    })
}

async fn decode<R: DeserializeOwned>(resp: Response) -> ClientResult<R> {
    if !resp.status().is_success() {
        return Err(error_from_response(resp).await);
    }
    resp.json::<R>()
        .await
        .map_err(|e| ClientError::Transport(format!("invalid response body: {e}")))
}

async fn error_from_response(resp: Response) -> ClientError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    classify_error(status, &body)
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Map a failed response to a `ClientError`.
fn classify_error(status: StatusCode, body: &str) -> ClientError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .filter(|m| !m.is_empty())
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .unwrap_or_else(|| status.to_string());

    let by_code = parsed.error.as_deref().and_then(|code| {
        match code.to_ascii_lowercase().as_str() {
            "plan_not_found" => Some(ClientError::PlanNotFound(message.clone())),
            "subdomain_taken" => Some(ClientError::SubdomainTaken(message.clone())),
            "quota_exceeded" => Some(ClientError::QuotaExceeded(message.clone())),
            "conflict" => Some(ClientError::Conflict(message.clone())),
            "validation" | "validation_error" => Some(ClientError::Validation(message.clone())),
            _ => None,
        }
    });
    if let Some(err) = by_code {
        return err;
    }

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::NOT_FOUND => {
            ClientError::Validation(message)
        }
        StatusCode::CONFLICT => ClientError::Conflict(message),
        StatusCode::INSUFFICIENT_STORAGE | StatusCode::PAYMENT_REQUIRED => {
            ClientError::QuotaExceeded(message)
        }
        _ => ClientError::Unavailable(format!("{status}: {message}")),
    }
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: Uuid,
}

// ─────────────────────────────────────────────────────────────────────────────
// Merchant registry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpMerchantRegistry {
    endpoint: Endpoint,
}

impl HttpMerchantRegistry {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            endpoint: Endpoint::new(client, base_url, None),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateMerchantBody<'a> {
    name: &'a str,
    email: &'a str,
    status: &'a str,
}

#[async_trait]
impl MerchantRegistry for HttpMerchantRegistry {
    #[instrument(skip_all, fields(email = %email), err)]
    async fn create_merchant(
        &self,
        name: &MerchantName,
        email: &MerchantEmail,
        initial_status: MerchantStatus,
    ) -> ClientResult<MerchantId> {
        let body = CreateMerchantBody {
            name: name.as_str(),
            email: email.as_str(),
            status: initial_status.as_str(),
        };
        let created: IdResponse = self.endpoint.post("/merchants", &body).await?;
        Ok(MerchantId::from_uuid(created.id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Billing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpBillingService {
    endpoint: Endpoint,
}

impl HttpBillingService {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            endpoint: Endpoint::new(client, base_url, None),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateSubscriptionBody<'a> {
    merchant_id: Uuid,
    plan_id: &'a str,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
}

#[async_trait]
impl BillingService for HttpBillingService {
    #[instrument(skip_all, fields(merchant_id = %merchant_id, plan_id = %plan_id), err)]
    async fn create_subscription(
        &self,
        merchant_id: MerchantId,
        plan_id: &PlanId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> ClientResult<SubscriptionId> {
        let body = CreateSubscriptionBody {
            merchant_id: *merchant_id.as_uuid(),
            plan_id: plan_id.as_str(),
            period_start,
            period_end,
        };
        let created: IdResponse = self.endpoint.post("/subscriptions", &body).await?;
        Ok(SubscriptionId::from_uuid(created.id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hosting deployer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpHostingDeployer {
    endpoint: Endpoint,
}

impl HttpHostingDeployer {
    pub fn new(client: reqwest::Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            endpoint: Endpoint::new(client, base_url, token),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateDeploymentBody<'a> {
    merchant_id: Uuid,
    merchant_name: &'a str,
    merchant_email: &'a str,
    database_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subdomain: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreateDeploymentResponse {
    #[serde(alias = "deploymentId", alias = "id")]
    deployment_id: String,
    #[serde(default)]
    url: Option<String>,
    status: String,
    #[serde(default, alias = "dnsInstructions")]
    dns_instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct EnvVar<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct ConfigureEnvironmentBody<'a> {
    variables: Vec<EnvVar<'a>>,
}

#[async_trait]
impl HostingDeployer for HttpHostingDeployer {
    #[instrument(skip_all, fields(merchant_id = %request.merchant_id), err)]
    async fn create_deployment(
        &self,
        request: &DeploymentRequest,
    ) -> ClientResult<DeploymentCreated> {
        let body = CreateDeploymentBody {
            merchant_id: *request.merchant_id.as_uuid(),
            merchant_name: request.merchant_name.as_str(),
            merchant_email: request.merchant_email.as_str(),
            database_name: request.database_name.as_str(),
            subdomain: request.custom_subdomain.as_ref().map(|s| s.as_str()),
        };
        let created: CreateDeploymentResponse = self.endpoint.post("/deployments", &body).await?;
        let deployment_id = DeploymentId::parse(&created.deployment_id)
            .map_err(|e| ClientError::Transport(format!("deployer returned {e}")))?;
        Ok(DeploymentCreated {
            deployment_id,
            url: created.url,
            status: DeploymentStatus::parse(&created.status),
            dns_instructions: created.dns_instructions,
        })
    }

    async fn get_deployment_status(
        &self,
        deployment_id: &DeploymentId,
    ) -> ClientResult<DeploymentStatusReport> {
        let report: StatusResponse = self
            .endpoint
            .get(&format!("/deployments/{deployment_id}"))
            .await?;
        debug!(deployment_id = %deployment_id, status = %report.status, "deployment status");
        Ok(DeploymentStatusReport {
            status: DeploymentStatus::parse(&report.status),
            url: report.url,
        })
    }

    #[instrument(skip_all, fields(deployment_id = %deployment_id), err)]
    async fn configure_environment(
        &self,
        deployment_id: &DeploymentId,
        variables: &[(String, String)],
    ) -> ClientResult<()> {
        let body = ConfigureEnvironmentBody {
            variables: variables
                .iter()
                .map(|(key, value)| EnvVar { key, value })
                .collect(),
        };
        self.endpoint
            .put(&format!("/deployments/{deployment_id}/env"), &body)
            .await
    }
}
