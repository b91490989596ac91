//! Portainer API Client
//!
//! Orchestration-manager REST wrapper: login, swarm lookup, stack
//! create/list. Every protected call obtains a token from the session cache,
//! attaches it as a bearer credential, and routes the response through one
//! checkpoint: a 401 invalidates the cache and surfaces
//! `AuthorizationExpired` (no in-call retry; the next call re-authenticates).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ApiError;
use crate::session::{Authenticator, SessionCache, SessionStatus};

pub struct PortainerClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    endpoint_id: u32,
    session: SessionCache,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    jwt: String,
}

#[derive(Debug, Deserialize)]
struct SwarmInfo {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateStackRequest<'a> {
    name: &'a str,
    #[serde(rename = "stackFileContent")]
    stack_file_content: &'a str,
    #[serde(rename = "swarmID")]
    swarm_id: &'a str,
    env: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSummary {
    #[serde(rename = "Id")]
    pub id: u64,
    #[serde(rename = "Name")]
    pub name: String,
}

/// Seam over stack creation, mirroring the `Authenticator` seam on the
/// session cache: the workflow fan-out is written against this trait so its
/// outcome mapping can be exercised with fakes.
#[async_trait]
pub trait StackCreator: Send + Sync {
    async fn create_stack(
        &self,
        name: &str,
        descriptor: &str,
        swarm_id: &str,
    ) -> Result<StackSummary, ApiError>;
}

#[async_trait]
impl StackCreator for PortainerClient {
    async fn create_stack(
        &self,
        name: &str,
        descriptor: &str,
        swarm_id: &str,
    ) -> Result<StackSummary, ApiError> {
        PortainerClient::create_stack(self, name, descriptor, swarm_id).await
    }
}

impl PortainerClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.portainer_url.clone(),
            username: config.portainer_username.clone(),
            password: config.portainer_password.clone(),
            endpoint_id: config.portainer_endpoint_id,
            session: SessionCache::new(),
        })
    }

    async fn token(&self) -> Result<String, ApiError> {
        self.session.token(self).await
    }

    /// Single checkpoint for authenticated responses. 401 clears the session
    /// slot so the next call logs in again.
    async fn checked(&self, response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status() == StatusCode::UNAUTHORIZED {
            self.session.invalidate().await;
            return Err(ApiError::AuthorizationExpired);
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream { status: status.as_u16(), body });
        }
        Ok(response)
    }

    /// Resolve the cluster (swarm) identifier for the configured endpoint.
    pub async fn swarm_id(&self) -> Result<String, ApiError> {
        let token = self.token().await?;
        let url = format!(
            "{}/api/endpoints/{}/docker/swarm",
            self.base_url, self.endpoint_id
        );
        debug!(%url, "resolving swarm id");

        let response = self.http.get(&url).bearer_auth(&token).send().await?;
        let swarm: SwarmInfo = self.checked(response).await?.json().await?;
        Ok(swarm.id)
    }

    /// Create one stack from a rendered descriptor.
    pub async fn create_stack(
        &self,
        name: &str,
        descriptor: &str,
        swarm_id: &str,
    ) -> Result<StackSummary, ApiError> {
        let token = self.token().await?;
        let url = format!(
            "{}/api/stacks/create/swarm/string?endpointId={}",
            self.base_url, self.endpoint_id
        );
        let body = CreateStackRequest {
            name,
            stack_file_content: descriptor,
            swarm_id,
            env: Vec::new(),
        };
        info!(%name, "creating stack");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        let stack: StackSummary = self.checked(response).await?.json().await?;
        Ok(stack)
    }

    /// Passthrough of the orchestration manager's stack list.
    pub async fn list_stacks(&self) -> Result<serde_json::Value, ApiError> {
        let token = self.token().await?;
        let url = format!("{}/api/stacks", self.base_url);

        let response = self.http.get(&url).bearer_auth(&token).send().await?;
        let stacks = self.checked(response).await?.json().await?;
        Ok(stacks)
    }

    pub async fn session_status(&self) -> SessionStatus {
        self.session.status().await
    }

    /// Eager login, used at startup and by `/api/auth/refresh` after an
    /// explicit invalidation.
    pub async fn ensure_session(&self) -> Result<String, ApiError> {
        self.token().await
    }

    /// Force renewal: drop the cached credential and log in again.
    pub async fn refresh_session(&self) -> Result<SessionStatus, ApiError> {
        self.session.invalidate().await;
        self.token().await?;
        Ok(self.session.status().await)
    }
}

#[async_trait]
impl Authenticator for PortainerClient {
    async fn login(&self) -> Result<String, ApiError> {
        let url = format!("{}/api/auth", self.base_url);
        let body = LoginRequest { username: &self.username, password: &self.password };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Authentication(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ApiError::Authentication(format!(
                "login rejected ({status}): {detail}"
            )));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Authentication(e.to_string()))?;
        info!("authenticated with the orchestration manager");
        Ok(login.jwt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> PortainerClient {
        let config = Config {
            port: 3000,
            portainer_url: "http://portainer.test".into(),
            portainer_username: "admin".into(),
            portainer_password: "secret".into(),
            portainer_endpoint_id: 1,
            api_secret: None,
            base_domain: "example.com".into(),
            cloudflare: None,
        };
        PortainerClient::new(&config).unwrap()
    }

    fn fake_response(status: u16, body: &str) -> reqwest::Response {
        let http_response = axum::http::Response::builder()
            .status(status)
            .body(body.to_string())
            .unwrap();
        reqwest::Response::from(http_response)
    }

    #[tokio::test]
    async fn unauthorized_response_invalidates_the_session() {
        let client = client();

        let err = client.checked(fake_response(401, "denied")).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthorizationExpired));
        assert_eq!(client.session_status().await, SessionStatus::Absent);
    }

    #[tokio::test]
    async fn other_failures_surface_upstream_status_and_body() {
        let client = client();

        let err = client.checked(fake_response(500, "swarm down")).await.unwrap_err();
        match err {
            ApiError::Upstream { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "swarm down");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_response_passes_through() {
        let client = client();
        let response = client.checked(fake_response(200, "{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
