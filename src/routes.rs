//! HTTP API
//!
//! Route table, request validation, and the handlers that stitch the
//! template renderer, the Portainer client, and the Cloudflare client
//! together. Validation always runs before any downstream call.

use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::auth;
use crate::cloudflare::{
    default_proxied, normalize_service, qualify_hostname, qualify_record_name, strip_scheme,
    upsert_ingress, CloudflareClient, RecordType,
};
use crate::config::Config;
use crate::error::ApiError;
use crate::portainer::{PortainerClient, StackCreator};
use crate::templates::{self, WorkflowConfig, WorkflowRole};

/// Deadline for each individual stack-creation call in the workflow fan-out.
const CREATE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub portainer: Arc<PortainerClient>,
    pub cloudflare: Option<Arc<CloudflareClient>>,
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/stack", post(create_stack))
        .route("/api/stacks", get(list_stacks))
        .route("/api/cloudflare", post(upsert_dns))
        .route("/api/cloudflare/tunnel", post(register_ingress))
        .route("/api/auth/status", get(auth_status))
        .route("/api/auth/refresh", post(auth_refresh))
        .layer(middleware::from_fn_with_state(
            state.config.api_secret.clone(),
            auth::bearer_gate,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/api/tipos", get(kinds))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================
// Health & discovery (public)
// ============================================================

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "deploy-engine",
        "version": env!("CARGO_PKG_VERSION"),
        "session": state.portainer.session_status().await,
        "dns_configured": state.cloudflare.is_some(),
    }))
}

async fn kinds() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "kinds": ["redis", "workflow-automation"],
        "record_types": ["A", "AAAA", "CNAME"],
        "examples": {
            "redis": {
                "name": "acme", "kind": "redis",
                "network": "network_public", "port": 6379
            },
            "workflow-automation": {
                "name": "acme", "kind": "workflow-automation",
                "network": "network_public",
                "config": {
                    "db_host": "postgres.internal", "db_name": "workflows",
                    "db_password": "...", "cache_host": "redis.internal",
                    "cache_port": 6379, "cache_password": "...",
                    "image_version": "latest"
                }
            },
            "dns": { "subdomain": "app1", "tipo": "A", "ipServidor": "1.2.3.4" },
            "tunnel": { "hostname": "app1", "service": "backend:8080" }
        }
    }))
}

// ============================================================
// Stack orchestration
// ============================================================

#[derive(Debug, Deserialize)]
pub struct StackRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub network: String,
    pub port: Option<u32>,
    pub config: Option<StackConfigRequest>,
}

/// Raw workflow config as received; every field optional so validation can
/// answer with the taxonomy's `Validation` error instead of a decode failure.
#[derive(Debug, Default, Deserialize)]
pub struct StackConfigRequest {
    pub db_host: Option<String>,
    pub db_name: Option<String>,
    pub db_password: Option<String>,
    pub cache_host: Option<String>,
    pub cache_port: Option<u32>,
    pub cache_password: Option<String>,
    pub image_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum InstanceStatus {
    /// Create call confirmed by the orchestration manager.
    Created,
    /// Create call exceeded its deadline with no definitive answer; reported
    /// optimistically as submitted-unconfirmed, never as failed.
    Submitted,
    Failed,
}

#[derive(Debug, Serialize)]
struct InstanceOutcome {
    stack: String,
    status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn validate_redis_port(port: Option<u32>) -> Result<u16, ApiError> {
    let port = port.unwrap_or(6379);
    if (1024..=65535).contains(&port) {
        Ok(port as u16)
    } else {
        Err(ApiError::validation("port must be between 1024 and 65535"))
    }
}

fn validate_workflow_config(config: Option<&StackConfigRequest>) -> Result<WorkflowConfig, ApiError> {
    let config = config
        .ok_or_else(|| ApiError::validation("config is required for workflow-automation"))?;

    fn required(value: &Option<String>, field: &str) -> Result<String, ApiError> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::validation(format!("config.{field} is required")))
    }

    let cache_port = config
        .cache_port
        .ok_or_else(|| ApiError::validation("config.cache_port is required"))?;
    if !(1..=65535).contains(&cache_port) {
        return Err(ApiError::validation("config.cache_port must be a valid port"));
    }

    Ok(WorkflowConfig {
        db_host: required(&config.db_host, "db_host")?,
        db_name: required(&config.db_name, "db_name")?,
        db_password: required(&config.db_password, "db_password")?,
        cache_host: required(&config.cache_host, "cache_host")?,
        cache_port: cache_port as u16,
        cache_password: required(&config.cache_password, "cache_password")?,
        image_version: config
            .image_version
            .clone()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "latest".to_string()),
    })
}

fn require_field(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::validation(format!("{field} is required")))
    } else {
        Ok(())
    }
}

async fn create_stack(
    State(state): State<AppState>,
    Json(req): Json<StackRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_field(&req.name, "name")?;
    require_field(&req.kind, "kind")?;
    require_field(&req.network, "network")?;

    match req.kind.as_str() {
        "redis" => {
            let port = validate_redis_port(req.port)?;
            let descriptor = templates::redis_stack(&req.name, &req.network, port);
            let swarm_id = state.portainer.swarm_id().await?;

            let stack_name = format!("redis-{}-{}", req.name, port);
            let stack = state
                .portainer
                .create_stack(&stack_name, &descriptor, &swarm_id)
                .await?;

            Ok(Json(serde_json::json!({
                "success": true,
                "stacksCriadas": 1,
                "total": 1,
                "stackName": stack_name,
                "id": stack.id,
            })))
        }
        "workflow-automation" => {
            let config = validate_workflow_config(req.config.as_ref())?;
            let swarm_id = state.portainer.swarm_id().await?;

            let creations = WorkflowRole::ALL.iter().map(|&role| {
                create_workflow_instance(
                    state.portainer.as_ref(),
                    role,
                    &req.name,
                    &req.network,
                    &config,
                    &swarm_id,
                    CREATE_TIMEOUT,
                )
            });
            let outcomes: Vec<InstanceOutcome> = join_all(creations).await;
            let (success, created) = aggregate_outcomes(&outcomes);

            Ok(Json(serde_json::json!({
                "success": success,
                "stacksCriadas": created,
                "total": outcomes.len(),
                "stacks": outcomes,
            })))
        }
        other => Err(ApiError::UnsupportedKind(other.to_string())),
    }
}

/// Overall success requires at least one instance that did not fail outright;
/// `submitted` counts optimistically toward the created total, so a response
/// can never report `success` with zero instances counted.
fn aggregate_outcomes(outcomes: &[InstanceOutcome]) -> (bool, usize) {
    let created = outcomes
        .iter()
        .filter(|o| o.status != InstanceStatus::Failed)
        .count();
    (created >= 1, created)
}

/// One create call bounded by its own deadline. A timeout is reported as
/// `submitted`: the call may still land upstream and there is no
/// cancel/compensate path, so the response trades confirmation accuracy for
/// availability rather than hanging or guessing "failed".
async fn create_workflow_instance(
    creator: &dyn StackCreator,
    role: WorkflowRole,
    name: &str,
    network: &str,
    config: &WorkflowConfig,
    swarm_id: &str,
    deadline: Duration,
) -> InstanceOutcome {
    let stack_name = format!("{}-{}", role.prefix(), name);
    let descriptor = templates::workflow_stack(role, name, network, config);

    match tokio::time::timeout(
        deadline,
        creator.create_stack(&stack_name, &descriptor, swarm_id),
    )
    .await
    {
        Ok(Ok(stack)) => InstanceOutcome {
            stack: stack_name,
            status: InstanceStatus::Created,
            id: Some(stack.id),
            error: None,
        },
        Ok(Err(err)) => {
            warn!(%stack_name, %err, "stack creation failed");
            InstanceOutcome {
                stack: stack_name,
                status: InstanceStatus::Failed,
                id: None,
                error: Some(err.to_string()),
            }
        }
        Err(_) => {
            warn!(%stack_name, "stack creation unconfirmed after timeout");
            InstanceOutcome {
                stack: stack_name,
                status: InstanceStatus::Submitted,
                id: None,
                error: None,
            }
        }
    }
}

async fn list_stacks(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stacks = state.portainer.list_stacks().await?;
    Ok(Json(stacks))
}

// ============================================================
// DNS & tunnel
// ============================================================

#[derive(Debug, Deserialize)]
pub struct DnsRequest {
    #[serde(default)]
    pub subdomain: String,
    #[serde(default)]
    pub tipo: String,
    #[serde(default, rename = "ipServidor")]
    pub ip_servidor: String,
    pub proxied: Option<bool>,
}

fn cloudflare_client(state: &AppState) -> Result<&Arc<CloudflareClient>, ApiError> {
    state.cloudflare.as_ref().ok_or_else(|| {
        ApiError::validation(
            "cloudflare is not configured (set CLOUDFLARE_API_TOKEN and CLOUDFLARE_ZONE_ID)",
        )
    })
}

async fn upsert_dns(
    State(state): State<AppState>,
    Json(req): Json<DnsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_field(&req.subdomain, "subdomain")?;
    require_field(&req.tipo, "tipo")?;
    require_field(&req.ip_servidor, "ipServidor")?;

    let record_type = RecordType::parse(&req.tipo)
        .ok_or_else(|| ApiError::UnsupportedKind(req.tipo.clone()))?;

    let content = if record_type == RecordType::CNAME {
        strip_scheme(&req.ip_servidor).to_string()
    } else {
        req.ip_servidor.clone()
    };
    let proxied = req.proxied.unwrap_or_else(|| default_proxied(record_type));

    let cloudflare = cloudflare_client(&state)?;
    let name = qualify_record_name(&req.subdomain, &cloudflare.domain);
    let (action, record) = cloudflare
        .upsert_record(&name, record_type, &content, proxied)
        .await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "action": action,
        "name": record.name,
        "content": record.content,
        "proxied": record.proxied,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TunnelRequest {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub service: String,
}

async fn register_ingress(
    State(state): State<AppState>,
    Json(req): Json<TunnelRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_field(&req.hostname, "hostname")?;
    require_field(&req.service, "service")?;

    let hostname = qualify_hostname(&req.hostname, &state.config.base_domain);
    let service = normalize_service(&req.service);

    let cloudflare = cloudflare_client(&state)?;
    let current = cloudflare.tunnel_ingress().await?;
    let updated = upsert_ingress(current, &hostname, &service);
    let rule_count = updated.len();
    cloudflare.set_tunnel_ingress(updated).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "hostname": hostname,
        "service": service,
        "rules": rule_count,
    })))
}

// ============================================================
// Session endpoints
// ============================================================

async fn auth_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "session": state.portainer.session_status().await,
    }))
}

async fn auth_refresh(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = state.portainer.refresh_session().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "session": status,
    })))
}
