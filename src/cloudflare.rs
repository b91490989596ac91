//! Cloudflare API Client
//!
//! DNS record upsert (lookup, then exactly one of update-in-place or create)
//! and tunnel ingress registration (fetch the rule list, rewrite it as a pure
//! function, push the whole list back). Uses the v4 REST API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::CloudflareConfig;
use crate::error::ApiError;

const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Supported DNS record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    #[allow(clippy::upper_case_acronyms)]
    AAAA,
    #[allow(clippy::upper_case_acronyms)]
    CNAME,
}

impl RecordType {
    pub fn parse(s: &str) -> Option<RecordType> {
        match s.to_uppercase().as_str() {
            "A" => Some(RecordType::A),
            "AAAA" => Some(RecordType::AAAA),
            "CNAME" => Some(RecordType::CNAME),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::CNAME => write!(f, "CNAME"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub content: String,
    pub ttl: u32,
    pub proxied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsRecordRequest {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub name: String,
    pub content: String,
    pub ttl: u32,
    pub proxied: bool,
}

/// Which half of the upsert was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsAction {
    Created,
    Updated,
}

/// One tunnel ingress rule. The catch-all rule has no hostname and must stay
/// last in the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub service: String,
    #[serde(
        default,
        rename = "originRequest",
        skip_serializing_if = "Option::is_none"
    )]
    pub origin_request: Option<serde_json::Value>,
}

impl IngressRule {
    pub fn new(hostname: &str, service: &str) -> Self {
        Self {
            hostname: Some(hostname.to_string()),
            service: service.to_string(),
            origin_request: None,
        }
    }

    pub fn catch_all() -> Self {
        Self { hostname: None, service: "http_status:404".to_string(), origin_request: None }
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TunnelConfiguration {
    config: TunnelConfigBody,
}

#[derive(Debug, Serialize, Deserialize)]
struct TunnelConfigBody {
    #[serde(default)]
    ingress: Vec<IngressRule>,
}

// ============================================================
// Pure helpers (unit-tested without a network)
// ============================================================

/// Proxying defaults on, except CNAME targets which default to DNS-only.
pub fn default_proxied(record_type: RecordType) -> bool {
    record_type != RecordType::CNAME
}

/// Drop a leading URI scheme from a CNAME target (`https://foo.bar` -> `foo.bar`).
pub fn strip_scheme(target: &str) -> &str {
    match target.find("://") {
        Some(idx) => &target[idx + 3..],
        None => target,
    }
}

/// Fully qualify a DNS subdomain against the zone apex.
pub fn qualify_record_name(subdomain: &str, domain: &str) -> String {
    if subdomain == domain || subdomain.ends_with(&format!(".{domain}")) {
        subdomain.to_string()
    } else {
        format!("{subdomain}.{domain}")
    }
}

/// Fully qualify a tunnel hostname: a name with fewer than two dots gets the
/// base domain appended.
pub fn qualify_hostname(hostname: &str, base_domain: &str) -> String {
    if hostname.matches('.').count() >= 2 {
        hostname.to_string()
    } else {
        format!("{hostname}.{base_domain}")
    }
}

/// Ensure the origin service carries a scheme, defaulting to plain HTTP.
pub fn normalize_service(service: &str) -> String {
    if service.contains("://") {
        service.to_string()
    } else {
        format!("http://{service}")
    }
}

/// Rewrite the ingress list: remove any rule for `hostname`, append the new
/// rule, and keep the catch-all last (adding a default one if none existed).
///
/// Invariants after the rewrite: hostname rules precede the catch-all, at
/// most one rule per hostname, exactly one catch-all.
pub fn upsert_ingress(rules: Vec<IngressRule>, hostname: &str, service: &str) -> Vec<IngressRule> {
    let mut out = Vec::with_capacity(rules.len() + 2);
    let mut catch_all: Option<IngressRule> = None;

    for rule in rules {
        match rule.hostname.as_deref() {
            Some(h) if h == hostname => {} // replaced by the new rule below
            Some(_) => out.push(rule),
            None => {
                catch_all.get_or_insert(rule);
            }
        }
    }

    out.push(IngressRule::new(hostname, service));
    out.push(catch_all.unwrap_or_else(IngressRule::catch_all));
    out
}

// ============================================================
// Client
// ============================================================

/// Cloudflare DNS + tunnel client.
pub struct CloudflareClient {
    http: Client,
    api_token: String,
    zone_id: String,
    /// Zone apex used to qualify subdomains.
    pub domain: String,
    account_id: Option<String>,
    tunnel_id: Option<String>,
}

impl CloudflareClient {
    pub fn new(config: &CloudflareConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_token: config.api_token.clone(),
            zone_id: config.zone_id.clone(),
            domain: config.domain.clone(),
            account_id: config.account_id.clone(),
            tunnel_id: config.tunnel_id.clone(),
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream { status: status.as_u16(), body });
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        if !envelope.success {
            let joined: Vec<String> =
                envelope.errors.into_iter().map(|e| e.message).collect();
            return Err(ApiError::Upstream {
                status: status.as_u16(),
                body: joined.join(", "),
            });
        }

        envelope.result.ok_or_else(|| ApiError::Upstream {
            status: status.as_u16(),
            body: "empty result in Cloudflare response".to_string(),
        })
    }

    /// Look up the record matching the fully-qualified name and type.
    pub async fn find_record(
        &self,
        name: &str,
        record_type: RecordType,
    ) -> Result<Option<DnsRecord>, ApiError> {
        let url = format!(
            "{CLOUDFLARE_API_BASE}/zones/{}/dns_records?name={name}&type={record_type}",
            self.zone_id
        );
        debug!(%name, %record_type, "looking up DNS record");

        let response = self.http.get(&url).bearer_auth(&self.api_token).send().await?;
        let records: Vec<DnsRecord> = self.decode(response).await?;
        Ok(records.into_iter().next())
    }

    async fn create_record(&self, request: &DnsRecordRequest) -> Result<DnsRecord, ApiError> {
        let url = format!("{CLOUDFLARE_API_BASE}/zones/{}/dns_records", self.zone_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(request)
            .send()
            .await?;
        self.decode(response).await
    }

    async fn update_record(
        &self,
        record_id: &str,
        request: &DnsRecordRequest,
    ) -> Result<DnsRecord, ApiError> {
        let url = format!(
            "{CLOUDFLARE_API_BASE}/zones/{}/dns_records/{record_id}",
            self.zone_id
        );
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.api_token)
            .json(request)
            .send()
            .await?;
        self.decode(response).await
    }

    /// Create the record if absent, update it in place otherwise. Exactly one
    /// of the two calls is issued.
    pub async fn upsert_record(
        &self,
        name: &str,
        record_type: RecordType,
        content: &str,
        proxied: bool,
    ) -> Result<(DnsAction, DnsRecord), ApiError> {
        upsert_with(self, name, record_type, content, proxied).await
    }

    fn tunnel_url(&self) -> Result<String, ApiError> {
        match (&self.account_id, &self.tunnel_id) {
            (Some(account), Some(tunnel)) => Ok(format!(
                "{CLOUDFLARE_API_BASE}/accounts/{account}/cfd_tunnel/{tunnel}/configurations"
            )),
            _ => Err(ApiError::validation(
                "tunnel is not configured (set CLOUDFLARE_ACCOUNT_ID and CLOUDFLARE_TUNNEL_ID)",
            )),
        }
    }

    /// Fetch the current tunnel ingress rule list.
    pub async fn tunnel_ingress(&self) -> Result<Vec<IngressRule>, ApiError> {
        let url = self.tunnel_url()?;
        let response = self.http.get(&url).bearer_auth(&self.api_token).send().await?;
        let configuration: TunnelConfiguration = self.decode(response).await?;
        Ok(configuration.config.ingress)
    }

    /// Full-replace the tunnel ingress rule list.
    pub async fn set_tunnel_ingress(&self, ingress: Vec<IngressRule>) -> Result<(), ApiError> {
        let url = self.tunnel_url()?;
        let body = TunnelConfiguration { config: TunnelConfigBody { ingress } };
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;
        let _: serde_json::Value = self.decode(response).await?;
        Ok(())
    }
}

/// Seam over the three record calls so the upsert decision can be tested
/// with a fake zone.
#[async_trait]
trait RecordOps: Send + Sync {
    async fn find(&self, name: &str, record_type: RecordType)
        -> Result<Option<DnsRecord>, ApiError>;
    async fn create(&self, request: &DnsRecordRequest) -> Result<DnsRecord, ApiError>;
    async fn update(
        &self,
        record_id: &str,
        request: &DnsRecordRequest,
    ) -> Result<DnsRecord, ApiError>;
}

#[async_trait]
impl RecordOps for CloudflareClient {
    async fn find(
        &self,
        name: &str,
        record_type: RecordType,
    ) -> Result<Option<DnsRecord>, ApiError> {
        self.find_record(name, record_type).await
    }

    async fn create(&self, request: &DnsRecordRequest) -> Result<DnsRecord, ApiError> {
        self.create_record(request).await
    }

    async fn update(
        &self,
        record_id: &str,
        request: &DnsRecordRequest,
    ) -> Result<DnsRecord, ApiError> {
        self.update_record(record_id, request).await
    }
}

/// Lookup, then exactly one of update-in-place or create. Never both, never
/// neither (barring upstream failure).
async fn upsert_with(
    ops: &dyn RecordOps,
    name: &str,
    record_type: RecordType,
    content: &str,
    proxied: bool,
) -> Result<(DnsAction, DnsRecord), ApiError> {
    let request = DnsRecordRequest {
        record_type,
        name: name.to_string(),
        content: content.to_string(),
        ttl: 1, // auto
        proxied,
    };

    match ops.find(name, record_type).await? {
        Some(existing) => {
            info!(%name, %content, "updating DNS record");
            let record = ops.update(&existing.id, &request).await?;
            Ok((DnsAction::Updated, record))
        }
        None => {
            info!(%name, %content, "creating DNS record");
            let record = ops.create(&request).await?;
            Ok((DnsAction::Created, record))
        }
    }
}
