//! Environment Configuration
//!
//! All settings come from the environment. Portainer credentials are
//! mandatory and their absence aborts startup; the Cloudflare block is
//! optional and collapses to `None` when token or zone are missing, in which
//! case the DNS and tunnel endpoints answer with a client error.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Listening port (`PORT`, default 3000).
    pub port: u16,
    /// Orchestration-manager base URL, e.g. `https://portainer.example.com`.
    pub portainer_url: String,
    pub portainer_username: String,
    pub portainer_password: String,
    /// Endpoint whose swarm receives the stacks (`PORTAINER_ENDPOINT_ID`, default 1).
    pub portainer_endpoint_id: u32,
    /// Shared secret for the inbound bearer gate. Unset means the gate is open.
    pub api_secret: Option<String>,
    /// Appended to bare tunnel hostnames.
    pub base_domain: String,
    pub cloudflare: Option<CloudflareConfig>,
}

#[derive(Debug, Clone)]
pub struct CloudflareConfig {
    pub api_token: String,
    pub zone_id: String,
    /// Zone apex used to qualify DNS subdomains.
    pub domain: String,
    /// Account/tunnel pair for ingress registration; `None` disables the
    /// tunnel endpoint only.
    pub account_id: Option<String>,
    pub tunnel_id: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid port number")?;

        let portainer_url = env::var("PORTAINER_URL")
            .context("PORTAINER_URL must be set")?
            .trim_end_matches('/')
            .to_string();
        let portainer_username =
            env::var("PORTAINER_USERNAME").context("PORTAINER_USERNAME must be set")?;
        let portainer_password =
            env::var("PORTAINER_PASSWORD").context("PORTAINER_PASSWORD must be set")?;
        let portainer_endpoint_id = env::var("PORTAINER_ENDPOINT_ID")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .context("PORTAINER_ENDPOINT_ID must be a number")?;

        let base_domain = env::var("BASE_DOMAIN").unwrap_or_else(|_| "example.com".to_string());

        let cloudflare = match (env::var("CLOUDFLARE_API_TOKEN"), env::var("CLOUDFLARE_ZONE_ID")) {
            (Ok(api_token), Ok(zone_id)) => Some(CloudflareConfig {
                api_token,
                zone_id,
                domain: env::var("CLOUDFLARE_DOMAIN").unwrap_or_else(|_| base_domain.clone()),
                account_id: env::var("CLOUDFLARE_ACCOUNT_ID").ok(),
                tunnel_id: env::var("CLOUDFLARE_TUNNEL_ID").ok(),
            }),
            _ => None,
        };

        Ok(Self {
            port,
            portainer_url,
            portainer_username,
            portainer_password,
            portainer_endpoint_id,
            api_secret: env::var("API_SECRET").ok().filter(|s| !s.is_empty()),
            base_domain,
            cloudflare,
        })
    }
}
