//! Deploy Engine
//!
//! HTTP facade for creating Portainer stacks (redis or the three-service
//! workflow-automation cluster) and managing Cloudflare DNS records and
//! tunnel ingress rules.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use deploy_engine::cloudflare::CloudflareClient;
use deploy_engine::portainer::PortainerClient;
use deploy_engine::routes::{self, AppState};
use deploy_engine::Config;

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .json()
        .init();

    info!("Starting Deploy Engine");

    let config = Arc::new(Config::from_env().context("invalid configuration")?);

    let portainer = Arc::new(PortainerClient::new(&config)?);

    let cloudflare = match &config.cloudflare {
        Some(cf) => {
            info!(domain = %cf.domain, "Cloudflare client initialized");
            Some(Arc::new(CloudflareClient::new(cf)?))
        }
        None => {
            warn!("Cloudflare not configured, DNS and tunnel endpoints disabled");
            None
        }
    };

    // Eager login: rejected orchestration-manager credentials are fatal here,
    // recoverable on later requests.
    portainer
        .ensure_session()
        .await
        .context("startup authentication with the orchestration manager failed")?;
    info!("orchestration-manager session established");

    let state = AppState { config: config.clone(), portainer, cloudflare };
    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Deploy Engine listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
