//! Deployment Descriptor Templates
//!
//! Pure data-to-text rendering for the four workload kinds. No side effects:
//! the same inputs always yield byte-identical descriptors, which keeps these
//! functions golden-testable and re-deploys reproducible.
//!
//! All descriptors pin the same resource ceiling (1 CPU, 1024 MB). The
//! workflow descriptors add the queue/database wiring shared by the three
//! roles, a placement constraint on the `apps` node label, and a start-first
//! rolling-update policy with rollback.

use serde::Deserialize;
use sha2::{Digest, Sha256};

/// The three roles of a workflow-automation cluster. They share name,
/// network, and config; they differ in command and replica count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowRole {
    Editor,
    Webhook,
    Worker,
}

impl WorkflowRole {
    pub const ALL: [WorkflowRole; 3] =
        [WorkflowRole::Editor, WorkflowRole::Webhook, WorkflowRole::Worker];

    pub fn prefix(&self) -> &'static str {
        match self {
            WorkflowRole::Editor => "editor",
            WorkflowRole::Webhook => "webhook",
            WorkflowRole::Worker => "worker",
        }
    }

    fn replicas(&self) -> u32 {
        match self {
            WorkflowRole::Editor => 1,
            WorkflowRole::Webhook | WorkflowRole::Worker => 2,
        }
    }

    /// Editor runs the default entrypoint; webhook and worker override it.
    fn command(&self) -> Option<&'static str> {
        match self {
            WorkflowRole::Editor => None,
            WorkflowRole::Webhook => Some("n8n webhook"),
            WorkflowRole::Worker => Some("n8n worker"),
        }
    }
}

/// Connection settings shared by the three workflow services.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    pub db_host: String,
    pub db_name: String,
    pub db_password: String,
    pub cache_host: String,
    pub cache_port: u16,
    pub cache_password: String,
    #[serde(default = "default_image_version")]
    pub image_version: String,
}

fn default_image_version() -> String {
    "latest".to_string()
}

/// Cache password derived from the stack name: first 24 hex chars of
/// SHA-256. Stable across calls, so re-deploying a stack keeps its password.
pub fn redis_password(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    hex::encode(digest)[..24].to_string()
}

/// Render the redis descriptor. Service `redis-{name}`, published `port`.
pub fn redis_stack(name: &str, network: &str, port: u16) -> String {
    let password = redis_password(name);
    format!(
        "version: \"3.7\"\n\
         \n\
         services:\n\
         \x20 redis-{name}:\n\
         \x20   image: redis:7-alpine\n\
         \x20   command: redis-server --requirepass {password} --appendonly yes\n\
         \x20   networks:\n\
         \x20     - {network}\n\
         \x20   ports:\n\
         \x20     - \"{port}:6379\"\n\
         \x20   deploy:\n\
         \x20     mode: replicated\n\
         \x20     replicas: 1\n\
         \x20     resources:\n\
         \x20       limits:\n\
         \x20         cpus: \"1\"\n\
         \x20         memory: 1024M\n\
         \n\
         networks:\n\
         \x20 {network}:\n\
         \x20   external: true\n"
    )
}

/// Render one workflow-automation role descriptor.
pub fn workflow_stack(
    role: WorkflowRole,
    name: &str,
    network: &str,
    config: &WorkflowConfig,
) -> String {
    let prefix = role.prefix();
    let replicas = role.replicas();
    let version = &config.image_version;
    let command_line = match role.command() {
        Some(cmd) => format!("    command: {cmd}\n"),
        None => String::new(),
    };

    format!(
        "version: \"3.7\"\n\
         \n\
         services:\n\
         \x20 {prefix}-{name}:\n\
         \x20   image: n8nio/n8n:{version}\n\
         {command_line}\
         \x20   networks:\n\
         \x20     - {network}\n\
         \x20   environment:\n\
         \x20     - DB_TYPE=postgresdb\n\
         \x20     - DB_POSTGRESDB_HOST={db_host}\n\
         \x20     - DB_POSTGRESDB_DATABASE={db_name}\n\
         \x20     - DB_POSTGRESDB_USER=postgres\n\
         \x20     - DB_POSTGRESDB_PASSWORD={db_password}\n\
         \x20     - EXECUTIONS_MODE=queue\n\
         \x20     - QUEUE_BULL_REDIS_HOST={cache_host}\n\
         \x20     - QUEUE_BULL_REDIS_PORT={cache_port}\n\
         \x20     - QUEUE_BULL_REDIS_PASSWORD={cache_password}\n\
         \x20     - QUEUE_HEALTH_CHECK_ACTIVE=true\n\
         \x20     - N8N_DIAGNOSTICS_ENABLED=false\n\
         \x20     - N8N_PROTOCOL=https\n\
         \x20     - N8N_PORT=5678\n\
         \x20     - NODE_ENV=production\n\
         \x20     - GENERIC_TIMEZONE=America/Sao_Paulo\n\
         \x20     - EXECUTIONS_DATA_PRUNE=true\n\
         \x20     - EXECUTIONS_DATA_MAX_AGE=336\n\
         \x20   deploy:\n\
         \x20     mode: replicated\n\
         \x20     replicas: {replicas}\n\
         \x20     placement:\n\
         \x20       constraints:\n\
         \x20         - node.labels.apps == true\n\
         \x20     update_config:\n\
         \x20       parallelism: 1\n\
         \x20       delay: 30s\n\
         \x20       order: start-first\n\
         \x20       failure_action: rollback\n\
         \x20     resources:\n\
         \x20       limits:\n\
         \x20         cpus: \"1\"\n\
         \x20         memory: 1024M\n\
         \n\
         networks:\n\
         \x20 {network}:\n\
         \x20   external: true\n",
        db_host = config.db_host,
        db_name = config.db_name,
        db_password = config.db_password,
        cache_host = config.cache_host,
        cache_port = config.cache_port,
        cache_password = config.cache_password,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> WorkflowConfig {
        WorkflowConfig {
            db_host: "postgres.internal".into(),
            db_name: "workflows".into(),
            db_password: "pg-secret".into(),
            cache_host: "redis.internal".into(),
            cache_port: 6379,
            cache_password: "cache-secret".into(),
            image_version: "1.64.0".into(),
        }
    }

    #[test]
    fn redis_password_is_deterministic() {
        assert_eq!(redis_password("acme"), redis_password("acme"));
        assert_eq!(redis_password("acme"), "822b33ad87c148a0a20a5ba7");
        assert_ne!(redis_password("acme"), redis_password("other"));
    }

    #[test]
    fn redis_stack_golden() {
        let rendered = redis_stack("acme", "network_public", 6380);
        let expected = "\
version: \"3.7\"

services:
  redis-acme:
    image: redis:7-alpine
    command: redis-server --requirepass 822b33ad87c148a0a20a5ba7 --appendonly yes
    networks:
      - network_public
    ports:
      - \"6380:6379\"
    deploy:
      mode: replicated
      replicas: 1
      resources:
        limits:
          cpus: \"1\"
          memory: 1024M

networks:
  network_public:
    external: true
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn rendering_is_byte_identical_across_calls() {
        let cfg = sample_config();
        assert_eq!(
            redis_stack("acme", "network_public", 6380),
            redis_stack("acme", "network_public", 6380)
        );
        assert_eq!(
            workflow_stack(WorkflowRole::Worker, "acme", "net", &cfg),
            workflow_stack(WorkflowRole::Worker, "acme", "net", &cfg)
        );
    }

    #[test]
    fn workflow_roles_differ_only_in_service_command_and_replicas() {
        let cfg = sample_config();
        let editor = workflow_stack(WorkflowRole::Editor, "acme", "net", &cfg);
        let webhook = workflow_stack(WorkflowRole::Webhook, "acme", "net", &cfg);
        let worker = workflow_stack(WorkflowRole::Worker, "acme", "net", &cfg);

        assert!(editor.contains("  editor-acme:"));
        assert!(!editor.contains("command:"));
        assert!(editor.contains("replicas: 1"));

        assert!(webhook.contains("  webhook-acme:"));
        assert!(webhook.contains("command: n8n webhook"));
        assert!(webhook.contains("replicas: 2"));

        assert!(worker.contains("  worker-acme:"));
        assert!(worker.contains("command: n8n worker"));
        assert!(worker.contains("replicas: 2"));
    }

    #[test]
    fn workflow_stack_embeds_wiring_and_policies() {
        let cfg = sample_config();
        let rendered = workflow_stack(WorkflowRole::Editor, "acme", "network_public", &cfg);

        assert!(rendered.contains("image: n8nio/n8n:1.64.0"));
        assert!(rendered.contains("DB_POSTGRESDB_HOST=postgres.internal"));
        assert!(rendered.contains("DB_POSTGRESDB_DATABASE=workflows"));
        assert!(rendered.contains("QUEUE_BULL_REDIS_HOST=redis.internal"));
        assert!(rendered.contains("QUEUE_BULL_REDIS_PORT=6379"));
        assert!(rendered.contains("node.labels.apps == true"));
        assert!(rendered.contains("order: start-first"));
        assert!(rendered.contains("delay: 30s"));
        assert!(rendered.contains("failure_action: rollback"));
        assert!(rendered.contains("cpus: \"1\""));
        assert!(rendered.contains("memory: 1024M"));
        assert!(rendered.contains("- network_public"));
    }

    #[test]
    fn image_version_defaults_to_latest() {
        let cfg: WorkflowConfig = serde_json::from_value(serde_json::json!({
            "db_host": "h", "db_name": "d", "db_password": "p",
            "cache_host": "c", "cache_port": 6379, "cache_password": "s"
        }))
        .unwrap();
        assert_eq!(cfg.image_version, "latest");
    }
}
