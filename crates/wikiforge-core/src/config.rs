//! wikiforge.toml configuration parser.
//!
//! Every section has defaults, so a partial (or absent) file is valid.
//! Credentials for the administrative PostgreSQL connection and the
//! per-container Wiki.js bootstrap are process-wide configuration; nothing
//! here is derived from tenant requests.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub server: ServerConfig,
    pub ports: PortRangeConfig,
    pub docker: DockerConfig,
    pub database: DatabaseConfig,
    pub wiki: WikiConfig,
    pub proxy: ProxyConfig,
    pub acme: AcmeConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the control-plane API listens on.
    pub listen_port: u16,
    /// Directory for the instance registry database.
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: 8088,
            data_dir: PathBuf::from("/var/lib/wikiforge"),
        }
    }
}

/// Host port range instances are allocated from: `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRangeConfig {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRangeConfig {
    fn default() -> Self {
        Self {
            start: 8001,
            end: 9000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Workload image. Fixed configuration, never request input.
    pub image: String,
    /// Shared bridge network all instances attach to.
    pub network: String,
    /// Root directory for per-instance data volumes.
    pub volume_root: PathBuf,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: "requarks/wiki:2".to_string(),
            network: "wikinet".to_string(),
            volume_root: PathBuf::from("/var/lib/wikiforge/volumes"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Administrative connection URL (CREATE/DROP DATABASE privileges).
    pub admin_url: String,
    /// Database host as seen from inside a workload container.
    pub wiki_db_host: String,
    pub wiki_db_port: u16,
    pub wiki_db_user: String,
    pub wiki_db_password: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            admin_url: "postgres://postgres@localhost:5432/postgres".to_string(),
            wiki_db_host: "db".to_string(),
            wiki_db_port: 5432,
            wiki_db_user: "wiki".to_string(),
            wiki_db_password: String::new(),
        }
    }
}

/// Bootstrap credentials injected into every new Wiki.js instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WikiConfig {
    pub admin_email: String,
    pub admin_password: String,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            admin_email: "admin@example.com".to_string(),
            admin_password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub sites_available: PathBuf,
    pub sites_enabled: PathBuf,
    /// Argv that validates the full proxy configuration (exit 0 == valid).
    pub validate_cmd: Vec<String>,
    /// Argv that signals the proxy to reload its configuration.
    pub reload_cmd: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            sites_available: PathBuf::from("/etc/nginx/sites-available"),
            sites_enabled: PathBuf::from("/etc/nginx/sites-enabled"),
            validate_cmd: vec!["nginx".to_string(), "-t".to_string()],
            reload_cmd: vec![
                "systemctl".to_string(),
                "reload".to_string(),
                "nginx".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcmeConfig {
    /// When false the certificate step is skipped (local development).
    pub enabled: bool,
    /// Certbot binary (argv prefix; flags are appended by the issuer).
    pub certbot_cmd: Vec<String>,
    /// Account email for issuance.
    pub email: String,
    /// Directory holding one lineage directory per issued domain.
    pub cert_root: PathBuf,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            certbot_cmd: vec!["certbot".to_string()],
            email: "admin@example.com".to_string(),
            cert_root: PathBuf::from("/etc/letsencrypt/live"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Suffix for tenant domains: `{slug}.{base_domain}`.
    pub base_domain: String,
    /// Advisory overall pipeline deadline, checked between steps.
    pub pipeline_deadline_secs: u64,
    /// What happens to the registry record after a successful teardown.
    pub retention: Retention,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_domain: "example.com".to_string(),
            pipeline_deadline_secs: 600,
            retention: Retention::Keep,
        }
    }
}

/// Registry record retention after teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Keep the record with status `Removed`.
    #[default]
    Keep,
    /// Hard-delete the record once teardown succeeds.
    Purge,
}

impl ForgeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
