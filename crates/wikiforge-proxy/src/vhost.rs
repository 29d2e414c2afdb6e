//! nginx virtual-host configuration.
//!
//! Activation works in four phases: render to a staged file, atomically
//! rename into sites-available, symlink into sites-enabled, then run the
//! proxy's own validator. The reload signal is only sent after
//! validation passes; nginx re-reads configuration exclusively at
//! reload, so a failed validation leaves the running configuration
//! untouched — the staged artifacts are removed and the previous state
//! stands.
//!
//! The rendered block listens on port 80 only. Certificate issuance
//! (HTTP-01) has to reach the domain before any certificate exists;
//! certbot's nginx installer upgrades the block to TLS afterwards.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};

use wikiforge_core::config::ProxyConfig;
use wikiforge_core::{AdapterError, AdapterResult, ReverseProxy};

use crate::command;

/// File-based nginx configurator.
pub struct NginxProxy {
    sites_available: PathBuf,
    sites_enabled: PathBuf,
    validate_cmd: Vec<String>,
    reload_cmd: Vec<String>,
}

impl NginxProxy {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            sites_available: config.sites_available.clone(),
            sites_enabled: config.sites_enabled.clone(),
            validate_cmd: config.validate_cmd.clone(),
            reload_cmd: config.reload_cmd.clone(),
        }
    }

    fn site_file(domain: &str, port: u16) -> String {
        format!("{domain}_{port}.conf")
    }

    async fn remove_if_present(path: &Path) -> AdapterResult<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AdapterError::CreateFailed(format!(
                "remove {}: {e}",
                path.display()
            ))),
        }
    }
}

#[async_trait]
impl ReverseProxy for NginxProxy {
    async fn activate(&self, domain: &str, port: u16) -> AdapterResult<()> {
        fs::create_dir_all(&self.sites_available)
            .await
            .map_err(|e| AdapterError::CreateFailed(format!("sites-available: {e}")))?;
        fs::create_dir_all(&self.sites_enabled)
            .await
            .map_err(|e| AdapterError::CreateFailed(format!("sites-enabled: {e}")))?;

        let site = Self::site_file(domain, port);
        let staged = self.sites_available.join(format!("{site}.staged"));
        let rendered = self.sites_available.join(&site);
        let enabled = self.sites_enabled.join(&site);

        fs::write(&staged, render_server_block(domain, port))
            .await
            .map_err(|e| AdapterError::CreateFailed(format!("stage route config: {e}")))?;
        fs::rename(&staged, &rendered)
            .await
            .map_err(|e| AdapterError::CreateFailed(format!("activate route config: {e}")))?;

        // Re-activation replaces any stale link.
        Self::remove_if_present(&enabled).await?;
        fs::symlink(&rendered, &enabled)
            .await
            .map_err(|e| AdapterError::CreateFailed(format!("enable route: {e}")))?;

        if let Err(e) = command::run(&self.validate_cmd).await {
            // Discard the staged artifacts; no reload was issued, so the
            // running proxy still serves the previous configuration.
            if let Err(cleanup) = Self::remove_if_present(&enabled).await {
                warn!(%domain, port, error = %cleanup, "failed to discard staged symlink");
            }
            if let Err(cleanup) = Self::remove_if_present(&rendered).await {
                warn!(%domain, port, error = %cleanup, "failed to discard staged config");
            }
            return Err(match e {
                command::CommandError::Spawn(msg) => AdapterError::Unavailable(msg),
                failed => AdapterError::ConfigInvalid(failed.to_string()),
            });
        }

        command::run(&self.reload_cmd).await.map_err(|e| match e {
            command::CommandError::Spawn(msg) => AdapterError::Unavailable(msg),
            failed => AdapterError::Unavailable(failed.to_string()),
        })?;

        info!(%domain, port, "proxy route activated");
        Ok(())
    }

    async fn deactivate(&self, domain: &str, port: u16) -> AdapterResult<()> {
        let site = Self::site_file(domain, port);
        let removed_link = Self::remove_if_present(&self.sites_enabled.join(&site)).await?;
        let removed_conf = Self::remove_if_present(&self.sites_available.join(&site)).await?;

        if !removed_link && !removed_conf {
            debug!(%domain, port, "proxy route already absent");
            return Ok(());
        }

        command::run(&self.reload_cmd).await.map_err(|e| match e {
            command::CommandError::Spawn(msg) => AdapterError::Unavailable(msg),
            failed => AdapterError::Unavailable(failed.to_string()),
        })?;

        info!(%domain, port, "proxy route deactivated");
        Ok(())
    }

    async fn route_exists(&self, domain: &str, port: u16) -> AdapterResult<bool> {
        let enabled = self.sites_enabled.join(Self::site_file(domain, port));
        match fs::symlink_metadata(&enabled).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AdapterError::Unavailable(format!(
                "stat {}: {e}",
                enabled.display()
            ))),
        }
    }
}

/// Render the routing rule for one tenant domain.
fn render_server_block(domain: &str, port: u16) -> String {
    format!(
        r#"server {{
    listen 80;
    server_name {domain};

    location / {{
        proxy_pass http://127.0.0.1:{port};
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
    }}
}}
"#
    )
}
