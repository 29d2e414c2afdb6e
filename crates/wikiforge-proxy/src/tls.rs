//! Certificate issuance through certbot.
//!
//! Issuance is domain-validated (HTTP-01): certbot must be able to reach
//! the domain, so the proxy route has to be live before `issue` is
//! called — the orchestrator sequences this. Failures are surfaced
//! as-is and never retried here; the ACME endpoint rate-limits
//! aggressively and retry policy belongs to the caller.
//!
//! The presence of a lineage directory under `cert_root` is the
//! ground truth for "a certificate exists": issue short-circuits on it,
//! revoke treats its absence as success.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use wikiforge_core::config::AcmeConfig;
use wikiforge_core::{AdapterError, AdapterResult, CertificateIssuer};

use crate::command;

/// Certbot-backed certificate issuer.
pub struct CertbotIssuer {
    certbot_cmd: Vec<String>,
    email: String,
    cert_root: PathBuf,
}

impl CertbotIssuer {
    pub fn new(config: &AcmeConfig) -> Self {
        Self {
            certbot_cmd: config.certbot_cmd.clone(),
            email: config.email.clone(),
            cert_root: config.cert_root.clone(),
        }
    }

    fn lineage_dir(&self, domain: &str) -> PathBuf {
        self.cert_root.join(domain)
    }
}

#[async_trait]
impl CertificateIssuer for CertbotIssuer {
    async fn issue(&self, domain: &str) -> AdapterResult<()> {
        if self.lineage_dir(domain).exists() {
            debug!(%domain, "certificate lineage already present");
            return Ok(());
        }

        let mut argv = self.certbot_cmd.clone();
        argv.extend(
            [
                "certonly",
                "--nginx",
                "-d",
                domain,
                "--non-interactive",
                "--agree-tos",
                "-m",
                &self.email,
            ]
            .map(String::from),
        );

        command::run(&argv).await.map_err(|e| match e {
            command::CommandError::Spawn(msg) => AdapterError::Unavailable(msg),
            failed => AdapterError::IssuanceFailed(failed.to_string()),
        })?;

        info!(%domain, "certificate issued");
        Ok(())
    }

    async fn revoke(&self, domain: &str) -> AdapterResult<()> {
        if !self.lineage_dir(domain).exists() {
            debug!(%domain, "certificate lineage already absent");
            return Ok(());
        }

        let mut argv = self.certbot_cmd.clone();
        argv.extend(["delete", "--cert-name", domain, "--non-interactive"].map(String::from));

        command::run(&argv).await.map_err(|e| match e {
            command::CommandError::Spawn(msg) => AdapterError::Unavailable(msg),
            failed => AdapterError::IssuanceFailed(format!("certificate removal: {failed}")),
        })?;

        info!(%domain, "certificate revoked");
        Ok(())
    }
}
