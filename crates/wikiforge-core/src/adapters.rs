//! Outbound adapter contracts.
//!
//! Each external collaborator — container runtime, database engine,
//! reverse proxy, certificate authority — is reached through one narrow
//! trait. The orchestrator only ever holds `Arc<dyn Trait>`, so tests
//! substitute fakes and the daemon wires the real implementations.
//!
//! Teardown-direction operations (`stop_and_remove`, `drop_database`,
//! `deactivate`, `revoke`) are idempotent: absence of the resource is the
//! desired end state and reported as success, which keeps rollback safe
//! to retry.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by adapters, classified so the orchestrator can map
/// them onto its own taxonomy without inspecting message strings.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The external system itself cannot be reached.
    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    /// The resource already exists where it must not.
    #[error("resource conflict: {0}")]
    Conflict(String),

    /// The external system rejected the create operation.
    #[error("resource create failed: {0}")]
    CreateFailed(String),

    /// A rendered configuration failed the proxy's own validation.
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    /// The certificate authority declined issuance.
    #[error("certificate issuance failed: {0}")]
    IssuanceFailed(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Everything needed to start one workload container.
///
/// Assembled by the orchestrator from process-wide configuration plus the
/// derived per-instance names; the image and restart policy are fixed
/// configuration, never request input.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    /// Shared bridge network all instances attach to.
    pub network: String,
    /// Host port the workload is published on.
    pub host_port: u16,
    /// Port the workload listens on inside the container.
    pub container_port: u16,
    /// Optional host directory bound into the container.
    pub volume: Option<(PathBuf, String)>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create the shared instance network if it does not exist yet.
    async fn ensure_network(&self) -> AdapterResult<()>;

    /// Start a container. Fails with [`AdapterError::Conflict`] if a
    /// running container of the same name already exists.
    async fn start(&self, spec: &ContainerSpec) -> AdapterResult<()>;

    /// Stop and remove a container by name. Absence is success.
    async fn stop_and_remove(&self, name: &str) -> AdapterResult<()>;

    /// Whether a container of this name exists (any state).
    async fn exists(&self, name: &str) -> AdapterResult<bool>;
}

#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    /// Create a tenant database.
    async fn create_database(&self, name: &str) -> AdapterResult<()>;

    /// Drop a tenant database. Absence is success.
    async fn drop_database(&self, name: &str) -> AdapterResult<()>;

    async fn database_exists(&self, name: &str) -> AdapterResult<bool>;
}

#[async_trait]
pub trait ReverseProxy: Send + Sync {
    /// Render, validate, and atomically activate the route for
    /// `(domain, port)`. The previously active configuration is untouched
    /// if validation fails.
    async fn activate(&self, domain: &str, port: u16) -> AdapterResult<()>;

    /// Remove the route and reload. Absence is success.
    async fn deactivate(&self, domain: &str, port: u16) -> AdapterResult<()>;

    async fn route_exists(&self, domain: &str, port: u16) -> AdapterResult<bool>;
}

#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Obtain a certificate for the domain. The domain's proxy route must
    /// already be live — issuance validates ownership by reaching it.
    /// Not retried automatically (external rate limits).
    async fn issue(&self, domain: &str) -> AdapterResult<()>;

    /// Revoke and delete the certificate. Absence is success.
    async fn revoke(&self, domain: &str) -> AdapterResult<()>;
}
