//! wikiforge-core — shared contracts for the WikiForge control plane.
//!
//! Holds everything the orchestrator and its collaborators agree on:
//!
//! - `ForgeConfig`: process-wide configuration (`wikiforge.toml`)
//! - Resource naming: deterministic container/database/domain names
//! - The four outbound adapter traits (container runtime, database
//!   provisioner, reverse proxy, certificate issuer) and their shared
//!   error type
//!
//! Adapters are injected into the orchestrator as trait objects so tests
//! can substitute fakes; no crate in the workspace holds a module-level
//! singleton handle to an external system.

pub mod adapters;
pub mod config;
pub mod names;

pub use adapters::{
    AdapterError, AdapterResult, CertificateIssuer, ContainerRuntime, ContainerSpec,
    DatabaseProvisioner, ReverseProxy,
};
pub use config::{ConfigError, ForgeConfig, Retention};
pub use names::{InstanceNames, SlugError, validate_slug};
