//! wikiforge-orchestrator — the provisioning saga.
//!
//! Sequences the external side effects of one tenant deployment —
//! database, container, proxy route, certificate — into a strictly
//! ordered pipeline with a single compensation routine that undoes
//! completed steps in reverse order when anything fails. Owns the
//! instance state machine and the host-port reservation set.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!   ├── InstanceRegistry (durable records, uniqueness invariants)
//!   ├── PortAllocator (mutex-guarded reservation set + liveness probe)
//!   └── Adapters (injected trait objects)
//!       ├── ContainerRuntime
//!       ├── DatabaseProvisioner
//!       ├── ReverseProxy
//!       └── CertificateIssuer
//! ```

pub mod error;
pub mod orchestrator;
pub mod ports;

pub use error::{OrchestratorError, OrchestratorResult, Step};
pub use orchestrator::{Orchestrator, ProvisionRequest};
pub use ports::PortAllocator;
