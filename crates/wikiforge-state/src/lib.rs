//! wikiforge-state — durable instance registry for WikiForge.
//!
//! Backed by [redb](https://docs.rs/redb). Each provisioned instance is
//! one JSON-serialized record; the registry is the single source of truth
//! for instance identity, allocation, and status.
//!
//! # Invariants enforced here
//!
//! - At most one non-terminal instance per tenant slug.
//! - Ports, container names, and database names are unique among
//!   non-terminal instances.
//! - Status changes follow the instance state machine; an illegal
//!   transition is rejected inside the write transaction.
//!
//! redb serializes write transactions, so a conflict check and its
//! subsequent insert are atomic — two concurrent provisioning requests
//! for the same slug cannot both pass the check.
//!
//! The `InstanceRegistry` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::InstanceRegistry;
pub use types::{Instance, InstanceId, InstanceStatus};
