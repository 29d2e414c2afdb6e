//! Orchestrator error types.

use thiserror::Error;

use wikiforge_core::AdapterError;
use wikiforge_state::StateError;

/// One side-effecting pipeline step. Compensation iterates these in
/// reverse completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Database,
    Container,
    ProxyRoute,
    Certificate,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Database => "database",
            Self::Container => "container",
            Self::ProxyRoute => "proxy route",
            Self::Certificate => "certificate",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by provisioning and teardown.
///
/// `Validation` and `Conflict` are raised before any resource is
/// touched. A `StepFailed` means compensation already ran and left the
/// system clean; `RollbackIncomplete` means it did not, and the
/// instance record carries the residual resources for operator
/// follow-up.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no free port in the configured range")]
    PortsExhausted,

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("{step} step failed (completed steps rolled back): {source}")]
    StepFailed {
        step: Step,
        #[source]
        source: AdapterError,
    },

    #[error("pipeline deadline exceeded (completed steps rolled back)")]
    DeadlineExceeded,

    #[error("rollback incomplete after {trigger}; residual resources: {residuals:?}")]
    RollbackIncomplete {
        trigger: String,
        residuals: Vec<String>,
    },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
