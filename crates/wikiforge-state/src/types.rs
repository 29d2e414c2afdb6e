//! Domain types for the instance registry.

use serde::{Deserialize, Serialize};

/// Unique identifier for a provisioned instance (UUID string).
pub type InstanceId = String;

/// One tenant instance — the unit of provisioning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    /// Human label. Not required to be unique.
    pub tenant_name: String,
    /// Caller-supplied uniqueness and routing key (flat namespace).
    pub slug: String,
    /// Host port the workload is published on.
    pub port: u16,
    /// Derived from `(slug, port)`; see wikiforge-core's naming module.
    pub container_name: String,
    pub db_name: String,
    pub domain: String,
    pub status: InstanceStatus,
    /// The triggering error when `status` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    /// Compensation failures left behind after a rollback; non-empty
    /// means external resources may still exist and need operator
    /// follow-up.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub residual_resources: Vec<String>,
    /// Unix timestamp (seconds).
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last status change.
    pub updated_at: u64,
}

/// Lifecycle status of an instance.
///
/// ```text
/// Pending ──▶ Provisioning ──▶ Deployed ──▶ RollingBack ──▶ Removed
///                  │                             ▲   │
///                  └────────▶ RollingBack ───────┘   └──▶ Failed
///                                                           │
///                              (operator teardown retry) ◀──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Provisioning,
    Deployed,
    RollingBack,
    Failed,
    Removed,
}

impl InstanceStatus {
    /// Whether this instance still claims its port, names, and slug.
    ///
    /// `Failed` does not: its external resources were compensated (any
    /// leftovers are flagged in `residual_resources`), so the claims are
    /// free for the next request.
    pub fn claims_resources(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Provisioning | Self::Deployed | Self::RollingBack
        )
    }

    /// Whether `self -> next` is a legal state-machine edge.
    /// No transition skips a state.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Provisioning)
                | (Self::Provisioning, Self::Deployed)
                | (Self::Provisioning, Self::RollingBack)
                | (Self::Deployed, Self::RollingBack)
                | (Self::RollingBack, Self::Failed)
                | (Self::RollingBack, Self::Removed)
                // Teardown retry for instances with residual resources.
                | (Self::Failed, Self::RollingBack)
        )
    }
}
