//! Restart campaign decision primitives.
//!
//! This library holds every decision the controller makes when a ConfigMap
//! changes, kept free of I/O so each rule can be tested on plain objects:
//!
//! - **Change detection**: has this ConfigMap moved past the last version we saw?
//! - **Reference matching**: does a pod consume the ConfigMap?
//! - **Policy**: which pods are excluded, and is unsafe mode on?
//! - **Disruption admission**: may a pod be removed under its budgets?
//! - **Health**: have the owners of removed pods produced a ready replacement?
//! - **Campaign**: how eligible pods are split into two batches, and the
//!   phases a campaign walks through.
//!
//! # Invariants
//!
//! - A pod is eligible iff it references the ConfigMap, is not terminal, is
//!   not already terminating, and is not excluded by policy.
//! - The first batch holds `ceil(n/2)` eligible pods; the two batches
//!   partition the eligible set exactly.
//! - A pod matching several disruption budgets must satisfy all of them.

use std::time::Duration;

use thiserror::Error;

pub mod campaign;
pub mod change;
pub mod disruption;
pub mod health;
pub mod policy;
pub mod references;

pub use campaign::{eligible_pods, partition, BatchStrategy, CampaignPhase};
pub use change::{ChangeDetector, InMemoryVersionStore, Observation, SourceKey, VersionStore};
pub use disruption::{can_remove, BudgetVerdict};
pub use health::{is_pod_ready, owners_satisfied, OwnerKey};
pub use policy::{EffectivePolicy, RolloutPolicy, RolloutPolicySpec};
pub use references::{config_map_references, uses_config_map, ReferenceShape};

/// Errors raised while interpreting cluster objects.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A disruption budget carries a selector that cannot be evaluated.
    #[error("invalid label selector on {budget}: {reason}")]
    InvalidSelector { budget: String, reason: String },

    /// An int-or-percent threshold could not be parsed.
    #[error("invalid threshold {0:?}")]
    InvalidThreshold(String),
}

/// Default time to let owning controllers notice removals before polling.
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_secs(5);

/// Default interval between health polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default deadline for first-batch replacements to become ready.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);
