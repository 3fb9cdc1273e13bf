//! confroll controller library
//!
//! Watches ConfigMaps and, when one changes, restarts the pods that consume
//! it in two batches, gated on disruption budgets and replacement readiness.
//!
//! ## Architecture
//!
//! ```text
//! watcher (kube Controller)
//! └── ConfigMapReconciler   (change detection, policy, eligibility)
//!     └── BatchScheduler    (admission, removal, health gate)
//!         └── HealthOracle  (ready replacements per owner)
//! ```
//!
//! All cluster access goes through [`cluster::ClusterApi`], backed by the API
//! server in production and by [`cluster::MockCluster`] in tests.

pub mod cluster;
pub mod config;
pub mod error;
pub mod health;
pub mod reconciler;
pub mod scheduler;
pub mod watcher;

pub use cluster::{ClusterApi, KubeCluster, MockCluster, Replacements};
pub use config::{CampaignTimings, Config};
pub use error::{CampaignError, ControllerError};
pub use health::HealthOracle;
pub use reconciler::{ConfigMapReconciler, ReconcileOutcome};
pub use scheduler::{BatchScheduler, CampaignReport};
