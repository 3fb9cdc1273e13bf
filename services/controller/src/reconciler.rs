//! ConfigMap reconciliation.
//!
//! The reconciler:
//! - Fetches the ConfigMap and feeds its resource version to the change detector
//! - On a change, loads the effective rollout policy
//! - Narrows the ConfigMap's namespace to eligible consumer pods
//! - Hands them and a disruption budget snapshot to the batch scheduler

use std::sync::Arc;

use confroll_reconcile::{eligible_pods, ChangeDetector, EffectivePolicy, Observation, SourceKey};
use kube::ResourceExt;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::cluster::ClusterApi;
use crate::config::Config;
use crate::error::ControllerError;
use crate::scheduler::{BatchScheduler, CampaignReport};

/// What a reconcile pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The ConfigMap no longer exists; its tracked version was dropped.
    Deleted,

    /// First sighting; the version was recorded and nothing restarted.
    FirstSeen,

    /// Same version as last time.
    Unchanged,

    /// The ConfigMap's namespace is excluded by policy.
    NamespaceExcluded,

    /// Changed, but no pod is eligible for restart.
    NoCandidates,

    /// A restart campaign ran to completion.
    Restarted(CampaignReport),
}

/// Reconciles ConfigMap events into restart campaigns.
pub struct ConfigMapReconciler {
    cluster: Arc<dyn ClusterApi>,
    detector: ChangeDetector,
    scheduler: BatchScheduler,
}

impl ConfigMapReconciler {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        detector: ChangeDetector,
        scheduler: BatchScheduler,
    ) -> Self {
        Self {
            cluster,
            detector,
            scheduler,
        }
    }

    /// Build a reconciler from controller configuration.
    pub fn from_config(
        config: &Config,
        cluster: Arc<dyn ClusterApi>,
        detector: ChangeDetector,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let scheduler = BatchScheduler::new(
            Arc::clone(&cluster),
            config.timings,
            config.batching,
            shutdown,
        );
        Self::new(cluster, detector, scheduler)
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// Stop tracking a ConfigMap that was deleted.
    pub fn forget(&self, key: &SourceKey) {
        debug!(configmap = %key, "Forgetting ConfigMap");
        self.detector.forget(key);
    }

    /// Perform a single reconcile pass for one ConfigMap.
    #[instrument(skip(self, key), fields(configmap = %key))]
    pub async fn reconcile(&self, key: &SourceKey) -> Result<ReconcileOutcome, ControllerError> {
        let config_map = self
            .cluster
            .get_config_map(&key.namespace, &key.name)
            .await
            .map_err(ControllerError::Cluster)?;

        let Some(config_map) = config_map else {
            self.forget(key);
            return Ok(ReconcileOutcome::Deleted);
        };

        let version = config_map.resource_version().unwrap_or_default();
        match self.detector.observe(key, &version) {
            Observation::FirstSeen => {
                debug!(version = %version, "Tracking ConfigMap");
                return Ok(ReconcileOutcome::FirstSeen);
            }
            Observation::Unchanged => return Ok(ReconcileOutcome::Unchanged),
            Observation::Changed { previous } => {
                info!(
                    previous = %previous,
                    version = %version,
                    "ConfigMap changed, finding affected pods"
                );
            }
        }

        let policy = self.load_policy().await;
        if policy.namespace_excluded(&key.namespace) {
            info!(namespace = %key.namespace, "Namespace excluded, skipping");
            return Ok(ReconcileOutcome::NamespaceExcluded);
        }

        let pods = match self.cluster.list_pods(&key.namespace).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(namespace = %key.namespace, error = %e, "Failed to list pods");
                Vec::new()
            }
        };

        let candidates = eligible_pods(pods, &key.name, &policy);
        if candidates.is_empty() {
            info!("No pods to restart");
            return Ok(ReconcileOutcome::NoCandidates);
        }
        info!(count = candidates.len(), "Found pods to restart");

        let budgets = match self.cluster.list_disruption_budgets(&key.namespace).await {
            Ok(budgets) => budgets,
            Err(e) => {
                warn!(
                    namespace = %key.namespace,
                    error = %e,
                    "Failed to load disruption budgets, proceeding without budget checks"
                );
                Vec::new()
            }
        };

        self.scheduler
            .run(key.clone(), candidates, &budgets, policy.unsafe_mode())
            .await
            .map(ReconcileOutcome::Restarted)
            .map_err(|error| ControllerError::Campaign {
                source_key: key.to_string(),
                error,
            })
    }

    /// Merge every rollout policy in the cluster. A failed list yields the
    /// empty policy.
    async fn load_policy(&self) -> EffectivePolicy {
        match self.cluster.list_policies().await {
            Ok(policies) => {
                let policy = EffectivePolicy::from_policies(&policies);
                debug!(
                    policies = policies.len(),
                    patterns = policy.patterns().count(),
                    namespaces = policy.excluded_namespaces().len(),
                    unsafe_mode = policy.unsafe_mode(),
                    "Loaded rollout policy"
                );
                policy
            }
            Err(e) => {
                warn!(error = %e, "Failed to list rollout policies, using empty policy");
                EffectivePolicy::default()
            }
        }
    }
}
