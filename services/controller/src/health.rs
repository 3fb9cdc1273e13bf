//! Replacement health checks against the live cluster.

use std::collections::BTreeSet;
use std::sync::Arc;

use confroll_reconcile::health::{controller_owner, pending_owners};
use confroll_reconcile::OwnerKey;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::warn;

use crate::cluster::ClusterApi;

/// Answers whether removed pods have been replaced by ready siblings.
#[derive(Clone)]
pub struct HealthOracle {
    cluster: Arc<dyn ClusterApi>,
}

impl HealthOracle {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Owners of `removed` still without a ready replacement.
    ///
    /// Each namespace is listed once per call. A namespace that cannot be
    /// listed leaves its owners pending until the next poll.
    pub async fn pending(&self, removed: &[Pod]) -> Vec<OwnerKey> {
        let namespaces: BTreeSet<String> = removed
            .iter()
            .filter(|pod| controller_owner(pod).is_some())
            .filter_map(|pod| pod.namespace())
            .collect();

        let mut current = Vec::new();
        for namespace in namespaces {
            match self.cluster.list_pods(&namespace).await {
                Ok(pods) => current.extend(pods),
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "Failed to list pods for health check");
                }
            }
        }

        pending_owners(removed, &current)
    }

    /// Whether every distinct owner of `removed` has a ready replacement.
    pub async fn replacements_healthy(&self, removed: &[Pod]) -> bool {
        self.pending(removed).await.is_empty()
    }
}
