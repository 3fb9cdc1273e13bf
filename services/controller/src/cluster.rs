//! Cluster access interface and implementations.
//!
//! The interface covers the handful of reads and the single write a restart
//! campaign needs:
//! - Reading the changed ConfigMap and the pods of its namespace
//! - Reading disruption budgets and rollout policies
//! - Deleting pods
//!
//! [`KubeCluster`] talks to the API server. [`MockCluster`] keeps everything
//! in memory and can play the part of owning controllers by creating a
//! replacement for every owned pod it deletes.

use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, Result};
use async_trait::async_trait;
use confroll_reconcile::health::controller_owner;
use confroll_reconcile::RolloutPolicy;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, PodCondition, PodStatus};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, DeleteParams, ListParams};
use kube::{Client, ResourceExt};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Cluster operations used by the controller.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a ConfigMap; `None` if it does not exist.
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// List pods in a namespace.
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>>;

    /// List disruption budgets in a namespace.
    async fn list_disruption_budgets(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>>;

    /// List every rollout policy in the cluster.
    async fn list_policies(&self) -> Result<Vec<RolloutPolicy>>;

    /// Delete a pod.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
}

/// API server backed cluster access.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_disruption_budgets(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>> {
        let api: Api<PodDisruptionBudget> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_policies(&self) -> Result<Vec<RolloutPolicy>> {
        let api: Api<RolloutPolicy> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

/// What [`MockCluster`] does after deleting a pod with a controlling owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Replacements {
    /// Nothing replaces deleted pods.
    #[default]
    None,

    /// A running, ready replacement appears immediately.
    Ready,

    /// A running replacement appears but never turns ready.
    NotReady,
}

#[derive(Default)]
struct MockState {
    config_maps: BTreeMap<(String, String), ConfigMap>,
    pods: Vec<Pod>,
    budgets: Vec<PodDisruptionBudget>,
    policies: Vec<RolloutPolicy>,
    deleted: Vec<String>,
    failing_deletes: HashSet<String>,
    fail_budget_lists: bool,
    fail_pod_lists: bool,
    replacements: Replacements,
    replacement_counter: u64,
}

/// In-memory cluster for tests and local runs.
#[derive(Default)]
pub struct MockCluster {
    state: RwLock<MockState>,
}

impl MockCluster {
    /// Create an empty mock cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock cluster that replaces deleted owned pods.
    pub fn with_replacements(replacements: Replacements) -> Self {
        Self {
            state: RwLock::new(MockState {
                replacements,
                ..Default::default()
            }),
        }
    }

    pub async fn insert_config_map(&self, config_map: ConfigMap) {
        let key = (
            config_map.namespace().unwrap_or_default(),
            config_map.name_any(),
        );
        self.state.write().await.config_maps.insert(key, config_map);
    }

    pub async fn remove_config_map(&self, namespace: &str, name: &str) {
        self.state
            .write()
            .await
            .config_maps
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub async fn insert_pod(&self, pod: Pod) {
        self.state.write().await.pods.push(pod);
    }

    pub async fn insert_budget(&self, budget: PodDisruptionBudget) {
        self.state.write().await.budgets.push(budget);
    }

    pub async fn insert_policy(&self, policy: RolloutPolicy) {
        self.state.write().await.policies.push(policy);
    }

    /// Make every delete of the named pod fail.
    pub async fn fail_delete_of(&self, name: &str) {
        self.state.write().await.failing_deletes.insert(name.to_string());
    }

    /// Make budget listing fail.
    pub async fn fail_budget_lists(&self) {
        self.state.write().await.fail_budget_lists = true;
    }

    /// Make pod listing fail.
    pub async fn fail_pod_lists(&self, fail: bool) {
        self.state.write().await.fail_pod_lists = fail;
    }

    /// Names of deleted pods, in deletion order.
    pub async fn deleted(&self) -> Vec<String> {
        self.state.read().await.deleted.clone()
    }

    /// Names of pods currently in a namespace.
    pub async fn pod_names(&self, namespace: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .pods
            .iter()
            .filter(|p| p.namespace().as_deref() == Some(namespace))
            .map(|p| p.name_any())
            .collect()
    }

    fn replacement_for(pod: &Pod, counter: u64, ready: bool) -> Pod {
        let mut replacement = pod.clone();
        let name = format!("{}-r{}", pod.name_any(), counter);
        replacement.metadata.uid = Some(format!("uid-{name}"));
        replacement.metadata.name = Some(name);
        replacement.metadata.deletion_timestamp = None;
        replacement.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        replacement
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let state = self.state.read().await;
        Ok(state
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let state = self.state.read().await;
        if state.fail_pod_lists {
            bail!("Mock cluster configured to fail pod lists");
        }
        Ok(state
            .pods
            .iter()
            .filter(|p| p.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn list_disruption_budgets(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>> {
        let state = self.state.read().await;
        if state.fail_budget_lists {
            bail!("Mock cluster configured to fail budget lists");
        }
        Ok(state
            .budgets
            .iter()
            .filter(|b| b.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn list_policies(&self) -> Result<Vec<RolloutPolicy>> {
        Ok(self.state.read().await.policies.clone())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.failing_deletes.contains(name) {
            bail!("Mock cluster configured to fail deleting {name}");
        }

        let Some(index) = state
            .pods
            .iter()
            .position(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == name)
        else {
            bail!("pods \"{name}\" not found in {namespace}");
        };

        let pod = state.pods.remove(index);
        state.deleted.push(name.to_string());
        info!(namespace, pod = name, "[MOCK] Deleted pod");

        let ready = match state.replacements {
            Replacements::None => return Ok(()),
            Replacements::Ready => true,
            Replacements::NotReady => false,
        };
        if controller_owner(&pod).is_some() {
            state.replacement_counter += 1;
            let replacement = Self::replacement_for(&pod, state.replacement_counter, ready);
            debug!(pod = %replacement.name_any(), ready, "[MOCK] Created replacement");
            state.pods.push(replacement);
        }

        Ok(())
    }
}
