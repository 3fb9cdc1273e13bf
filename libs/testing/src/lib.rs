//! Test fixtures for confroll.
//!
//! Builders assemble objects as JSON and deserialize them through
//! `k8s-openapi`, so fixtures look like what the API server returns.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::{json, Map, Value};

/// Builds a [`Pod`] with a single `app` container.
#[derive(Debug, Clone)]
pub struct PodBuilder {
    namespace: String,
    name: String,
    labels: BTreeMap<String, String>,
    owners: Vec<Value>,
    phase: Option<String>,
    ready: bool,
    terminating: bool,
    volumes: Vec<Value>,
    env_from: Vec<Value>,
    env: Vec<Value>,
    init_env_from: Vec<Value>,
    init_env: Vec<Value>,
}

impl PodBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            labels: BTreeMap::new(),
            owners: Vec::new(),
            phase: None,
            ready: false,
            terminating: false,
            volumes: Vec::new(),
            env_from: Vec::new(),
            env: Vec::new(),
            init_env_from: Vec::new(),
            init_env: Vec::new(),
        }
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Controlled by a ReplicaSet with the given uid.
    pub fn owned_by(mut self, uid: &str) -> Self {
        self.owners.push(owner_reference(uid, true));
        self
    }

    /// Owner reference without the controller flag.
    pub fn non_controller_owner(mut self, uid: &str) -> Self {
        self.owners.push(owner_reference(uid, false));
        self
    }

    pub fn phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }

    /// Running with a true Ready condition.
    pub fn ready(mut self) -> Self {
        self.phase = Some("Running".to_string());
        self.ready = true;
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn terminating(mut self) -> Self {
        self.terminating = true;
        self
    }

    pub fn config_map_volume(mut self, config_map: &str) -> Self {
        let name = format!("vol-{}", self.volumes.len());
        self.volumes
            .push(json!({ "name": name, "configMap": { "name": config_map } }));
        self
    }

    pub fn projected_config_map(mut self, config_map: &str) -> Self {
        let name = format!("vol-{}", self.volumes.len());
        self.volumes.push(json!({
            "name": name,
            "projected": {
                "sources": [
                    { "serviceAccountToken": { "path": "token" } },
                    { "configMap": { "name": config_map } }
                ]
            }
        }));
        self
    }

    pub fn env_from(mut self, config_map: &str) -> Self {
        self.env_from
            .push(json!({ "configMapRef": { "name": config_map } }));
        self
    }

    pub fn env_value_from(mut self, config_map: &str, key: &str) -> Self {
        self.env.push(env_key_ref(config_map, key));
        self
    }

    pub fn init_env_from(mut self, config_map: &str) -> Self {
        self.init_env_from
            .push(json!({ "configMapRef": { "name": config_map } }));
        self
    }

    pub fn init_env_value_from(mut self, config_map: &str, key: &str) -> Self {
        self.init_env.push(env_key_ref(config_map, key));
        self
    }

    pub fn build(self) -> Pod {
        let mut metadata = Map::new();
        metadata.insert("name".into(), json!(self.name));
        metadata.insert("namespace".into(), json!(self.namespace));
        metadata.insert("uid".into(), json!(format!("uid-{}", self.name)));
        if !self.labels.is_empty() {
            metadata.insert("labels".into(), json!(self.labels));
        }
        if !self.owners.is_empty() {
            metadata.insert("ownerReferences".into(), Value::Array(self.owners));
        }
        if self.terminating {
            metadata.insert("deletionTimestamp".into(), json!("2024-01-01T00:00:00Z"));
        }

        let mut spec = Map::new();
        spec.insert(
            "containers".into(),
            json!([{
                "name": "app",
                "image": "nginx",
                "envFrom": self.env_from,
                "env": self.env,
            }]),
        );
        if !self.init_env_from.is_empty() || !self.init_env.is_empty() {
            spec.insert(
                "initContainers".into(),
                json!([{
                    "name": "init",
                    "image": "busybox",
                    "envFrom": self.init_env_from,
                    "env": self.init_env,
                }]),
            );
        }
        if !self.volumes.is_empty() {
            spec.insert("volumes".into(), Value::Array(self.volumes));
        }

        let mut status = Map::new();
        if let Some(phase) = self.phase {
            status.insert("phase".into(), json!(phase));
        }
        let ready = if self.ready { "True" } else { "False" };
        status.insert(
            "conditions".into(),
            json!([{ "type": "Ready", "status": ready }]),
        );

        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": metadata,
            "spec": spec,
            "status": status,
        }))
        .expect("pod fixture must deserialize")
    }
}

fn owner_reference(uid: &str, controller: bool) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "ReplicaSet",
        "name": uid,
        "uid": uid,
        "controller": controller,
    })
}

fn env_key_ref(config_map: &str, key: &str) -> Value {
    json!({
        "name": key,
        "valueFrom": { "configMapKeyRef": { "name": config_map, "key": key } }
    })
}

/// Builds a [`PodDisruptionBudget`].
///
/// Defaults to an empty selector (every pod in the namespace) and a status
/// allowing one disruption.
#[derive(Debug, Clone)]
pub struct BudgetBuilder {
    namespace: String,
    name: String,
    selector: Option<BTreeMap<String, String>>,
    min_available: Option<IntOrString>,
    disruptions_allowed: i32,
    current_healthy: i32,
    expected_pods: i32,
    with_status: bool,
}

impl BudgetBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            selector: Some(BTreeMap::new()),
            min_available: None,
            disruptions_allowed: 1,
            current_healthy: 0,
            expected_pods: 0,
            with_status: true,
        }
    }

    pub fn match_label(mut self, key: &str, value: &str) -> Self {
        self.selector
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn without_selector(mut self) -> Self {
        self.selector = None;
        self
    }

    pub fn min_available(mut self, value: IntOrString) -> Self {
        self.min_available = Some(value);
        self
    }

    pub fn disruptions_allowed(mut self, n: i32) -> Self {
        self.disruptions_allowed = n;
        self
    }

    pub fn current_healthy(mut self, n: i32) -> Self {
        self.current_healthy = n;
        self
    }

    pub fn expected_pods(mut self, n: i32) -> Self {
        self.expected_pods = n;
        self
    }

    /// As if the disruption controller has not processed the budget yet.
    pub fn without_status(mut self) -> Self {
        self.with_status = false;
        self
    }

    pub fn build(self) -> PodDisruptionBudget {
        let mut spec = Map::new();
        if let Some(labels) = self.selector {
            spec.insert("selector".into(), json!({ "matchLabels": labels }));
        }
        if let Some(min_available) = self.min_available {
            let value = match min_available {
                IntOrString::Int(n) => json!(n),
                IntOrString::String(s) => json!(s),
            };
            spec.insert("minAvailable".into(), value);
        }

        let mut budget = json!({
            "apiVersion": "policy/v1",
            "kind": "PodDisruptionBudget",
            "metadata": { "name": self.name, "namespace": self.namespace },
            "spec": spec,
        });
        if self.with_status {
            budget["status"] = json!({
                "disruptionsAllowed": self.disruptions_allowed,
                "currentHealthy": self.current_healthy,
                "desiredHealthy": 0,
                "expectedPods": self.expected_pods,
            });
        }

        serde_json::from_value(budget).expect("budget fixture must deserialize")
    }
}

/// A ConfigMap at the given resource version.
pub fn config_map(namespace: &str, name: &str, resource_version: &str) -> ConfigMap {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": resource_version,
        },
        "data": { "revision": resource_version },
    }))
    .expect("configmap fixture must deserialize")
}
