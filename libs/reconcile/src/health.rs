//! Pod lifecycle and replacement health.
//!
//! After a pod is removed, its controlling owner is expected to create a
//! replacement. The campaign considers an owner satisfied once any pod in the
//! same namespace carrying that owner is running and ready. Satisfaction is
//! per owner: three removed pods of one Deployment need one ready sibling,
//! not three. Pods without a controlling owner will never be replaced and are
//! satisfied trivially.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

/// A controlling owner, scoped to its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerKey {
    pub namespace: String,
    pub uid: String,
}

impl std::fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.uid)
    }
}

fn phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

/// Succeeded or Failed.
pub fn is_terminal(pod: &Pod) -> bool {
    matches!(phase(pod), Some("Succeeded" | "Failed"))
}

/// Deletion already requested.
pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// Running with a true `Ready` condition.
pub fn is_pod_ready(pod: &Pod) -> bool {
    if phase(pod) != Some("Running") {
        return false;
    }
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True")
}

/// The owner reference flagged as controller, if any.
pub fn controller_owner(pod: &Pod) -> Option<&OwnerReference> {
    pod.owner_references()
        .iter()
        .find(|r| r.controller == Some(true))
}

pub fn owner_key(pod: &Pod) -> Option<OwnerKey> {
    controller_owner(pod).map(|owner| OwnerKey {
        namespace: pod.namespace().unwrap_or_default(),
        uid: owner.uid.clone(),
    })
}

/// Distinct owners of `removed` that have no ready pod in `current`.
///
/// Terminating pods do not count: a pod on its way out is not a replacement.
pub fn pending_owners(removed: &[Pod], current: &[Pod]) -> Vec<OwnerKey> {
    let owners: BTreeSet<OwnerKey> = removed.iter().filter_map(owner_key).collect();

    owners
        .into_iter()
        .filter(|owner| !current.iter().any(|pod| is_ready_sibling(pod, owner)))
        .collect()
}

/// Whether every distinct owner of `removed` has a ready pod in `current`.
pub fn owners_satisfied(removed: &[Pod], current: &[Pod]) -> bool {
    pending_owners(removed, current).is_empty()
}

fn is_ready_sibling(pod: &Pod, owner: &OwnerKey) -> bool {
    pod.namespace().as_deref() == Some(owner.namespace.as_str())
        && pod.owner_references().iter().any(|r| r.uid == owner.uid)
        && !is_terminating(pod)
        && is_pod_ready(pod)
}
