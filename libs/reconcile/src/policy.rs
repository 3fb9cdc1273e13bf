//! Operator policy: exclusions and unsafe mode.
//!
//! Any number of cluster-scoped [`RolloutPolicy`] objects may exist. They are
//! merged into a single [`EffectivePolicy`] on every change event:
//!
//! - name patterns and namespaces concatenate (no deduplication)
//! - `unsafeMode` is on if any object turns it on
//! - patterns that do not compile are dropped
//!
//! Patterns are unanchored: `api` excludes `payments-api-7f9c`. Operators
//! anchor explicitly with `^` or `$`.

use k8s_openapi::api::core::v1::Pod;
use kube::{CustomResource, ResourceExt};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Spec of the cluster-scoped `RolloutPolicy` resource.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "confroll.io",
    version = "v1alpha1",
    kind = "RolloutPolicy",
    plural = "rolloutpolicies"
)]
#[serde(rename_all = "camelCase")]
pub struct RolloutPolicySpec {
    /// Regular expressions matched against pod names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_pods: Vec<String>,

    /// Namespaces whose pods are never restarted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_namespaces: Vec<String>,

    /// Restart every eligible pod in one pass, without health gating.
    #[serde(default)]
    pub unsafe_mode: bool,
}

/// The union of every policy object in the cluster.
#[derive(Debug, Clone, Default)]
pub struct EffectivePolicy {
    patterns: Vec<Regex>,
    namespaces: Vec<String>,
    unsafe_mode: bool,
}

impl EffectivePolicy {
    /// Merge policy specs.
    pub fn merge<'a, I>(specs: I) -> Self
    where
        I: IntoIterator<Item = &'a RolloutPolicySpec>,
    {
        let mut policy = Self::default();

        for spec in specs {
            for pattern in &spec.exclude_pods {
                match Regex::new(pattern) {
                    Ok(re) => policy.patterns.push(re),
                    Err(e) => debug!(pattern = %pattern, error = %e, "Dropping invalid exclusion pattern"),
                }
            }
            policy
                .namespaces
                .extend(spec.exclude_namespaces.iter().cloned());
            policy.unsafe_mode |= spec.unsafe_mode;
        }

        policy
    }

    /// Merge the specs of listed policy objects.
    pub fn from_policies(policies: &[RolloutPolicy]) -> Self {
        Self::merge(policies.iter().map(|p| &p.spec))
    }

    pub fn unsafe_mode(&self) -> bool {
        self.unsafe_mode
    }

    /// Source text of the compiled exclusion patterns.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Regex::as_str)
    }

    pub fn excluded_namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub fn namespace_excluded(&self, namespace: &str) -> bool {
        self.namespaces.iter().any(|ns| ns == namespace)
    }

    pub fn name_excluded(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }

    /// Whether policy keeps this pod out of any campaign.
    pub fn is_excluded(&self, pod: &Pod) -> bool {
        let namespace = pod.namespace().unwrap_or_default();
        self.namespace_excluded(&namespace) || self.name_excluded(&pod.name_any())
    }
}
