//! Restart campaign planning.
//!
//! A campaign restarts the pods that consume one changed ConfigMap. It first
//! narrows the namespace's pods to the eligible set, then splits that set in
//! two batches. The scheduler removes the first batch, waits for owners to
//! produce ready replacements, and only then removes the second.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::debug;

use crate::health::{is_terminal, is_terminating, owner_key};
use crate::policy::EffectivePolicy;
use crate::references::uses_config_map;

/// How eligible pods are split into the two batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchStrategy {
    /// `ceil(n/2)` of the whole eligible set goes first.
    #[default]
    Global,

    /// `ceil(k/2)` of each owner's `k` pods goes first. Unowned pods share a
    /// group.
    PerOwner,
}

impl FromStr for BatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "per-owner" | "per_owner" | "perowner" => Ok(Self::PerOwner),
            other => Err(format!("unknown batching strategy: {other}")),
        }
    }
}

impl fmt::Display for BatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::PerOwner => f.write_str("per-owner"),
        }
    }
}

/// Phases of a restart campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignPhase {
    Idle,
    BatchOneAdmission,
    BatchOneRemoval,
    Waiting,
    Polling,
    BatchTwoRemoval,
    Done,
    Aborted,
}

impl CampaignPhase {
    /// Whether a campaign may move from `self` to `next`.
    pub fn allows(self, next: CampaignPhase) -> bool {
        use CampaignPhase::*;

        matches!(
            (self, next),
            (Idle, BatchOneAdmission)
                | (BatchOneAdmission, BatchOneRemoval)
                | (BatchOneRemoval, Waiting)
                | (BatchOneRemoval, Done)
                | (Waiting, Polling)
                | (Polling, BatchTwoRemoval)
                | (Polling, Aborted)
                | (BatchTwoRemoval, Done)
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl fmt::Display for CampaignPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The two batches of a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batches<T> {
    pub first: Vec<T>,
    pub second: Vec<T>,
}

impl<T> Batches<T> {
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty() && self.second.is_empty()
    }
}

/// Split `items` into two batches, grouping by `group` for
/// [`BatchStrategy::PerOwner`]. Order is preserved within each batch.
pub fn split_batches<T, K, F>(mut items: Vec<T>, strategy: BatchStrategy, group: F) -> Batches<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    match strategy {
        BatchStrategy::Global => {
            let midpoint = items.len().div_ceil(2);
            let second = items.split_off(midpoint);
            Batches {
                first: items,
                second,
            }
        }
        BatchStrategy::PerOwner => {
            let mut index: HashMap<K, usize> = HashMap::new();
            let mut groups: Vec<Vec<T>> = Vec::new();
            for item in items {
                let slot = *index.entry(group(&item)).or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
                groups[slot].push(item);
            }

            let mut batches = Batches {
                first: Vec::new(),
                second: Vec::new(),
            };
            for mut members in groups {
                let rest = members.split_off(members.len().div_ceil(2));
                batches.first.extend(members);
                batches.second.extend(rest);
            }
            batches
        }
    }
}

/// Split eligible pods into the two batches.
pub fn partition(pods: Vec<Pod>, strategy: BatchStrategy) -> Batches<Pod> {
    split_batches(pods, strategy, owner_key)
}

/// Narrow `pods` to those a change of ConfigMap `source` should restart.
pub fn eligible_pods(pods: Vec<Pod>, source: &str, policy: &EffectivePolicy) -> Vec<Pod> {
    pods.into_iter()
        .filter(|pod| {
            if is_terminal(pod) || is_terminating(pod) {
                return false;
            }
            if !uses_config_map(pod, source) {
                return false;
            }
            if policy.is_excluded(pod) {
                debug!(pod = %pod.name_any(), "Pod excluded by policy");
                return false;
            }
            true
        })
        .collect()
}
