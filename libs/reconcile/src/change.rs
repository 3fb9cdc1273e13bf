//! ConfigMap change detection.
//!
//! The detector remembers the last `resourceVersion` observed for each
//! ConfigMap. Only a version that differs from the stored one counts as a
//! change; the first sighting of a ConfigMap only seeds the store so that a
//! freshly started controller does not restart everything it can see.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::debug;

/// Identity of a tracked ConfigMap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey {
    pub namespace: String,
    pub name: String,
}

impl SourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Storage for last observed versions.
///
/// `replace` must be atomic with respect to concurrent callers for the same
/// key: it is how the detector avoids lost updates.
pub trait VersionStore: Send + Sync {
    fn get(&self, key: &SourceKey) -> Option<String>;

    fn set(&self, key: &SourceKey, version: String);

    fn delete(&self, key: &SourceKey);

    /// Store `version` and return whatever was stored before.
    fn replace(&self, key: &SourceKey, version: String) -> Option<String>;
}

/// Process-local version store. Forgotten on restart.
#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    versions: RwLock<HashMap<SourceKey, String>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked ConfigMaps.
    pub fn len(&self) -> usize {
        self.versions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// A poisoned lock only means another thread panicked mid-insert; the map
// itself is still a valid map, so keep using it.
impl VersionStore for InMemoryVersionStore {
    fn get(&self, key: &SourceKey) -> Option<String> {
        let versions = self.versions.read().unwrap_or_else(|e| e.into_inner());
        versions.get(key).cloned()
    }

    fn set(&self, key: &SourceKey, version: String) {
        let mut versions = self.versions.write().unwrap_or_else(|e| e.into_inner());
        versions.insert(key.clone(), version);
    }

    fn delete(&self, key: &SourceKey) {
        let mut versions = self.versions.write().unwrap_or_else(|e| e.into_inner());
        versions.remove(key);
    }

    fn replace(&self, key: &SourceKey, version: String) -> Option<String> {
        let mut versions = self.versions.write().unwrap_or_else(|e| e.into_inner());
        versions.insert(key.clone(), version)
    }
}

/// Result of observing a ConfigMap version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Never seen before; version recorded, nothing else to do.
    FirstSeen,

    /// Same version as last time.
    Unchanged,

    /// Version moved; the new one is already the baseline.
    Changed { previous: String },
}

/// Tracks ConfigMap versions through an injected [`VersionStore`].
#[derive(Clone)]
pub struct ChangeDetector {
    store: Arc<dyn VersionStore>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn VersionStore>) -> Self {
        Self { store }
    }

    /// Record `version` for `key` and classify it against the previous one.
    pub fn observe(&self, key: &SourceKey, version: &str) -> Observation {
        match self.store.replace(key, version.to_string()) {
            None => {
                debug!(configmap = %key, version, "Tracking ConfigMap");
                Observation::FirstSeen
            }
            Some(previous) if previous == version => Observation::Unchanged,
            Some(previous) => {
                debug!(configmap = %key, %previous, version, "ConfigMap version moved");
                Observation::Changed { previous }
            }
        }
    }

    /// Stop tracking a deleted ConfigMap.
    pub fn forget(&self, key: &SourceKey) {
        debug!(configmap = %key, "Forgetting ConfigMap");
        self.store.delete(key);
    }

    /// Last version recorded for `key`.
    pub fn last_version(&self, key: &SourceKey) -> Option<String> {
        self.store.get(key)
    }
}

impl fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeDetector").finish_non_exhaustive()
    }
}
