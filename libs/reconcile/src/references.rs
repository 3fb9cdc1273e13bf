//! Which ConfigMaps a pod consumes.
//!
//! A pod can reach a ConfigMap in a fixed number of ways. They are enumerated
//! by [`ReferenceShape`] and walked over the typed pod spec; any field that is
//! absent simply contributes no references.

use k8s_openapi::api::core::v1::{Container, Pod, Volume};

/// The ways a pod can consume a ConfigMap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceShape {
    /// `volumes[].configMap`
    Volume,
    /// `volumes[].projected.sources[].configMap`
    ProjectedVolume,
    /// `containers[].envFrom[].configMapRef`
    EnvFrom { init: bool },
    /// `containers[].env[].valueFrom.configMapKeyRef`
    EnvValue { init: bool },
}

/// One reference from a pod to a named ConfigMap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigMapReference<'a> {
    pub shape: ReferenceShape,
    pub name: &'a str,
}

/// Every ConfigMap reference in the pod, in spec order.
pub fn config_map_references(pod: &Pod) -> Vec<ConfigMapReference<'_>> {
    let mut refs = Vec::new();
    let Some(spec) = pod.spec.as_ref() else {
        return refs;
    };

    for volume in spec.volumes.iter().flatten() {
        volume_references(volume, &mut refs);
    }
    for container in &spec.containers {
        container_references(container, false, &mut refs);
    }
    for container in spec.init_containers.iter().flatten() {
        container_references(container, true, &mut refs);
    }

    refs
}

fn volume_references<'a>(volume: &'a Volume, refs: &mut Vec<ConfigMapReference<'a>>) {
    if let Some(cm) = &volume.config_map {
        refs.push(ConfigMapReference {
            shape: ReferenceShape::Volume,
            name: &cm.name,
        });
    }

    let projections = volume
        .projected
        .as_ref()
        .and_then(|p| p.sources.as_ref())
        .into_iter()
        .flatten();
    for cm in projections.filter_map(|p| p.config_map.as_ref()) {
        refs.push(ConfigMapReference {
            shape: ReferenceShape::ProjectedVolume,
            name: &cm.name,
        });
    }
}

fn container_references<'a>(
    container: &'a Container,
    init: bool,
    refs: &mut Vec<ConfigMapReference<'a>>,
) {
    for env_from in container.env_from.iter().flatten() {
        if let Some(cm) = &env_from.config_map_ref {
            refs.push(ConfigMapReference {
                shape: ReferenceShape::EnvFrom { init },
                name: &cm.name,
            });
        }
    }

    let key_refs = container
        .env
        .iter()
        .flatten()
        .filter_map(|env| env.value_from.as_ref())
        .filter_map(|source| source.config_map_key_ref.as_ref());
    for selector in key_refs {
        refs.push(ConfigMapReference {
            shape: ReferenceShape::EnvValue { init },
            name: &selector.name,
        });
    }
}

/// Whether the pod consumes the ConfigMap named `name` in any form.
pub fn uses_config_map(pod: &Pod, name: &str) -> bool {
    config_map_references(pod).iter().any(|r| r.name == name)
}
