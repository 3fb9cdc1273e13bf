//! ConfigMap watch loop.
//!
//! Drives [`ConfigMapReconciler`] from a `kube` runtime controller. Every
//! reconcile ends in `await_change`: a failed campaign is not retried, the
//! next ConfigMap event starts over.

use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use confroll_reconcile::SourceKey;

use crate::error::ControllerError;
use crate::reconciler::{ConfigMapReconciler, ReconcileOutcome};
use crate::scheduler::shutdown_requested;

/// Shared state handed to every reconcile.
pub struct Context {
    pub reconciler: ConfigMapReconciler,
}

fn source_key(config_map: &ConfigMap) -> SourceKey {
    SourceKey::new(config_map.namespace().unwrap_or_default(), config_map.name_any())
}

async fn reconcile(config_map: Arc<ConfigMap>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = source_key(&config_map);
    match ctx.reconciler.reconcile(&key).await? {
        ReconcileOutcome::Restarted(report) => {
            debug!(
                configmap = %key,
                removed = report.removed(),
                "Reconcile finished with restart"
            );
        }
        outcome => debug!(configmap = %key, ?outcome, "Reconcile finished"),
    }
    Ok(Action::await_change())
}

/// Failed reconciles are logged and left for the next change.
fn error_policy(config_map: Arc<ConfigMap>, error: &ControllerError, _ctx: Arc<Context>) -> Action {
    error!(
        configmap = %source_key(&config_map),
        error = %error,
        "Reconciliation failed"
    );
    Action::await_change()
}

/// Watch ConfigMaps until shutdown is signalled.
pub async fn run(
    client: Client,
    namespace: Option<String>,
    reconciler: ConfigMapReconciler,
    shutdown: watch::Receiver<bool>,
) {
    let api: Api<ConfigMap> = match namespace.as_deref() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    info!(namespace = namespace.as_deref().unwrap_or("*"), "Starting ConfigMap watch");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        shutdown_requested(shutdown).await;
        let _ = stop_tx.send(());
    });

    let ctx = Arc::new(Context { reconciler });

    Controller::new(api, watcher::Config::default())
        .graceful_shutdown_on(async move {
            let _ = stop_rx.await;
        })
        .run(reconcile, error_policy, Arc::clone(&ctx))
        .for_each(|result| {
            let ctx = Arc::clone(&ctx);
            async move {
                match result {
                    Ok((object, _)) => debug!(configmap = %object, "Reconciled"),
                    Err(controller::Error::ObjectNotFound(object)) => {
                        let key =
                            SourceKey::new(object.namespace.clone().unwrap_or_default(), object.name.clone());
                        ctx.reconciler.forget(&key);
                    }
                    Err(controller::Error::ReconcilerFailed(_, object)) => {
                        debug!(configmap = %object, "Reconcile error already reported");
                    }
                    Err(e) => warn!(error = %e, "ConfigMap watch error"),
                }
            }
        })
        .await;

    info!("ConfigMap watch stopped");
}
