//! confroll controller
//!
//! Watches ConfigMaps and restarts the pods consuming a changed one, half at
//! a time, without exceeding their disruption budgets.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use confroll_controller::{watcher, ClusterApi, Config, ConfigMapReconciler, KubeCluster};
use confroll_reconcile::{ChangeDetector, InMemoryVersionStore, RolloutPolicy};
use kube::{Client, CustomResourceExt};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Change-triggered, disruption-aware pod restarts.
#[derive(Debug, Parser)]
#[command(name = "confroll-controller")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print the RolloutPolicy CustomResourceDefinition as JSON and exit.
    #[arg(long)]
    print_crd: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.print_crd {
        println!("{}", serde_json::to_string_pretty(&RolloutPolicy::crd())?);
        return Ok(());
    }

    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.as_str().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting confroll controller");
    info!(
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        batching = %config.batching,
        settle_interval_secs = config.timings.settle_interval.as_secs(),
        poll_interval_secs = config.timings.poll_interval.as_secs(),
        ready_timeout_secs = config.timings.ready_timeout.as_secs(),
        "Configuration loaded"
    );

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client.clone()));
    let detector = ChangeDetector::new(Arc::new(InMemoryVersionStore::new()));
    let reconciler =
        ConfigMapReconciler::from_config(&config, cluster, detector, shutdown_rx.clone());

    let mut watch_handle = tokio::spawn(watcher::run(
        client,
        config.watch_namespace.clone(),
        reconciler,
        shutdown_rx,
    ));

    // Wait for shutdown signal
    let watch_exited = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        result = &mut watch_handle => {
            match result {
                Ok(()) => info!("ConfigMap watch exited"),
                Err(e) => error!(error = %e, "ConfigMap watch task panicked"),
            }
            true
        }
    };

    // Signal shutdown to the watch and any in-flight campaign
    let _ = shutdown_tx.send(true);

    if !watch_exited {
        info!("Waiting for in-flight campaigns to stop...");
        if let Err(e) = watch_handle.await {
            error!(error = %e, "ConfigMap watch task panicked");
        }
    }

    info!("Controller shutdown complete");
    Ok(())
}
