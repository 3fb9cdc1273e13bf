//! Two-phase restart campaigns.
//!
//! The scheduler walks a campaign through its phases:
//!
//! ```text
//! Idle -> BatchOneAdmission -> BatchOneRemoval -> Waiting -> Polling -> BatchTwoRemoval -> Done
//!                                     |                          |
//!                                     +-> Done                   +-> Aborted
//! ```
//!
//! The first batch is removed, the owners get a settle interval to notice,
//! and the health oracle is polled until every owner has a ready replacement
//! or the deadline passes. Only then is the second batch touched. In unsafe
//! mode every eligible pod goes in a single pass with no waiting.
//!
//! Every pod is still admitted against the campaign's disruption budget
//! snapshot, and every wait or cluster call gives way to shutdown.

use std::future::Future;
use std::sync::Arc;

use confroll_reconcile::campaign::Batches;
use confroll_reconcile::{can_remove, partition, BatchStrategy, CampaignPhase, SourceKey};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::ResourceExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::cluster::ClusterApi;
use crate::config::CampaignTimings;
use crate::error::CampaignError;
use crate::health::HealthOracle;

/// Outcome of a campaign that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignReport {
    pub source: SourceKey,
    pub strategy: BatchStrategy,
    pub unsafe_mode: bool,
    pub phase: CampaignPhase,

    /// Pods removed in the first batch (every pod, in unsafe mode).
    pub removed_first: Vec<String>,

    /// Pods removed in the second batch.
    pub removed_second: Vec<String>,

    /// Pods a disruption budget kept in place.
    pub denied: Vec<String>,

    /// Pods whose deletion failed.
    pub failed: Vec<String>,
}

impl CampaignReport {
    fn new(source: SourceKey, strategy: BatchStrategy, unsafe_mode: bool) -> Self {
        Self {
            source,
            strategy,
            unsafe_mode,
            phase: CampaignPhase::Idle,
            removed_first: Vec::new(),
            removed_second: Vec::new(),
            denied: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Total number of pods removed.
    pub fn removed(&self) -> usize {
        self.removed_first.len() + self.removed_second.len()
    }

    fn advance(&mut self, next: CampaignPhase) {
        debug_assert!(
            self.phase.allows(next),
            "illegal campaign transition {} -> {}",
            self.phase,
            next
        );
        debug!(from = %self.phase, to = %next, "Campaign phase transition");
        self.phase = next;
    }
}

#[derive(Debug, Clone, Copy)]
enum Batch {
    First,
    Second,
}

/// Runs restart campaigns against a cluster.
pub struct BatchScheduler {
    cluster: Arc<dyn ClusterApi>,
    health: HealthOracle,
    timings: CampaignTimings,
    strategy: BatchStrategy,
    shutdown: watch::Receiver<bool>,
}

impl BatchScheduler {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        timings: CampaignTimings,
        strategy: BatchStrategy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            health: HealthOracle::new(Arc::clone(&cluster)),
            cluster,
            timings,
            strategy,
            shutdown,
        }
    }

    /// Restart `candidates`, the eligible pods for a change of `source`.
    ///
    /// `budgets` is the disruption budget snapshot for the whole campaign.
    #[instrument(
        skip(self, source, candidates, budgets),
        fields(source = %source, candidates = candidates.len(), strategy = %self.strategy)
    )]
    pub async fn run(
        &self,
        source: SourceKey,
        candidates: Vec<Pod>,
        budgets: &[PodDisruptionBudget],
        unsafe_mode: bool,
    ) -> Result<CampaignReport, CampaignError> {
        let mut report = CampaignReport::new(source, self.strategy, unsafe_mode);

        let batches = if unsafe_mode {
            Batches {
                first: candidates,
                second: Vec::new(),
            }
        } else {
            partition(candidates, self.strategy)
        };

        info!(
            total = batches.len(),
            first_batch = batches.first.len(),
            second_batch = batches.second.len(),
            unsafe_mode,
            "Starting rolling restart"
        );

        report.advance(CampaignPhase::BatchOneAdmission);
        let admitted = admit(&mut report, batches.first, budgets);

        report.advance(CampaignPhase::BatchOneRemoval);
        let removed = self.remove(&mut report, admitted, Batch::First).await?;

        if removed.is_empty() {
            info!("No pods were restarted in first batch");
            report.advance(CampaignPhase::Done);
            return Ok(finish(report));
        }
        if batches.second.is_empty() {
            report.advance(CampaignPhase::Done);
            return Ok(finish(report));
        }

        report.advance(CampaignPhase::Waiting);
        info!(
            duration_secs = self.timings.settle_interval.as_secs(),
            "Waiting before second batch"
        );
        self.guard(tokio::time::sleep(self.timings.settle_interval))
            .await?;

        report.advance(CampaignPhase::Polling);
        if let Err(e) = self.wait_for_replacements(&removed).await {
            if matches!(e, CampaignError::ReplacementsUnhealthy { .. }) {
                report.advance(CampaignPhase::Aborted);
                error!(
                    error = %e,
                    skipped = batches.second.len(),
                    "First batch not healthy, aborting second batch"
                );
            }
            return Err(e);
        }

        info!("First batch healthy, restarting second batch");
        report.advance(CampaignPhase::BatchTwoRemoval);
        let admitted = admit(&mut report, batches.second, budgets);
        self.remove(&mut report, admitted, Batch::Second).await?;

        report.advance(CampaignPhase::Done);
        Ok(finish(report))
    }

    /// Poll until every owner of `removed` has a ready replacement.
    async fn wait_for_replacements(&self, removed: &[Pod]) -> Result<(), CampaignError> {
        let started = Instant::now();
        let deadline = started + self.timings.ready_timeout;

        loop {
            let pending = self.guard(self.health.pending(removed)).await?;
            if pending.is_empty() {
                debug!(waited_ms = started.elapsed().as_millis() as u64, "Replacements ready");
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(CampaignError::ReplacementsUnhealthy {
                    pending_owners: pending,
                    waited: started.elapsed(),
                });
            }

            debug!(pending = pending.len(), "Waiting for replacements to become ready");
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.guard(tokio::time::sleep(self.timings.poll_interval.min(remaining)))
                .await?;
        }
    }

    /// Delete admitted pods, skipping failures. Returns the pods removed.
    async fn remove(
        &self,
        report: &mut CampaignReport,
        admitted: Vec<Pod>,
        batch: Batch,
    ) -> Result<Vec<Pod>, CampaignError> {
        let mut removed = Vec::with_capacity(admitted.len());

        for pod in admitted {
            let namespace = pod.namespace().unwrap_or_default();
            let name = pod.name_any();

            match self.guard(self.cluster.delete_pod(&namespace, &name)).await? {
                Ok(()) => {
                    info!(namespace = %namespace, pod = %name, ?batch, "Restarted pod");
                    match batch {
                        Batch::First => report.removed_first.push(name),
                        Batch::Second => report.removed_second.push(name),
                    }
                    removed.push(pod);
                }
                Err(e) => {
                    warn!(namespace = %namespace, pod = %name, error = %e, "Failed to delete pod");
                    report.failed.push(name);
                }
            }
        }

        Ok(removed)
    }

    /// Run `fut` unless shutdown is requested first.
    async fn guard<T>(&self, fut: impl Future<Output = T>) -> Result<T, CampaignError> {
        tokio::select! {
            biased;
            _ = shutdown_requested(self.shutdown.clone()) => {
                warn!("Shutdown requested, cancelling campaign");
                Err(CampaignError::Cancelled)
            }
            out = fut => Ok(out),
        }
    }
}

/// Resolves once shutdown is signalled. A dropped sender never resolves.
pub(crate) async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Admit every pod of a batch against the budget snapshot before any removal.
fn admit(report: &mut CampaignReport, batch: Vec<Pod>, budgets: &[PodDisruptionBudget]) -> Vec<Pod> {
    let (admitted, denied): (Vec<Pod>, Vec<Pod>) =
        batch.into_iter().partition(|pod| can_remove(pod, budgets));

    for pod in denied {
        let name = pod.name_any();
        info!(pod = %name, "Skipping pod due to disruption budget");
        report.denied.push(name);
    }

    admitted
}

fn finish(report: CampaignReport) -> CampaignReport {
    info!(
        source = %report.source,
        phase = %report.phase,
        removed = report.removed(),
        denied = report.denied.len(),
        failed = report.failed.len(),
        "Rolling restart finished"
    );
    report
}
