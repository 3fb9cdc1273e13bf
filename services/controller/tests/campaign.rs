//! Integration tests for restart campaigns.
//!
//! Campaigns run against MockCluster on paused time, so settle, poll and
//! deadline waits complete instantly while keeping their ordering.

use std::sync::Arc;
use std::time::Duration;

use confroll_controller::{
    BatchScheduler, CampaignError, CampaignTimings, MockCluster, Replacements,
};
use confroll_reconcile::{BatchStrategy, CampaignPhase, SourceKey};
use confroll_testing::{BudgetBuilder, PodBuilder};
use k8s_openapi::api::core::v1::Pod;
use rstest::rstest;
use tokio::sync::watch;
use tokio::time::Instant;

fn source() -> SourceKey {
    SourceKey::new("default", "app-config")
}

fn consumer(name: &str) -> PodBuilder {
    PodBuilder::new("default", name)
        .config_map_volume("app-config")
        .ready()
}

/// `n` consumer pods, each with its own owner.
fn owned_consumers(n: usize) -> Vec<Pod> {
    (0..n)
        .map(|i| consumer(&format!("web-{i}")).owned_by(&format!("rs-{i}")).build())
        .collect()
}

async fn seed(cluster: &MockCluster, pods: &[Pod]) {
    for pod in pods {
        cluster.insert_pod(pod.clone()).await;
    }
}

fn scheduler(
    cluster: &Arc<MockCluster>,
    strategy: BatchStrategy,
    shutdown: watch::Receiver<bool>,
) -> BatchScheduler {
    BatchScheduler::new(
        cluster.clone(),
        CampaignTimings::default(),
        strategy,
        shutdown,
    )
}

#[tokio::test(start_paused = true)]
async fn test_five_pods_restart_in_two_batches() {
    let cluster = Arc::new(MockCluster::with_replacements(Replacements::Ready));
    let pods = owned_consumers(5);
    seed(&cluster, &pods).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let started = Instant::now();
    let report = scheduler(&cluster, BatchStrategy::Global, shutdown_rx)
        .run(source(), pods, &[], false)
        .await
        .unwrap();

    assert_eq!(report.phase, CampaignPhase::Done);
    assert_eq!(report.removed_first, vec!["web-0", "web-1", "web-2"]);
    assert_eq!(report.removed_second, vec!["web-3", "web-4"]);
    assert!(report.denied.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(
        cluster.deleted().await,
        vec!["web-0", "web-1", "web-2", "web-3", "web-4"]
    );

    // Second batch only after the settle interval
    assert!(started.elapsed() >= CampaignTimings::default().settle_interval);
}

#[rstest]
#[case(1, 1, 0)]
#[case(2, 1, 1)]
#[case(5, 3, 2)]
#[case(6, 3, 3)]
#[tokio::test(start_paused = true)]
async fn test_first_batch_is_rounded_up_half(
    #[case] total: usize,
    #[case] first: usize,
    #[case] second: usize,
) {
    let cluster = Arc::new(MockCluster::with_replacements(Replacements::Ready));
    let pods = owned_consumers(total);
    seed(&cluster, &pods).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = scheduler(&cluster, BatchStrategy::Global, shutdown_rx)
        .run(source(), pods, &[], false)
        .await
        .unwrap();

    assert_eq!(report.removed_first.len(), first);
    assert_eq!(report.removed_second.len(), second);
    assert_eq!(report.removed(), total);
}

#[tokio::test(start_paused = true)]
async fn test_replacements_turning_ready_mid_wait_release_second_batch() {
    let cluster = Arc::new(MockCluster::new());
    let pods = owned_consumers(4);
    seed(&cluster, &pods).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let timings = CampaignTimings::default();

    // Ready replacements show up after a few unsuccessful polls
    let late_replacements = tokio::spawn({
        let cluster = cluster.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(14)).await;
            for owner in ["rs-0", "rs-1"] {
                cluster
                    .insert_pod(consumer(&format!("{owner}-new")).owned_by(owner).build())
                    .await;
            }
        }
    });

    let started = Instant::now();
    let report = scheduler(&cluster, BatchStrategy::Global, shutdown_rx)
        .run(source(), pods, &[], false)
        .await
        .unwrap();
    late_replacements.await.unwrap();

    assert_eq!(report.phase, CampaignPhase::Done);
    assert_eq!(report.removed_first, vec!["web-0", "web-1"]);
    assert_eq!(report.removed_second, vec!["web-2", "web-3"]);

    // Polls at 5s, 7s, ... 15s; the sixth one sees both owners ready
    assert_eq!(
        started.elapsed(),
        timings.settle_interval + timings.poll_interval * 5
    );
}

#[tokio::test(start_paused = true)]
async fn test_shared_owner_is_satisfied_by_second_batch_sibling() {
    let cluster = Arc::new(MockCluster::new());
    let pods: Vec<Pod> = (0..4)
        .map(|i| consumer(&format!("web-{i}")).owned_by("rs-web").build())
        .collect();
    seed(&cluster, &pods).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let timings = CampaignTimings::default();

    let started = Instant::now();
    let report = scheduler(&cluster, BatchStrategy::Global, shutdown_rx)
        .run(source(), pods, &[], false)
        .await
        .unwrap();

    // No replacement ever appears, but web-2 and web-3 are ready pods of
    // the same owner, so the first poll passes.
    assert_eq!(report.phase, CampaignPhase::Done);
    assert_eq!(report.removed_first, vec!["web-0", "web-1"]);
    assert_eq!(report.removed_second, vec!["web-2", "web-3"]);
    assert!(started.elapsed() >= timings.settle_interval);
    assert!(started.elapsed() < timings.settle_interval + timings.poll_interval);
}

#[tokio::test(start_paused = true)]
async fn test_unready_replacements_abort_second_batch() {
    let cluster = Arc::new(MockCluster::with_replacements(Replacements::NotReady));
    let pods = owned_consumers(5);
    seed(&cluster, &pods).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = scheduler(&cluster, BatchStrategy::Global, shutdown_rx)
        .run(source(), pods, &[], false)
        .await;

    match result {
        Err(CampaignError::ReplacementsUnhealthy {
            pending_owners,
            waited,
        }) => {
            assert_eq!(pending_owners.len(), 3);
            assert!(waited >= CampaignTimings::default().ready_timeout);
        }
        other => panic!("expected ReplacementsUnhealthy, got {other:?}"),
    }

    // Zero batch-two deletes
    assert_eq!(cluster.deleted().await, vec!["web-0", "web-1", "web-2"]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_replacements_abort_second_batch() {
    let cluster = Arc::new(MockCluster::new());
    let pods = owned_consumers(2);
    seed(&cluster, &pods).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = scheduler(&cluster, BatchStrategy::Global, shutdown_rx)
        .run(source(), pods, &[], false)
        .await;

    assert!(matches!(
        result,
        Err(CampaignError::ReplacementsUnhealthy { .. })
    ));
    assert_eq!(cluster.deleted().await, vec!["web-0"]);
    assert_eq!(cluster.pod_names("default").await, vec!["web-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_budget_denying_first_batch_ends_campaign() {
    let cluster = Arc::new(MockCluster::with_replacements(Replacements::Ready));
    let pods = owned_consumers(4);
    seed(&cluster, &pods).await;
    let budgets = vec![BudgetBuilder::new("default", "frozen")
        .disruptions_allowed(0)
        .build()];
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let started = Instant::now();
    let report = scheduler(&cluster, BatchStrategy::Global, shutdown_rx)
        .run(source(), pods, &budgets, false)
        .await
        .unwrap();

    assert_eq!(report.phase, CampaignPhase::Done);
    assert_eq!(report.removed(), 0);
    assert_eq!(report.denied, vec!["web-0", "web-1"]);
    assert!(cluster.deleted().await.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_min_available_budget_gates_each_pod() {
    let cluster = Arc::new(MockCluster::with_replacements(Replacements::Ready));
    let pods = vec![
        consumer("web-0").owned_by("rs-0").label("tier", "web").build(),
        consumer("db-0").owned_by("sts-0").label("tier", "db").build(),
        consumer("web-1").owned_by("rs-1").label("tier", "web").build(),
        consumer("db-1").owned_by("sts-1").label("tier", "db").build(),
    ];
    seed(&cluster, &pods).await;
    let budgets = vec![BudgetBuilder::new("default", "db")
        .match_label("tier", "db")
        .min_available(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(2))
        .current_healthy(2)
        .build()];
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = scheduler(&cluster, BatchStrategy::Global, shutdown_rx)
        .run(source(), pods, &budgets, false)
        .await
        .unwrap();

    assert_eq!(report.removed_first, vec!["web-0"]);
    assert_eq!(report.removed_second, vec!["web-1"]);
    assert_eq!(report.denied, vec!["db-0", "db-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_unsafe_mode_removes_everything_in_one_pass() {
    let cluster = Arc::new(MockCluster::new());
    let mut pods = owned_consumers(4);
    pods.push(consumer("guarded").owned_by("rs-g").label("guard", "yes").build());
    seed(&cluster, &pods).await;
    let budgets = vec![BudgetBuilder::new("default", "guard")
        .match_label("guard", "yes")
        .disruptions_allowed(0)
        .build()];
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let started = Instant::now();
    let report = scheduler(&cluster, BatchStrategy::Global, shutdown_rx)
        .run(source(), pods, &budgets, true)
        .await
        .unwrap();

    assert!(report.unsafe_mode);
    assert_eq!(report.phase, CampaignPhase::Done);
    assert_eq!(report.removed_first, vec!["web-0", "web-1", "web-2", "web-3"]);
    assert!(report.removed_second.is_empty());
    assert_eq!(report.denied, vec!["guarded"]);

    // No settle or health gate
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_unowned_pods_are_satisfied_immediately() {
    let cluster = Arc::new(MockCluster::new());
    let pods = vec![consumer("loose-0").build(), consumer("loose-1").build()];
    seed(&cluster, &pods).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let timings = CampaignTimings::default();

    let started = Instant::now();
    let report = scheduler(&cluster, BatchStrategy::Global, shutdown_rx)
        .run(source(), pods, &[], false)
        .await
        .unwrap();

    assert_eq!(report.phase, CampaignPhase::Done);
    assert_eq!(cluster.deleted().await, vec!["loose-0", "loose-1"]);

    // Settle only, no polling rounds
    assert!(started.elapsed() >= timings.settle_interval);
    assert!(started.elapsed() < timings.settle_interval + timings.poll_interval);
}

#[tokio::test(start_paused = true)]
async fn test_failed_delete_is_skipped() {
    let cluster = Arc::new(MockCluster::with_replacements(Replacements::Ready));
    let pods = owned_consumers(3);
    seed(&cluster, &pods).await;
    cluster.fail_delete_of("web-0").await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = scheduler(&cluster, BatchStrategy::Global, shutdown_rx)
        .run(source(), pods, &[], false)
        .await
        .unwrap();

    assert_eq!(report.failed, vec!["web-0"]);
    assert_eq!(report.removed_first, vec!["web-1"]);
    assert_eq!(report.removed_second, vec!["web-2"]);
}

#[tokio::test(start_paused = true)]
async fn test_all_first_batch_deletes_failing_skips_second_batch() {
    let cluster = Arc::new(MockCluster::with_replacements(Replacements::Ready));
    let pods = owned_consumers(4);
    seed(&cluster, &pods).await;
    cluster.fail_delete_of("web-0").await;
    cluster.fail_delete_of("web-1").await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = scheduler(&cluster, BatchStrategy::Global, shutdown_rx)
        .run(source(), pods, &[], false)
        .await
        .unwrap();

    assert_eq!(report.phase, CampaignPhase::Done);
    assert_eq!(report.failed, vec!["web-0", "web-1"]);
    assert!(cluster.deleted().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_per_owner_batching() {
    let cluster = Arc::new(MockCluster::with_replacements(Replacements::Ready));
    let pods = vec![
        consumer("web-1").owned_by("rs-web").build(),
        consumer("web-2").owned_by("rs-web").build(),
        consumer("web-3").owned_by("rs-web").build(),
        consumer("db-1").owned_by("sts-db").build(),
        consumer("db-2").owned_by("sts-db").build(),
    ];
    seed(&cluster, &pods).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = scheduler(&cluster, BatchStrategy::PerOwner, shutdown_rx)
        .run(source(), pods, &[], false)
        .await
        .unwrap();

    assert_eq!(report.strategy, BatchStrategy::PerOwner);
    assert_eq!(report.removed_first, vec!["web-1", "web-2", "db-1"]);
    assert_eq!(report.removed_second, vec!["web-3", "db-2"]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_health_wait() {
    let cluster = Arc::new(MockCluster::with_replacements(Replacements::NotReady));
    let pods = owned_consumers(4);
    seed(&cluster, &pods).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let campaign = tokio::spawn({
        let scheduler = scheduler(&cluster, BatchStrategy::Global, shutdown_rx);
        async move { scheduler.run(source(), pods, &[], false).await }
    });

    tokio::time::sleep(Duration::from_secs(10)).await;
    shutdown_tx.send(true).unwrap();

    let result = campaign.await.unwrap();
    assert!(matches!(result, Err(CampaignError::Cancelled)));
    assert_eq!(cluster.deleted().await, vec!["web-0", "web-1"]);
}
