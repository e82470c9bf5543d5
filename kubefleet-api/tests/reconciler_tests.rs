//! Reconciler Tests
//! Status patching, failure isolation and scheduling of the periodic reconciler

mod common;

use common::*;
use kubefleet_api::config::{ReconcileScope, ReconcilerConfig};
use kubefleet_api::kubernetes::cluster::reconciler::{
    PeriodicReconciler, ReconcilerState, TickReport,
};
use kubefleet_api::kubernetes::error::K8sError;
use kubefleet_api::kubernetes::registry::{ClusterRegistry, InMemoryClusterRegistry};
use kubefleet_api::kubernetes::types::ClusterStatus;
use kubefleet_common::HealthStatus;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn config(scope: ReconcileScope, page_size: u32) -> ReconcilerConfig {
    ReconcilerConfig {
        enabled: true,
        interval_secs: 60,
        page_size,
        scope,
    }
}

fn reconciler(
    registry: Arc<dyn ClusterRegistry>,
    connector: Arc<FakeConnector>,
    config: &ReconcilerConfig,
) -> PeriodicReconciler {
    PeriodicReconciler::new(factory(registry, connector), config, 4)
}

fn one_node(cpu_capacity: &str, cpu_usage: &str) -> FakeCluster {
    FakeCluster::with_nodes(vec![
        FakeNode::new("node1", cpu_capacity, "4Gi").using(cpu_usage, "1000Ki")
    ])
}

#[tokio::test]
async fn test_tick_patches_every_healthy_cluster() {
    let connector = Arc::new(FakeConnector::new());
    connector.set("kc-a", one_node("2", "500m"));
    connector.set("kc-b", FakeCluster::unreachable());
    connector.set("kc-c", one_node("4", "1"));

    let registry = Arc::new(InMemoryClusterRegistry::with_records([
        record("cluster-aaaaaa", "kc-a"),
        record("cluster-bbbbbb", "kc-b"),
        record("cluster-cccccc", "kc-c"),
    ]));
    let reconciler = reconciler(registry.clone(), connector, &config(ReconcileScope::All, 500));

    let report = reconciler.run_tick().await.unwrap();
    assert_eq!(
        report,
        TickReport {
            considered: 3,
            patched: 2,
            skipped: 1,
            failed: 0,
        }
    );
    assert!(matches!(
        report.partial_failure(),
        Some(K8sError::PartialFailure { failed: 1, total: 3 })
    ));

    let a = registry.get("cluster-aaaaaa").await.unwrap().status;
    assert_eq!(a.cpu_capacity, 2000);
    assert_eq!(a.cpu_usage, 500);
    assert_eq!(a.memory_capacity, 4295);
    assert_eq!(a.memory_usage, 2);

    let c = registry.get("cluster-cccccc").await.unwrap().status;
    assert_eq!(c.cpu_capacity, 4000);
    assert_eq!(c.cpu_usage, 1000);

    // skipped cluster keeps its previous status
    let b = registry.get("cluster-bbbbbb").await.unwrap().status;
    assert_eq!(b, ClusterStatus::default());
}

#[tokio::test]
async fn test_totals_do_not_leak_between_clusters() {
    let connector = Arc::new(FakeConnector::new());
    connector.set(
        "kc-a",
        FakeCluster::with_nodes(vec![
            FakeNode::new("node1", "8", "16Gi").using("2", "1Gi"),
            FakeNode::new("node2", "8", "16Gi").using("2", "1Gi"),
        ]),
    );
    connector.set("kc-b", one_node("1", "100m"));

    let registry = Arc::new(InMemoryClusterRegistry::with_records([
        record("cluster-aaaaaa", "kc-a"),
        record("cluster-bbbbbb", "kc-b"),
    ]));
    let reconciler = reconciler(registry.clone(), connector, &config(ReconcileScope::All, 500));

    reconciler.run_tick().await.unwrap();

    let a = registry.get("cluster-aaaaaa").await.unwrap().status;
    let b = registry.get("cluster-bbbbbb").await.unwrap().status;
    assert_eq!(a.cpu_capacity, 16000);
    assert_eq!(a.cpu_usage, 4000);
    assert_eq!(b.cpu_capacity, 1000);
    assert_eq!(b.cpu_usage, 100);
}

#[tokio::test]
async fn test_patch_failure_is_isolated() {
    let connector = Arc::new(FakeConnector::new());
    connector.set("kc", one_node("2", "1"));

    let registry = Arc::new(FlakyRegistry {
        fail_patch: HashSet::from(["cluster-aaaaaa".to_string()]),
        ..FlakyRegistry::with_records([
            record("cluster-aaaaaa", "kc"),
            record("cluster-bbbbbb", "kc"),
        ])
    });
    let reconciler = reconciler(registry.clone(), connector, &config(ReconcileScope::All, 500));

    let report = reconciler.run_tick().await.unwrap();
    assert_eq!(report.patched, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(registry.get("cluster-bbbbbb").await.unwrap().status.cpu_usage, 1000);
}

#[tokio::test]
async fn test_patch_leaves_health_untouched() {
    let connector = Arc::new(FakeConnector::new());
    connector.set("kc", one_node("2", "1"));

    let mut seeded = record("cluster-aaaaaa", "kc");
    seeded.status.health = HealthStatus::Normal;
    let registry = Arc::new(InMemoryClusterRegistry::with_records([seeded]));
    let reconciler = reconciler(registry.clone(), connector, &config(ReconcileScope::All, 500));

    reconciler.run_tick().await.unwrap();

    let status = registry.get("cluster-aaaaaa").await.unwrap().status;
    assert_eq!(status.cpu_usage, 1000);
    assert_eq!(status.health, HealthStatus::Normal);
}

#[tokio::test]
async fn test_registry_failure_ends_tick() {
    let registry = Arc::new(FlakyRegistry {
        fail_list: true,
        ..Default::default()
    });
    let reconciler = reconciler(
        registry,
        Arc::new(FakeConnector::new()),
        &config(ReconcileScope::All, 500),
    );

    assert!(reconciler.run_tick().await.is_err());
    assert_eq!(reconciler.state(), ReconcilerState::Idle);
}

#[tokio::test]
async fn test_scope_controls_batch() {
    let connector = Arc::new(FakeConnector::new());
    connector.set("kc", one_node("2", "1"));

    let records: Vec<_> = (0..5)
        .map(|i| record(&format!("cluster-00000{}", i), "kc"))
        .collect();

    let registry = Arc::new(InMemoryClusterRegistry::with_records(records.clone()));
    let first_page = reconciler(
        registry.clone(),
        connector.clone(),
        &config(ReconcileScope::FirstPage, 2),
    );
    let report = first_page.run_tick().await.unwrap();
    assert_eq!(report.considered, 2);
    assert_eq!(registry.get("cluster-000001").await.unwrap().status.cpu_usage, 1000);
    assert_eq!(registry.get("cluster-000002").await.unwrap().status.cpu_usage, 0);

    let registry = Arc::new(InMemoryClusterRegistry::with_records(records));
    let all = reconciler(registry.clone(), connector, &config(ReconcileScope::All, 2));
    let report = all.run_tick().await.unwrap();
    assert_eq!(report.considered, 5);
    assert_eq!(report.patched, 5);
    assert_eq!(registry.get("cluster-000004").await.unwrap().status.cpu_usage, 1000);
}

#[tokio::test(start_paused = true)]
async fn test_loop_runs_on_interval() {
    let connector = Arc::new(FakeConnector::new());
    connector.set("kc", one_node("2", "500m"));

    let registry = Arc::new(InMemoryClusterRegistry::with_records([record(
        "cluster-aaaaaa",
        "kc",
    )]));
    let reconciler = Arc::new(reconciler(
        registry.clone(),
        connector.clone(),
        &config(ReconcileScope::All, 500),
    ));
    assert_eq!(reconciler.state(), ReconcilerState::Idle);

    let handle = reconciler.clone().start();

    // first pass runs immediately
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(registry.get("cluster-aaaaaa").await.unwrap().status.cpu_usage, 500);

    connector.set("kc", one_node("2", "1500m"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(registry.get("cluster-aaaaaa").await.unwrap().status.cpu_usage, 500);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(registry.get("cluster-aaaaaa").await.unwrap().status.cpu_usage, 1500);
    assert_eq!(reconciler.state(), ReconcilerState::Idle);

    handle.abort();
}
