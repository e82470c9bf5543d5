//! Periodic status reconciliation
//!
//! A background loop that recomputes every cluster's resource totals and
//! merge-patches them into the registry's status subresource.

use futures::stream::{self, StreamExt};
use kubefleet_common::Pagination;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::aggregator::collect_totals;
use crate::config::{ReconcileScope, ReconcilerConfig};
use crate::kubernetes::client::ClusterClientFactory;
use crate::kubernetes::error::{K8sError, K8sResult};
use crate::kubernetes::types::{ClusterRecord, StatusPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    /// Waiting for the next tick
    Idle,
    /// A pass is in progress
    Running,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub considered: usize,
    pub patched: usize,
    /// Clusters whose client or node list could not be obtained
    pub skipped: usize,
    /// Clusters whose status patch was rejected
    pub failed: usize,
}

impl TickReport {
    pub fn is_partial(&self) -> bool {
        self.skipped + self.failed > 0
    }

    /// `PartialFailure` describing the clusters left unreconciled
    pub fn partial_failure(&self) -> Option<K8sError> {
        self.is_partial().then(|| K8sError::PartialFailure {
            failed: self.skipped + self.failed,
            total: self.considered,
        })
    }
}

enum ClusterOutcome {
    Patched,
    Skipped,
    Failed,
}

pub struct PeriodicReconciler {
    factory: ClusterClientFactory,
    interval: Duration,
    page_size: u32,
    scope: ReconcileScope,
    concurrency: usize,
    running: AtomicBool,
}

impl PeriodicReconciler {
    pub fn new(factory: ClusterClientFactory, config: &ReconcilerConfig, concurrency: usize) -> Self {
        Self {
            factory,
            interval: config.interval(),
            page_size: config.page_size.max(1),
            scope: config.scope,
            concurrency: concurrency.max(1),
            running: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ReconcilerState {
        if self.running.load(Ordering::SeqCst) {
            ReconcilerState::Running
        } else {
            ReconcilerState::Idle
        }
    }

    /// Spawn the reconciliation loop.
    ///
    /// The first pass runs immediately. Passes never overlap; a slow pass
    /// pushes the following tick back.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "Starting cluster status reconciler (interval: {}s, scope: {:?})",
                self.interval.as_secs(),
                self.scope
            );

            loop {
                ticker.tick().await;

                match self.run_tick().await {
                    Ok(report) => match report.partial_failure() {
                        Some(partial) => warn!(
                            patched = report.patched,
                            skipped = report.skipped,
                            failed = report.failed,
                            "{}",
                            partial
                        ),
                        None => debug!(patched = report.patched, "Cluster status reconciled"),
                    },
                    Err(e) => error!("Failed to reconcile cluster status: {}", e),
                }
            }
        })
    }

    /// Run one pass. Fails only when the cluster list cannot be read.
    pub async fn run_tick(&self) -> K8sResult<TickReport> {
        self.running.store(true, Ordering::SeqCst);
        let result = self.reconcile_all().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn reconcile_all(&self) -> K8sResult<TickReport> {
        let records = self.factory.registry().list().await?;

        let batch = match self.scope {
            ReconcileScope::All => records.as_slice(),
            ReconcileScope::FirstPage => Pagination::new(1, self.page_size).slice(&records),
        };

        let mut report = TickReport::default();
        for chunk in batch.chunks(self.page_size as usize) {
            let outcomes: Vec<ClusterOutcome> = stream::iter(chunk.to_vec())
                .map(|record| async move { self.reconcile_cluster(&record).await })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for outcome in outcomes {
                report.considered += 1;
                match outcome {
                    ClusterOutcome::Patched => report.patched += 1,
                    ClusterOutcome::Skipped => report.skipped += 1,
                    ClusterOutcome::Failed => report.failed += 1,
                }
            }
        }

        Ok(report)
    }

    async fn reconcile_cluster(&self, record: &ClusterRecord) -> ClusterOutcome {
        let client = match self.factory.get_client(&record.id).await {
            Ok(client) => client,
            Err(e) => {
                warn!(cluster = %record.id, error = %e, "Skipping cluster: cannot build client");
                return ClusterOutcome::Skipped;
            }
        };

        let observed = match collect_totals(client.as_ref()).await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(cluster = %record.id, error = %e, "Skipping cluster: cannot list nodes");
                return ClusterOutcome::Skipped;
            }
        };

        let patch = StatusPatch::totals(&observed.totals);
        match self.factory.registry().patch_status(&record.id, &patch).await {
            Ok(()) => {
                debug!(
                    cluster = %record.id,
                    cpu_usage = observed.totals.cpu_usage,
                    memory_usage = observed.totals.memory_usage,
                    "Cluster status patched"
                );
                ClusterOutcome::Patched
            }
            Err(e) => {
                error!(cluster = %record.id, error = %e, "Failed to patch cluster status");
                ClusterOutcome::Failed
            }
        }
    }
}
