//! Cluster resource aggregation and health classification
//!
//! Sums node capacity and live usage into cluster totals. A cluster is
//! `Abnormal` exactly when its client cannot be built or its nodes cannot be
//! listed; a node whose usage cannot be read is left out of the totals and
//! does not change the cluster's health.

use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::Node;
use kubefleet_common::Pagination;
use tracing::{debug, warn};

use crate::kubernetes::client::{ClusterApi, ClusterClientFactory};
use crate::kubernetes::cluster_resources::nodes::{node_capacity, node_name};
use crate::kubernetes::error::K8sResult;
use crate::kubernetes::quantity;
use crate::kubernetes::types::{
    ClusterRecord, ClusterSummary, NodeMetrics, NodeResourceSample, ResourceTotals, StatusPatch,
};

/// Totals of one cluster and the number of nodes it reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterTotals {
    pub totals: ResourceTotals,
    pub node_count: usize,
    /// Nodes left out because their usage could not be read
    pub skipped_nodes: usize,
}

/// List the cluster's nodes and sum their capacity and usage.
///
/// Fails only when the node list itself cannot be fetched.
pub async fn collect_totals(api: &dyn ClusterApi) -> K8sResult<ClusterTotals> {
    let nodes = api.list_nodes().await?;

    let mut result = ClusterTotals {
        node_count: nodes.len(),
        ..Default::default()
    };

    for node in &nodes {
        let name = node_name(node);
        match api.node_metrics(name).await {
            Ok(metrics) => result.totals.add(&sample_node(node, &metrics)),
            Err(e) => {
                result.skipped_nodes += 1;
                warn!(
                    cluster = api.cluster_id(),
                    node = name,
                    error = %e,
                    "Skipping node without usage metrics"
                );
            }
        }
    }

    Ok(result)
}

/// Capacity and usage of one node in milli-cores and megabytes
pub fn sample_node(node: &Node, metrics: &NodeMetrics) -> NodeResourceSample {
    let name = node_name(node);
    let (cpu_capacity, memory_capacity) = node_capacity(node);

    NodeResourceSample {
        node: name.to_string(),
        cpu_capacity_millicores: to_units(name, "cpu capacity", cpu_capacity, quantity::to_millicores),
        cpu_usage_millicores: to_units(
            name,
            "cpu usage",
            Some(metrics.cpu_usage.as_str()),
            quantity::to_millicores,
        ),
        memory_capacity_megabytes: to_units(
            name,
            "memory capacity",
            memory_capacity,
            quantity::to_megabytes,
        ),
        memory_usage_megabytes: to_units(
            name,
            "memory usage",
            Some(metrics.memory_usage.as_str()),
            quantity::to_megabytes,
        ),
    }
}

/// Missing quantities count as zero; unparseable ones too, with a warning
fn to_units(node: &str, what: &str, value: Option<&str>, convert: fn(&str) -> Option<i64>) -> i64 {
    let Some(value) = value else {
        return 0;
    };

    convert(value).unwrap_or_else(|| {
        warn!(node, quantity = value, "Unparseable {} quantity, counting as zero", what);
        0
    })
}

/// Computes enriched cluster listings
#[derive(Clone)]
pub struct MetricsAggregator {
    factory: ClusterClientFactory,
    concurrency: usize,
}

impl MetricsAggregator {
    pub fn new(factory: ClusterClientFactory, concurrency: usize) -> Self {
        Self {
            factory,
            concurrency: concurrency.max(1),
        }
    }

    /// Observe one cluster. Never fails; problems show up as `Abnormal`.
    pub async fn summarize(&self, record: ClusterRecord) -> ClusterSummary {
        let client = match self.factory.get_client(&record.id).await {
            Ok(client) => client,
            Err(e) => {
                warn!(cluster = %record.id, error = %e, "Cannot build cluster client");
                return ClusterSummary::abnormal(record);
            }
        };

        let observed = match collect_totals(client.as_ref()).await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(cluster = %record.id, error = %e, "Cannot list cluster nodes");
                return ClusterSummary::abnormal(record);
            }
        };

        let version = match client.server_version().await {
            Ok(version) => Some(version.git_version),
            Err(e) => {
                debug!(cluster = %record.id, error = %e, "Version discovery failed");
                None
            }
        };

        ClusterSummary::observed(record, observed.totals, observed.node_count, version)
    }

    /// One page of enriched clusters plus the size of the whole registry.
    ///
    /// Output order follows registry order. Only a registry failure fails
    /// the call.
    pub async fn list_clusters(
        &self,
        pagination: &Pagination,
    ) -> K8sResult<(Vec<ClusterSummary>, usize)> {
        let records = self.factory.registry().list().await?;
        let total = records.len();
        let page = pagination.slice(&records).to_vec();

        let summaries = stream::iter(page)
            .map(|record| async move {
                let mut summary = self.summarize(record).await;
                self.record_health(&mut summary).await;
                summary
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok((summaries, total))
    }

    async fn record_health(&self, summary: &mut ClusterSummary) {
        let health = summary.health_status;
        summary.record.status.health = health;

        if let Err(e) = self
            .factory
            .registry()
            .patch_status(&summary.record.id, &StatusPatch::health(health))
            .await
        {
            warn!(
                cluster = %summary.record.id,
                health = %health,
                error = %e,
                "Failed to persist cluster health"
            );
        }
    }
}
