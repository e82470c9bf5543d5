//! Multi-cluster Kubernetes management
//!
//! Provides:
//! - Member cluster registration and lookup through the cluster registry
//! - Per-call clients built from stored kubeconfigs
//! - Capacity and usage aggregation with health classification
//! - Periodic status reconciliation
//! - Prometheus range queries for node metrics
//! - Pass-through deployment management

pub mod client;
pub mod error;
pub mod quantity;
pub mod registry;
pub mod types;

// Sub-modules for different resource types
pub mod cluster;
pub mod cluster_resources;
pub mod observability;
pub mod workloads;

use kubefleet_common::{Page, Pagination};
use rand::Rng;
use std::sync::Arc;

use crate::log_cluster_operation;
use client::{ClusterApi, ClusterClientFactory};
use cluster::aggregator::MetricsAggregator;
use cluster_resources::nodes::node_to_info;
use error::{K8sError, K8sResult};
use observability::monitoring::{get_named_meters_over_time, MonitoringConnector};
use types::{
    ClusterDetail, ClusterRecord, ClusterSpec, ClusterSummary, CreateClusterRequest,
    DeploymentAction, DeploymentInfo, DeploymentRequest, MetricQuery, NamedSeries, NodeInfo,
};

/// Prefix of generated cluster ids
pub const CLUSTER_ID_PREFIX: &str = "cluster-";

const CLUSTER_ID_SUFFIX_LEN: usize = 6;
const CLUSTER_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const CREATE_ATTEMPTS: usize = 5;

/// `cluster-` followed by six random lowercase alphanumerics
pub fn generate_cluster_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..CLUSTER_ID_SUFFIX_LEN)
        .map(|_| CLUSTER_ID_ALPHABET[rng.gen_range(0..CLUSTER_ID_ALPHABET.len())] as char)
        .collect();

    format!("{}{}", CLUSTER_ID_PREFIX, suffix)
}

/// Entry point for every cluster operation exposed over the API
///
/// Holds no client state; every call resolves its cluster through the
/// registry and builds a fresh client.
#[derive(Clone)]
pub struct ClusterService {
    factory: ClusterClientFactory,
    aggregator: MetricsAggregator,
    monitoring: Arc<dyn MonitoringConnector>,
}

impl ClusterService {
    pub fn new(
        factory: ClusterClientFactory,
        monitoring: Arc<dyn MonitoringConnector>,
        list_concurrency: usize,
    ) -> Self {
        Self {
            aggregator: MetricsAggregator::new(factory.clone(), list_concurrency),
            factory,
            monitoring,
        }
    }

    pub async fn get_client(&self, cluster_id: &str) -> K8sResult<Box<dyn ClusterApi>> {
        self.factory.get_client(cluster_id).await
    }

    /// One page of clusters with live totals and health
    pub async fn get_clusters(&self, pagination: Pagination) -> K8sResult<Page<ClusterSummary>> {
        let (list, count) = self.aggregator.list_clusters(&pagination).await?;
        Ok(Page::new(list, count, pagination))
    }

    /// A cluster and its nodes. Unlike listing, any failure is returned.
    pub async fn get_cluster(&self, cluster_id: &str) -> K8sResult<ClusterDetail> {
        let record = self.factory.registry().get(cluster_id).await?;
        let client = self.factory.connect(&record).await?;
        let nodes = Self::node_infos(client.as_ref()).await?;

        Ok(ClusterDetail { record, nodes })
    }

    /// Register a cluster.
    ///
    /// The kubeconfig must yield a client before anything is stored. The
    /// node listing afterwards runs against the stored record; if it fails
    /// the error is returned and the cluster stays registered.
    pub async fn create_cluster(&self, request: CreateClusterRequest) -> K8sResult<ClusterDetail> {
        let spec = Self::validate_create(request)?;

        let candidate = ClusterRecord::new(generate_cluster_id(), spec.clone());
        self.factory.connect(&candidate).await?;

        let record = self.store_new_cluster(candidate.id, spec).await?;
        log_cluster_operation!("create_cluster", record.id, display_name = %record.display_name);

        let client = self.factory.get_client(&record.id).await?;
        let nodes = Self::node_infos(client.as_ref()).await?;

        Ok(ClusterDetail { record, nodes })
    }

    async fn store_new_cluster(&self, first_id: String, spec: ClusterSpec) -> K8sResult<ClusterRecord> {
        let mut id = first_id;
        let mut attempt = 1;

        loop {
            match self.factory.registry().create(&id, spec.clone()).await {
                Err(K8sError::Conflict(msg)) if attempt < CREATE_ATTEMPTS => {
                    tracing::debug!(cluster_id = %id, "{}, retrying with a new id", msg);
                    id = generate_cluster_id();
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn validate_create(request: CreateClusterRequest) -> K8sResult<ClusterSpec> {
        let display_name = request.display_name.trim();
        if display_name.is_empty() {
            return Err(K8sError::InvalidInput("displayname is required".to_string()));
        }
        if request.kubeconfig.trim().is_empty() {
            return Err(K8sError::InvalidInput("kubeconfig is required".to_string()));
        }

        let prometheus_url = request.prometheus_url.trim();
        if !prometheus_url.is_empty() {
            let parsed = url::Url::parse(prometheus_url).map_err(|e| {
                K8sError::InvalidInput(format!("invalid prometheusurl '{}': {}", prometheus_url, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(K8sError::InvalidInput(format!(
                    "prometheusurl '{}' must be http or https",
                    prometheus_url
                )));
            }
        }

        Ok(ClusterSpec {
            kubeconfig: request.kubeconfig,
            display_name: display_name.to_string(),
            prometheus_url: prometheus_url.to_string(),
        })
    }

    pub async fn get_nodes(&self, cluster_id: &str) -> K8sResult<Vec<NodeInfo>> {
        let client = self.factory.get_client(cluster_id).await?;
        Self::node_infos(client.as_ref()).await
    }

    async fn node_infos(client: &dyn ClusterApi) -> K8sResult<Vec<NodeInfo>> {
        let nodes = client.list_nodes().await?;
        Ok(nodes.into_iter().map(node_to_info).collect())
    }

    /// Named metric range query against the cluster's Prometheus.
    ///
    /// Only an invalid query or an unusable monitoring endpoint fails the
    /// call; per-metric failures are reported on their entries.
    pub async fn get_node_metric(
        &self,
        cluster_id: &str,
        query: MetricQuery,
    ) -> K8sResult<Vec<NamedSeries>> {
        query.validate()?;

        let record = self.factory.registry().get(cluster_id).await?;
        if record.prometheus_url.is_empty() {
            return Err(K8sError::UpstreamUnavailable(format!(
                "cluster '{}' has no monitoring endpoint",
                cluster_id
            )));
        }

        let backend = self.monitoring.connect(&record.prometheus_url).await?;
        Ok(get_named_meters_over_time(backend.as_ref(), &query).await)
    }

    pub async fn list_deployments(
        &self,
        cluster_id: &str,
        namespace: &str,
        pagination: Pagination,
    ) -> K8sResult<Page<DeploymentInfo>> {
        let client = self.kube_client(cluster_id).await?;
        let deployments = workloads::deployments::list_deployments(&client, namespace).await?;

        let count = deployments.len();
        let list = pagination.slice(&deployments).to_vec();
        Ok(Page::new(list, count, pagination))
    }

    pub async fn get_deployment(
        &self,
        cluster_id: &str,
        namespace: &str,
        name: &str,
    ) -> K8sResult<DeploymentInfo> {
        let client = self.kube_client(cluster_id).await?;
        workloads::deployments::get_deployment(&client, namespace, name).await
    }

    pub async fn apply_deployment(
        &self,
        cluster_id: &str,
        namespace: &str,
        action: DeploymentAction,
        request: DeploymentRequest,
    ) -> K8sResult<DeploymentInfo> {
        let client = self.kube_client(cluster_id).await?;
        let name = request.name.clone();
        let info =
            workloads::deployments::apply_deployment(&client, namespace, action, request).await?;

        log_cluster_operation!("apply_deployment", cluster_id, deployment = %name, action = ?action);
        Ok(info)
    }

    pub async fn delete_deployment(
        &self,
        cluster_id: &str,
        namespace: &str,
        name: &str,
    ) -> K8sResult<()> {
        let client = self.kube_client(cluster_id).await?;
        workloads::deployments::delete_deployment(&client, namespace, name).await?;

        log_cluster_operation!("delete_deployment", cluster_id, deployment = %name);
        Ok(())
    }

    async fn kube_client(&self, cluster_id: &str) -> K8sResult<kube::Client> {
        self.factory.get_client(cluster_id).await?.kube_client()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(display_name: &str, prometheus_url: &str) -> CreateClusterRequest {
        CreateClusterRequest {
            display_name: display_name.to_string(),
            kubeconfig: "apiVersion: v1".to_string(),
            prometheus_url: prometheus_url.to_string(),
        }
    }

    #[test]
    fn test_generate_cluster_id() {
        let id = generate_cluster_id();
        let suffix = id.strip_prefix(CLUSTER_ID_PREFIX).unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_validate_create() {
        let spec = ClusterService::validate_create(request("  edge  ", "http://prom:9090")).unwrap();
        assert_eq!(spec.display_name, "edge");
        assert_eq!(spec.prometheus_url, "http://prom:9090");

        assert!(ClusterService::validate_create(request("edge", "")).is_ok());
        assert!(matches!(
            ClusterService::validate_create(request(" ", "")),
            Err(K8sError::InvalidInput(_))
        ));
        assert!(matches!(
            ClusterService::validate_create(request("edge", "prom:9090/x y")),
            Err(K8sError::InvalidInput(_))
        ));
        assert!(matches!(
            ClusterService::validate_create(request("edge", "ftp://prom")),
            Err(K8sError::InvalidInput(_))
        ));
    }
}
