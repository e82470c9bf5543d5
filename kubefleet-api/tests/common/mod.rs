//! Common test utilities and fakes
//!
//! Member clusters are simulated by `FakeCluster`s registered with a
//! `FakeConnector` under the kubeconfig string their records carry.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use kubefleet_api::kubernetes::client::{ClusterApi, ClusterClientFactory, ClusterConnector};
use kubefleet_api::kubernetes::error::{K8sError, K8sResult};
use kubefleet_api::kubernetes::observability::monitoring::{MonitoringBackend, MonitoringConnector};
use kubefleet_api::kubernetes::registry::{ClusterRegistry, InMemoryClusterRegistry};
use kubefleet_api::kubernetes::types::{
    ClusterRecord, ClusterSpec, K8sVersion, NodeMetrics, SamplePoint, StatusPatch, TimeSeries,
};
use kubefleet_api::kubernetes::ClusterService;

/// Kubeconfig value the fake connector refuses to parse
pub const MALFORMED_KUBECONFIG: &str = "clusters: [not: {valid";

#[derive(Debug, Clone)]
pub struct FakeNode {
    pub name: String,
    pub cpu_capacity: String,
    pub memory_capacity: String,
    /// `(cpu, memory)` usage; `None` makes the metrics call fail
    pub usage: Option<(String, String)>,
}

impl FakeNode {
    pub fn new(name: &str, cpu_capacity: &str, memory_capacity: &str) -> Self {
        Self {
            name: name.to_string(),
            cpu_capacity: cpu_capacity.to_string(),
            memory_capacity: memory_capacity.to_string(),
            usage: Some(("0".to_string(), "0".to_string())),
        }
    }

    pub fn using(mut self, cpu: &str, memory: &str) -> Self {
        self.usage = Some((cpu.to_string(), memory.to_string()));
        self
    }

    pub fn without_metrics(mut self) -> Self {
        self.usage = None;
        self
    }

    fn to_node(&self) -> Node {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": { "name": self.name },
            "status": {
                "capacity": { "cpu": self.cpu_capacity, "memory": self.memory_capacity },
                "conditions": [{ "type": "Ready", "status": "True" }]
            }
        }))
        .expect("valid node fixture")
    }
}

/// Scripted member cluster
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    pub nodes: Vec<FakeNode>,
    pub fail_node_list: bool,
    pub fail_version: bool,
}

impl FakeCluster {
    pub fn with_nodes(nodes: Vec<FakeNode>) -> Self {
        Self {
            nodes,
            ..Default::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            fail_node_list: true,
            ..Default::default()
        }
    }
}

/// Client handle bound to one record and a snapshot of its fake cluster
pub struct FakeClusterApi {
    cluster_id: String,
    cluster: FakeCluster,
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    async fn list_nodes(&self) -> K8sResult<Vec<Node>> {
        if self.cluster.fail_node_list {
            return Err(K8sError::UpstreamUnavailable(format!(
                "{}: connection refused",
                self.cluster_id
            )));
        }
        Ok(self.cluster.nodes.iter().map(FakeNode::to_node).collect())
    }

    async fn node_metrics(&self, node: &str) -> K8sResult<NodeMetrics> {
        let fake = self
            .cluster
            .nodes
            .iter()
            .find(|n| n.name == node)
            .ok_or_else(|| K8sError::Internal(format!("no node {}", node)))?;

        let (cpu, memory) = fake
            .usage
            .clone()
            .ok_or_else(|| K8sError::UpstreamUnavailable(format!("no metrics for {}", node)))?;

        Ok(NodeMetrics {
            name: node.to_string(),
            cpu_usage: cpu,
            memory_usage: memory,
            timestamp: String::new(),
        })
    }

    async fn server_version(&self) -> K8sResult<K8sVersion> {
        if self.cluster.fail_version {
            return Err(K8sError::UpstreamUnavailable("discovery failed".to_string()));
        }
        Ok(K8sVersion {
            server: "https://fake:6443".to_string(),
            git_version: "v1.32.0".to_string(),
            git_commit: String::new(),
            build_date: String::new(),
            platform: "linux/amd64".to_string(),
        })
    }

    fn kube_client(&self) -> K8sResult<kube::Client> {
        Err(K8sError::Internal("fake clusters have no kube client".to_string()))
    }
}

/// Connector resolving a record's kubeconfig string to a fake cluster
#[derive(Default)]
pub struct FakeConnector {
    clusters: RwLock<HashMap<String, FakeCluster>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the cluster reachable with `kubeconfig`
    pub fn set(&self, kubeconfig: &str, cluster: FakeCluster) {
        self.clusters
            .write()
            .expect("connector lock")
            .insert(kubeconfig.to_string(), cluster);
    }

    /// Number of client handles built so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterConnector for FakeConnector {
    async fn connect(&self, record: &ClusterRecord) -> K8sResult<Box<dyn ClusterApi>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let cluster = self
            .clusters
            .read()
            .expect("connector lock")
            .get(&record.kubeconfig)
            .cloned()
            .ok_or_else(|| K8sError::invalid_credential(&record.id, "unparseable kubeconfig"))?;

        Ok(Box::new(FakeClusterApi {
            cluster_id: record.id.clone(),
            cluster,
        }))
    }
}

/// In-memory registry that can be told to fail
#[derive(Default)]
pub struct FlakyRegistry {
    pub inner: InMemoryClusterRegistry,
    pub fail_list: bool,
    pub fail_patch: HashSet<String>,
}

impl FlakyRegistry {
    pub fn with_records(records: impl IntoIterator<Item = ClusterRecord>) -> Self {
        Self {
            inner: InMemoryClusterRegistry::with_records(records),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ClusterRegistry for FlakyRegistry {
    async fn list(&self) -> K8sResult<Vec<ClusterRecord>> {
        if self.fail_list {
            return Err(K8sError::UpstreamUnavailable("registry unreachable".to_string()));
        }
        self.inner.list().await
    }

    async fn get(&self, id: &str) -> K8sResult<ClusterRecord> {
        self.inner.get(id).await
    }

    async fn create(&self, id: &str, spec: ClusterSpec) -> K8sResult<ClusterRecord> {
        self.inner.create(id, spec).await
    }

    async fn patch_status(&self, id: &str, patch: &StatusPatch) -> K8sResult<()> {
        if self.fail_patch.contains(id) {
            return Err(K8sError::Internal(format!("patch of {} rejected", id)));
        }
        self.inner.patch_status(id, patch).await
    }
}

/// Record whose kubeconfig is the key `kubeconfig` of a fake cluster
pub fn record(id: &str, kubeconfig: &str) -> ClusterRecord {
    ClusterRecord::new(
        id,
        ClusterSpec {
            kubeconfig: kubeconfig.to_string(),
            display_name: id.to_string(),
            prometheus_url: String::new(),
        },
    )
}

pub fn record_with_prometheus(id: &str, kubeconfig: &str, url: &str) -> ClusterRecord {
    let mut record = record(id, kubeconfig);
    record.prometheus_url = url.to_string();
    record
}

pub fn factory(registry: Arc<dyn ClusterRegistry>, connector: Arc<FakeConnector>) -> ClusterClientFactory {
    ClusterClientFactory::new(registry, connector)
}

pub fn service(
    registry: Arc<dyn ClusterRegistry>,
    connector: Arc<FakeConnector>,
    monitoring: Arc<dyn MonitoringConnector>,
) -> ClusterService {
    ClusterService::new(factory(registry, connector), monitoring, 4)
}

/// Monitoring backend answering every query with one series, except
/// queries containing `fail_on`
#[derive(Clone, Default)]
pub struct FakeBackend {
    pub fail_on: Option<String>,
    pub queries: Arc<RwLock<Vec<String>>>,
}

#[async_trait]
impl MonitoringBackend for FakeBackend {
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _step: Duration,
    ) -> K8sResult<Vec<TimeSeries>> {
        self.queries
            .write()
            .expect("queries lock")
            .push(query.to_string());

        if let Some(needle) = &self.fail_on {
            if query.contains(needle.as_str()) {
                return Err(K8sError::MonitoringQuery(format!("bad_data: {}", query)));
            }
        }

        Ok(vec![TimeSeries {
            labels: BTreeMap::from([("node".to_string(), "worker-1".to_string())]),
            points: vec![SamplePoint {
                timestamp: start.timestamp() as f64,
                value: 0.5,
            }],
        }])
    }
}

/// Connector handing out `FakeBackend` for any endpoint
#[derive(Clone, Default)]
pub struct FakeMonitoring {
    pub backend: FakeBackend,
    pub endpoints: Arc<RwLock<Vec<String>>>,
}

#[async_trait]
impl MonitoringConnector for FakeMonitoring {
    async fn connect(&self, endpoint: &str) -> K8sResult<Box<dyn MonitoringBackend>> {
        self.endpoints
            .write()
            .expect("endpoints lock")
            .push(endpoint.to_string());
        Ok(Box::new(self.backend.clone()))
    }
}
