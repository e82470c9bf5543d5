//! Kubernetes types for the kubefleet API
//!
//! The `Cluster` custom resource backing the registry, and the simplified
//! representations returned by the API.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use kubefleet_common::HealthStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::error::{K8sError, K8sResult};

/// Spec of a registered member cluster.
///
/// Stored as the cluster-scoped `clusters.kubecloud.io/v1alpha1` resource in
/// the management cluster.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "kubecloud.io",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    schema = "disabled"
)]
pub struct ClusterSpec {
    /// Kubeconfig YAML used to reach the cluster
    #[serde(default)]
    pub kubeconfig: String,
    #[serde(default, rename = "displayname")]
    pub display_name: String,
    /// Prometheus base URL for range queries
    #[serde(default, rename = "prometheusurl")]
    pub prometheus_url: String,
}

/// Last-known resource totals and health of a cluster.
///
/// CPU values are milli-cores, memory values are megabytes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    #[serde(default)]
    pub cpu_capacity: i64,
    #[serde(default)]
    pub memory_capacity: i64,
    #[serde(default)]
    pub cpu_usage: i64,
    #[serde(default)]
    pub memory_usage: i64,
    #[serde(default)]
    pub health: HealthStatus,
}

/// A registry entry as the rest of the crate sees it
#[derive(Clone, Serialize)]
pub struct ClusterRecord {
    pub id: String,
    pub display_name: String,
    /// Never rendered into responses
    #[serde(skip_serializing)]
    pub kubeconfig: String,
    pub prometheus_url: String,
    pub status: ClusterStatus,
    pub created_at: Option<String>,
}

impl ClusterRecord {
    pub fn new(id: impl Into<String>, spec: ClusterSpec) -> Self {
        Self {
            id: id.into(),
            display_name: spec.display_name,
            kubeconfig: spec.kubeconfig,
            prometheus_url: spec.prometheus_url,
            status: ClusterStatus::default(),
            created_at: Some(Utc::now().to_rfc3339()),
        }
    }
}

impl std::fmt::Debug for ClusterRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRecord")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("kubeconfig", &"<redacted>")
            .field("prometheus_url", &self.prometheus_url)
            .field("status", &self.status)
            .finish()
    }
}

impl From<Cluster> for ClusterRecord {
    fn from(cluster: Cluster) -> Self {
        Self {
            id: cluster.metadata.name.unwrap_or_default(),
            display_name: cluster.spec.display_name,
            kubeconfig: cluster.spec.kubeconfig,
            prometheus_url: cluster.spec.prometheus_url,
            status: cluster.status.unwrap_or_default(),
            created_at: cluster
                .metadata
                .creation_timestamp
                .map(|t| t.0.to_rfc3339()),
        }
    }
}

/// Merge patch for the status subresource. Absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatusPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_capacity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_capacity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,
}

impl StatusPatch {
    /// Patch carrying the four resource totals
    pub fn totals(totals: &ResourceTotals) -> Self {
        Self {
            cpu_usage: Some(totals.cpu_usage),
            memory_usage: Some(totals.memory_usage),
            cpu_capacity: Some(totals.cpu_capacity),
            memory_capacity: Some(totals.memory_capacity),
            health: None,
        }
    }

    pub fn health(health: HealthStatus) -> Self {
        Self {
            health: Some(health),
            ..Default::default()
        }
    }

    /// JSON merge patch document for the status subresource
    pub fn to_merge_patch(&self) -> serde_json::Value {
        serde_json::json!({ "status": self })
    }

    /// Apply the patch to a status in place
    pub fn apply(&self, status: &mut ClusterStatus) {
        if let Some(v) = self.cpu_usage {
            status.cpu_usage = v;
        }
        if let Some(v) = self.memory_usage {
            status.memory_usage = v;
        }
        if let Some(v) = self.cpu_capacity {
            status.cpu_capacity = v;
        }
        if let Some(v) = self.memory_capacity {
            status.memory_capacity = v;
        }
        if let Some(h) = self.health {
            status.health = h;
        }
    }
}

/// Request to register a new cluster
#[derive(Debug, Clone, Deserialize)]
pub struct CreateClusterRequest {
    #[serde(rename = "displayname", alias = "display_name")]
    pub display_name: String,
    /// Kubeconfig content (YAML)
    pub kubeconfig: String,
    #[serde(default, rename = "prometheusurl", alias = "prometheus_url")]
    pub prometheus_url: String,
}

/// Kubernetes version information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8sVersion {
    pub server: String,
    pub git_version: String,
    pub git_commit: String,
    pub build_date: String,
    pub platform: String,
}

/// Capacity and live usage of one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeResourceSample {
    pub node: String,
    pub cpu_capacity_millicores: i64,
    pub cpu_usage_millicores: i64,
    pub memory_capacity_megabytes: i64,
    pub memory_usage_megabytes: i64,
}

/// Resource totals summed over a cluster's nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTotals {
    pub cpu_capacity: i64,
    pub cpu_usage: i64,
    pub memory_capacity: i64,
    pub memory_usage: i64,
}

impl ResourceTotals {
    pub fn add(&mut self, sample: &NodeResourceSample) {
        self.cpu_capacity = self.cpu_capacity.saturating_add(sample.cpu_capacity_millicores);
        self.cpu_usage = self.cpu_usage.saturating_add(sample.cpu_usage_millicores);
        self.memory_capacity = self
            .memory_capacity
            .saturating_add(sample.memory_capacity_megabytes);
        self.memory_usage = self.memory_usage.saturating_add(sample.memory_usage_megabytes);
    }

    pub fn cpu_utilization(&self) -> f64 {
        utilization(self.cpu_usage, self.cpu_capacity)
    }

    pub fn memory_utilization(&self) -> f64 {
        utilization(self.memory_usage, self.memory_capacity)
    }
}

/// `usage / capacity` with the capacity floored at 1
pub fn utilization(usage: i64, capacity: i64) -> f64 {
    usage.max(0) as f64 / capacity.max(1) as f64
}

impl<'a> FromIterator<&'a NodeResourceSample> for ResourceTotals {
    fn from_iter<I: IntoIterator<Item = &'a NodeResourceSample>>(iter: I) -> Self {
        let mut totals = ResourceTotals::default();
        for sample in iter {
            totals.add(sample);
        }
        totals
    }
}

/// A cluster record enriched with freshly observed numbers
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    #[serde(flatten)]
    pub record: ClusterRecord,
    pub health_status: HealthStatus,
    pub version: Option<String>,
    pub node_count: usize,
    pub totals: ResourceTotals,
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
}

impl ClusterSummary {
    /// Summary for a cluster that could not be inspected
    pub fn abnormal(record: ClusterRecord) -> Self {
        Self {
            record,
            health_status: HealthStatus::Abnormal,
            version: None,
            node_count: 0,
            totals: ResourceTotals::default(),
            cpu_utilization: 0.0,
            memory_utilization: 0.0,
        }
    }

    /// Summary of an inspected cluster. Reported capacities are floored at 1
    /// like the utilization denominators.
    pub fn observed(
        record: ClusterRecord,
        totals: ResourceTotals,
        node_count: usize,
        version: Option<String>,
    ) -> Self {
        let totals = ResourceTotals {
            cpu_capacity: totals.cpu_capacity.max(1),
            memory_capacity: totals.memory_capacity.max(1),
            ..totals
        };

        Self {
            record,
            health_status: HealthStatus::Normal,
            version,
            node_count,
            cpu_utilization: totals.cpu_utilization(),
            memory_utilization: totals.memory_utilization(),
            totals,
        }
    }
}

/// A cluster record together with its current node list
#[derive(Debug, Clone, Serialize)]
pub struct ClusterDetail {
    #[serde(flatten)]
    pub record: ClusterRecord,
    pub nodes: Vec<NodeInfo>,
}

/// Simplified node information
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub name: String,
    pub status: NodeStatus,
    pub roles: Vec<String>,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub os_image: String,
    pub kernel_version: String,
    pub container_runtime: String,
    pub kubelet_version: String,
    pub capacity_cpu: String,
    pub capacity_memory: String,
    pub allocatable_cpu: String,
    pub allocatable_memory: String,
    pub conditions: Vec<NodeCondition>,
    pub created_at: Option<String>,
}

/// Node status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Ready,
    NotReady,
}

/// Node condition
#[derive(Debug, Clone, Serialize)]
pub struct NodeCondition {
    pub condition_type: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// Live usage of a node from metrics-server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub name: String,
    pub cpu_usage: String,
    pub memory_usage: String,
    pub timestamp: String,
}

/// One range query over named metrics
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub metrics: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
    /// Restrict series to this node
    pub node: Option<String>,
}

impl MetricQuery {
    pub fn validate(&self) -> K8sResult<()> {
        if self.metrics.is_empty() {
            return Err(K8sError::InvalidInput(
                "at least one metric name is required".to_string(),
            ));
        }
        if self.start > self.end {
            return Err(K8sError::InvalidInput(format!(
                "start {} is after end {}",
                self.start.timestamp(),
                self.end.timestamp()
            )));
        }
        if self.step.is_zero() {
            return Err(K8sError::InvalidInput("step must be positive".to_string()));
        }
        Ok(())
    }
}

/// Result of one named metric. `error` is set when that metric failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedSeries {
    pub metric_name: String,
    #[serde(default)]
    pub series: Vec<TimeSeries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NamedSeries {
    pub fn ok(metric_name: &str, series: Vec<TimeSeries>) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            series,
            error: None,
        }
    }

    pub fn failed(metric_name: &str, error: &K8sError) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            series: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub labels: BTreeMap<String, String>,
    pub points: Vec<SamplePoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    /// Unix seconds
    pub timestamp: f64,
    pub value: f64,
}

/// Simplified deployment information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
    pub updated_replicas: i32,
    pub labels: BTreeMap<String, String>,
    pub selector: BTreeMap<String, String>,
    pub strategy: String,
    pub created_at: Option<String>,
}

/// What a deployment POST should do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentAction {
    #[default]
    Create,
    DryRun,
    Scale,
}

/// Body of a deployment POST
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentRequest {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Deployment spec; required for create and dry-run
    #[serde(default)]
    pub spec: Option<serde_json::Value>,
    /// Target replica count; required for scale
    #[serde(default)]
    pub replicas: Option<i32>,
}
