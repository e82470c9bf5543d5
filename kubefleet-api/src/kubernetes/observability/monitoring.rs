//! Prometheus range queries for named node metrics
//!
//! Each cluster record carries the base URL of its Prometheus. Requests name
//! metrics from a fixed catalog; every name is resolved and queried on its
//! own so one failing metric never hides the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::kubernetes::error::{K8sError, K8sResult};
use crate::kubernetes::types::{MetricQuery, NamedSeries, SamplePoint, TimeSeries};

/// Metric names understood by `get_named_meters_over_time` and their
/// PromQL. `$1` is replaced by the label filter.
const NODE_METRICS: &[(&str, &str)] = &[
    ("node_cpu_utilisation", "node:node_cpu_utilisation:avg1m{$1}"),
    ("node_cpu_total", "node:node_num_cpu:sum{$1}"),
    (
        "node_cpu_usage",
        "round(node:node_cpu_utilisation:avg1m{$1} * node:node_num_cpu:sum{$1}, 0.001)",
    ),
    ("node_memory_utilisation", "node:node_memory_utilisation:{$1}"),
    ("node_memory_available", "node:node_memory_bytes_available:sum{$1}"),
    ("node_memory_total", "node:node_memory_bytes_total:sum{$1}"),
    (
        "node_memory_usage_wo_cache",
        "node:node_memory_bytes_total:sum{$1} - node:node_memory_bytes_available:sum{$1}",
    ),
    ("node_net_utilisation", "node:node_net_utilisation:sum_irate{$1}"),
    ("node_net_bytes_transmitted", "node:node_net_bytes_transmitted:sum_irate{$1}"),
    ("node_net_bytes_received", "node:node_net_bytes_received:sum_irate{$1}"),
    ("node_disk_read_iops", "node:data_volume_iops_reads:sum{$1}"),
    ("node_disk_write_iops", "node:data_volume_iops_writes:sum{$1}"),
    ("node_disk_read_throughput", "node:data_volume_throughput_bytes_read:sum{$1}"),
    ("node_disk_write_throughput", "node:data_volume_throughput_bytes_written:sum{$1}"),
    ("node_disk_size_utilisation", "node:disk_space_utilization:ratio{$1}"),
    ("node_load1", "node:load1:ratio{$1}"),
    ("node_load5", "node:load5:ratio{$1}"),
    ("node_load15", "node:load15:ratio{$1}"),
    ("node_pod_count", "node:pod_count:sum{$1}"),
    ("node_pod_running_count", "node:pod_running:count{$1}"),
];

/// PromQL for a catalog metric, restricted to `node` when given
pub fn metric_expression(name: &str, node: Option<&str>) -> Option<String> {
    let (_, template) = NODE_METRICS.iter().find(|(metric, _)| *metric == name)?;

    let filter = match node {
        Some(node) => format!(
            "node=\"{}\"",
            node.replace('\\', "\\\\").replace('"', "\\\"")
        ),
        None => String::new(),
    };

    Some(template.replace("$1", &filter))
}

/// A time-series backend able to answer range queries
#[async_trait]
pub trait MonitoringBackend: Send + Sync {
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> K8sResult<Vec<TimeSeries>>;
}

/// Builds a backend client for a cluster's monitoring endpoint
#[async_trait]
pub trait MonitoringConnector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> K8sResult<Box<dyn MonitoringBackend>>;
}

/// Run every named metric of `query` and collect the results in request
/// order. Unknown names and failed queries are reported per metric.
pub async fn get_named_meters_over_time(
    backend: &dyn MonitoringBackend,
    query: &MetricQuery,
) -> Vec<NamedSeries> {
    let requests = query.metrics.iter().map(|name| async move {
        let Some(expression) = metric_expression(name, query.node.as_deref()) else {
            let err = K8sError::MonitoringQuery(format!("unknown metric '{}'", name));
            return NamedSeries::failed(name, &err);
        };

        match backend
            .query_range(&expression, query.start, query.end, query.step)
            .await
        {
            Ok(series) => NamedSeries::ok(name, series),
            Err(e) => {
                tracing::warn!(metric = %name, error = %e, "Metric query failed");
                NamedSeries::failed(name, &e)
            }
        }
    });

    join_all(requests).await
}

/// Connector producing `PrometheusClient`s
#[derive(Debug, Clone)]
pub struct PrometheusConnector {
    timeout: Duration,
}

impl PrometheusConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl MonitoringConnector for PrometheusConnector {
    async fn connect(&self, endpoint: &str) -> K8sResult<Box<dyn MonitoringBackend>> {
        let client = PrometheusClient::connect(endpoint, self.timeout).await?;
        Ok(Box::new(client))
    }
}

/// HTTP client for the Prometheus query API
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    base_url: String,
    http_client: Client,
}

impl PrometheusClient {
    /// Validate `endpoint` and probe `/-/healthy`.
    ///
    /// Any failure, including an unhealthy probe, is `UpstreamUnavailable`.
    pub async fn connect(endpoint: &str, timeout: Duration) -> K8sResult<Self> {
        let client = Self::new(endpoint, timeout)?;

        let url = format!("{}/-/healthy", client.base_url);
        let response = client.http_client.get(&url).send().await.map_err(|e| {
            K8sError::UpstreamUnavailable(format!("prometheus at {} unreachable: {}", endpoint, e))
        })?;

        if !response.status().is_success() {
            return Err(K8sError::UpstreamUnavailable(format!(
                "prometheus at {} is not healthy: HTTP {}",
                endpoint,
                response.status()
            )));
        }

        Ok(client)
    }

    fn new(endpoint: &str, timeout: Duration) -> K8sResult<Self> {
        let parsed = url::Url::parse(endpoint).map_err(|e| {
            K8sError::UpstreamUnavailable(format!("invalid monitoring endpoint '{}': {}", endpoint, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(K8sError::UpstreamUnavailable(format!(
                "monitoring endpoint '{}' must be http or https",
                endpoint
            )));
        }

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| K8sError::UpstreamUnavailable(format!("http client: {}", e)))?;

        Ok(Self {
            base_url: endpoint.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl MonitoringBackend for PrometheusClient {
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> K8sResult<Vec<TimeSeries>> {
        let url = format!(
            "{}/api/v1/query_range?query={}&start={}&end={}&step={}",
            self.base_url,
            urlencoding::encode(query),
            start.timestamp(),
            end.timestamp(),
            step.as_secs_f64()
        );

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| K8sError::MonitoringQuery(format!("request failed: {}", e)))?;

        let status = response.status();
        let body: PrometheusResponse = response.json().await.map_err(|e| {
            K8sError::MonitoringQuery(format!("undecodable response (HTTP {}): {}", status, e))
        })?;

        body.into_series()
    }
}

#[derive(Debug, Deserialize)]
struct PrometheusResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<PrometheusData>,
}

#[derive(Debug, Deserialize)]
struct PrometheusData {
    #[serde(default)]
    result: Vec<PrometheusResult>,
}

#[derive(Debug, Deserialize)]
struct PrometheusResult {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl PrometheusResponse {
    fn into_series(self) -> K8sResult<Vec<TimeSeries>> {
        if self.status != "success" {
            return Err(K8sError::MonitoringQuery(
                self.error.unwrap_or_else(|| format!("query status {}", self.status)),
            ));
        }

        let results = self.data.map(|d| d.result).unwrap_or_default();

        Ok(results
            .into_iter()
            .map(|r| TimeSeries {
                labels: r.metric,
                points: r
                    .values
                    .into_iter()
                    .filter_map(|(timestamp, value)| {
                        value
                            .parse::<f64>()
                            .ok()
                            .map(|value| SamplePoint { timestamp, value })
                    })
                    .collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_expression_with_node_filter() {
        assert_eq!(
            metric_expression("node_load1", Some("worker-1")).as_deref(),
            Some("node:load1:ratio{node=\"worker-1\"}")
        );
        assert_eq!(
            metric_expression("node_load1", None).as_deref(),
            Some("node:load1:ratio{}")
        );
        assert_eq!(metric_expression("made_up", None), None);
    }

    #[test]
    fn test_filter_is_escaped() {
        let expr = metric_expression("node_pod_count", Some("a\"b")).unwrap();
        assert_eq!(expr, "node:pod_count:sum{node=\"a\\\"b\"}");
    }

    #[test]
    fn test_parse_success_response() {
        let body: PrometheusResponse = serde_json::from_value(serde_json::json!({
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [{
                    "metric": { "node": "worker-1" },
                    "values": [[1714550400.0, "0.25"], [1714550460.0, "NaN"], [1714550520.0, "oops"]]
                }]
            }
        }))
        .unwrap();

        let series = body.into_series().unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].labels.get("node").map(String::as_str), Some("worker-1"));
        assert_eq!(series[0].points.len(), 2);
        assert_eq!(series[0].points[0].value, 0.25);
    }

    #[test]
    fn test_parse_error_response() {
        let body: PrometheusResponse = serde_json::from_value(serde_json::json!({
            "status": "error",
            "errorType": "bad_data",
            "error": "parse error at char 4"
        }))
        .unwrap();

        match body.into_series() {
            Err(K8sError::MonitoringQuery(msg)) => assert!(msg.contains("parse error")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_non_http_endpoint() {
        let result = PrometheusClient::connect("ftp://prom:9090", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(K8sError::UpstreamUnavailable(_))));

        let result = PrometheusClient::connect("not a url", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(K8sError::UpstreamUnavailable(_))));
    }
}
