//! Metrics from metrics-server
//!
//! Fetches live node usage from the `metrics.k8s.io` aggregated API.

use crate::kubernetes::client::K8sClient;
use crate::kubernetes::error::{K8sError, K8sResult};
use crate::kubernetes::types::NodeMetrics;

/// Get metrics for a specific node
pub async fn get_node_metric(client: &K8sClient, name: &str) -> K8sResult<NodeMetrics> {
    let request = http::Request::builder()
        .method(http::Method::GET)
        .uri(format!("/apis/metrics.k8s.io/v1beta1/nodes/{}", name))
        .body(vec![])
        .map_err(|e| K8sError::Internal(e.to_string()))?;

    let response: serde_json::Value = client.inner().request(request).await?;

    parse_node_metrics(name, &response)
}

/// Reduce a `NodeMetrics` object to its usage strings
pub(crate) fn parse_node_metrics(name: &str, response: &serde_json::Value) -> K8sResult<NodeMetrics> {
    let usage = response.get("usage").ok_or_else(|| {
        K8sError::Internal(format!("metrics for node {} carry no usage", name))
    })?;

    Ok(NodeMetrics {
        name: name.to_string(),
        cpu_usage: usage["cpu"].as_str().unwrap_or("0").to_string(),
        memory_usage: usage["memory"].as_str().unwrap_or("0").to_string(),
        timestamp: response["timestamp"].as_str().unwrap_or("").to_string(),
    })
}
