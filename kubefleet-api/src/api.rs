//! HTTP routes
//!
//! All cluster routes live under `/api/v1alpha1`. Handlers are thin: they
//! decode the request, call `ClusterService` and let `ApiError` render
//! failures.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use kubefleet_common::{Page, Pagination};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::kubernetes::error::K8sError;
use crate::kubernetes::types::{
    ClusterDetail, ClusterSummary, CreateClusterRequest, DeploymentAction, DeploymentInfo,
    DeploymentRequest, MetricQuery, NamedSeries, NodeInfo,
};
use crate::state::AppState;

pub const API_PREFIX: &str = "/api/v1alpha1";

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .merge(cluster_routes())
        .merge(deployment_routes());

    Router::new()
        .route("/healthz", get(health_check))
        .nest(API_PREFIX, api)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

fn cluster_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/clusters", get(list_clusters).post(create_cluster))
        .route("/clusters/:cluster_id", get(get_cluster))
        .route("/clusters/:cluster_id/nodes", get(get_nodes))
        .route(
            "/clusters/:cluster_id/nodes/:node_name/metrics",
            get(get_node_metrics),
        )
}

fn deployment_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/clusters/:cluster_id/namespaces/:namespace/deployments",
            get(list_deployments).post(apply_deployment),
        )
        .route(
            "/clusters/:cluster_id/namespaces/:namespace/deployments/:name",
            get(get_deployment).delete(delete_deployment),
        )
}

async fn health_check() -> &'static str {
    "ok"
}

// =============================================================================
// Clusters
// =============================================================================

async fn list_clusters(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<ClusterSummary>>, ApiError> {
    let page = state.cluster_service.get_clusters(pagination).await?;
    Ok(Json(page))
}

async fn get_cluster(
    State(state): State<Arc<AppState>>,
    Path(cluster_id): Path<String>,
) -> Result<Json<ClusterDetail>, ApiError> {
    let cluster = state.cluster_service.get_cluster(&cluster_id).await?;
    Ok(Json(cluster))
}

async fn get_nodes(
    State(state): State<Arc<AppState>>,
    Path(cluster_id): Path<String>,
) -> Result<Json<Vec<NodeInfo>>, ApiError> {
    let nodes = state.cluster_service.get_nodes(&cluster_id).await?;
    Ok(Json(nodes))
}

async fn create_cluster(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateClusterRequest>,
) -> Result<(StatusCode, Json<ClusterDetail>), ApiError> {
    let cluster = state.cluster_service.create_cluster(payload).await?;
    Ok((StatusCode::CREATED, Json(cluster)))
}

/// Raw query string of the node metrics route
#[derive(Debug, Default, Deserialize)]
struct MetricsParams {
    /// Comma separated metric names
    metrics: Option<String>,
    /// Unix seconds
    start: Option<String>,
    end: Option<String>,
    /// Seconds, optionally suffixed with s, m or h
    step: Option<String>,
}

impl MetricsParams {
    fn into_query(self, node: String) -> Result<MetricQuery, K8sError> {
        let metrics = self
            .metrics
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from)
            .collect();

        let query = MetricQuery {
            metrics,
            start: parse_timestamp("start", self.start.as_deref())?,
            end: parse_timestamp("end", self.end.as_deref())?,
            step: parse_step(self.step.as_deref())?,
            node: Some(node),
        };
        query.validate()?;

        Ok(query)
    }
}

fn parse_timestamp(field: &str, value: Option<&str>) -> Result<DateTime<Utc>, K8sError> {
    let value = value.ok_or_else(|| K8sError::InvalidInput(format!("{} is required", field)))?;

    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| {
            K8sError::InvalidInput(format!("{} must be a unix timestamp, got '{}'", field, value))
        })
}

fn parse_step(value: Option<&str>) -> Result<Duration, K8sError> {
    let value = value.ok_or_else(|| K8sError::InvalidInput("step is required".to_string()))?;
    let trimmed = value.trim();

    let (digits, unit) = match trimmed.char_indices().last() {
        Some((i, 's')) => (&trimmed[..i], 1),
        Some((i, 'm')) => (&trimmed[..i], 60),
        Some((i, 'h')) => (&trimmed[..i], 3600),
        _ => (trimmed, 1),
    };

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(unit))
        .map(Duration::from_secs)
        .ok_or_else(|| K8sError::InvalidInput(format!("invalid step '{}'", value)))
}

async fn get_node_metrics(
    State(state): State<Arc<AppState>>,
    Path((cluster_id, node_name)): Path<(String, String)>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<Vec<NamedSeries>>, ApiError> {
    let query = params.into_query(node_name)?;
    let series = state
        .cluster_service
        .get_node_metric(&cluster_id, query)
        .await?;
    Ok(Json(series))
}

// =============================================================================
// Deployments
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct ActionParams {
    #[serde(default)]
    action: DeploymentAction,
}

async fn list_deployments(
    State(state): State<Arc<AppState>>,
    Path((cluster_id, namespace)): Path<(String, String)>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<DeploymentInfo>>, ApiError> {
    let page = state
        .cluster_service
        .list_deployments(&cluster_id, &namespace, pagination)
        .await?;
    Ok(Json(page))
}

async fn get_deployment(
    State(state): State<Arc<AppState>>,
    Path((cluster_id, namespace, name)): Path<(String, String, String)>,
) -> Result<Json<DeploymentInfo>, ApiError> {
    let deployment = state
        .cluster_service
        .get_deployment(&cluster_id, &namespace, &name)
        .await?;
    Ok(Json(deployment))
}

async fn apply_deployment(
    State(state): State<Arc<AppState>>,
    Path((cluster_id, namespace)): Path<(String, String)>,
    Query(params): Query<ActionParams>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<DeploymentInfo>, ApiError> {
    let request: DeploymentRequest = serde_json::from_value(body)?;
    let deployment = state
        .cluster_service
        .apply_deployment(&cluster_id, &namespace, params.action, request)
        .await?;
    Ok(Json(deployment))
}

async fn delete_deployment(
    State(state): State<Arc<AppState>>,
    Path((cluster_id, namespace, name)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    state
        .cluster_service
        .delete_deployment(&cluster_id, &namespace, &name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
