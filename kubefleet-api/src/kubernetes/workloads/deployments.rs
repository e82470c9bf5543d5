//! Deployment operations
//!
//! Pass-through deployment access on member clusters.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;

use crate::kubernetes::error::{K8sError, K8sResult};
use crate::kubernetes::types::{DeploymentAction, DeploymentInfo, DeploymentRequest};

/// List deployments in a namespace
pub async fn list_deployments(client: &Client, namespace: &str) -> K8sResult<Vec<DeploymentInfo>> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let list = deployments.list(&ListParams::default()).await?;

    Ok(list.items.into_iter().map(deployment_to_info).collect())
}

/// Get a single deployment
pub async fn get_deployment(
    client: &Client,
    namespace: &str,
    name: &str,
) -> K8sResult<DeploymentInfo> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deployment = deployments.get(name).await?;

    Ok(deployment_to_info(deployment))
}

/// Create, dry-run create or scale a deployment
pub async fn apply_deployment(
    client: &Client,
    namespace: &str,
    action: DeploymentAction,
    request: DeploymentRequest,
) -> K8sResult<DeploymentInfo> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);

    let deployment = match action {
        DeploymentAction::Create => {
            let deployment = build_deployment(namespace, request)?;
            deployments.create(&PostParams::default(), &deployment).await?
        }
        DeploymentAction::DryRun => {
            let deployment = build_deployment(namespace, request)?;
            let params = PostParams {
                dry_run: true,
                ..Default::default()
            };
            deployments.create(&params, &deployment).await?
        }
        DeploymentAction::Scale => {
            let replicas = request.replicas.ok_or_else(|| {
                K8sError::InvalidInput("scale requires a replicas count".to_string())
            })?;
            deployments
                .patch(
                    &request.name,
                    &PatchParams::default(),
                    &Patch::Merge(&scale_patch(replicas)?),
                )
                .await?
        }
    };

    Ok(deployment_to_info(deployment))
}

/// Delete a deployment
pub async fn delete_deployment(client: &Client, namespace: &str, name: &str) -> K8sResult<()> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    deployments.delete(name, &DeleteParams::default()).await?;

    Ok(())
}

fn scale_patch(replicas: i32) -> K8sResult<serde_json::Value> {
    if replicas < 0 {
        return Err(K8sError::InvalidInput(format!(
            "replicas must not be negative, got {}",
            replicas
        )));
    }

    Ok(serde_json::json!({
        "spec": {
            "replicas": replicas
        }
    }))
}

/// Deployment object described by a create request
fn build_deployment(namespace: &str, request: DeploymentRequest) -> K8sResult<Deployment> {
    if request.name.is_empty() {
        return Err(K8sError::InvalidInput("deployment name is required".to_string()));
    }

    let spec_value = request
        .spec
        .ok_or_else(|| K8sError::InvalidInput("deployment spec is required".to_string()))?;
    let mut spec: DeploymentSpec = serde_json::from_value(spec_value)
        .map_err(|e| K8sError::InvalidInput(format!("invalid deployment spec: {}", e)))?;

    if let Some(replicas) = request.replicas {
        spec.replicas = Some(replicas);
    }

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(request.name),
            namespace: Some(namespace.to_string()),
            labels: (!request.labels.is_empty()).then_some(request.labels),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    })
}

/// Convert k8s Deployment to DeploymentInfo
fn deployment_to_info(deployment: Deployment) -> DeploymentInfo {
    let metadata = deployment.metadata;
    let spec = deployment.spec.unwrap_or_default();
    let status = deployment.status.unwrap_or_default();

    let strategy = spec
        .strategy
        .and_then(|s| s.type_)
        .unwrap_or_else(|| "RollingUpdate".to_string());

    DeploymentInfo {
        name: metadata.name.unwrap_or_default(),
        namespace: metadata.namespace.unwrap_or_default(),
        replicas: spec.replicas.unwrap_or(0),
        ready_replicas: status.ready_replicas.unwrap_or(0),
        available_replicas: status.available_replicas.unwrap_or(0),
        updated_replicas: status.updated_replicas.unwrap_or(0),
        labels: metadata.labels.unwrap_or_default(),
        selector: spec.selector.match_labels.unwrap_or_default(),
        strategy,
        created_at: metadata.creation_timestamp.map(|t| t.0.to_rfc3339()),
    }
}
