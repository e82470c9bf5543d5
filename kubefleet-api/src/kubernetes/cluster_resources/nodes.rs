//! Node operations
//!
//! Lists nodes and reduces them to capacity figures and API summaries.

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams};
use std::collections::BTreeMap;

use crate::kubernetes::client::K8sClient;
use crate::kubernetes::error::K8sResult;
use crate::kubernetes::types::{NodeCondition, NodeInfo, NodeStatus};

/// List all nodes
pub async fn list_nodes(client: &K8sClient) -> K8sResult<Vec<Node>> {
    let nodes: Api<Node> = Api::all(client.inner().clone());
    let list = nodes.list(&ListParams::default()).await?;

    Ok(list.items)
}

/// Declared capacity of a node as raw quantity strings `(cpu, memory)`
pub fn node_capacity(node: &Node) -> (Option<&str>, Option<&str>) {
    let capacity = node.status.as_ref().and_then(|s| s.capacity.as_ref());

    let cpu = capacity.and_then(|c| c.get("cpu")).map(|q| q.0.as_str());
    let memory = capacity.and_then(|c| c.get("memory")).map(|q| q.0.as_str());

    (cpu, memory)
}

pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

fn quantity_string(list: Option<&BTreeMap<String, Quantity>>, key: &str) -> String {
    list.and_then(|l| l.get(key))
        .map(|q| q.0.clone())
        .unwrap_or_default()
}

pub fn node_to_info(node: Node) -> NodeInfo {
    let metadata = node.metadata;
    let status = node.status.unwrap_or_default();

    let conditions = status.conditions.unwrap_or_default();
    let is_ready = conditions
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == "True");

    let labels = metadata.labels.unwrap_or_default();
    let roles: Vec<String> = labels
        .keys()
        .filter_map(|k| k.strip_prefix("node-role.kubernetes.io/"))
        .map(String::from)
        .collect();

    let addresses = status.addresses.unwrap_or_default();
    let address_of = |kind: &str| {
        addresses
            .iter()
            .find(|a| a.type_ == kind)
            .map(|a| a.address.clone())
    };

    let node_info = status.node_info.unwrap_or_default();

    NodeInfo {
        name: metadata.name.unwrap_or_default(),
        status: if is_ready {
            NodeStatus::Ready
        } else {
            NodeStatus::NotReady
        },
        roles,
        internal_ip: address_of("InternalIP"),
        external_ip: address_of("ExternalIP"),
        os_image: node_info.os_image,
        kernel_version: node_info.kernel_version,
        container_runtime: node_info.container_runtime_version,
        kubelet_version: node_info.kubelet_version,
        capacity_cpu: quantity_string(status.capacity.as_ref(), "cpu"),
        capacity_memory: quantity_string(status.capacity.as_ref(), "memory"),
        allocatable_cpu: quantity_string(status.allocatable.as_ref(), "cpu"),
        allocatable_memory: quantity_string(status.allocatable.as_ref(), "memory"),
        conditions: conditions
            .into_iter()
            .map(|c| NodeCondition {
                condition_type: c.type_,
                status: c.status,
                reason: c.reason,
                message: c.message,
            })
            .collect(),
        created_at: metadata.creation_timestamp.map(|t| t.0.to_rfc3339()),
    }
}
