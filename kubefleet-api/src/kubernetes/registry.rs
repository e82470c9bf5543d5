//! Cluster registry
//!
//! Persistent store of member cluster records. The production store is the
//! cluster-scoped `Cluster` custom resource in the management cluster; an
//! in-memory store backs tests and local development.

use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;

use super::client::with_deadline;
use super::error::{K8sError, K8sResult};
use super::types::{Cluster, ClusterRecord, ClusterSpec, StatusPatch};
use crate::config::RegistryConfig;

#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    /// All records, ordered by id
    async fn list(&self) -> K8sResult<Vec<ClusterRecord>>;

    async fn get(&self, id: &str) -> K8sResult<ClusterRecord>;

    /// Store a new record; an existing id is a `Conflict`
    async fn create(&self, id: &str, spec: ClusterSpec) -> K8sResult<ClusterRecord>;

    /// Merge `patch` into the record's status
    async fn patch_status(&self, id: &str, patch: &StatusPatch) -> K8sResult<()>;
}

/// Registry backed by `clusters.kubecloud.io` in the management cluster
#[derive(Clone)]
pub struct KubeClusterRegistry {
    api: Api<Cluster>,
    timeout: Duration,
}

impl KubeClusterRegistry {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            api: Api::all(client),
            timeout,
        }
    }

    /// Build the management cluster client.
    ///
    /// Uses the configured kubeconfig file when set, otherwise the in-cluster
    /// service account or the default kubeconfig.
    pub async fn connect(config: &RegistryConfig) -> K8sResult<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let mut kube_config = match &config.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| K8sError::invalid_credential("registry", e))?;
                Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions {
                        context: config.context.clone(),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| K8sError::invalid_credential("registry", e))?
            }
            None => Config::infer()
                .await
                .map_err(|e| K8sError::invalid_credential("registry", e))?,
        };
        kube_config.read_timeout = Some(timeout);

        tracing::info!(
            api_server = %kube_config.cluster_url,
            "Connecting to cluster registry"
        );

        let client = Client::try_from(kube_config)?;
        Ok(Self::new(client, timeout))
    }

    fn not_found(id: &str, err: K8sError) -> K8sError {
        match err.api_status() {
            Some(404) => K8sError::ClusterNotFound(id.to_string()),
            _ => err,
        }
    }
}

#[async_trait]
impl ClusterRegistry for KubeClusterRegistry {
    async fn list(&self) -> K8sResult<Vec<ClusterRecord>> {
        let list = with_deadline(self.timeout, "list clusters", async {
            Ok(self.api.list(&ListParams::default()).await?)
        })
        .await?;

        let mut records: Vec<ClusterRecord> =
            list.items.into_iter().map(ClusterRecord::from).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn get(&self, id: &str) -> K8sResult<ClusterRecord> {
        let cluster = with_deadline(self.timeout, "get cluster", async {
            Ok(self.api.get(id).await?)
        })
        .await
        .map_err(|e| Self::not_found(id, e))?;

        Ok(cluster.into())
    }

    async fn create(&self, id: &str, spec: ClusterSpec) -> K8sResult<ClusterRecord> {
        let cluster = Cluster::new(id, spec);

        let created = with_deadline(self.timeout, "create cluster", async {
            Ok(self.api.create(&PostParams::default(), &cluster).await?)
        })
        .await
        .map_err(|e| match e.api_status() {
            Some(409) => K8sError::Conflict(format!("cluster '{}' already exists", id)),
            _ => e,
        })?;

        Ok(created.into())
    }

    async fn patch_status(&self, id: &str, patch: &StatusPatch) -> K8sResult<()> {
        let body = patch.to_merge_patch();

        with_deadline(self.timeout, "patch cluster status", async {
            self.api
                .patch_status(id, &PatchParams::default(), &Patch::Merge(&body))
                .await?;
            Ok(())
        })
        .await
        .map_err(|e| Self::not_found(id, e))
    }
}

/// Registry held in process memory
#[derive(Default)]
pub struct InMemoryClusterRegistry {
    records: RwLock<BTreeMap<String, ClusterRecord>>,
}

impl InMemoryClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = ClusterRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }
}

#[async_trait]
impl ClusterRegistry for InMemoryClusterRegistry {
    async fn list(&self) -> K8sResult<Vec<ClusterRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> K8sResult<ClusterRecord> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| K8sError::ClusterNotFound(id.to_string()))
    }

    async fn create(&self, id: &str, spec: ClusterSpec) -> K8sResult<ClusterRecord> {
        let mut records = self.records.write().await;
        if records.contains_key(id) {
            return Err(K8sError::Conflict(format!("cluster '{}' already exists", id)));
        }

        let record = ClusterRecord::new(id, spec);
        records.insert(id.to_string(), record.clone());
        Ok(record)
    }

    async fn patch_status(&self, id: &str, patch: &StatusPatch) -> K8sResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| K8sError::ClusterNotFound(id.to_string()))?;

        patch.apply(&mut record.status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubefleet_common::HealthStatus;

    fn spec(name: &str) -> ClusterSpec {
        ClusterSpec {
            kubeconfig: format!("kubeconfig-{}", name),
            display_name: name.to_string(),
            prometheus_url: String::new(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = InMemoryClusterRegistry::new();
        registry.create("cluster-aaaaaa", spec("a")).await.unwrap();

        let record = registry.get("cluster-aaaaaa").await.unwrap();
        assert_eq!(record.display_name, "a");
        assert_eq!(record.kubeconfig, "kubeconfig-a");
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let registry = InMemoryClusterRegistry::new();
        registry.create("cluster-aaaaaa", spec("a")).await.unwrap();

        let err = registry.create("cluster-aaaaaa", spec("b")).await.unwrap_err();
        assert!(matches!(err, K8sError::Conflict(_)));
        assert_eq!(registry.get("cluster-aaaaaa").await.unwrap().display_name, "a");
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let registry = InMemoryClusterRegistry::new();
        assert!(matches!(
            registry.get("nope").await,
            Err(K8sError::ClusterNotFound(_))
        ));
        assert!(matches!(
            registry.patch_status("nope", &StatusPatch::default()).await,
            Err(K8sError::ClusterNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_id() {
        let registry = InMemoryClusterRegistry::new();
        for id in ["cluster-cccccc", "cluster-aaaaaa", "cluster-bbbbbb"] {
            registry.create(id, spec(id)).await.unwrap();
        }

        let ids: Vec<String> = registry.list().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["cluster-aaaaaa", "cluster-bbbbbb", "cluster-cccccc"]);
    }

    #[tokio::test]
    async fn test_patch_status_merges() {
        let registry = InMemoryClusterRegistry::new();
        registry.create("cluster-aaaaaa", spec("a")).await.unwrap();

        registry
            .patch_status("cluster-aaaaaa", &StatusPatch::health(HealthStatus::Normal))
            .await
            .unwrap();
        registry
            .patch_status(
                "cluster-aaaaaa",
                &StatusPatch {
                    cpu_usage: Some(250),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let status = registry.get("cluster-aaaaaa").await.unwrap().status;
        assert_eq!(status.cpu_usage, 250);
        assert_eq!(status.health, HealthStatus::Normal);
    }
}
