//! Kubernetes client wrapper
//!
//! Turns a stored kubeconfig into a per-call client bundle for one member
//! cluster. Nothing here is cached: every lookup rebuilds the client from
//! the registry record.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::cluster_resources::nodes;
use super::error::{K8sError, K8sResult};
use super::observability::metrics;
use super::registry::ClusterRegistry;
use super::types::{ClusterRecord, K8sVersion, NodeMetrics};

/// Bound `fut` by `deadline`, reporting an elapsed deadline as unavailable
pub(crate) async fn with_deadline<T, F>(deadline: Duration, what: &str, fut: F) -> K8sResult<T>
where
    F: Future<Output = K8sResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(K8sError::UpstreamUnavailable(format!(
            "{} timed out after {:?}",
            what, deadline
        ))),
    }
}

/// Connect and per-request limits for member cluster clients
#[derive(Debug, Clone, Copy)]
pub struct ClientTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(30),
        }
    }
}

/// What the rest of the crate needs from one member cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Registry id of the cluster this handle talks to
    fn cluster_id(&self) -> &str;

    async fn list_nodes(&self) -> K8sResult<Vec<Node>>;

    /// Live usage of one node from metrics.k8s.io
    async fn node_metrics(&self, node: &str) -> K8sResult<NodeMetrics>;

    async fn server_version(&self) -> K8sResult<K8sVersion>;

    /// Raw kube client for typed access to core and apps resources
    fn kube_client(&self) -> K8sResult<Client>;
}

/// Wrapper around kube-rs Client with cluster context
#[derive(Clone)]
pub struct K8sClient {
    inner: Client,
    cluster_id: String,
    cluster_name: String,
    api_server: String,
    request_timeout: Duration,
}

impl K8sClient {
    /// Create client from kubeconfig YAML with optional context.
    ///
    /// The YAML is parsed in memory; nothing is written to disk.
    pub async fn from_kubeconfig(
        kubeconfig_yaml: &str,
        context: Option<&str>,
        cluster_id: String,
        cluster_name: String,
        timeouts: ClientTimeouts,
    ) -> K8sResult<Self> {
        let kubeconfig = Kubeconfig::from_yaml(kubeconfig_yaml)
            .map_err(|e| K8sError::invalid_credential(&cluster_id, e))?;

        let api_server = Self::extract_api_server(&kubeconfig, context)
            .map_err(|reason| K8sError::invalid_credential(&cluster_id, reason))?;

        let mut config = Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context: context.map(String::from),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| K8sError::invalid_credential(&cluster_id, e))?;

        config.connect_timeout = Some(timeouts.connect);
        config.read_timeout = Some(timeouts.request);
        config.write_timeout = Some(timeouts.request);

        let client = Client::try_from(config)
            .map_err(|e| K8sError::invalid_credential(&cluster_id, e))?;

        Ok(Self {
            inner: client,
            cluster_id,
            cluster_name,
            api_server,
            request_timeout: timeouts.request,
        })
    }

    /// Extract API server URL from kubeconfig
    fn extract_api_server(kubeconfig: &Kubeconfig, context_name: Option<&str>) -> Result<String, String> {
        let context_name = context_name
            .map(String::from)
            .or_else(|| kubeconfig.current_context.clone())
            .ok_or_else(|| "no context specified and no current-context".to_string())?;

        let context = kubeconfig
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .ok_or_else(|| format!("context '{}' not found", context_name))?;

        let cluster_name = context
            .context
            .as_ref()
            .map(|c| c.cluster.as_str())
            .ok_or_else(|| "context has no cluster reference".to_string())?;

        let cluster = kubeconfig
            .clusters
            .iter()
            .find(|c| c.name == cluster_name)
            .ok_or_else(|| format!("cluster '{}' not found", cluster_name))?;

        cluster
            .cluster
            .as_ref()
            .and_then(|c| c.server.clone())
            .ok_or_else(|| "cluster has no server URL".to_string())
    }

    /// Get the inner kube-rs Client
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn api_server(&self) -> &str {
        &self.api_server
    }

    /// Cluster-scoped access to any resource kind, including CRDs
    pub fn dynamic_api(&self, resource: &ApiResource) -> Api<DynamicObject> {
        Api::all_with(self.inner.clone(), resource)
    }

    /// Namespaced access to any resource kind, including CRDs
    pub fn dynamic_namespaced_api(
        &self,
        namespace: &str,
        resource: &ApiResource,
    ) -> Api<DynamicObject> {
        Api::namespaced_with(self.inner.clone(), namespace, resource)
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> K8sResult<T>
    where
        F: Future<Output = K8sResult<T>>,
    {
        let label = format!("{} on cluster {}", what, self.cluster_id);
        with_deadline(self.request_timeout, &label, fut).await
    }
}

#[async_trait]
impl ClusterApi for K8sClient {
    fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    async fn list_nodes(&self) -> K8sResult<Vec<Node>> {
        self.bounded("list nodes", nodes::list_nodes(self)).await
    }

    async fn node_metrics(&self, node: &str) -> K8sResult<NodeMetrics> {
        self.bounded("node metrics", metrics::get_node_metric(self, node))
            .await
    }

    async fn server_version(&self) -> K8sResult<K8sVersion> {
        self.bounded("version discovery", async {
            let version = self.inner.apiserver_version().await?;

            Ok(K8sVersion {
                server: format!("{}.{}", version.major, version.minor),
                git_version: version.git_version,
                git_commit: version.git_commit,
                build_date: version.build_date,
                platform: version.platform,
            })
        })
        .await
    }

    fn kube_client(&self) -> K8sResult<Client> {
        Ok(self.inner.clone())
    }
}

impl std::fmt::Debug for K8sClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("K8sClient")
            .field("cluster_id", &self.cluster_id)
            .field("cluster_name", &self.cluster_name)
            .field("api_server", &self.api_server)
            .finish()
    }
}

/// Builds a client bundle from a registry record
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, record: &ClusterRecord) -> K8sResult<Box<dyn ClusterApi>>;
}

/// Connector that parses the record's kubeconfig with kube-rs
#[derive(Debug, Clone, Default)]
pub struct KubeconfigConnector {
    timeouts: ClientTimeouts,
}

impl KubeconfigConnector {
    pub fn new(timeouts: ClientTimeouts) -> Self {
        Self { timeouts }
    }
}

#[async_trait]
impl ClusterConnector for KubeconfigConnector {
    async fn connect(&self, record: &ClusterRecord) -> K8sResult<Box<dyn ClusterApi>> {
        let client = K8sClient::from_kubeconfig(
            &record.kubeconfig,
            None,
            record.id.clone(),
            record.display_name.clone(),
            self.timeouts,
        )
        .await?;

        Ok(Box::new(client))
    }
}

/// Resolves a cluster id to a freshly built client bundle
#[derive(Clone)]
pub struct ClusterClientFactory {
    registry: Arc<dyn ClusterRegistry>,
    connector: Arc<dyn ClusterConnector>,
}

impl ClusterClientFactory {
    pub fn new(registry: Arc<dyn ClusterRegistry>, connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            registry,
            connector,
        }
    }

    /// Look the cluster up and build a client from its stored credential.
    ///
    /// Fails with `ClusterNotFound` for an unknown id and `InvalidCredential`
    /// when the kubeconfig cannot be turned into a client.
    pub async fn get_client(&self, cluster_id: &str) -> K8sResult<Box<dyn ClusterApi>> {
        let record = self.registry.get(cluster_id).await?;
        self.connect(&record).await
    }

    /// Build a client for a record that need not be registered yet
    pub async fn connect(&self, record: &ClusterRecord) -> K8sResult<Box<dyn ClusterApi>> {
        self.connector.connect(record).await
    }

    pub fn registry(&self) -> &Arc<dyn ClusterRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::types::Cluster;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: edge
clusters:
- name: edge
  cluster:
    server: https://10.0.0.1:6443
- name: core
  cluster:
    server: https://10.0.0.2:6443
contexts:
- name: edge
  context:
    cluster: edge
    user: admin
- name: core
  context:
    cluster: core
    user: admin
users:
- name: admin
  user:
    token: abc
"#;

    #[test]
    fn test_extract_api_server_uses_current_context() {
        let kubeconfig = Kubeconfig::from_yaml(KUBECONFIG).unwrap();
        assert_eq!(
            K8sClient::extract_api_server(&kubeconfig, None).unwrap(),
            "https://10.0.0.1:6443"
        );
        assert_eq!(
            K8sClient::extract_api_server(&kubeconfig, Some("core")).unwrap(),
            "https://10.0.0.2:6443"
        );
    }

    #[test]
    fn test_extract_api_server_unknown_context() {
        let kubeconfig = Kubeconfig::from_yaml(KUBECONFIG).unwrap();
        let err = K8sClient::extract_api_server(&kubeconfig, Some("missing")).unwrap_err();
        assert!(err.contains("missing"));
    }

    #[tokio::test]
    async fn test_client_from_kubeconfig() {
        let client = K8sClient::from_kubeconfig(
            KUBECONFIG,
            Some("core"),
            "cluster-core01".into(),
            "core".into(),
            ClientTimeouts::default(),
        )
        .await
        .unwrap();

        assert_eq!(client.cluster_id(), "cluster-core01");
        assert_eq!(client.cluster_name(), "core");
        assert_eq!(client.api_server(), "https://10.0.0.2:6443");

        let clusters = client.dynamic_api(&ApiResource::erase::<Cluster>(&()));
        assert_eq!(clusters.resource_url(), "/apis/kubecloud.io/v1alpha1/clusters");

        let deployments = client.dynamic_namespaced_api(
            "default",
            &ApiResource::erase::<k8s_openapi::api::apps::v1::Deployment>(&()),
        );
        assert_eq!(
            deployments.resource_url(),
            "/apis/apps/v1/namespaces/default/deployments"
        );
    }

    #[tokio::test]
    async fn test_malformed_kubeconfig_is_invalid_credential() {
        let result = K8sClient::from_kubeconfig(
            "clusters: [not: {valid",
            None,
            "cluster-bad001".into(),
            "bad".into(),
            ClientTimeouts::default(),
        )
        .await;

        match result {
            Err(K8sError::InvalidCredential { cluster, .. }) => assert_eq!(cluster, "cluster-bad001"),
            other => panic!("expected InvalidCredential, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_kubeconfig_without_context_is_invalid_credential() {
        let yaml = "apiVersion: v1\nkind: Config\nclusters: []\ncontexts: []\nusers: []\n";
        let result = K8sClient::from_kubeconfig(
            yaml,
            None,
            "cluster-empty1".into(),
            "empty".into(),
            ClientTimeouts::default(),
        )
        .await;
        assert!(matches!(result, Err(K8sError::InvalidCredential { .. })));
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let result: K8sResult<()> = with_deadline(Duration::from_millis(10), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(K8sError::UpstreamUnavailable(msg)) => assert!(msg.contains("slow call")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
