use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use kubefleet_api::config::FleetConfig;
use kubefleet_api::kubernetes::client::{ClusterClientFactory, KubeconfigConnector};
use kubefleet_api::kubernetes::cluster::reconciler::PeriodicReconciler;
use kubefleet_api::kubernetes::observability::monitoring::PrometheusConnector;
use kubefleet_api::kubernetes::registry::KubeClusterRegistry;
use kubefleet_api::kubernetes::ClusterService;
use kubefleet_api::shutdown::{ShutdownCoordinator, TaskShutdown};
use kubefleet_api::{api, logging, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = FleetConfig::load().context("failed to load configuration")?;

    let _log_guard = logging::init(&config.logging)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    info!("Starting kubefleet API v{}", env!("CARGO_PKG_VERSION"));

    // The registry is the only hard dependency; nothing works without it
    let registry = KubeClusterRegistry::connect(&config.registry)
        .await
        .context("failed to connect to the cluster registry")?;

    let factory = ClusterClientFactory::new(
        Arc::new(registry),
        Arc::new(KubeconfigConnector::new(config.clusters.timeouts())),
    );
    let monitoring = Arc::new(PrometheusConnector::new(config.monitoring.timeout()));
    let service = ClusterService::new(
        factory.clone(),
        monitoring,
        config.clusters.list_concurrency,
    );

    let mut tasks = TaskShutdown::new();
    if config.reconciler.enabled {
        let reconciler = Arc::new(PeriodicReconciler::new(
            factory,
            &config.reconciler,
            config.clusters.list_concurrency,
        ));
        tasks.register("reconciler", reconciler.start());
    } else {
        info!("Cluster status reconciler disabled");
    }

    let app = api::router(Arc::new(AppState::new(service)));

    let shutdown_coordinator = ShutdownCoordinator::new();
    let signal_coordinator = shutdown_coordinator.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_coordinator.wait_for_signal().await {
            error!("Failed to install signal handlers: {}", e);
        }
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Kubefleet API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_coordinator.signal())
        .await?;

    info!("Server stopped, stopping background tasks...");
    tasks.abort_all(shutdown_coordinator.timeout()).await;

    info!("Shutdown complete");
    Ok(())
}
