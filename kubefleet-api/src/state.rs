//! Application State
//!
//! Shared state for the kubefleet API server

use std::sync::Arc;

use crate::kubernetes::ClusterService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cluster_service: Arc<ClusterService>,
}

impl AppState {
    pub fn new(cluster_service: ClusterService) -> Self {
        Self {
            cluster_service: Arc::new(cluster_service),
        }
    }
}
