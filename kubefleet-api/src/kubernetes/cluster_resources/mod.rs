//! Kubernetes cluster-scoped resources

pub mod nodes;
