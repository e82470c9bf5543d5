//! Kubernetes workload management
//!
//! Deployment pass-through for member clusters.

pub mod deployments;
