//! Kubernetes observability
//!
//! Live node usage from metrics-server and Prometheus range queries.

pub mod metrics;
pub mod monitoring;
