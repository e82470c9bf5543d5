//! Kubefleet API Library
//!
//! Multi-cluster Kubernetes control surface: cluster registry access,
//! per-cluster clients, capacity aggregation, status reconciliation and
//! Prometheus range queries. Exposed as a library for the binary and the
//! integration tests.

// Core modules
pub mod config;
pub mod error;

// Application state and HTTP routes
pub mod api;
pub mod state;
pub use state::AppState;

// Kubernetes integration
pub mod kubernetes;

// Logging configuration
pub mod logging;

// Graceful shutdown handling
pub mod shutdown;
