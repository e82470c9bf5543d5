//! Fleet-wide cluster operations
//!
//! Resource aggregation, health classification and the periodic status
//! reconciler.

pub mod aggregator;
pub mod reconciler;
