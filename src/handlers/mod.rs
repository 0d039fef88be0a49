//! HTTP endpoint handlers.

mod health;
mod metrics;
mod root;

pub use health::health_handler;
pub use metrics::{metrics_handler, MetricsError};
pub use root::root_handler;
