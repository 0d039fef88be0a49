//! Application state shared by the HTTP handlers.

use prometheus::{Gauge, Registry};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

pub struct AppState {
    /// Holds one [`crate::exporter::Exporter`] per configured cluster.
    pub registry: Registry,
    pub scrape_duration: Gauge,
    pub config: Arc<Config>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
