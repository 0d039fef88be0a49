//! Health check endpoint handler.
//!
//! `/health` answers as long as the process serves HTTP. Cluster
//! reachability is reported through `ceph_exporter_collector_success`
//! on the metrics endpoint instead.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::state::SharedState;

// Time conversion constants
const SECONDS_PER_HOUR: f64 = 3600.0;
const MINUTES_PER_HOUR: f64 = 60.0;
const HOURS_PER_DAY: f64 = 24.0;

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let uptime_hours = state.uptime_seconds() as f64 / SECONDS_PER_HOUR;
    let uptime_str = if uptime_hours < 1.0 {
        format!("{:.1} minutes", uptime_hours * MINUTES_PER_HOUR)
    } else if uptime_hours < HOURS_PER_DAY {
        format!("{:.1} hours", uptime_hours)
    } else {
        format!("{:.1} days", uptime_hours / HOURS_PER_DAY)
    };

    let mut clusters = String::new();
    for cluster in &state.config.clusters {
        writeln!(
            clusters,
            "  {:<20} user={} config={}",
            cluster.cluster_label,
            cluster.user,
            cluster.config_file.display()
        )
        .ok();
    }

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("OK\n\nUptime: {uptime_str}\n\nClusters:\n{clusters}"),
    )
}
