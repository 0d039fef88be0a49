//! Prometheus exporter for Ceph clusters.
//!
//! The crate is organized around three layers:
//!
//! - [`conn`]: sends administrative commands to a cluster and returns raw JSON
//! - [`collectors`]: decode command output into `ceph_*` gauges
//! - [`exporter`]: bundles the collectors of one cluster behind a
//!   [`prometheus::core::Collector`] so several clusters share one registry
//!
//! # Usage
//!
//! ```
//! use ceph_exporter::conn::MockConn;
//! use ceph_exporter::exporter::Exporter;
//! use prometheus::Registry;
//! use std::sync::Arc;
//!
//! let conn = MockConn::new();
//! conn.on("df").reply(r#"{"stats":{"total_bytes":100,"total_used_bytes":40,"total_avail_bytes":60}}"#);
//!
//! let registry = Registry::new();
//! let exporter = Exporter::new("lab", Arc::new(conn), None).unwrap();
//! registry.register(Box::new(exporter)).unwrap();
//! let families = registry.gather();
//! assert!(!families.is_empty());
//! ```

pub mod cli;
pub mod collectors;
pub mod config;
pub mod conn;
pub mod error;
pub mod exporter;
pub mod handlers;
pub mod metrics;
pub mod state;

use axum::{routing::get, Router};
use prometheus::{Gauge, Registry};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::collectors::RadosGwAdmin;
use crate::config::{Config, DEFAULT_CEPH_BINARY, DEFAULT_RADOSGW_ADMIN_BINARY};
use crate::conn::CliConn;
use crate::error::ExporterError;
use crate::exporter::{Exporter, RgwSettings};
use crate::handlers::{health_handler, metrics_handler, root_handler};
use crate::state::{AppState, SharedState};

/// Registers one [`Exporter`] per configured cluster, backed by the `ceph`
/// and `radosgw-admin` command line tools.
pub fn build_registry(config: &Config) -> Result<Registry, ExporterError> {
    let registry = Registry::new();
    let timeout = config.op_timeout();
    let ceph_binary = config
        .ceph_binary
        .clone()
        .unwrap_or_else(|| DEFAULT_CEPH_BINARY.into());
    let rgw_binary = config
        .radosgw_admin_binary
        .clone()
        .unwrap_or_else(|| DEFAULT_RADOSGW_ADMIN_BINARY.into());
    let rgw_mode = config.rgw_mode.unwrap_or_default();

    for cluster in &config.clusters {
        let name = config.cluster_name_for(cluster);
        let conn = CliConn::new(
            ceph_binary.clone(),
            name,
            &cluster.user,
            cluster.config_file.clone(),
            timeout,
        );
        let rgw = RgwSettings {
            admin: Arc::new(RadosGwAdmin::new(
                rgw_binary.clone(),
                cluster.config_file.clone(),
                name,
                &cluster.user,
                timeout,
            )),
            mode: rgw_mode,
            interval: config.rgw_interval(),
        };

        let exporter = Exporter::new(&cluster.cluster_label, Arc::new(conn), Some(rgw))?;
        info!(
            cluster = cluster.cluster_label.as_str(),
            ceph_cluster = name,
            user = cluster.user.as_str(),
            collectors = ?exporter.collector_names(),
            "registered cluster exporter"
        );
        registry.register(Box::new(exporter))?;
    }
    Ok(registry)
}

/// Wraps a populated registry into the shared HTTP state.
pub fn build_state(registry: Registry, config: Config) -> Result<SharedState, ExporterError> {
    let scrape_duration = Gauge::new(
        "ceph_exporter_scrape_duration_seconds",
        "Time spent serving the previous metrics request",
    )?;
    registry.register(Box::new(scrape_duration.clone()))?;

    Ok(Arc::new(AppState {
        registry,
        scrape_duration,
        config: Arc::new(config),
        start_time: Instant::now(),
    }))
}

/// Routes `/`, `/health` and the configured metrics path.
pub fn build_router(state: SharedState) -> Router {
    let metrics_path = state.config.metrics_path().to_string();
    Router::new()
        .route("/", get(root_handler))
        .route(&metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}
