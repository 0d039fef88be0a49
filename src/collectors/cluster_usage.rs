//! Cluster-wide capacity collector.
//!
//! Reads the `stats` section of `ceph df` and exposes:
//! - `ceph_cluster_capacity_bytes`
//! - `ceph_cluster_used_bytes`
//! - `ceph_cluster_available_bytes`
//! - `ceph_cluster_objects`
//!
//! Each field is converted on its own; a missing or malformed value reports 0
//! without touching its siblings.

use prometheus::proto::MetricFamily;
use prometheus::Gauge;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

use super::number::{self, Number};
use super::Collector;
use crate::conn::{mon_json, Conn, Request};
use crate::error::{CollectResult, ExporterError};
use crate::metrics::MetricFactory;

const DF: &str = "df";

#[derive(Debug, Default, Deserialize)]
struct DfReport {
    #[serde(default)]
    stats: DfStats,
    #[serde(default)]
    pools: Vec<DfPool>,
}

#[derive(Debug, Default, Deserialize)]
struct DfStats {
    total_bytes: Option<Number>,
    total_used_bytes: Option<Number>,
    total_used_raw_bytes: Option<Number>,
    total_avail_bytes: Option<Number>,
    total_objects: Option<Number>,
}

#[derive(Debug, Default, Deserialize)]
struct DfPool {
    #[serde(default)]
    stats: DfPoolObjects,
}

#[derive(Debug, Default, Deserialize)]
struct DfPoolObjects {
    objects: Option<Number>,
}

/// Aggregate usage of the whole cluster.
pub struct ClusterUsageCollector {
    conn: Arc<dyn Conn>,
    capacity_bytes: Gauge,
    used_bytes: Gauge,
    available_bytes: Gauge,
    objects: Gauge,
}

impl ClusterUsageCollector {
    pub fn new(conn: Arc<dyn Conn>, factory: &MetricFactory) -> Result<Self, ExporterError> {
        Ok(Self {
            conn,
            capacity_bytes: factory.gauge(
                "cluster",
                "capacity_bytes",
                "Total capacity of the cluster",
            )?,
            used_bytes: factory.gauge(
                "cluster",
                "used_bytes",
                "Capacity of the cluster currently in use",
            )?,
            available_bytes: factory.gauge(
                "cluster",
                "available_bytes",
                "Available space within the cluster",
            )?,
            objects: factory.gauge("cluster", "objects", "No. of rados objects within the cluster")?,
        })
    }
}

impl Collector for ClusterUsageCollector {
    fn name(&self) -> &'static str {
        "cluster_usage"
    }

    fn metrics(&self) -> Vec<&dyn prometheus::core::Collector> {
        vec![
            &self.capacity_bytes,
            &self.used_bytes,
            &self.available_bytes,
            &self.objects,
        ]
    }

    #[instrument(skip(self))]
    fn update(&self) -> CollectResult<Vec<MetricFamily>> {
        let report: DfReport = mon_json(self.conn.as_ref(), &Request::new(DF))?;
        let stats = &report.stats;

        self.capacity_bytes
            .set(number::required(DF, "total_bytes", stats.total_bytes.as_ref()));
        self.available_bytes.set(number::required(
            DF,
            "total_avail_bytes",
            stats.total_avail_bytes.as_ref(),
        ));

        let used = stats
            .total_used_bytes
            .as_ref()
            .or(stats.total_used_raw_bytes.as_ref());
        self.used_bytes
            .set(number::required(DF, "total_used_bytes", used));

        // Newer releases dropped the cluster-wide object count; sum the pools.
        let objects = match &stats.total_objects {
            Some(n) => number::value(DF, "total_objects", Some(n)),
            None => report
                .pools
                .iter()
                .map(|p| number::value(DF, "pools.stats.objects", p.stats.objects.as_ref()))
                .sum(),
        };
        self.objects.set(objects);

        Ok(Vec::new())
    }
}
