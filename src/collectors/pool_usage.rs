//! Per-pool usage collector.
//!
//! Reads the `pools` section of `ceph df detail`. All vectors are keyed by
//! pool name and cleared at the start of every cycle so deleted pools stop
//! being reported.

use prometheus::proto::MetricFamily;
use prometheus::GaugeVec;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::number::{self, Number};
use super::Collector;
use crate::conn::{mon_json, Conn, Request};
use crate::error::{CollectError, CollectResult, ExporterError};
use crate::metrics::MetricFactory;

const DF_DETAIL: &str = "df detail";

#[derive(Debug, Deserialize)]
struct DfDetail {
    #[serde(default)]
    pools: Vec<PoolEntry>,
}

#[derive(Debug, Deserialize)]
struct PoolEntry {
    name: String,
    #[serde(default)]
    stats: PoolStats,
}

#[derive(Debug, Default, Deserialize)]
struct PoolStats {
    bytes_used: Option<Number>,
    raw_bytes_used: Option<Number>,
    stored_raw: Option<Number>,
    max_avail: Option<Number>,
    percent_used: Option<Number>,
    objects: Option<Number>,
    dirty: Option<Number>,
    rd: Option<Number>,
    rd_bytes: Option<Number>,
    wr: Option<Number>,
    wr_bytes: Option<Number>,
}

/// Usage and I/O counters per pool.
pub struct PoolUsageCollector {
    conn: Arc<dyn Conn>,
    used_bytes: GaugeVec,
    raw_used_bytes: GaugeVec,
    available_bytes: GaugeVec,
    percent_used: GaugeVec,
    objects: GaugeVec,
    dirty_objects: GaugeVec,
    read_ops: GaugeVec,
    read_bytes: GaugeVec,
    write_ops: GaugeVec,
    write_bytes: GaugeVec,
}

impl PoolUsageCollector {
    pub fn new(conn: Arc<dyn Conn>, factory: &MetricFactory) -> Result<Self, ExporterError> {
        let vec = |name: &str, help: &str| factory.gauge_vec("pool", name, help, &["pool"]);
        Ok(Self {
            conn,
            used_bytes: vec("used_bytes", "Capacity of the pool that is currently under use")?,
            raw_used_bytes: vec(
                "raw_used_bytes",
                "Raw capacity of the pool that is currently under use, this factors in the size",
            )?,
            available_bytes: vec("available_bytes", "Free space for the pool")?,
            percent_used: vec("percent_used", "Percentage of the capacity available to this pool that is used by this pool")?,
            objects: vec("objects_total", "Total no. of objects allocated within the pool")?,
            dirty_objects: vec(
                "dirty_objects_total",
                "Total no. of dirty objects in a cache-tier pool",
            )?,
            read_ops: vec("read_total", "Total read I/O calls for the pool")?,
            read_bytes: vec("read_bytes_total", "Total read throughput for the pool")?,
            write_ops: vec("write_total", "Total write I/O calls for the pool")?,
            write_bytes: vec("write_bytes_total", "Total write throughput for the pool")?,
        })
    }

    fn vectors(&self) -> [&GaugeVec; 10] {
        [
            &self.used_bytes,
            &self.raw_used_bytes,
            &self.available_bytes,
            &self.percent_used,
            &self.objects,
            &self.dirty_objects,
            &self.read_ops,
            &self.read_bytes,
            &self.write_ops,
            &self.write_bytes,
        ]
    }

    fn record(&self, pool: &PoolEntry) {
        let name = pool.name.as_str();
        let s = &pool.stats;
        let set = |vec: &GaugeVec, field: &str, n: Option<&Number>| {
            vec.with_label_values(&[name])
                .set(number::value(DF_DETAIL, field, n));
        };

        set(&self.used_bytes, "bytes_used", s.bytes_used.as_ref());
        set(
            &self.raw_used_bytes,
            "raw_bytes_used",
            s.raw_bytes_used.as_ref().or(s.stored_raw.as_ref()),
        );
        set(&self.available_bytes, "max_avail", s.max_avail.as_ref());
        set(&self.percent_used, "percent_used", s.percent_used.as_ref());
        set(&self.objects, "objects", s.objects.as_ref());
        set(&self.dirty_objects, "dirty", s.dirty.as_ref());
        set(&self.read_ops, "rd", s.rd.as_ref());
        set(&self.read_bytes, "rd_bytes", s.rd_bytes.as_ref());
        set(&self.write_ops, "wr", s.wr.as_ref());
        set(&self.write_bytes, "wr_bytes", s.wr_bytes.as_ref());
    }
}

impl Collector for PoolUsageCollector {
    fn name(&self) -> &'static str {
        "pool_usage"
    }

    fn metrics(&self) -> Vec<&dyn prometheus::core::Collector> {
        self.vectors()
            .into_iter()
            .map(|v| v as &dyn prometheus::core::Collector)
            .collect()
    }

    #[instrument(skip(self))]
    fn update(&self) -> CollectResult<Vec<MetricFamily>> {
        for vec in self.vectors() {
            vec.reset();
        }

        let report: DfDetail = mon_json(
            self.conn.as_ref(),
            &Request::new("df").arg("detail", "detail"),
        )?;
        if report.pools.is_empty() {
            return Err(CollectError::NoPools);
        }

        for pool in &report.pools {
            self.record(pool);
        }
        debug!(pools = report.pools.len(), "pool usage updated");
        Ok(Vec::new())
    }
}
