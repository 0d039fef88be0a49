//! Monitor collector.
//!
//! Store and capacity figures come from the per-service health array of
//! `status`; clock skew and latency come from both `status` timechecks and
//! the dedicated `time-sync-status` command. The dedicated command is applied
//! second, so its values win for monitors present in both.

use prometheus::proto::MetricFamily;
use prometheus::{Gauge, GaugeVec};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::number::{self, Number};
use super::Collector;
use crate::conn::{mon_json, Conn, Request};
use crate::error::{CollectResult, ExporterError};
use crate::metrics::MetricFactory;

const STATUS: &str = "status";
const TIME_SYNC: &str = "time-sync-status";

#[derive(Debug, Default, Deserialize)]
struct MonStatus {
    #[serde(default)]
    health: MonHealth,
    #[serde(default)]
    quorum: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct MonHealth {
    #[serde(default)]
    health: HealthServices,
    #[serde(default)]
    timechecks: TimeChecks,
}

#[derive(Debug, Default, Deserialize)]
struct HealthServices {
    #[serde(default)]
    health_services: Vec<HealthService>,
}

#[derive(Debug, Default, Deserialize)]
struct HealthService {
    #[serde(default)]
    mons: Vec<MonStats>,
}

#[derive(Debug, Deserialize)]
struct MonStats {
    name: String,
    kb_total: Option<Number>,
    kb_used: Option<Number>,
    kb_avail: Option<Number>,
    avail_percent: Option<Number>,
    #[serde(default)]
    store_stats: StoreStats,
}

#[derive(Debug, Default, Deserialize)]
struct StoreStats {
    bytes_total: Option<Number>,
    bytes_sst: Option<Number>,
    bytes_log: Option<Number>,
    bytes_misc: Option<Number>,
}

#[derive(Debug, Default, Deserialize)]
struct TimeChecks {
    #[serde(default)]
    mons: Vec<TimeCheck>,
}

#[derive(Debug, Deserialize)]
struct TimeCheck {
    name: String,
    skew: Option<Number>,
    latency: Option<Number>,
}

#[derive(Debug, Default, Deserialize)]
struct TimeSyncStatus {
    #[serde(default)]
    time_skew_status: BTreeMap<String, SkewEntry>,
}

#[derive(Debug, Deserialize)]
struct SkewEntry {
    skew: Option<Number>,
    latency: Option<Number>,
}

/// Per-monitor store, capacity and clock gauges.
pub struct MonitorCollector {
    conn: Arc<dyn Conn>,
    total_bytes: GaugeVec,
    used_bytes: GaugeVec,
    avail_bytes: GaugeVec,
    avail_percent: GaugeVec,
    store_capacity_bytes: GaugeVec,
    store_sst_bytes: GaugeVec,
    store_log_bytes: GaugeVec,
    store_misc_bytes: GaugeVec,
    clock_skew: GaugeVec,
    latency: GaugeVec,
    quorum_count: Gauge,
}

impl MonitorCollector {
    pub fn new(conn: Arc<dyn Conn>, factory: &MetricFactory) -> Result<Self, ExporterError> {
        let vec = |name: &str, help: &str| factory.gauge_vec("monitor", name, help, &["monitor"]);
        Ok(Self {
            conn,
            total_bytes: vec("capacity_bytes", "Total storage capacity of the monitor node")?,
            used_bytes: vec("used_bytes", "Storage of the monitor node that is currently allocated for use")?,
            avail_bytes: vec("avail_bytes", "Total unused storage capacity that the monitor node has left")?,
            avail_percent: vec("avail_percent", "Percentage of total unused storage capacity that the monitor node has left")?,
            store_capacity_bytes: vec("store_capacity_bytes", "Total capacity of the FileStore backing the monitor daemon")?,
            store_sst_bytes: vec("store_sst_bytes", "Capacity of the FileStore used only for raw SSTs")?,
            store_log_bytes: vec("store_log_bytes", "Capacity of the FileStore used only for logging")?,
            store_misc_bytes: vec("store_misc_bytes", "Capacity of the FileStore used only for storing miscellaneous information")?,
            clock_skew: vec("clock_skew_seconds", "Clock skew the monitor node is incurring")?,
            latency: vec("latency_seconds", "Latency the monitor node is incurring")?,
            quorum_count: factory.gauge("monitor", "quorum_count", "The total size of the monitor quorum")?,
        })
    }

    fn vectors(&self) -> [&GaugeVec; 10] {
        [
            &self.total_bytes,
            &self.used_bytes,
            &self.avail_bytes,
            &self.avail_percent,
            &self.store_capacity_bytes,
            &self.store_sst_bytes,
            &self.store_log_bytes,
            &self.store_misc_bytes,
            &self.clock_skew,
            &self.latency,
        ]
    }

    fn record_store(&self, mon: &MonStats) {
        let labels = [mon.name.as_str()];
        let kb = |field: &str, n: &Option<Number>| number::value(STATUS, field, n.as_ref()) * 1024.0;
        let store = &mon.store_stats;

        self.total_bytes
            .with_label_values(&labels)
            .set(kb("kb_total", &mon.kb_total));
        self.used_bytes
            .with_label_values(&labels)
            .set(kb("kb_used", &mon.kb_used));
        self.avail_bytes
            .with_label_values(&labels)
            .set(kb("kb_avail", &mon.kb_avail));
        self.avail_percent.with_label_values(&labels).set(number::value(
            STATUS,
            "avail_percent",
            mon.avail_percent.as_ref(),
        ));

        let set = |vec: &GaugeVec, field: &str, n: &Option<Number>| {
            vec.with_label_values(&labels)
                .set(number::value(STATUS, field, n.as_ref()));
        };
        set(&self.store_capacity_bytes, "store_stats.bytes_total", &store.bytes_total);
        set(&self.store_sst_bytes, "store_stats.bytes_sst", &store.bytes_sst);
        set(&self.store_log_bytes, "store_stats.bytes_log", &store.bytes_log);
        set(&self.store_misc_bytes, "store_stats.bytes_misc", &store.bytes_misc);
    }

    fn record_clock(&self, command: &str, name: &str, skew: Option<&Number>, latency: Option<&Number>) {
        self.clock_skew
            .with_label_values(&[name])
            .set(number::value(command, "skew", skew));
        self.latency
            .with_label_values(&[name])
            .set(number::value(command, "latency", latency));
    }

    fn time_sync(&self) -> Option<TimeSyncStatus> {
        match mon_json(self.conn.as_ref(), &Request::new(TIME_SYNC)) {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(command = TIME_SYNC, error = %e, "time sync status unavailable");
                None
            }
        }
    }
}

impl Collector for MonitorCollector {
    fn name(&self) -> &'static str {
        "monitors"
    }

    fn metrics(&self) -> Vec<&dyn prometheus::core::Collector> {
        let mut metrics: Vec<&dyn prometheus::core::Collector> = self
            .vectors()
            .into_iter()
            .map(|v| v as &dyn prometheus::core::Collector)
            .collect();
        metrics.push(&self.quorum_count);
        metrics
    }

    #[instrument(skip(self))]
    fn update(&self) -> CollectResult<Vec<MetricFamily>> {
        for vec in self.vectors() {
            vec.reset();
        }

        let status: MonStatus = mon_json(self.conn.as_ref(), &Request::new(STATUS))?;
        let mut monitors = 0;
        for service in &status.health.health.health_services {
            for mon in &service.mons {
                self.record_store(mon);
                monitors += 1;
            }
        }
        for check in &status.health.timechecks.mons {
            self.record_clock(STATUS, &check.name, check.skew.as_ref(), check.latency.as_ref());
        }
        self.quorum_count.set(status.quorum.len() as f64);

        if let Some(sync) = self.time_sync() {
            for (name, entry) in &sync.time_skew_status {
                self.record_clock(TIME_SYNC, name, entry.skew.as_ref(), entry.latency.as_ref());
            }
        }

        debug!(monitors, quorum = status.quorum.len(), "monitor figures updated");
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testutil::{render_vec, series};
    use crate::conn::MockConn;

    const STATUS_JSON: &str = r#"{
        "health": {
            "health": {"health_services": [{"mons": [
                {"name": "test-mon01", "kb_total": 412718256, "kb_used": 1474624, "kb_avail": 390247036,
                 "avail_percent": 94, "store_stats": {"bytes_total": 26749358, "bytes_sst": 0,
                 "bytes_log": 0, "bytes_misc": 26749358}},
                {"name": "test-mon02", "kb_total": "1000", "kb_used": "10", "kb_avail": "990",
                 "avail_percent": "99", "store_stats": {"bytes_total": 5}}
            ]}]},
            "timechecks": {"mons": [
                {"name": "test-mon01", "skew": 0.000022, "latency": 0.000677},
                {"name": "test-mon02", "skew": "0.5", "latency": "0.1"}
            ]}
        },
        "quorum": [0, 1]
    }"#;

    fn collector(conn: MockConn) -> MonitorCollector {
        MonitorCollector::new(Arc::new(conn), &MetricFactory::new("ceph")).unwrap()
    }

    #[test]
    fn test_store_figures_in_bytes() {
        let conn = MockConn::new();
        conn.on("status").reply(STATUS_JSON);
        conn.on("time-sync-status").reply(r#"{"time_skew_status":{}}"#);
        let c = collector(conn);
        c.update().unwrap();

        let mon = ["test-mon01"];
        assert_eq!(c.total_bytes.with_label_values(&mon).get(), 412718256.0 * 1024.0);
        assert_eq!(c.used_bytes.with_label_values(&mon).get(), 1474624.0 * 1024.0);
        assert_eq!(c.avail_percent.with_label_values(&mon).get(), 94.0);
        assert_eq!(c.store_misc_bytes.with_label_values(&mon).get(), 26749358.0);
        assert_eq!(c.total_bytes.with_label_values(&["test-mon02"]).get(), 1024000.0);
        assert_eq!(c.quorum_count.get(), 2.0);
    }

    #[test]
    fn test_time_sync_wins_over_status() {
        let conn = MockConn::new();
        conn.on("status").reply(STATUS_JSON);
        conn.on("time-sync-status").reply(
            r#"{"time_skew_status":{"test-mon02":{"skew":-0.25,"latency":0.002,"health":"HEALTH_OK"},
                "test-mon03":{"skew":0.1,"latency":0.003}}}"#,
        );
        let c = collector(conn);
        c.update().unwrap();

        assert_eq!(c.clock_skew.with_label_values(&["test-mon01"]).get(), 0.000022);
        assert_eq!(c.clock_skew.with_label_values(&["test-mon02"]).get(), -0.25);
        assert_eq!(c.latency.with_label_values(&["test-mon02"]).get(), 0.002);
        assert_eq!(c.clock_skew.with_label_values(&["test-mon03"]).get(), 0.1);
    }

    #[test]
    fn test_time_sync_failure_keeps_status_values() {
        let conn = MockConn::new();
        conn.on("status").reply(STATUS_JSON);
        conn.on("time-sync-status").fail("EINVAL");
        let c = collector(conn);
        c.update().unwrap();

        assert_eq!(c.clock_skew.with_label_values(&["test-mon02"]).get(), 0.5);
    }

    #[test]
    fn test_removed_monitor_dropped() {
        let conn = MockConn::new();
        conn.on("status").replies([
            STATUS_JSON,
            r#"{"health":{"health":{"health_services":[{"mons":[{"name":"test-mon01","kb_total":1}]}]}},"quorum":[0]}"#,
        ]);
        conn.on("time-sync-status").reply("{}");
        let c = collector(conn);

        c.update().unwrap();
        assert_eq!(series(&c.total_bytes), 2);

        c.update().unwrap();
        assert_eq!(series(&c.total_bytes), 1);
        assert!(!render_vec(&c.clock_skew).contains("test-mon02"));
        assert_eq!(c.quorum_count.get(), 1.0);
    }

    #[test]
    fn test_status_failure_is_error() {
        let conn = MockConn::new();
        conn.on("status").fail("ETIMEDOUT");
        let c = collector(conn);
        assert!(c.update().is_err());
    }
}
