//! Prometheus metric construction helpers for ceph-exporter.
//!
//! Every series carries a `cluster` const label so several clusters can share
//! one registry. Names follow `ceph_<subsystem>_<name>`; an empty subsystem
//! yields `ceph_<name>`.

use prometheus::core::Collector as _;
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, GaugeVec, Opts};

/// Namespace prefix for every exported metric.
pub const NAMESPACE: &str = "ceph";

/// Const label identifying the monitored cluster.
pub const CLUSTER_LABEL: &str = "cluster";

/// Builds gauges bound to one cluster label.
#[derive(Debug, Clone)]
pub struct MetricFactory {
    cluster: String,
}

impl MetricFactory {
    pub fn new(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Opts for `ceph_<subsystem>_<name>` with the cluster const label.
    pub fn opts(&self, subsystem: &str, name: &str, help: &str) -> Opts {
        Opts::new(name, help)
            .namespace(NAMESPACE)
            .subsystem(subsystem)
            .const_label(CLUSTER_LABEL, self.cluster.as_str())
    }

    pub fn gauge(&self, subsystem: &str, name: &str, help: &str) -> prometheus::Result<Gauge> {
        Gauge::with_opts(self.opts(subsystem, name, help))
    }

    pub fn gauge_vec(
        &self,
        subsystem: &str,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> prometheus::Result<GaugeVec> {
        GaugeVec::new(self.opts(subsystem, name, help), labels)
    }

    /// Builds a one-off gauge for a label set only known at collect time.
    ///
    /// The descriptor and value are created fresh on every call and are
    /// never registered, so entities that vanish simply stop being emitted.
    pub fn const_gauge(
        &self,
        subsystem: &str,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
        value: f64,
    ) -> prometheus::Result<Vec<MetricFamily>> {
        let opts = labels
            .iter()
            .fold(self.opts(subsystem, name, help), |opts, (k, v)| {
                opts.const_label(*k, *v)
            });
        let gauge = Gauge::with_opts(opts)?;
        gauge.set(value);
        Ok(gauge.collect())
    }
}

/// Converts a boolean state into a gauge value.
pub fn bool_value(state: bool) -> f64 {
    if state {
        1.0
    } else {
        0.0
    }
}
