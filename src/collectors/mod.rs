//! Collectors for Ceph cluster metrics.
//!
//! Each collector issues one or more administrative commands through a
//! [`Conn`](crate::conn::Conn), normalizes the responses and writes the
//! results into the gauges it owns:
//! - `cluster_usage`: aggregate capacity and object count (`df`)
//! - `pool_usage`: per-pool usage and I/O counters (`df detail`)
//! - `pool_info`: per-pool topology and expansion factor
//! - `health`: cluster health, PG states, client/recovery I/O
//! - `monitors`: per-monitor store and clock figures
//! - `osd`: per-OSD capacity, latency and state
//! - `rgw`: RGW garbage-collection backlog

pub mod cluster_usage;
pub mod health;
pub mod monitors;
pub mod number;
pub mod osd;
pub mod pool_info;
pub mod pool_usage;
pub mod rgw;

use prometheus::proto::MetricFamily;

use crate::error::CollectResult;

pub use cluster_usage::ClusterUsageCollector;
pub use health::HealthCollector;
pub use monitors::MonitorCollector;
pub use osd::OsdCollector;
pub use pool_info::PoolInfoCollector;
pub use pool_usage::PoolUsageCollector;
pub use rgw::{RadosGwAdmin, RgwAdmin, RgwCollector, RgwMode};

/// One source of Ceph metrics owned by the exporter.
pub trait Collector: Send + Sync {
    /// Short name used in logs and the `collector` label.
    fn name(&self) -> &'static str;

    /// Gauges and gauge vectors owned by this collector. Their descriptors are
    /// fixed at construction time.
    fn metrics(&self) -> Vec<&dyn prometheus::core::Collector>;

    /// Polls the cluster and refreshes the owned gauges.
    ///
    /// Returns metrics built fresh for this cycle only (label sets not known
    /// at construction time); most collectors return an empty list.
    fn update(&self) -> CollectResult<Vec<MetricFamily>>;
}

#[cfg(test)]
pub(crate) mod testutil {
    use prometheus::core::Collector as _;
    use prometheus::{Encoder, GaugeVec, TextEncoder};

    /// Renders a collector's current series in exposition format.
    /// Families without series are skipped, as `Registry::gather` does.
    pub fn render(families: &[prometheus::proto::MetricFamily]) -> String {
        let live: Vec<_> = families
            .iter()
            .filter(|mf| !mf.get_metric().is_empty())
            .cloned()
            .collect();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&live, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    /// Number of live label combinations in a vector.
    pub fn series(vec: &GaugeVec) -> usize {
        vec.collect().iter().map(|mf| mf.get_metric().len()).sum()
    }

    pub fn render_vec(vec: &GaugeVec) -> String {
        render(&vec.collect())
    }
}
