//! Per-cluster composition root.
//!
//! An [`Exporter`] owns every collector for one cluster and implements
//! [`prometheus::core::Collector`], so it can be registered in a shared
//! registry next to the exporters of other clusters. A scrape runs one full
//! update pass under a mutex: concurrent scrapes are serialized and no two
//! passes ever write the same gauges at once.

use prometheus::core::Desc;
use prometheus::proto::MetricFamily;
use prometheus::GaugeVec;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::collectors::{
    ClusterUsageCollector, Collector, HealthCollector, MonitorCollector, OsdCollector,
    PoolInfoCollector, PoolUsageCollector, RgwAdmin, RgwCollector, RgwMode,
};
use crate::conn::Conn;
use crate::error::ExporterError;
use crate::metrics::{bool_value, MetricFactory};

/// How the RGW GC collector is wired for one cluster.
pub struct RgwSettings {
    pub admin: Arc<dyn RgwAdmin>,
    pub mode: RgwMode,
    pub interval: Duration,
}

pub struct Exporter {
    cluster: String,
    collectors: Mutex<Vec<Box<dyn Collector>>>,
    descs: Vec<Desc>,
    collector_success: GaugeVec,
}

impl Exporter {
    /// Builds the standard collector set for one cluster.
    pub fn new(
        cluster: &str,
        conn: Arc<dyn Conn>,
        rgw: Option<RgwSettings>,
    ) -> Result<Self, ExporterError> {
        let factory = MetricFactory::new(cluster);
        let mut collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(ClusterUsageCollector::new(conn.clone(), &factory)?),
            Box::new(PoolUsageCollector::new(conn.clone(), &factory)?),
            Box::new(PoolInfoCollector::new(conn.clone(), &factory)?),
            Box::new(HealthCollector::new(conn.clone(), &factory)?),
            Box::new(MonitorCollector::new(conn.clone(), &factory)?),
            Box::new(OsdCollector::new(conn, &factory)?),
        ];

        if let Some(settings) = rgw.filter(|s| s.mode != RgwMode::Disabled) {
            collectors.push(Box::new(RgwCollector::new(
                settings.admin,
                &factory,
                settings.mode,
                settings.interval,
            )?));
        }

        Self::with_collectors(cluster, collectors)
    }

    /// Wraps an arbitrary collector list.
    pub fn with_collectors(
        cluster: &str,
        collectors: Vec<Box<dyn Collector>>,
    ) -> Result<Self, ExporterError> {
        let factory = MetricFactory::new(cluster);
        let collector_success = factory.gauge_vec(
            "exporter",
            "collector_success",
            "Whether the last update of a collector succeeded (1) or failed (0)",
            &["collector"],
        )?;

        let mut descs: Vec<Desc> = collectors
            .iter()
            .flat_map(|c| c.metrics())
            .flat_map(|m| m.desc().into_iter().cloned().collect::<Vec<_>>())
            .collect();
        descs.extend(
            prometheus::core::Collector::desc(&collector_success)
                .into_iter()
                .cloned(),
        );

        debug!(
            cluster,
            collectors = collectors.len(),
            descriptors = descs.len(),
            "exporter assembled"
        );
        Ok(Self {
            cluster: cluster.to_string(),
            collectors: Mutex::new(collectors),
            descs,
            collector_success,
        })
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Names of the owned collectors, in update order.
    pub fn collector_names(&self) -> Vec<&'static str> {
        self.collectors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|c| c.name())
            .collect()
    }
}

impl prometheus::core::Collector for Exporter {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let collectors = self
            .collectors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let started = Instant::now();
        let mut families = Vec::new();

        for collector in collectors.iter() {
            let ok = match collector.update() {
                Ok(extra) => {
                    families.extend(extra);
                    true
                }
                Err(e) => {
                    error!(
                        cluster = self.cluster.as_str(),
                        collector = collector.name(),
                        error = %e,
                        "collector update failed"
                    );
                    false
                }
            };
            self.collector_success
                .with_label_values(&[collector.name()])
                .set(bool_value(ok));
            for metric in collector.metrics() {
                families.extend(metric.collect());
            }
        }
        families.extend(prometheus::core::Collector::collect(&self.collector_success));

        debug!(
            cluster = self.cluster.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "collection pass finished"
        );
        families
    }
}
