//! Per-pool configuration collector.
//!
//! Combines three commands:
//! - `osd pool ls detail`: size, PG counts, quotas, stripe width
//! - `osd crush rule dump`: rule id to CRUSH root (first `take` step)
//! - `osd erasure-code-profile get`: k/m chunk counts per profile
//!
//! Series are labelled `(pool, profile, root)` and rebuilt every cycle.

use ahash::AHashMap as HashMap;
use prometheus::proto::MetricFamily;
use prometheus::GaugeVec;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::number::{self, Number};
use super::Collector;
use crate::conn::{mon_json, Conn, Request};
use crate::error::{CollectResult, ExporterError};
use crate::metrics::MetricFactory;

const POOL_LS: &str = "osd pool ls";
const ECP_GET: &str = "osd erasure-code-profile get";

/// Profile label used for pools that are not erasure coded.
pub const REPLICATED_PROFILE: &str = "replicated-ruleset";

#[derive(Debug, Deserialize)]
struct PoolDetail {
    pool_name: String,
    size: Option<Number>,
    min_size: Option<Number>,
    pg_num: Option<Number>,
    #[serde(alias = "pgp_num")]
    pg_placement_num: Option<Number>,
    quota_max_bytes: Option<Number>,
    quota_max_objects: Option<Number>,
    stripe_width: Option<Number>,
    #[serde(alias = "crush_ruleset")]
    crush_rule: Option<Number>,
    #[serde(default)]
    erasure_code_profile: String,
}

#[derive(Debug, Deserialize)]
struct CrushRule {
    rule_id: Number,
    #[serde(default)]
    steps: Vec<CrushStep>,
}

#[derive(Debug, Deserialize)]
struct CrushStep {
    op: String,
    item_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErasureCodeProfile {
    k: Option<Number>,
    m: Option<Number>,
}

/// Builds the rule-id to root-name map from the first `take` step of each rule.
fn crush_roots(rules: &[CrushRule]) -> HashMap<i64, String> {
    rules
        .iter()
        .filter_map(|rule| {
            let id = rule.rule_id.parse().ok()? as i64;
            let root = rule
                .steps
                .iter()
                .find(|s| s.op == "take")
                .and_then(|s| s.item_name.clone())?;
            Some((id, root))
        })
        .collect()
}

/// `(k + m) / k` rounded to two decimals, `None` when k is unusable.
pub fn expansion_factor(k: f64, m: f64) -> Option<f64> {
    if k <= 0.0 {
        return None;
    }
    Some(((k + m) / k * 100.0).round() / 100.0)
}

/// Pool topology and data-expansion figures.
pub struct PoolInfoCollector {
    conn: Arc<dyn Conn>,
    pg_num: GaugeVec,
    pgp_num: GaugeVec,
    min_size: GaugeVec,
    size: GaugeVec,
    quota_max_bytes: GaugeVec,
    quota_max_objects: GaugeVec,
    stripe_width: GaugeVec,
    expansion_factor: GaugeVec,
}

impl PoolInfoCollector {
    pub fn new(conn: Arc<dyn Conn>, factory: &MetricFactory) -> Result<Self, ExporterError> {
        let labels = ["pool", "profile", "root"];
        let vec = |name: &str, help: &str| factory.gauge_vec("pool", name, help, &labels);
        Ok(Self {
            conn,
            pg_num: vec("pg_num", "The total count of PGs allocated to a pool")?,
            pgp_num: vec(
                "pgp_num",
                "The total count of PGs allocated to a pool and used for placement calculations",
            )?,
            min_size: vec(
                "min_size",
                "Minimum number of copies or chunks of an object that need to be present for active I/O",
            )?,
            size: vec("size", "Total copies or chunks of an object that need to be present for a healthy cluster")?,
            quota_max_bytes: vec("quota_max_bytes", "Maximum amount of bytes of data allowed in a pool")?,
            quota_max_objects: vec(
                "quota_max_objects",
                "Maximum amount of RADOS objects allowed in a pool",
            )?,
            stripe_width: vec(
                "stripe_width",
                "Stripe width of a RADOS object in a pool",
            )?,
            expansion_factor: vec(
                "expansion_factor",
                "Data expansion multiplier for a pool",
            )?,
        })
    }

    fn vectors(&self) -> [&GaugeVec; 8] {
        [
            &self.pg_num,
            &self.pgp_num,
            &self.min_size,
            &self.size,
            &self.quota_max_bytes,
            &self.quota_max_objects,
            &self.stripe_width,
            &self.expansion_factor,
        ]
    }

    /// Looks up the k/m expansion factor of an erasure-code profile.
    fn profile_expansion(&self, profile: &str) -> Option<f64> {
        let request = Request::new(ECP_GET).arg("name", profile);
        let ecp: ErasureCodeProfile = match mon_json(self.conn.as_ref(), &request) {
            Ok(p) => p,
            Err(e) => {
                warn!(profile, error = %e, "erasure-code profile lookup failed, using pool size");
                return None;
            }
        };
        let k = number::value(ECP_GET, "k", ecp.k.as_ref());
        let m = number::value(ECP_GET, "m", ecp.m.as_ref());
        expansion_factor(k, m)
    }

    fn crush_roots(&self) -> HashMap<i64, String> {
        match mon_json::<Vec<CrushRule>>(self.conn.as_ref(), &Request::new("osd crush rule dump")) {
            Ok(rules) => crush_roots(&rules),
            Err(e) => {
                warn!(error = %e, "crush rule dump failed, pool roots unresolved");
                HashMap::new()
            }
        }
    }
}

impl Collector for PoolInfoCollector {
    fn name(&self) -> &'static str {
        "pool_info"
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

        let pools: Vec<PoolDetail> = mon_json(
            self.conn.as_ref(),
            &Request::new(POOL_LS).arg("detail", "detail"),
        )?;
        let roots = self.crush_roots();
        let mut profiles: HashMap<String, Option<f64>> = HashMap::new();

        for pool in &pools {
            let profile = if pool.erasure_code_profile.is_empty() {
                REPLICATED_PROFILE
            } else {
                pool.erasure_code_profile.as_str()
            };
            let rule = pool.crush_rule.as_ref().and_then(|n| n.parse().ok());
            if rule.is_none() {
                debug!(pool = pool.pool_name.as_str(), "pool has no usable crush_rule, root left empty");
            }
            let root = rule
                .and_then(|r| roots.get(&(r as i64)))
                .map(String::as_str)
                .unwrap_or_default();
            let labels = [pool.pool_name.as_str(), profile, root];

            let size = number::value(POOL_LS, "size", pool.size.as_ref());
            let expansion = if profile == REPLICATED_PROFILE {
                None
            } else {
                *profiles
                    .entry(profile.to_string())
                    .or_insert_with(|| self.profile_expansion(profile))
            };

            let set = |vec: &GaugeVec, value: f64| vec.with_label_values(&labels).set(value);
            set(&self.size, size);
            set(&self.expansion_factor, expansion.unwrap_or(size));
            set(&self.pg_num, number::value(POOL_LS, "pg_num", pool.pg_num.as_ref()));
            set(
                &self.pgp_num,
                number::value(POOL_LS, "pg_placement_num", pool.pg_placement_num.as_ref()),
            );
            set(&self.min_size, number::value(POOL_LS, "min_size", pool.min_size.as_ref()));
            set(
                &self.quota_max_bytes,
                number::value(POOL_LS, "quota_max_bytes", pool.quota_max_bytes.as_ref()),
            );
            set(
                &self.quota_max_objects,
                number::value(POOL_LS, "quota_max_objects", pool.quota_max_objects.as_ref()),
            );
            set(
                &self.stripe_width,
                number::value(POOL_LS, "stripe_width", pool.stripe_width.as_ref()),
            );
        }

        debug!(pools = pools.len(), "pool info updated");
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testutil::{render_vec, series};
    use crate::conn::MockConn;

    const RULES: &str = r#"[
        {"rule_id":0,"rule_name":"replicated_rule","steps":[
            {"op":"take","item":-1,"item_name":"default"},
            {"op":"chooseleaf_firstn","num":0,"type":"host"},{"op":"emit"}]},
        {"rule_id":1,"rule_name":"ec","steps":[
            {"op":"set_chooseleaf_tries","num":5},
            {"op":"take","item":-8,"item_name":"ssd"},{"op":"emit"}]}
    ]"#;

    fn conn_with(pools: &[&str]) -> MockConn {
        let conn = MockConn::new();
        conn.on("osd pool ls").replies(pools.iter().copied());
        conn.on("osd crush rule dump").reply(RULES);
        conn
    }

    #[test]
    fn test_expansion_factor_rounding() {
        assert_eq!(expansion_factor(4.0, 2.0), Some(1.5));
        assert_eq!(expansion_factor(3.0, 2.0), Some(1.67));
        assert_eq!(expansion_factor(0.0, 2.0), None);
    }

    #[test]
    fn test_crush_roots_use_first_take() {
        let rules: Vec<CrushRule> = serde_json::from_str(RULES).unwrap();
        let roots = crush_roots(&rules);
        assert_eq!(roots.get(&0).map(String::as_str), Some("default"));
        assert_eq!(roots.get(&1).map(String::as_str), Some("ssd"));
    }

    #[test]
    fn test_replicated_and_erasure_pools() {
        let conn = conn_with(&[r#"[
            {"pool_name":"rbd","size":3,"min_size":2,"pg_num":128,"pg_placement_num":128,
             "quota_max_bytes":0,"quota_max_objects":0,"stripe_width":0,"crush_rule":0,
             "erasure_code_profile":""},
            {"pool_name":"ecpool","size":6,"min_size":5,"pg_num":64,"pg_placement_num":64,
             "quota_max_bytes":1024,"quota_max_objects":10,"stripe_width":16384,"crush_rule":1,
             "erasure_code_profile":"ec-4-2"}
        ]"#]);
        conn.on("osd erasure-code-profile get")
            .arg("name", "ec-4-2")
            .reply(r#"{"k":"4","m":"2","plugin":"jerasure"}"#);
        let c = PoolInfoCollector::new(Arc::new(conn), &MetricFactory::new("ceph")).unwrap();
        c.update().unwrap();

        let rbd = ["rbd", REPLICATED_PROFILE, "default"];
        assert_eq!(c.expansion_factor.with_label_values(&rbd).get(), 3.0);
        assert_eq!(c.pg_num.with_label_values(&rbd).get(), 128.0);

        let ec = ["ecpool", "ec-4-2", "ssd"];
        assert_eq!(c.expansion_factor.with_label_values(&ec).get(), 1.5);
        assert_eq!(c.stripe_width.with_label_values(&ec).get(), 16384.0);
        assert_eq!(c.quota_max_objects.with_label_values(&ec).get(), 10.0);
    }

    #[test]
    fn test_missing_crush_rule_has_empty_root() {
        let conn = conn_with(&[r#"[{"pool_name":"legacy","size":2}]"#]);
        let c = PoolInfoCollector::new(Arc::new(conn), &MetricFactory::new("ceph")).unwrap();
        c.update().unwrap();

        assert_eq!(c.size.with_label_values(&["legacy", REPLICATED_PROFILE, ""]).get(), 2.0);
        assert!(!render_vec(&c.size).contains("root=\"default\""));
    }

    #[test]
    fn test_failed_profile_lookup_falls_back_to_size() {
        let conn = conn_with(&[r#"[{"pool_name":"ecpool","size":6,"crush_rule":1,
             "erasure_code_profile":"missing"}]"#]);
        conn.on("osd erasure-code-profile get").fail("ENOENT");
        let c = PoolInfoCollector::new(Arc::new(conn), &MetricFactory::new("ceph")).unwrap();
        c.update().unwrap();

        assert_eq!(
            c.expansion_factor
                .with_label_values(&["ecpool", "missing", "ssd"])
                .get(),
            6.0
        );
    }

    #[test]
    fn test_removed_pool_series_dropped() {
        let conn = conn_with(&[
            r#"[{"pool_name":"rbd","size":3,"crush_rule":0},{"pool_name":"bench","size":2,"crush_rule":0}]"#,
            r#"[{"pool_name":"rbd","size":3,"crush_rule":0}]"#,
        ]);
        let c = PoolInfoCollector::new(Arc::new(conn), &MetricFactory::new("ceph")).unwrap();

        c.update().unwrap();
        assert_eq!(series(&c.size), 2);
        assert!(render_vec(&c.size).contains("pool=\"bench\""));

        c.update().unwrap();
        assert_eq!(series(&c.size), 1);
        assert!(!render_vec(&c.size).contains("pool=\"bench\""));
    }

    #[test]
    fn test_profile_lookup_once_per_cycle() {
        let conn = Arc::new(conn_with(&[r#"[
            {"pool_name":"a","size":3,"crush_rule":1,"erasure_code_profile":"ec-2-1"},
            {"pool_name":"b","size":3,"crush_rule":1,"erasure_code_profile":"ec-2-1"}
        ]"#]));
        conn.on("osd erasure-code-profile get").reply(r#"{"k":2,"m":1}"#);
        let c = PoolInfoCollector::new(conn.clone(), &MetricFactory::new("ceph")).unwrap();
        c.update().unwrap();

        assert_eq!(conn.calls("osd erasure-code-profile get"), 1);
        assert_eq!(
            c.expansion_factor
                .with_label_values(&["b", "ec-2-1", "ssd"])
                .get(),
            1.5
        );
    }
}
