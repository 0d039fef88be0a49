//! OSD collector.
//!
//! Joins several commands by numeric OSD id, labelling every series with the
//! canonical `osd.<id>` name:
//! - `osd df`: weights, capacity, utilization, PG count, cluster summary
//! - `osd perf`: commit/apply latency
//! - `osd dump`: up/in flags and full-ratio states
//! - `pg dump pgs_brief`: per-OSD scrub state from acting sets
//! - `osd tree` (down states): down OSDs and strays
//!
//! PGs that are recovering or backfilling are additionally queried one by one
//! for their recovered object count.

use ahash::AHashMap as HashMap;
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, GaugeVec};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::number::{self, Number};
use super::Collector;
use crate::conn::{mon_json, pg_json, Conn, Request};
use crate::error::{CollectResult, ExporterError};
use crate::metrics::{bool_value, MetricFactory};

const OSD_DF: &str = "osd df";
const OSD_PERF: &str = "osd perf";
const OSD_DUMP: &str = "osd dump";
const PG_DUMP: &str = "pg dump";
const OSD_TREE: &str = "osd tree";
const PG_QUERY: &str = "query";

#[derive(Debug, Default, Deserialize)]
struct OsdDf {
    #[serde(default)]
    nodes: Vec<OsdDfNode>,
    #[serde(default)]
    summary: OsdDfSummary,
}

#[derive(Debug, Deserialize)]
struct OsdDfNode {
    id: Number,
    crush_weight: Option<Number>,
    depth: Option<Number>,
    reweight: Option<Number>,
    kb: Option<Number>,
    kb_used: Option<Number>,
    kb_avail: Option<Number>,
    utilization: Option<Number>,
    var: Option<Number>,
    pgs: Option<Number>,
}

#[derive(Debug, Default, Deserialize)]
struct OsdDfSummary {
    total_kb: Option<Number>,
    total_kb_used: Option<Number>,
    total_kb_avail: Option<Number>,
    average_utilization: Option<Number>,
}

/// Luminous and later wrap the list in `osdstats`.
#[derive(Debug, Default, Deserialize)]
struct OsdPerf {
    osd_perf_infos: Option<Vec<PerfInfo>>,
    osdstats: Option<OsdStats>,
}

impl OsdPerf {
    fn infos(&self) -> &[PerfInfo] {
        self.osd_perf_infos
            .as_deref()
            .or_else(|| self.osdstats.as_ref().map(|s| s.osd_perf_infos.as_slice()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct OsdStats {
    #[serde(default)]
    osd_perf_infos: Vec<PerfInfo>,
}

#[derive(Debug, Deserialize)]
struct PerfInfo {
    id: Number,
    #[serde(default)]
    perf_stats: PerfStats,
}

#[derive(Debug, Default, Deserialize)]
struct PerfStats {
    commit_latency_ms: Option<Number>,
    apply_latency_ms: Option<Number>,
}

#[derive(Debug, Default, Deserialize)]
struct OsdDump {
    #[serde(default)]
    osds: Vec<OsdDumpEntry>,
}

#[derive(Debug, Deserialize)]
struct OsdDumpEntry {
    osd: Number,
    up: Option<Number>,
    #[serde(rename = "in")]
    in_: Option<Number>,
    #[serde(default)]
    state: Vec<String>,
}

/// Older releases return a bare array, newer ones wrap it in `pg_stats`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PgDump {
    Bare(Vec<PgBrief>),
    Wrapped {
        #[serde(default)]
        pg_stats: Vec<PgBrief>,
    },
}

impl PgDump {
    fn pgs(&self) -> &[PgBrief] {
        match self {
            PgDump::Bare(pgs) => pgs,
            PgDump::Wrapped { pg_stats } => pg_stats,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PgBrief {
    pgid: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    acting: Vec<Number>,
}

#[derive(Debug, Default, Deserialize)]
struct OsdTree {
    #[serde(default)]
    nodes: Vec<TreeNode>,
    #[serde(default)]
    stray: Vec<TreeNode>,
}

#[derive(Debug, Deserialize)]
struct TreeNode {
    id: Number,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct PgQuery {
    #[serde(default)]
    info: PgQueryInfo,
}

#[derive(Debug, Default, Deserialize)]
struct PgQueryInfo {
    #[serde(default)]
    stats: PgQueryStats,
}

#[derive(Debug, Default, Deserialize)]
struct PgQueryStats {
    #[serde(default)]
    stat_sum: StatSum,
}

#[derive(Debug, Default, Deserialize)]
struct StatSum {
    num_objects_recovered: Option<Number>,
}

/// Canonical `osd.<id>` label for a numeric id.
fn osd_name(command: &str, id: &Number) -> Option<String> {
    match id.parse() {
        Ok(v) => Some(format!("osd.{}", v as i64)),
        Err(e) => {
            warn!(command, error = %e, "unusable osd id, entry skipped");
            None
        }
    }
}

/// Scrub ordinal of a PG state: 0 none, 1 scrubbing, 2 deep scrubbing.
pub fn scrub_level(state: &str) -> u8 {
    let tokens: Vec<&str> = state.split('+').collect();
    match (tokens.contains(&"scrubbing"), tokens.contains(&"deep")) {
        (true, true) => 2,
        (true, false) => 1,
        _ => 0,
    }
}

fn needs_recovery_query(state: &str) -> bool {
    state
        .split('+')
        .any(|t| t == "recovering" || t == "backfilling")
}

/// Per-OSD capacity, latency and state gauges.
pub struct OsdCollector {
    conn: Arc<dyn Conn>,
    crush_weight: GaugeVec,
    depth: GaugeVec,
    reweight: GaugeVec,
    bytes: GaugeVec,
    used_bytes: GaugeVec,
    avail_bytes: GaugeVec,
    utilization: GaugeVec,
    variance: GaugeVec,
    pgs: GaugeVec,
    commit_latency: GaugeVec,
    apply_latency: GaugeVec,
    osd_in: GaugeVec,
    osd_up: GaugeVec,
    full: GaugeVec,
    near_full: GaugeVec,
    backfill_full: GaugeVec,
    scrub_state: GaugeVec,
    down: GaugeVec,
    objects_recovered: GaugeVec,
    total_bytes: Gauge,
    total_used_bytes: Gauge,
    total_avail_bytes: Gauge,
    average_utilization: Gauge,
}

impl OsdCollector {
    pub fn new(conn: Arc<dyn Conn>, factory: &MetricFactory) -> Result<Self, ExporterError> {
        let vec = |name: &str, help: &str| factory.gauge_vec("osd", name, help, &["osd"]);
        let gauge = |name: &str, help: &str| factory.gauge("osd", name, help);
        Ok(Self {
            conn,
            crush_weight: vec("crush_weight", "OSD Crush Weight")?,
            depth: vec("depth", "OSD Depth")?,
            reweight: vec("reweight", "OSD Reweight")?,
            bytes: vec("bytes", "OSD Total Bytes")?,
            used_bytes: vec("used_bytes", "OSD Used Storage in Bytes")?,
            avail_bytes: vec("avail_bytes", "OSD Available Storage in Bytes")?,
            utilization: vec("utilization", "OSD Utilization")?,
            variance: vec("variance", "OSD Variance")?,
            pgs: vec("pgs", "OSD Placement Group Count")?,
            commit_latency: vec("perf_commit_latency_seconds", "OSD Perf Commit Latency")?,
            apply_latency: vec("perf_apply_latency_seconds", "OSD Perf Apply Latency")?,
            osd_in: vec("in", "OSD In Status")?,
            osd_up: vec("up", "OSD Up Status")?,
            full: vec("full", "OSD Full Status")?,
            near_full: vec("near_full", "OSD Near Full Status")?,
            backfill_full: vec("backfill_full", "OSD Backfill Full Status")?,
            scrub_state: vec("scrub_state", "State of OSDs involved in a scrub")?,
            down: factory.gauge_vec("osd", "down", "No. of OSDs down in the cluster", &["osd", "status"])?,
            objects_recovered: factory.gauge_vec(
                "pg",
                "objects_recovered",
                "Number of objects recovered in a PG",
                &["pgid"],
            )?,
            total_bytes: gauge("total_bytes", "OSD Total Storage Bytes")?,
            total_used_bytes: gauge("total_used_bytes", "OSD Total Used Storage Bytes")?,
            total_avail_bytes: gauge("total_avail_bytes", "OSD Total Available Storage Bytes")?,
            average_utilization: gauge("average_utilization", "OSD Average Utilization")?,
        })
    }

    fn vectors(&self) -> [&GaugeVec; 19] {
        [
            &self.crush_weight,
            &self.depth,
            &self.reweight,
            &self.bytes,
            &self.used_bytes,
            &self.avail_bytes,
            &self.utilization,
            &self.variance,
            &self.pgs,
            &self.commit_latency,
            &self.apply_latency,
            &self.osd_in,
            &self.osd_up,
            &self.full,
            &self.near_full,
            &self.backfill_full,
            &self.scrub_state,
            &self.down,
            &self.objects_recovered,
        ]
    }

    /// Records `osd df` and returns the OSD names it reported.
    fn record_df(&self, df: &OsdDf) -> Vec<String> {
        let mut names = Vec::with_capacity(df.nodes.len());
        for node in &df.nodes {
            let Some(name) = osd_name(OSD_DF, &node.id) else {
                continue;
            };
            let labels = [name.as_str()];
            let set = |vec: &GaugeVec, field: &str, n: &Option<Number>, scale: f64| {
                vec.with_label_values(&labels)
                    .set(number::value(OSD_DF, field, n.as_ref()) * scale);
            };
            set(&self.crush_weight, "crush_weight", &node.crush_weight, 1.0);
            set(&self.depth, "depth", &node.depth, 1.0);
            set(&self.reweight, "reweight", &node.reweight, 1.0);
            set(&self.bytes, "kb", &node.kb, 1024.0);
            set(&self.used_bytes, "kb_used", &node.kb_used, 1024.0);
            set(&self.avail_bytes, "kb_avail", &node.kb_avail, 1024.0);
            set(&self.utilization, "utilization", &node.utilization, 1.0);
            set(&self.variance, "var", &node.var, 1.0);
            set(&self.pgs, "pgs", &node.pgs, 1.0);
            names.push(name);
        }

        let summary = &df.summary;
        let total = |field: &str, n: &Option<Number>| number::value(OSD_DF, field, n.as_ref());
        self.total_bytes
            .set(total("total_kb", &summary.total_kb) * 1024.0);
        self.total_used_bytes
            .set(total("total_kb_used", &summary.total_kb_used) * 1024.0);
        self.total_avail_bytes
            .set(total("total_kb_avail", &summary.total_kb_avail) * 1024.0);
        self.average_utilization.set(total(
            "average_utilization",
            &summary.average_utilization,
        ));
        names
    }

    fn record_perf(&self, perf: &OsdPerf) {
        for info in perf.infos() {
            let Some(name) = osd_name(OSD_PERF, &info.id) else {
                continue;
            };
            let stats = &info.perf_stats;
            self.commit_latency.with_label_values(&[name.as_str()]).set(
                number::value(OSD_PERF, "commit_latency_ms", stats.commit_latency_ms.as_ref()) / 1000.0,
            );
            self.apply_latency.with_label_values(&[name.as_str()]).set(
                number::value(OSD_PERF, "apply_latency_ms", stats.apply_latency_ms.as_ref()) / 1000.0,
            );
        }
    }

    fn record_dump(&self, dump: &OsdDump) {
        for entry in &dump.osds {
            let Some(name) = osd_name(OSD_DUMP, &entry.osd) else {
                continue;
            };
            let labels = [name.as_str()];
            let has = |state: &str| bool_value(entry.state.iter().any(|s| s == state));
            self.osd_in
                .with_label_values(&labels)
                .set(number::value(OSD_DUMP, "in", entry.in_.as_ref()));
            self.osd_up
                .with_label_values(&labels)
                .set(number::value(OSD_DUMP, "up", entry.up.as_ref()));
            self.full.with_label_values(&labels).set(has("full"));
            self.near_full.with_label_values(&labels).set(has("nearfull"));
            self.backfill_full
                .with_label_values(&labels)
                .set(has("backfillfull"));
        }
    }

    /// Sets the scrub ordinal of every known OSD and returns the ids of PGs
    /// that need a recovery query.
    fn record_scrubs(&self, dump: &PgDump, osds: &[String]) -> Vec<String> {
        let mut levels: HashMap<String, u8> = osds.iter().map(|n| (n.clone(), 0)).collect();
        let mut recovering = Vec::new();

        for pg in dump.pgs() {
            if needs_recovery_query(&pg.state) {
                recovering.push(pg.pgid.clone());
            }
            let level = scrub_level(&pg.state);
            if level == 0 {
                continue;
            }
            for id in &pg.acting {
                if let Some(name) = osd_name(PG_DUMP, id) {
                    let slot = levels.entry(name).or_default();
                    *slot = (*slot).max(level);
                }
            }
        }

        for (name, level) in &levels {
            self.scrub_state
                .with_label_values(&[name.as_str()])
                .set(*level as f64);
        }
        recovering
    }

    fn record_tree(&self, tree: &OsdTree) {
        let down = tree
            .nodes
            .iter()
            .filter(|n| n.kind == "osd")
            .chain(tree.stray.iter());
        for node in down {
            let name = if node.name.is_empty() {
                match osd_name(OSD_TREE, &node.id) {
                    Some(n) => n,
                    None => continue,
                }
            } else {
                node.name.clone()
            };
            let status = if node.status.is_empty() {
                "down"
            } else {
                node.status.as_str()
            };
            self.down.with_label_values(&[name.as_str(), status]).set(1.0);
        }
    }

    fn record_recovery(&self, pgids: &[String]) {
        for pgid in pgids {
            match pg_json::<PgQuery>(self.conn.as_ref(), pgid, &Request::new(PG_QUERY)) {
                Ok(query) => {
                    let recovered = number::value(
                        PG_QUERY,
                        "num_objects_recovered",
                        query.info.stats.stat_sum.num_objects_recovered.as_ref(),
                    );
                    self.objects_recovered
                        .with_label_values(&[pgid.as_str()])
                        .set(recovered);
                }
                Err(e) => warn!(pgid = pgid.as_str(), error = %e, "pg query failed"),
            }
        }
    }
}

impl Collector for OsdCollector {
    fn name(&self) -> &'static str {
        "osd"
    }

    fn metrics(&self) -> Vec<&dyn prometheus::core::Collector> {
        let totals: [&dyn prometheus::core::Collector; 4] = [
            &self.total_bytes,
            &self.total_used_bytes,
            &self.total_avail_bytes,
            &self.average_utilization,
        ];
        self.vectors()
            .into_iter()
            .map(|v| v as &dyn prometheus::core::Collector)
            .chain(totals)
            .collect()
    }

    #[instrument(skip(self))]
    fn update(&self) -> CollectResult<Vec<MetricFamily>> {
        for vec in self.vectors() {
            vec.reset();
        }
        let conn = self.conn.as_ref();

        let df: OsdDf = mon_json(conn, &Request::new(OSD_DF))?;
        let names = self.record_df(&df);

        let perf: OsdPerf = mon_json(conn, &Request::new(OSD_PERF))?;
        self.record_perf(&perf);

        let dump: OsdDump = mon_json(conn, &Request::new(OSD_DUMP))?;
        self.record_dump(&dump);

        let pgs: PgDump = mon_json(
            conn,
            &Request::new(PG_DUMP).arg("dumpcontents", vec!["pgs_brief"]),
        )?;
        let recovering = self.record_scrubs(&pgs, &names);

        let tree: OsdTree = mon_json(conn, &Request::new(OSD_TREE).arg("states", vec!["down"]))?;
        self.record_tree(&tree);

        self.record_recovery(&recovering);

        debug!(
            osds = names.len(),
            recovering = recovering.len(),
            "osd figures updated"
        );
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testutil::{render_vec, series};
    use crate::conn::MockConn;

    const OSD_DF_JSON: &str = r#"{
        "nodes": [
            {"id": 0, "name": "osd.0", "type": "osd", "crush_weight": 0.0106, "depth": 2,
             "reweight": 1.0, "kb": 11154424, "kb_used": 40956, "kb_avail": 11113468,
             "utilization": 0.367, "var": 1.0, "pgs": 162},
            {"id": 1, "name": "osd.1", "crush_weight": "0.5", "depth": "2", "reweight": "1",
             "kb": "100", "kb_used": "25", "kb_avail": "75", "utilization": "25", "var": "0.9", "pgs": "7"}
        ],
        "summary": {"total_kb": 200, "total_kb_used": 50, "total_kb_avail": 150, "average_utilization": 25}
    }"#;

    fn conn() -> MockConn {
        let conn = MockConn::new();
        conn.on("osd df").reply(OSD_DF_JSON);
        conn.on("osd perf").reply(
            r#"{"osdstats":{"osd_perf_infos":[
                {"id":0,"perf_stats":{"commit_latency_ms":12,"apply_latency_ms":4}},
                {"id":1,"perf_stats":{"commit_latency_ms":"250","apply_latency_ms":"1"}}]}}"#,
        );
        conn.on("osd dump").reply(
            r#"{"osds":[
                {"osd":0,"up":1,"in":1,"state":["exists","up"]},
                {"osd":1,"up":0,"in":1,"state":["exists","nearfull","backfillfull"]}]}"#,
        );
        conn.on("pg dump").reply(
            r#"{"pg_stats":[
                {"pgid":"1.0","state":"active+clean+scrubbing+deep","acting":[0,1]},
                {"pgid":"1.1","state":"active+clean+scrubbing","acting":[1]},
                {"pgid":"1.2","state":"active+recovering+degraded","acting":[0]}]}"#,
        );
        conn.on("osd tree").reply(
            r#"{"nodes":[{"id":-1,"name":"default","type":"root"},
                {"id":1,"name":"osd.1","type":"osd","status":"down"}],
                "stray":[{"id":7,"name":"osd.7","status":"destroyed"}]}"#,
        );
        conn.on_pg("1.2", "query")
            .reply(r#"{"info":{"stats":{"stat_sum":{"num_objects_recovered":42}}}}"#);
        conn
    }

    fn collector(conn: MockConn) -> OsdCollector {
        OsdCollector::new(Arc::new(conn), &MetricFactory::new("ceph")).unwrap()
    }

    #[test]
    fn test_df_figures() {
        let c = collector(conn());
        c.update().unwrap();

        let osd0 = ["osd.0"];
        assert_eq!(c.crush_weight.with_label_values(&osd0).get(), 0.0106);
        assert_eq!(c.bytes.with_label_values(&osd0).get(), 11154424.0 * 1024.0);
        assert_eq!(c.pgs.with_label_values(&osd0).get(), 162.0);
        assert_eq!(c.variance.with_label_values(&["osd.1"]).get(), 0.9);
        assert_eq!(c.used_bytes.with_label_values(&["osd.1"]).get(), 25.0 * 1024.0);
        assert_eq!(c.total_bytes.get(), 200.0 * 1024.0);
        assert_eq!(c.average_utilization.get(), 25.0);
    }

    #[test]
    fn test_latency_in_seconds() {
        let c = collector(conn());
        c.update().unwrap();
        assert_eq!(c.commit_latency.with_label_values(&["osd.0"]).get(), 0.012);
        assert_eq!(c.apply_latency.with_label_values(&["osd.0"]).get(), 0.004);
        assert_eq!(c.commit_latency.with_label_values(&["osd.1"]).get(), 0.25);
    }

    #[test]
    fn test_flat_perf_shape() {
        let conn = conn();
        conn.on("osd perf")
            .reply(r#"{"osd_perf_infos":[{"id":0,"perf_stats":{"commit_latency_ms":3,"apply_latency_ms":3}}]}"#);
        let c = collector(conn);
        c.update().unwrap();
        assert_eq!(c.commit_latency.with_label_values(&["osd.0"]).get(), 0.003);
    }

    #[test]
    fn test_dump_states() {
        let c = collector(conn());
        c.update().unwrap();
        assert_eq!(c.osd_up.with_label_values(&["osd.0"]).get(), 1.0);
        assert_eq!(c.osd_up.with_label_values(&["osd.1"]).get(), 0.0);
        assert_eq!(c.osd_in.with_label_values(&["osd.1"]).get(), 1.0);
        assert_eq!(c.near_full.with_label_values(&["osd.1"]).get(), 1.0);
        assert_eq!(c.backfill_full.with_label_values(&["osd.1"]).get(), 1.0);
        assert_eq!(c.full.with_label_values(&["osd.1"]).get(), 0.0);
        assert_eq!(c.near_full.with_label_values(&["osd.0"]).get(), 0.0);
    }

    #[test]
    fn test_scrub_state_takes_deepest() {
        let c = collector(conn());
        c.update().unwrap();
        assert_eq!(c.scrub_state.with_label_values(&["osd.0"]).get(), 2.0);
        assert_eq!(c.scrub_state.with_label_values(&["osd.1"]).get(), 2.0);
    }

    #[test]
    fn test_scrub_level() {
        assert_eq!(scrub_level("active+clean"), 0);
        assert_eq!(scrub_level("active+clean+scrubbing"), 1);
        assert_eq!(scrub_level("active+clean+scrubbing+deep"), 2);
    }

    #[test]
    fn test_idle_osds_report_zero_scrub_state() {
        let conn = conn();
        conn.on("pg dump")
            .reply(r#"[{"pgid":"1.0","state":"active+clean","acting":[0,1]}]"#);
        let c = collector(conn);
        c.update().unwrap();
        assert_eq!(series(&c.scrub_state), 2);
        assert_eq!(c.scrub_state.with_label_values(&["osd.0"]).get(), 0.0);
    }

    #[test]
    fn test_down_and_stray_osds() {
        let c = collector(conn());
        c.update().unwrap();
        let text = render_vec(&c.down);
        assert!(text.contains("osd=\"osd.1\""));
        assert!(text.contains("status=\"down\""));
        assert!(text.contains("osd=\"osd.7\""));
        assert!(text.contains("status=\"destroyed\""));
        assert!(!text.contains("default"));
    }

    #[test]
    fn test_recovering_pg_queried() {
        let conn = Arc::new(conn());
        let c = OsdCollector::new(conn.clone(), &MetricFactory::new("ceph")).unwrap();
        c.update().unwrap();

        assert_eq!(conn.calls("query"), 1);
        assert_eq!(c.objects_recovered.with_label_values(&["1.2"]).get(), 42.0);
    }

    #[test]
    fn test_failed_pg_query_does_not_abort() {
        let conn = conn();
        conn.on_pg("1.2", "query").fail("ENOENT");
        let c = collector(conn);
        c.update().unwrap();
        assert_eq!(series(&c.objects_recovered), 0);
        assert_eq!(series(&c.osd_up), 2);
    }

    #[test]
    fn test_removed_osd_dropped() {
        let conn = conn();
        conn.on("osd df").replies([
            OSD_DF_JSON,
            r#"{"nodes":[{"id":0,"kb":1}],"summary":{}}"#,
        ]);
        let c = collector(conn);
        c.update().unwrap();
        assert_eq!(series(&c.bytes), 2);

        c.update().unwrap();
        assert_eq!(series(&c.bytes), 1);
        assert!(!render_vec(&c.bytes).contains("osd.1"));
    }

    #[test]
    fn test_df_failure_is_error() {
        let conn = conn();
        conn.on("osd df").fail("EACCES");
        let c = collector(conn);
        assert!(c.update().is_err());
    }
}
