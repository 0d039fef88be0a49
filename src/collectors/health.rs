//! Cluster health collector.
//!
//! Two sources feed the same gauge set every cycle:
//!
//! 1. The JSON `status` document: health summary and checks, OSD map
//!    counts, PG map states and rates, manager roster, service map.
//! 2. The plain-text `status` output. Older releases only report client,
//!    recovery and cache-tier I/O there, so recognized lines are scanned with
//!    regular expressions. Scanning stops at the `cluster:` header that newer
//!    releases print first, leaving the structured values in place.
//!
//! OSD map flags come from an auxiliary `osd dump` whose failure is logged
//! without aborting the cycle.

use prometheus::proto::MetricFamily;
use prometheus::Gauge;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::number::{self, Number};
use super::Collector;
use crate::conn::{mon_json, mon_raw, Conn, Request};
use crate::error::{CollectResult, ExporterError};
use crate::metrics::{bool_value, MetricFactory};

const STATUS: &str = "status";
const OSD_DUMP: &str = "osd dump";

/// Health checks and their criticality: 1 = soft, 2 = hard.
pub const CHECK_SEVERITIES: &[(&str, u8)] = &[
    ("MON_DOWN", 2),
    ("OSD_DOWN", 1),
    ("OSD_HOST_DOWN", 1),
    ("OSD_FULL", 2),
    ("OSD_NEARFULL", 2),
    ("OSD_BACKFILLFULL", 2),
    ("PG_DEGRADED", 1),
    ("PG_AVAILABILITY", 1),
    ("PG_DAMAGED", 2),
    ("OBJECT_MISPLACED", 1),
    ("OBJECT_UNFOUND", 2),
    ("SLOW_OPS", 1),
    ("RECENT_CRASH", 1),
    ("MON_CLOCK_SKEW", 2),
    ("POOL_FULL", 2),
    ("POOL_NEAR_FULL", 2),
    ("OSD_SCRUB_ERRORS", 2),
    ("PG_NOT_SCRUBBED", 1),
    ("PG_NOT_DEEP_SCRUBBED", 1),
    ("MGR_DOWN", 2),
    ("TOO_FEW_PGS", 1),
    ("MANY_OBJECTS_PER_PG", 2),
    ("POOL_APP_NOT_ENABLED", 2),
    ("OSD_FLAGS", 1),
    ("LARGE_OMAP_OBJECTS", 2),
    ("OSD_TOO_MANY_REPAIRS", 2),
];

/// PG state vocabulary: (state, gauge name, help).
const PG_STATES: &[(&str, &str, &str)] = &[
    ("active", "active_pgs", "No. of active PGs in the cluster"),
    ("clean", "clean_pgs", "No. of clean PGs in the cluster"),
    ("degraded", "degraded_pgs", "No. of PGs in a degraded state"),
    ("unclean", "unclean_pgs", "No. of PGs in an unclean state"),
    ("undersized", "undersized_pgs", "No. of undersized PGs in the cluster"),
    ("peering", "peering_pgs", "No. of peering PGs in the cluster"),
    ("stale", "stale_pgs", "No. of stale PGs in the cluster"),
    ("scrubbing", "scrubbing_pgs", "No. of scrubbing PGs in the cluster"),
    ("scrubbing+deep", "deep_scrubbing_pgs", "No. of deep scrubbing PGs in the cluster"),
    ("recovering", "recovering_pgs", "No. of recovering PGs in the cluster"),
    ("recovery_wait", "recovery_wait_pgs", "No. of PGs in the cluster with recovery_wait state"),
    ("backfilling", "backfilling_pgs", "No. of backfilling PGs in the cluster"),
    ("backfill_wait", "backfill_wait_pgs", "No. of PGs in the cluster with backfill_wait state"),
    ("forced_recovery", "forced_recovery_pgs", "No. of PGs in the cluster with forced_recovery state"),
    ("forced_backfill", "forced_backfill_pgs", "No. of PGs in the cluster with forced_backfill state"),
    ("down", "down_pgs", "No. of PGs in the cluster in down state"),
    ("incomplete", "incomplete_pgs", "No. of PGs in the cluster in incomplete state"),
    ("inconsistent", "inconsistent_pgs", "No. of PGs in the cluster in inconsistent state"),
    ("remapped", "remapped_pgs", "No. of PGs in the cluster in remapped state"),
    ("repair", "repair_pgs", "No. of PGs in the cluster in repair state"),
];

/// Stuck PG kinds reported through health check messages.
const STUCK_STATES: &[(&str, &str, &str)] = &[
    ("degraded", "stuck_degraded_pgs", "No. of PGs stuck in a degraded state"),
    ("unclean", "stuck_unclean_pgs", "No. of PGs stuck in an unclean state"),
    ("undersized", "stuck_undersized_pgs", "No. of PGs stuck in an undersized state"),
    ("stale", "stuck_stale_pgs", "No. of PGs stuck in a stale state"),
];

/// OSD map flags exposed as `osdmap_flag_<flag>`.
pub const OSD_FLAGS: &[&str] = &[
    "full",
    "pauserd",
    "pausewr",
    "noup",
    "nodown",
    "noin",
    "noout",
    "nobackfill",
    "norecover",
    "norebalance",
    "noscrub",
    "nodeep-scrub",
    "notieragent",
];

#[derive(Debug, Default, Deserialize)]
struct ClusterStatus {
    #[serde(default)]
    health: HealthSection,
    #[serde(default)]
    osdmap: OsdMapSection,
    #[serde(default)]
    pgmap: PgMap,
    #[serde(default)]
    mgrmap: MgrMap,
    #[serde(default)]
    servicemap: ServiceMap,
}

#[derive(Debug, Default, Deserialize)]
struct HealthSection {
    status: Option<String>,
    overall_status: Option<String>,
    #[serde(default)]
    checks: BTreeMap<String, HealthCheck>,
    #[serde(default)]
    summary: Vec<LegacySummary>,
}

#[derive(Debug, Default, Deserialize)]
struct HealthCheck {
    #[serde(default)]
    summary: CheckSummary,
}

#[derive(Debug, Default, Deserialize)]
struct CheckSummary {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct LegacySummary {
    #[serde(default)]
    summary: String,
}

/// Luminous nests the counts under `osdmap.osdmap`, later releases do not.
#[derive(Debug, Default, Deserialize)]
struct OsdMapSection {
    osdmap: Option<OsdMapCounts>,
    #[serde(flatten)]
    flat: OsdMapCounts,
}

impl OsdMapSection {
    fn counts(&self) -> &OsdMapCounts {
        self.osdmap.as_ref().unwrap_or(&self.flat)
    }
}

#[derive(Debug, Default, Deserialize)]
struct OsdMapCounts {
    num_osds: Option<Number>,
    num_up_osds: Option<Number>,
    num_in_osds: Option<Number>,
    num_remapped_pgs: Option<Number>,
}

#[derive(Debug, Default, Deserialize)]
struct PgMap {
    #[serde(default)]
    pgs_by_state: Vec<PgStateCount>,
    num_pgs: Option<Number>,
    degraded_objects: Option<Number>,
    misplaced_objects: Option<Number>,
    misplaced_ratio: Option<Number>,
    unfound_objects: Option<Number>,
    recovering_bytes_per_sec: Option<Number>,
    recovering_keys_per_sec: Option<Number>,
    recovering_objects_per_sec: Option<Number>,
    read_bytes_sec: Option<Number>,
    write_bytes_sec: Option<Number>,
    read_op_per_sec: Option<Number>,
    write_op_per_sec: Option<Number>,
    flush_bytes_sec: Option<Number>,
    evict_bytes_sec: Option<Number>,
    promote_op_per_sec: Option<Number>,
}

#[derive(Debug, Deserialize)]
struct PgStateCount {
    state_name: String,
    count: Number,
}

#[derive(Debug, Default, Deserialize)]
struct MgrMap {
    #[serde(default)]
    active_name: String,
    available: Option<bool>,
    standbys: Option<Vec<Value>>,
    num_standbys: Option<Number>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceMap {
    #[serde(default)]
    services: BTreeMap<String, Service>,
}

#[derive(Debug, Default, Deserialize)]
struct Service {
    #[serde(default)]
    daemons: serde_json::Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct OsdDump {
    #[serde(default)]
    flags: String,
}

/// Maps a `HEALTH_*` status to 0/1/2.
pub fn health_ordinal(status: &str) -> Option<u8> {
    match status {
        "HEALTH_OK" => Some(0),
        "HEALTH_WARN" => Some(1),
        "HEALTH_ERR" => Some(2),
        _ => None,
    }
}

/// Finer 0-3 ordinal: ok is 0, HEALTH_ERR is 3 and HEALTH_WARN is 2 unless
/// a present check found in the table lowers or confirms it. Checks on a
/// HEALTH_OK cluster are muted and ignored.
pub fn interpreted_status<'a>(
    coarse: u8,
    checks: impl IntoIterator<Item = &'a str>,
    severities: &HashMap<&'static str, u8>,
) -> u8 {
    match coarse {
        0 => 0,
        1 => checks
            .into_iter()
            .filter_map(|check| severities.get(check).copied())
            .max()
            .unwrap_or(2),
        _ => 3,
    }
}

/// Sums PG counts per vocabulary state.
///
/// Composite states are split on `+` and each state counts every token it
/// contains, so `active+clean+scrubbing+deep` counts towards `active`,
/// `clean`, `scrubbing` and `scrubbing+deep`.
pub fn pg_state_counts(states: &[(&str, f64)]) -> HashMap<&'static str, f64> {
    let mut counts: HashMap<&'static str, f64> =
        PG_STATES.iter().map(|(state, _, _)| (*state, 0.0)).collect();
    for (composite, count) in states {
        let tokens: Vec<&str> = composite.split('+').collect();
        for (state, _, _) in PG_STATES {
            let matched = match *state {
                "scrubbing+deep" => tokens.contains(&"scrubbing") && tokens.contains(&"deep"),
                s => tokens.contains(&s),
            };
            if matched {
                *counts.entry(*state).or_default() += *count;
            }
        }
    }
    counts
}

/// Rates extracted from the plain-text status; `None` when no line matched.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PlainRates {
    pub recovery_bytes: Option<f64>,
    pub recovery_keys: Option<f64>,
    pub recovery_objects: Option<f64>,
    pub read_bytes: Option<f64>,
    pub write_bytes: Option<f64>,
    pub read_ops: Option<f64>,
    pub write_ops: Option<f64>,
    pub ops: Option<f64>,
    pub flush_bytes: Option<f64>,
    pub evict_bytes: Option<f64>,
    pub promote_ops: Option<f64>,
}

/// Figures extracted from health check messages.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CheckFigures {
    pub mons_down: f64,
    pub slow_requests: f64,
    pub stuck: HashMap<String, f64>,
    pub crashed: f64,
    pub too_many_repairs: f64,
}

fn unit_multiplier(unit: &str) -> Option<f64> {
    match unit.to_ascii_lowercase().as_str() {
        "b" => Some(1.0),
        "kb" => Some(1e3),
        "mb" => Some(1e6),
        "gb" => Some(1e9),
        _ => None,
    }
}

/// Regular expressions used against free text, built once per collector.
#[derive(Debug)]
pub struct Patterns {
    bytes: Regex,
    read_bytes: Regex,
    write_bytes: Regex,
    flush_bytes: Regex,
    evict_bytes: Regex,
    keys: Regex,
    objects: Regex,
    read_ops: Regex,
    write_ops: Regex,
    promote_ops: Regex,
    ops: Regex,
    mons_down: Regex,
    slow: Regex,
    stuck: Regex,
    crashed: Regex,
    repaired: Regex,
}

impl Patterns {
    pub fn new() -> Result<Self, regex::Error> {
        let rate = |suffix: &str| Regex::new(&format!(r"(\d+) ([kKmMgG]?[bB])/s {}", suffix));
        Ok(Self {
            bytes: Regex::new(r"(\d+) ([kKmMgG]?[bB])/s")?,
            read_bytes: rate("rd")?,
            write_bytes: rate("wr")?,
            flush_bytes: rate("flush")?,
            evict_bytes: rate("evict")?,
            keys: Regex::new(r"(\d+) keys/s")?,
            objects: Regex::new(r"(\d+) objects/s")?,
            read_ops: Regex::new(r"(\d+) op/s rd")?,
            write_ops: Regex::new(r"(\d+) op/s wr")?,
            promote_ops: Regex::new(r"(\d+) op/s promote")?,
            ops: Regex::new(r"(\d+) op/s")?,
            mons_down: Regex::new(r"(\d+)/(\d+) mons down")?,
            slow: Regex::new(r"(\d+) slow (?:requests|ops)")?,
            stuck: Regex::new(r"(\d+) pgs? stuck (degraded|unclean|undersized|stale)")?,
            crashed: Regex::new(r"(\d+) daemons? (?:have|has) recently crashed")?,
            repaired: Regex::new(r"Too many repaired reads on (\d+) OSDs?")?,
        })
    }

    fn count(re: &Regex, text: &str) -> Option<f64> {
        re.captures(text)?.get(1)?.as_str().parse().ok()
    }

    fn bytes(re: &Regex, text: &str) -> Option<f64> {
        let caps = re.captures(text)?;
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        Some(value * unit_multiplier(caps.get(2)?.as_str())?)
    }

    /// Scans the plain-text status output.
    pub fn scan_status(&self, text: &str) -> PlainRates {
        let mut rates = PlainRates::default();
        for line in text.lines().map(str::trim) {
            if line.starts_with("cluster:") {
                break;
            }
            if line.starts_with("recovery io") {
                rates.recovery_bytes = Self::bytes(&self.bytes, line);
                rates.recovery_keys = Self::count(&self.keys, line);
                rates.recovery_objects = Self::count(&self.objects, line);
            } else if line.starts_with("client io") {
                rates.read_bytes = Self::bytes(&self.read_bytes, line);
                rates.write_bytes = Self::bytes(&self.write_bytes, line);
                rates.read_ops = Self::count(&self.read_ops, line);
                rates.write_ops = Self::count(&self.write_ops, line);
                rates.ops = match (rates.read_ops, rates.write_ops) {
                    (None, None) => Self::count(&self.ops, line),
                    (r, w) => Some(r.unwrap_or(0.0) + w.unwrap_or(0.0)),
                };
            } else if line.starts_with("cache io") {
                rates.flush_bytes = Self::bytes(&self.flush_bytes, line);
                rates.evict_bytes = Self::bytes(&self.evict_bytes, line);
                rates.promote_ops = Self::count(&self.promote_ops, line);
            }
        }
        rates
    }

    /// Extracts figures from health check or legacy summary messages.
    /// When several messages match the same figure the largest wins.
    pub fn scan_checks<'a>(&self, messages: impl IntoIterator<Item = &'a str>) -> CheckFigures {
        let mut figures = CheckFigures::default();
        let raise = |slot: &mut f64, value: Option<f64>| {
            if let Some(v) = value {
                *slot = slot.max(v);
            }
        };
        for message in messages {
            raise(&mut figures.mons_down, Self::count(&self.mons_down, message));
            raise(&mut figures.slow_requests, Self::count(&self.slow, message));
            raise(&mut figures.crashed, Self::count(&self.crashed, message));
            raise(&mut figures.too_many_repairs, Self::count(&self.repaired, message));
            for caps in self.stuck.captures_iter(message) {
                let (Some(count), Some(kind)) = (caps.get(1), caps.get(2)) else {
                    continue;
                };
                let value: Option<f64> = count.as_str().parse().ok();
                raise(
                    figures.stuck.entry(kind.as_str().to_string()).or_default(),
                    value,
                );
            }
        }
        figures
    }
}

fn gauge_table(
    factory: &MetricFactory,
    table: &[(&'static str, &str, &str)],
) -> prometheus::Result<Vec<(&'static str, Gauge)>> {
    table
        .iter()
        .map(|(key, name, help)| Ok((*key, factory.gauge("", name, help)?)))
        .collect()
}

/// Cluster-wide health, PG, OSD map and I/O gauges.
pub struct HealthCollector {
    conn: Arc<dyn Conn>,
    factory: MetricFactory,
    patterns: Patterns,
    severities: HashMap<&'static str, u8>,

    health_status: Gauge,
    health_status_interp: Gauge,
    mons_down: Gauge,
    total_pgs: Gauge,
    pg_states: Vec<(&'static str, Gauge)>,
    stuck_pgs: Vec<(&'static str, Gauge)>,
    degraded_objects: Gauge,
    misplaced_objects: Gauge,
    misplaced_ratio: Gauge,
    unfound_objects: Gauge,
    slow_requests: Gauge,
    new_crash_reports: Gauge,
    osds_too_many_repair: Gauge,
    osds_down: Gauge,
    osds_up: Gauge,
    osds_in: Gauge,
    osds: Gauge,
    pgs_remapped: Gauge,
    recovery_io_bytes: Gauge,
    recovery_io_keys: Gauge,
    recovery_io_objects: Gauge,
    client_io_read_bytes: Gauge,
    client_io_write_bytes: Gauge,
    client_io_ops: Gauge,
    client_io_read_ops: Gauge,
    client_io_write_ops: Gauge,
    cache_flush_io_bytes: Gauge,
    cache_evict_io_bytes: Gauge,
    cache_promote_io_ops: Gauge,
    mgrs_active: Gauge,
    mgrs: Gauge,
    osd_flags: Vec<(&'static str, Gauge)>,
}

impl HealthCollector {
    pub fn new(conn: Arc<dyn Conn>, factory: &MetricFactory) -> Result<Self, ExporterError> {
        Self::with_severities(conn, factory, CHECK_SEVERITIES)
    }

    pub fn with_severities(
        conn: Arc<dyn Conn>,
        factory: &MetricFactory,
        severities: &[(&'static str, u8)],
    ) -> Result<Self, ExporterError> {
        let g = |name: &str, help: &str| factory.gauge("", name, help);
        let osd_flags = OSD_FLAGS
            .iter()
            .map(|flag| {
                let name = format!("osdmap_flag_{}", flag.replace('-', "_"));
                let help = format!("OSD map flag {} set", flag);
                Ok((*flag, g(&name, &help)?))
            })
            .collect::<prometheus::Result<Vec<_>>>()?;

        Ok(Self {
            conn,
            factory: factory.clone(),
            patterns: Patterns::new()?,
            severities: severities.iter().copied().collect(),

            health_status: g("health_status", "Health status of Cluster, can vary only between 3 states (err:2, warn:1, ok:0)")?,
            health_status_interp: g(
                "health_status_interp",
                "Health status of Cluster, can vary only between 4 states (err:3, warn:2, soft warn:1, ok:0)",
            )?,
            mons_down: g("mons_down", "Count of Mons that are in DOWN state")?,
            total_pgs: g("total_pgs", "Total no. of PGs in the cluster")?,
            pg_states: gauge_table(factory, PG_STATES)?,
            stuck_pgs: gauge_table(factory, STUCK_STATES)?,
            degraded_objects: g("degraded_objects", "No. of degraded objects across all PGs, includes replicas")?,
            misplaced_objects: g("misplaced_objects", "No. of misplaced objects across all PGs, includes replicas")?,
            misplaced_ratio: g("misplaced_ratio", "ratio of misplaced objects to total objects")?,
            unfound_objects: g("unfound_objects", "No. of unfound objects across all PGs")?,
            slow_requests: g("slow_requests", "No. of slow requests/slow ops")?,
            new_crash_reports: g("new_crash_reports", "Number of new crash reports available")?,
            osds_too_many_repair: g("osds_too_many_repair", "Number of OSDs with too many repaired reads")?,
            osds_down: g("osds_down", "Count of OSDs that are in DOWN state")?,
            osds_up: g("osds_up", "Count of OSDs that are in UP state")?,
            osds_in: g("osds_in", "Count of OSDs that are in IN state and available to serve requests")?,
            osds: g("osds", "Count of total OSDs in the cluster")?,
            pgs_remapped: g("pgs_remapped", "No. of PGs that are remapped and incurring cluster-wide movement")?,
            recovery_io_bytes: g("recovery_io_bytes", "Rate of bytes being recovered in cluster per second")?,
            recovery_io_keys: g("recovery_io_keys", "Rate of keys being recovered in cluster per second")?,
            recovery_io_objects: g("recovery_io_objects", "Rate of objects being recovered in cluster per second")?,
            client_io_read_bytes: g("client_io_read_bytes", "Rate of bytes being read by all clients per second")?,
            client_io_write_bytes: g("client_io_write_bytes", "Rate of bytes being written by all clients per second")?,
            client_io_ops: g("client_io_ops", "Total client ops on the cluster measured per second")?,
            client_io_read_ops: g("client_io_read_ops", "Total client read I/O ops on the cluster measured per second")?,
            client_io_write_ops: g("client_io_write_ops", "Total client write I/O ops on the cluster measured per second")?,
            cache_flush_io_bytes: g("cache_flush_io_bytes", "Rate of bytes being flushed from the cache pool per second")?,
            cache_evict_io_bytes: g("cache_evict_io_bytes", "Rate of bytes being evicted from the cache pool per second")?,
            cache_promote_io_ops: g("cache_promote_io_ops", "Total cache promote operations measured per second")?,
            mgrs_active: g("mgrs_active", "Count of active mgrs, can be either 0 or 1")?,
            mgrs: g("mgrs", "Total number of mgrs, including standbys")?,
            osd_flags,
        })
    }

    fn scalar_gauges(&self) -> Vec<&Gauge> {
        vec![
            &self.health_status,
            &self.health_status_interp,
            &self.mons_down,
            &self.total_pgs,
            &self.degraded_objects,
            &self.misplaced_objects,
            &self.misplaced_ratio,
            &self.unfound_objects,
            &self.slow_requests,
            &self.new_crash_reports,
            &self.osds_too_many_repair,
            &self.osds_down,
            &self.osds_up,
            &self.osds_in,
            &self.osds,
            &self.pgs_remapped,
            &self.recovery_io_bytes,
            &self.recovery_io_keys,
            &self.recovery_io_objects,
            &self.client_io_read_bytes,
            &self.client_io_write_bytes,
            &self.client_io_ops,
            &self.client_io_read_ops,
            &self.client_io_write_ops,
            &self.cache_flush_io_bytes,
            &self.cache_evict_io_bytes,
            &self.cache_promote_io_ops,
            &self.mgrs_active,
            &self.mgrs,
        ]
    }

    fn record_health(&self, health: &HealthSection) {
        let status = health
            .status
            .as_deref()
            .or(health.overall_status.as_deref())
            .unwrap_or_default();
        let coarse = health_ordinal(status).unwrap_or_else(|| {
            warn!(command = STATUS, status, "unrecognized health status, reporting ok");
            0
        });
        self.health_status.set(coarse as f64);

        let fine = interpreted_status(
            coarse,
            health.checks.keys().map(String::as_str),
            &self.severities,
        );
        self.health_status_interp.set(fine as f64);

        let messages = health
            .checks
            .values()
            .map(|c| c.summary.message.as_str())
            .chain(health.summary.iter().map(|s| s.summary.as_str()));
        let figures = self.patterns.scan_checks(messages);
        self.mons_down.set(figures.mons_down);
        self.slow_requests.set(figures.slow_requests);
        self.new_crash_reports.set(figures.crashed);
        self.osds_too_many_repair.set(figures.too_many_repairs);
        for (kind, gauge) in &self.stuck_pgs {
            gauge.set(figures.stuck.get(*kind).copied().unwrap_or(0.0));
        }
    }

    fn record_osdmap(&self, section: &OsdMapSection) {
        let counts = section.counts();
        let total = number::value(STATUS, "num_osds", counts.num_osds.as_ref());
        let up = number::value(STATUS, "num_up_osds", counts.num_up_osds.as_ref());
        self.osds.set(total);
        self.osds_up.set(up);
        self.osds_down.set((total - up).max(0.0));
        self.osds_in
            .set(number::value(STATUS, "num_in_osds", counts.num_in_osds.as_ref()));
        self.pgs_remapped.set(number::value(
            STATUS,
            "num_remapped_pgs",
            counts.num_remapped_pgs.as_ref(),
        ));
    }

    fn record_pgmap(&self, pgmap: &PgMap) {
        let field = |name: &str, n: &Option<Number>| number::value(STATUS, name, n.as_ref());

        self.total_pgs.set(field("num_pgs", &pgmap.num_pgs));
        let states: Vec<(&str, f64)> = pgmap
            .pgs_by_state
            .iter()
            .map(|s| {
                let count = number::value(STATUS, "pgs_by_state.count", Some(&s.count));
                (s.state_name.as_str(), count)
            })
            .collect();
        let counts = pg_state_counts(&states);
        let deep = counts.get("scrubbing+deep").copied().unwrap_or(0.0);
        for (state, gauge) in &self.pg_states {
            let mut value = counts.get(state).copied().unwrap_or(0.0);
            if *state == "scrubbing" {
                value -= deep;
            }
            gauge.set(value);
        }

        self.degraded_objects
            .set(field("degraded_objects", &pgmap.degraded_objects));
        self.misplaced_objects
            .set(field("misplaced_objects", &pgmap.misplaced_objects));
        self.misplaced_ratio
            .set(field("misplaced_ratio", &pgmap.misplaced_ratio));
        self.unfound_objects
            .set(field("unfound_objects", &pgmap.unfound_objects));

        self.recovery_io_bytes
            .set(field("recovering_bytes_per_sec", &pgmap.recovering_bytes_per_sec));
        self.recovery_io_keys
            .set(field("recovering_keys_per_sec", &pgmap.recovering_keys_per_sec));
        self.recovery_io_objects.set(field(
            "recovering_objects_per_sec",
            &pgmap.recovering_objects_per_sec,
        ));

        let read_ops = field("read_op_per_sec", &pgmap.read_op_per_sec);
        let write_ops = field("write_op_per_sec", &pgmap.write_op_per_sec);
        self.client_io_read_bytes
            .set(field("read_bytes_sec", &pgmap.read_bytes_sec));
        self.client_io_write_bytes
            .set(field("write_bytes_sec", &pgmap.write_bytes_sec));
        self.client_io_read_ops.set(read_ops);
        self.client_io_write_ops.set(write_ops);
        self.client_io_ops.set(read_ops + write_ops);

        self.cache_flush_io_bytes
            .set(field("flush_bytes_sec", &pgmap.flush_bytes_sec));
        self.cache_evict_io_bytes
            .set(field("evict_bytes_sec", &pgmap.evict_bytes_sec));
        self.cache_promote_io_ops
            .set(field("promote_op_per_sec", &pgmap.promote_op_per_sec));
    }

    fn record_mgrmap(&self, mgrmap: &MgrMap) {
        let active = !mgrmap.active_name.is_empty() || mgrmap.available == Some(true);
        let standbys = match (&mgrmap.standbys, &mgrmap.num_standbys) {
            (Some(list), _) => list.len() as f64,
            (None, n) => number::value(STATUS, "num_standbys", n.as_ref()),
        };
        self.mgrs_active.set(bool_value(active));
        self.mgrs.set(bool_value(active) + standbys);
    }

    fn record_plain_rates(&self, rates: &PlainRates) {
        let apply = |gauge: &Gauge, value: Option<f64>| {
            if let Some(v) = value {
                gauge.set(v);
            }
        };
        apply(&self.recovery_io_bytes, rates.recovery_bytes);
        apply(&self.recovery_io_keys, rates.recovery_keys);
        apply(&self.recovery_io_objects, rates.recovery_objects);
        apply(&self.client_io_read_bytes, rates.read_bytes);
        apply(&self.client_io_write_bytes, rates.write_bytes);
        apply(&self.client_io_read_ops, rates.read_ops);
        apply(&self.client_io_write_ops, rates.write_ops);
        apply(&self.client_io_ops, rates.ops);
        apply(&self.cache_flush_io_bytes, rates.flush_bytes);
        apply(&self.cache_evict_io_bytes, rates.evict_bytes);
        apply(&self.cache_promote_io_ops, rates.promote_ops);
    }

    fn scan_plain_status(&self) {
        match mon_raw(self.conn.as_ref(), &Request::plain(STATUS)) {
            Ok(body) => {
                let rates = self.patterns.scan_status(&String::from_utf8_lossy(&body));
                debug!(?rates, "plain status scanned");
                self.record_plain_rates(&rates);
            }
            Err(e) => warn!(command = STATUS, error = %e, "plain status unavailable, skipping text scan"),
        }
    }

    fn record_flags(&self) {
        let dump: OsdDump = match mon_json(self.conn.as_ref(), &Request::new(OSD_DUMP)) {
            Ok(d) => d,
            Err(e) => {
                warn!(command = OSD_DUMP, error = %e, "osd map flags left unchanged");
                return;
            }
        };
        let set: Vec<&str> = dump.flags.split(',').map(str::trim).collect();
        for (flag, gauge) in &self.osd_flags {
            gauge.set(bool_value(set.contains(flag)));
        }
    }

    /// One const gauge per live rbd-mirror daemon.
    fn rbd_mirror_daemons(&self, servicemap: &ServiceMap) -> CollectResult<Vec<MetricFamily>> {
        let Some(service) = servicemap.services.get("rbd-mirror") else {
            return Ok(Vec::new());
        };
        let mut families = Vec::new();
        for (key, daemon) in &service.daemons {
            if key == "summary" {
                continue;
            }
            let metadata = daemon.get("metadata");
            let field = |name: &str| metadata.and_then(|m| m.get(name)).and_then(Value::as_str);
            let name = field("id").unwrap_or(key);
            let host = field("hostname").unwrap_or_default();
            families.extend(self.factory.const_gauge(
                "",
                "rbd_mirror_up",
                "Alive rbd-mirror daemons",
                &[("name", name), ("host", host)],
                1.0,
            )?);
        }
        Ok(families)
    }
}

impl Collector for HealthCollector {
    fn name(&self) -> &'static str {
        "health"
    }

    fn metrics(&self) -> Vec<&dyn prometheus::core::Collector> {
        let tables = self
            .pg_states
            .iter()
            .chain(&self.stuck_pgs)
            .chain(&self.osd_flags)
            .map(|(_, g)| g);
        self.scalar_gauges()
            .into_iter()
            .chain(tables)
            .map(|g| g as &dyn prometheus::core::Collector)
            .collect()
    }

    #[instrument(skip(self))]
    fn update(&self) -> CollectResult<Vec<MetricFamily>> {
        let status: ClusterStatus = mon_json(self.conn.as_ref(), &Request::new(STATUS))?;

        self.record_health(&status.health);
        self.record_osdmap(&status.osdmap);
        self.record_pgmap(&status.pgmap);
        self.record_mgrmap(&status.mgrmap);
        self.record_flags();
        self.scan_plain_status();

        self.rbd_mirror_daemons(&status.servicemap)
    }
}
