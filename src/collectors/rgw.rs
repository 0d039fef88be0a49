//! RGW garbage-collection collector.
//!
//! Runs `radosgw-admin gc list --include-all` and buckets the returned tasks
//! by expiry: a task whose timestamp is already in the past is active
//! (eligible for collection), anything else is pending.
//!
//! In background mode the command runs on its own tokio interval instead of
//! on every scrape. The background task and a concurrent scrape touch the
//! same gauges without further locking; each gauge write is a single
//! last-write-wins store, so a scrape may read a mix of the previous and the
//! current refresh.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use clap::ValueEnum;
use prometheus::proto::MetricFamily;
use prometheus::Gauge;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::Collector;
use crate::conn::run_with_timeout;
use crate::error::{CollectError, CollectResult, CommandError, ExporterError};
use crate::metrics::MetricFactory;

/// How the RGW GC collector is driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RgwMode {
    /// Not constructed at all
    #[default]
    Disabled,
    /// Refreshed synchronously on every scrape
    Foreground,
    /// Refreshed on an independent timer
    Background,
}

/// Source of the raw GC task list.
pub trait RgwAdmin: Send + Sync {
    fn gc_list(&self) -> Result<Vec<u8>, CommandError>;
}

/// Runs the `radosgw-admin` binary.
#[derive(Debug, Clone)]
pub struct RadosGwAdmin {
    binary: PathBuf,
    config_file: PathBuf,
    cluster: String,
    user: String,
    timeout: Duration,
}

impl RadosGwAdmin {
    pub fn new(
        binary: impl Into<PathBuf>,
        config_file: impl Into<PathBuf>,
        cluster: &str,
        user: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            binary: binary.into(),
            config_file: config_file.into(),
            cluster: cluster.to_string(),
            user: user.to_string(),
            timeout,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["gc", "list", "--include-all", "-c"])
            .arg(&self.config_file)
            .arg("--cluster")
            .arg(&self.cluster)
            .arg("--id")
            .arg(&self.user);
        cmd
    }
}

impl RgwAdmin for RadosGwAdmin {
    fn gc_list(&self) -> Result<Vec<u8>, CommandError> {
        let output = run_with_timeout(self.command(), self.timeout)?;
        if !output.status.success() {
            return Err(CommandError::Failed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

/// One entry of `gc list`.
#[derive(Debug, Clone, Deserialize)]
pub struct GcTask {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub objs: Vec<serde_json::Value>,
}

/// Task and object counts per bucket.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcTally {
    pub active_tasks: u64,
    pub active_objects: u64,
    pub pending_tasks: u64,
    pub pending_objects: u64,
}

/// Parses a GC timestamp: RFC 3339, or `YYYY-MM-DD HH:MM:SS` in UTC with an
/// optional fractional suffix that is ignored.
pub fn parse_gc_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let base = raw.split('.').next()?;
    NaiveDateTime::parse_from_str(base, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Buckets tasks against `now`. Tasks with unparseable timestamps are skipped.
pub fn bucket(tasks: &[GcTask], now: DateTime<Utc>) -> GcTally {
    let mut tally = GcTally::default();
    for task in tasks {
        let Some(ts) = parse_gc_time(&task.time) else {
            warn!(tag = task.tag.as_str(), time = task.time.as_str(), "unparseable gc task time, skipped");
            continue;
        };
        let objects = task.objs.len() as u64;
        if now.signed_duration_since(ts) > chrono::Duration::zero() {
            tally.active_tasks += 1;
            tally.active_objects += objects;
        } else {
            tally.pending_tasks += 1;
            tally.pending_objects += objects;
        }
    }
    tally
}

/// Gauges and command source shared with the background task.
struct GcState {
    admin: Arc<dyn RgwAdmin>,
    active_tasks: Gauge,
    active_objects: Gauge,
    pending_tasks: Gauge,
    pending_objects: Gauge,
    /// Outcome of the latest background refresh
    last_refresh_ok: AtomicBool,
}

impl GcState {
    fn refresh(&self) -> CollectResult<GcTally> {
        let body = self.admin.gc_list().map_err(CollectError::Rgw)?;
        let tasks: Vec<GcTask> = serde_json::from_slice(&body).map_err(CollectError::RgwDecode)?;
        let tally = bucket(&tasks, Utc::now());

        self.active_tasks.set(tally.active_tasks as f64);
        self.active_objects.set(tally.active_objects as f64);
        self.pending_tasks.set(tally.pending_tasks as f64);
        self.pending_objects.set(tally.pending_objects as f64);
        debug!(?tally, "rgw gc tallied");
        Ok(tally)
    }
}

/// RGW garbage-collection backlog gauges.
pub struct RgwCollector {
    state: Arc<GcState>,
    background: Option<JoinHandle<()>>,
}

impl RgwCollector {
    /// Builds the collector. `Background` needs a running tokio runtime and
    /// falls back to `Foreground` without one.
    pub fn new(
        admin: Arc<dyn RgwAdmin>,
        factory: &MetricFactory,
        mode: RgwMode,
        interval: Duration,
    ) -> Result<Self, ExporterError> {
        let gauge = |name: &str, help: &str| factory.gauge("rgw", name, help);
        let state = Arc::new(GcState {
            admin,
            active_tasks: gauge("gc_active_tasks", "RGW GC active task count")?,
            active_objects: gauge("gc_active_objects", "RGW GC active object count")?,
            pending_tasks: gauge("gc_pending_tasks", "RGW GC pending task count")?,
            pending_objects: gauge("gc_pending_objects", "RGW GC pending object count")?,
            last_refresh_ok: AtomicBool::new(true),
        });

        let background = match (mode, Handle::try_current()) {
            (RgwMode::Background, Ok(handle)) => {
                info!(
                    cluster = factory.cluster(),
                    interval_secs = interval.as_secs(),
                    "starting background rgw gc collection"
                );
                Some(handle.spawn(run_background(state.clone(), interval)))
            }
            (RgwMode::Background, Err(_)) => {
                warn!(
                    cluster = factory.cluster(),
                    "no async runtime available, rgw gc collected on every scrape instead"
                );
                None
            }
            _ => None,
        };

        Ok(Self { state, background })
    }

    pub fn is_background(&self) -> bool {
        self.background.is_some()
    }
}

async fn run_background(state: Arc<GcState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let worker = state.clone();
        let ok = match tokio::task::spawn_blocking(move || worker.refresh()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                error!(collector = "rgw", error = %e, "background rgw gc refresh failed");
                false
            }
            Err(e) => {
                error!(collector = "rgw", error = %e, "background rgw gc task panicked");
                false
            }
        };
        state.last_refresh_ok.store(ok, Ordering::Relaxed);
    }
}

impl Drop for RgwCollector {
    fn drop(&mut self) {
        if let Some(handle) = self.background.take() {
            handle.abort();
        }
    }
}

impl Collector for RgwCollector {
    fn name(&self) -> &'static str {
        "rgw"
    }

    fn metrics(&self) -> Vec<&dyn prometheus::core::Collector> {
        vec![
            &self.state.active_tasks,
            &self.state.active_objects,
            &self.state.pending_tasks,
            &self.state.pending_objects,
        ]
    }

    #[instrument(skip(self))]
    fn update(&self) -> CollectResult<Vec<MetricFamily>> {
        if !self.is_background() {
            self.state.refresh()?;
        } else if !self.state.last_refresh_ok.load(Ordering::Relaxed) {
            return Err(CollectError::RgwBackgroundFailed);
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct FakeAdmin {
        responses: Mutex<Vec<Result<String, String>>>,
        calls: AtomicUsize,
    }

    impl FakeAdmin {
        fn new(responses: Vec<Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl RgwAdmin for FakeAdmin {
        fn gc_list(&self) -> Result<Vec<u8>, CommandError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let responses = self.responses.lock().unwrap();
            match &responses[n.min(responses.len() - 1)] {
                Ok(body) => Ok(body.clone().into_bytes()),
                Err(msg) => Err(CommandError::Failed {
                    code: 1,
                    stderr: msg.clone(),
                }),
            }
        }
    }

    fn task(time: &str, objects: usize) -> GcTask {
        GcTask {
            tag: "t".into(),
            time: time.into(),
            objs: vec![serde_json::json!({"pool": "default.rgw.buckets.data"}); objects],
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_bucket_active_and_pending() {
        let tasks = [
            task("2024-03-01 11:00:00.123456", 2),
            task("2024-02-28 08:30:00", 2),
            task("2024-03-01 13:00:00.5", 3),
        ];
        let tally = bucket(&tasks, now());
        assert_eq!(
            tally,
            GcTally {
                active_tasks: 2,
                active_objects: 4,
                pending_tasks: 1,
                pending_objects: 3,
            }
        );
    }

    #[test]
    fn test_bucket_skips_unparseable_and_treats_now_as_pending() {
        let tasks = [task("yesterday", 5), task("2024-03-01 12:00:00", 1)];
        let tally = bucket(&tasks, now());
        assert_eq!(tally.active_tasks, 0);
        assert_eq!(tally.pending_tasks, 1);
        assert_eq!(tally.pending_objects, 1);
    }

    #[test]
    fn test_parse_gc_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).unwrap();
        assert_eq!(parse_gc_time("2024-03-01 10:15:30.000000Z"), Some(expected));
        assert_eq!(parse_gc_time("2024-03-01T10:15:30Z"), Some(expected));
        assert_eq!(parse_gc_time("2024-03-01T12:15:30+02:00"), Some(expected));
        assert_eq!(parse_gc_time("not a time"), None);
    }

    #[test]
    fn test_foreground_refreshes_every_update() {
        let admin = FakeAdmin::new(vec![
            Ok(r#"[{"tag":"a","time":"2000-01-01 00:00:00","objs":[{},{}]},
                   {"tag":"b","time":"2999-01-01 00:00:00","objs":[{}]}]"#),
            Ok("[]"),
        ]);
        let c = RgwCollector::new(
            admin.clone(),
            &MetricFactory::new("ceph"),
            RgwMode::Foreground,
            Duration::from_secs(300),
        )
        .unwrap();

        c.update().unwrap();
        assert_eq!(c.state.active_tasks.get(), 1.0);
        assert_eq!(c.state.active_objects.get(), 2.0);
        assert_eq!(c.state.pending_objects.get(), 1.0);

        c.update().unwrap();
        assert_eq!(c.state.active_tasks.get(), 0.0);
        assert_eq!(admin.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failures_are_typed() {
        let admin = FakeAdmin::new(vec![Err("auth failed"), Ok("garbage")]);
        let c = RgwCollector::new(
            admin,
            &MetricFactory::new("ceph"),
            RgwMode::Foreground,
            Duration::from_secs(300),
        )
        .unwrap();
        assert!(matches!(c.update(), Err(CollectError::Rgw(_))));
        assert!(matches!(c.update(), Err(CollectError::RgwDecode(_))));
    }

    #[test]
    fn test_background_without_runtime_falls_back() {
        let admin = FakeAdmin::new(vec![Ok("[]")]);
        let c = RgwCollector::new(
            admin.clone(),
            &MetricFactory::new("ceph"),
            RgwMode::Background,
            Duration::from_secs(300),
        )
        .unwrap();
        assert!(!c.is_background());
        c.update().unwrap();
        assert_eq!(admin.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_refreshes_off_scrape_path() {
        let admin = FakeAdmin::new(vec![Ok(r#"[{"tag":"a","time":"2000-01-01 00:00:00","objs":[{}]}]"#)]);
        let c = RgwCollector::new(
            admin.clone(),
            &MetricFactory::new("ceph"),
            RgwMode::Background,
            Duration::from_millis(50),
        )
        .unwrap();
        assert!(c.is_background());

        let mut waited = 0;
        while c.state.active_tasks.get() == 0.0 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += 1;
        }
        assert_eq!(c.state.active_tasks.get(), 1.0);

        let before = admin.calls.load(Ordering::SeqCst);
        c.update().unwrap();
        assert!(admin.calls.load(Ordering::SeqCst) - before <= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_failure_reported_by_update() {
        let admin = FakeAdmin::new(vec![Err("connection refused")]);
        let c = RgwCollector::new(
            admin.clone(),
            &MetricFactory::new("ceph"),
            RgwMode::Background,
            Duration::from_millis(50),
        )
        .unwrap();

        let mut waited = 0;
        while c.update().is_ok() && waited < 100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += 1;
        }
        assert!(admin.calls.load(Ordering::SeqCst) >= 1);
        assert!(matches!(c.update(), Err(CollectError::RgwBackgroundFailed)));
    }

    #[test]
    fn test_radosgw_admin_reports_exit_status() {
        let admin = RadosGwAdmin::new("false", "/etc/ceph/ceph.conf", "ceph", "admin", Duration::from_secs(5));
        assert!(matches!(admin.gc_list(), Err(CommandError::Failed { .. })));

        let missing = RadosGwAdmin::new(
            "/nonexistent/radosgw-admin",
            "/etc/ceph/ceph.conf",
            "ceph",
            "admin",
            Duration::from_secs(5),
        );
        assert!(matches!(missing.gc_list(), Err(CommandError::Spawn { .. })));
    }
}
