//! End-to-end tests: canned cluster responses through the registry and the
//! metrics handler.

use axum::extract::State;
use ceph_exporter::config::{ClusterConfig, Config};
use ceph_exporter::conn::MockConn;
use ceph_exporter::exporter::Exporter;
use ceph_exporter::handlers::metrics_handler;
use ceph_exporter::build_state;
use prometheus::{Encoder, Registry, TextEncoder};
use std::path::PathBuf;
use std::sync::Arc;

const DF: &str = r#"{"stats":{"total_bytes":1000,"total_used_bytes":400,"total_avail_bytes":600,"total_objects":12}}"#;

fn pools(names: &[&str]) -> String {
    let entries: Vec<String> = names
        .iter()
        .map(|n| format!(r#"{{"name":"{}","stats":{{"bytes_used":20,"objects":5}}}}"#, n))
        .collect();
    format!(r#"{{"pools":[{}]}}"#, entries.join(","))
}

fn cluster_conn() -> MockConn {
    let conn = MockConn::new();
    conn.on("df").reply(DF);
    conn.on("df")
        .arg("detail", "detail")
        .replies([pools(&["rbd", "bench"]), pools(&["rbd"])]);
    conn.on("status")
        .reply(r#"{"health":{"status":"HEALTH_WARN","checks":{}}}"#);
    conn
}

fn scrape(registry: &Registry) -> String {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .unwrap();
    String::from_utf8(buffer).unwrap()
}

fn config(labels: &[&str]) -> Config {
    let mut config = Config {
        clusters: labels
            .iter()
            .map(|l| ClusterConfig {
                cluster_label: l.to_string(),
                user: "admin".into(),
                config_file: PathBuf::from("/etc/ceph/ceph.conf"),
                cluster_name: None,
            })
            .collect(),
        ..Config::default()
    };
    config.fill_defaults();
    config
}

#[test]
fn test_series_carry_cluster_label() {
    let registry = Registry::new();
    let exporter = Exporter::new("east", Arc::new(cluster_conn()), None).unwrap();
    registry.register(Box::new(exporter)).unwrap();

    let text = scrape(&registry);
    assert!(text.contains("ceph_cluster_capacity_bytes{cluster=\"east\"} 1000"), "{}", text);
    assert!(text.contains("ceph_cluster_used_bytes{cluster=\"east\"} 400"), "{}", text);
    assert!(text.contains("ceph_pool_used_bytes{cluster=\"east\",pool=\"rbd\"} 20"), "{}", text);
    assert!(text.contains("ceph_health_status{cluster=\"east\"} 1"), "{}", text);
}

#[test]
fn test_failing_collectors_reported_not_fatal() {
    let registry = Registry::new();
    let exporter = Exporter::new("east", Arc::new(cluster_conn()), None).unwrap();
    registry.register(Box::new(exporter)).unwrap();

    let text = scrape(&registry);
    // No canned `osd df`, so the OSD collector fails while the others succeed
    assert!(text.contains("ceph_exporter_collector_success{cluster=\"east\",collector=\"osd\"} 0"), "{}", text);
    assert!(text.contains("ceph_exporter_collector_success{cluster=\"east\",collector=\"cluster_usage\"} 1"), "{}", text);
    assert!(text.contains("ceph_exporter_collector_success{cluster=\"east\",collector=\"pool_usage\"} 1"), "{}", text);
}

#[test]
fn test_deleted_pool_vanishes_on_next_scrape() {
    let registry = Registry::new();
    let exporter = Exporter::new("east", Arc::new(cluster_conn()), None).unwrap();
    registry.register(Box::new(exporter)).unwrap();

    let first = scrape(&registry);
    assert!(first.contains("pool=\"bench\""));

    let second = scrape(&registry);
    assert!(second.contains("pool=\"rbd\""));
    assert!(!second.contains("pool=\"bench\""), "{}", second);
}

#[test]
fn test_clusters_do_not_mix() {
    let registry = Registry::new();
    let quiet = MockConn::new();
    quiet.on("df").reply(r#"{"stats":{"total_bytes":5}}"#);

    registry
        .register(Box::new(Exporter::new("east", Arc::new(cluster_conn()), None).unwrap()))
        .unwrap();
    registry
        .register(Box::new(Exporter::new("west", Arc::new(quiet), None).unwrap()))
        .unwrap();

    let text = scrape(&registry);
    assert!(text.contains("ceph_cluster_capacity_bytes{cluster=\"east\"} 1000"));
    assert!(text.contains("ceph_cluster_capacity_bytes{cluster=\"west\"} 5"));
    assert!(!text.contains("cluster=\"west\",pool="), "{}", text);
}

#[tokio::test]
async fn test_metrics_handler_renders_registry() {
    let registry = Registry::new();
    registry
        .register(Box::new(Exporter::new("east", Arc::new(cluster_conn()), None).unwrap()))
        .unwrap();
    let state = build_state(registry, config(&["east"])).unwrap();

    let body = metrics_handler(State(state.clone())).await.unwrap();
    assert!(body.contains("ceph_cluster_capacity_bytes{cluster=\"east\"} 1000"));
    assert!(body.contains("# TYPE ceph_exporter_scrape_duration_seconds gauge"));
    assert!(state.scrape_duration.get() > 0.0);
}
