//! CLI arguments for ceph-exporter.
//!
//! Every cluster-facing option also reads an environment variable, so the
//! exporter can be configured entirely from a container environment.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::collectors::RgwMode;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "ceph-exporter",
    about = "Prometheus exporter for Ceph cluster metrics",
    long_about = "Prometheus exporter for Ceph cluster metrics.\n\n\
                  Polls the monitor quorum of one or more Ceph clusters and exposes \
                  health, capacity, pool, monitor, OSD and RGW garbage-collection \
                  figures in the Prometheus text format.",
    version,
    propagate_version = true
)]
pub struct Args {
    /// Ceph cluster name
    #[arg(long, env = "CEPH_CLUSTER")]
    pub cluster: Option<String>,

    /// Path to the Ceph configuration file
    #[arg(long, env = "CEPH_CONFIG")]
    pub ceph_config: Option<PathBuf>,

    /// Ceph user to authenticate as (without the `client.` prefix)
    #[arg(long, env = "CEPH_USER")]
    pub ceph_user: Option<String>,

    /// Per-command timeout in seconds
    #[arg(long, env = "CEPH_RADOS_OP_TIMEOUT")]
    pub rados_op_timeout: Option<u64>,

    /// RGW garbage-collection collection mode
    #[arg(long, env = "RGW_MODE", value_enum)]
    pub rgw_mode: Option<RgwMode>,

    /// Interval in seconds between background RGW GC refreshes
    #[arg(long)]
    pub rgw_interval: Option<u64>,

    /// Address to serve metrics on (`host:port` or `:port`)
    #[arg(long, env = "TELEMETRY_ADDR")]
    pub telemetry_addr: Option<String>,

    /// HTTP path to serve metrics on
    #[arg(long, env = "TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    /// Config file listing the clusters to export (YAML/JSON/TOML)
    #[arg(short = 'c', long, env = "EXPORTER_CONFIG")]
    pub exporter_config: Option<PathBuf>,

    /// Path to TLS certificate file (PEM format)
    #[arg(long, env = "TLS_CERT_FILE_PATH")]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long, env = "TLS_KEY_FILE_PATH")]
    pub tls_key: Option<PathBuf>,

    /// Path to the `ceph` command line client
    #[arg(long)]
    pub ceph_binary: Option<PathBuf>,

    /// Path to the `radosgw-admin` binary
    #[arg(long)]
    pub radosgw_admin_binary: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,
}
