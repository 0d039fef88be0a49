//! Configuration management for ceph-exporter.
//!
//! Settings are merged from CLI flags (which already fold in their
//! environment variables), an optional config file and built-in defaults.
//! The config file may be YAML, JSON or TOML and lists the clusters to
//! export; without one a single cluster is synthesized from the flags.

use crate::cli::{Args, ConfigFormat};
use crate::collectors::RgwMode;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// Default configuration constants
pub const DEFAULT_CLUSTER: &str = "ceph";
pub const DEFAULT_CEPH_CONFIG: &str = "/etc/ceph/ceph.conf";
pub const DEFAULT_CEPH_USER: &str = "admin";
pub const DEFAULT_RADOS_OP_TIMEOUT: u64 = 30;
pub const DEFAULT_RGW_INTERVAL: u64 = 300;
pub const DEFAULT_TELEMETRY_ADDR: &str = "0.0.0.0:9128";
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";
pub const DEFAULT_CEPH_BINARY: &str = "ceph";
pub const DEFAULT_RADOSGW_ADMIN_BINARY: &str = "radosgw-admin";

/// Config files probed when no path is given.
const DEFAULT_CONFIG_LOCATIONS: &[&str] = &["/etc/ceph/exporter.yml", "/etc/ceph/exporter.yaml"];

fn default_user() -> String {
    DEFAULT_CEPH_USER.to_string()
}

fn default_ceph_config() -> PathBuf {
    PathBuf::from(DEFAULT_CEPH_CONFIG)
}

/// One monitored cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Value of the `cluster` label on every series of this cluster
    pub cluster_label: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_ceph_config")]
    pub config_file: PathBuf,

    /// Name passed to `--cluster`; defaults to the global cluster name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
}

/// Exporter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub telemetry_addr: Option<String>,
    pub telemetry_path: Option<String>,

    // Cluster access
    pub cluster_name: Option<String>,
    pub rados_op_timeout: Option<u64>,
    pub ceph_binary: Option<PathBuf>,

    // RGW garbage collection
    pub rgw_mode: Option<RgwMode>,
    pub rgw_interval: Option<u64>,
    pub radosgw_admin_binary: Option<PathBuf>,

    // Logging
    pub log_level: Option<String>,

    // TLS/SSL Configuration
    #[serde(alias = "tls-cert-path")]
    pub tls_cert_path: Option<String>,
    #[serde(alias = "tls-key-path")]
    pub tls_key_path: Option<String>,

    // Kept last: TOML requires tables after plain values
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

impl Config {
    /// Fills every unset option with its default.
    pub fn fill_defaults(&mut self) {
        self.telemetry_addr
            .get_or_insert_with(|| DEFAULT_TELEMETRY_ADDR.to_string());
        self.telemetry_path
            .get_or_insert_with(|| DEFAULT_TELEMETRY_PATH.to_string());
        self.cluster_name
            .get_or_insert_with(|| DEFAULT_CLUSTER.to_string());
        self.rados_op_timeout.get_or_insert(DEFAULT_RADOS_OP_TIMEOUT);
        self.ceph_binary
            .get_or_insert_with(|| PathBuf::from(DEFAULT_CEPH_BINARY));
        self.rgw_mode.get_or_insert(RgwMode::Disabled);
        self.rgw_interval.get_or_insert(DEFAULT_RGW_INTERVAL);
        self.radosgw_admin_binary
            .get_or_insert_with(|| PathBuf::from(DEFAULT_RADOSGW_ADMIN_BINARY));
        self.log_level.get_or_insert_with(|| "info".to_string());
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.rados_op_timeout.unwrap_or(DEFAULT_RADOS_OP_TIMEOUT))
    }

    pub fn rgw_interval(&self) -> Duration {
        Duration::from_secs(self.rgw_interval.unwrap_or(DEFAULT_RGW_INTERVAL))
    }

    pub fn metrics_path(&self) -> &str {
        self.telemetry_path
            .as_deref()
            .unwrap_or(DEFAULT_TELEMETRY_PATH)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = self
            .telemetry_addr
            .as_deref()
            .unwrap_or(DEFAULT_TELEMETRY_ADDR);
        // Accept the ":9128" shorthand for all interfaces
        let raw = if raw.starts_with(':') {
            format!("0.0.0.0{}", raw)
        } else {
            raw.to_string()
        };
        raw.parse()
            .map_err(|e| ConfigError::Invalid(format!("Invalid telemetry_addr '{}': {}", raw, e)))
    }

    /// `--cluster` value for one target.
    pub fn cluster_name_for<'a>(&'a self, cluster: &'a ClusterConfig) -> &'a str {
        cluster
            .cluster_name
            .as_deref()
            .or(self.cluster_name.as_deref())
            .unwrap_or(DEFAULT_CLUSTER)
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert_path.is_some() || self.tls_key_path.is_some()
    }
}

fn check_tls_file(path: &str, what: &str) -> Result<(), ConfigError> {
    let p = Path::new(path);
    if !p.exists() {
        return Err(ConfigError::Invalid(format!("TLS {} file not found: {}", what, path)));
    }
    match fs::metadata(p) {
        Ok(meta) if meta.len() == 0 => Err(ConfigError::Invalid(format!(
            "TLS {} file is empty: {}",
            what, path
        ))),
        Err(e) => Err(ConfigError::Invalid(format!(
            "TLS {} file is not readable: {} ({})",
            what, path, e
        ))),
        Ok(_) => Ok(()),
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.clusters.is_empty() {
        return Err(ConfigError::Invalid("No clusters configured".into()));
    }

    let mut seen = HashSet::new();
    for cluster in &cfg.clusters {
        if cluster.cluster_label.trim().is_empty() {
            return Err(ConfigError::Invalid("cluster_label must not be empty".into()));
        }
        if cluster.user.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "user must not be empty for cluster '{}'",
                cluster.cluster_label
            )));
        }
        if !seen.insert(cluster.cluster_label.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Duplicate cluster_label '{}'",
                cluster.cluster_label
            )));
        }
    }

    if cfg.rados_op_timeout == Some(0) {
        return Err(ConfigError::Invalid("rados_op_timeout must be greater than 0".into()));
    }
    if cfg.rgw_interval == Some(0) {
        return Err(ConfigError::Invalid("rgw_interval must be greater than 0".into()));
    }
    if !cfg.metrics_path().starts_with('/') {
        return Err(ConfigError::Invalid(format!(
            "telemetry_path must start with '/': {}",
            cfg.metrics_path()
        )));
    }
    if matches!(cfg.metrics_path(), "/" | "/health") {
        return Err(ConfigError::Invalid(format!(
            "telemetry_path collides with a built-in endpoint: {}",
            cfg.metrics_path()
        )));
    }
    cfg.listen_addr()?;

    // TLS validation
    match (cfg.tls_cert_path.as_deref(), cfg.tls_key_path.as_deref()) {
        (None, None) => {}
        (Some(_), None) => {
            return Err(ConfigError::Invalid(
                "TLS is enabled but tls_key_path is not set".into(),
            ));
        }
        (None, Some(_)) => {
            return Err(ConfigError::Invalid(
                "TLS is enabled but tls_cert_path is not set".into(),
            ));
        }
        (Some(cert), Some(key)) => {
            check_tls_file(cert, "certificate")?;
            check_tls_file(key, "private key")?;
        }
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI/env (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = load_config(args.exporter_config.as_deref())?;

    if let Some(addr) = &args.telemetry_addr {
        config.telemetry_addr = Some(addr.clone());
    }
    if let Some(path) = &args.telemetry_path {
        config.telemetry_path = Some(path.clone());
    }
    if let Some(name) = &args.cluster {
        config.cluster_name = Some(name.clone());
    }
    if let Some(timeout) = args.rados_op_timeout {
        config.rados_op_timeout = Some(timeout);
    }
    if let Some(binary) = &args.ceph_binary {
        config.ceph_binary = Some(binary.clone());
    }
    if let Some(mode) = args.rgw_mode {
        config.rgw_mode = Some(mode);
    }
    if let Some(interval) = args.rgw_interval {
        config.rgw_interval = Some(interval);
    }
    if let Some(binary) = &args.radosgw_admin_binary {
        config.radosgw_admin_binary = Some(binary.clone());
    }
    config.log_level = Some(format!("{:?}", args.log_level).to_lowercase());

    // TLS configuration: CLI wins if provided
    if let Some(cert_path) = &args.tls_cert {
        config.tls_cert_path = Some(cert_path.to_string_lossy().to_string());
    }
    if let Some(key_path) = &args.tls_key {
        config.tls_key_path = Some(key_path.to_string_lossy().to_string());
    }

    config.fill_defaults();

    // No cluster list in the file: export the one described by the flags
    if config.clusters.is_empty() {
        let name = config
            .cluster_name
            .clone()
            .unwrap_or_else(|| DEFAULT_CLUSTER.to_string());
        config.clusters.push(ClusterConfig {
            cluster_label: name,
            user: args
                .ceph_user
                .clone()
                .unwrap_or_else(default_user),
            config_file: args
                .ceph_config
                .clone()
                .unwrap_or_else(default_ceph_config),
            cluster_name: None,
        });
    }

    Ok(config)
}

/// Loads a config file, picking the parser from its extension.
///
/// A missing file is not an error: the defaults are returned and the
/// cluster list is later synthesized from the flags.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match DEFAULT_CONFIG_LOCATIONS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
        {
            Some(p) => p.to_path_buf(),
            None => return Ok(Config::default()),
        },
    };

    if !path.exists() {
        info!(
            "Config file {} not found, using flags and environment",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let config: Config = serde_json::from_str(&content)?;
            info!("Loaded JSON configuration from: {}", path.display());
            Ok(config)
        }
        Some("toml") => {
            let config: Config = toml::from_str(&content)?;
            info!("Loaded TOML configuration from: {}", path.display());
            Ok(config)
        }
        _ => {
            // Default to YAML
            let config: Config = serde_yaml::from_str(&content)?;
            info!("Loaded YAML configuration from: {}", path.display());
            Ok(config)
        }
    }
}

/// Renders configuration in the requested format
pub fn render_config(config: &Config, format: ConfigFormat) -> Result<String, ConfigError> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)
            .map_err(|e| ConfigError::Invalid(format!("failed to render TOML: {}", e)))?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    Ok(output)
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<(), ConfigError> {
    println!("{}", render_config(config, format)?);
    Ok(())
}
