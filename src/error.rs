//! Error types for ceph-exporter.
//!
//! Failures are split by layer: the command transport, a single collector
//! cycle, exporter construction and configuration loading.

use thiserror::Error;

/// Failure of one administrative command issued through a [`crate::conn::Conn`].
#[derive(Error, Debug)]
pub enum CommandError {
    /// Request bytes were not a JSON object carrying a `prefix`
    #[error("invalid command request: {0}")]
    InvalidRequest(String),

    /// The command process could not be started
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The command did not finish within the operation timeout
    #[error("command timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The command ran but reported failure
    #[error("command failed with status {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    /// No canned response registered (test double only)
    #[error("no response registered for command '{0}'")]
    Unmatched(String),
}

/// Failure of one collector's update cycle.
///
/// A cycle failure is logged by the exporter and never aborts sibling
/// collectors or the scrape itself.
#[derive(Error, Debug)]
pub enum CollectError {
    /// The administrative command itself failed
    #[error("command '{prefix}' failed: {source}")]
    Command {
        prefix: String,
        #[source]
        source: CommandError,
    },

    /// The command answered with a document that could not be decoded
    #[error("failed to decode '{prefix}' response: {source}")]
    Decode {
        prefix: String,
        #[source]
        source: serde_json::Error,
    },

    /// The cluster answered but reported no pools at all
    #[error("no pools found in the cluster to report stats on")]
    NoPools,

    /// A metric could not be built for a dynamic label set
    #[error("metric error: {0}")]
    Metric(#[from] prometheus::Error),

    /// The radosgw-admin invocation failed
    #[error("radosgw-admin gc list failed: {0}")]
    Rgw(#[source] CommandError),

    /// The radosgw-admin output was not a GC task list
    #[error("failed to decode radosgw-admin gc list output: {0}")]
    RgwDecode(#[source] serde_json::Error),

    /// The most recent background refresh failed
    #[error("last background rgw gc refresh failed")]
    RgwBackgroundFailed,
}

/// Failure while constructing collectors or the exporter.
#[derive(Error, Debug)]
pub enum ExporterError {
    /// A metric descriptor was rejected by the prometheus crate
    #[error("invalid metric: {0}")]
    Metric(#[from] prometheus::Error),

    /// A built-in extraction pattern failed to compile
    #[error("invalid extraction pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Result alias for collector cycles.
pub type CollectResult<T> = Result<T, CollectError>;
