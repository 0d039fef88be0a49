//! `ceph` command line adapter for [`Conn`].
//!
//! The JSON request map is translated into an argv: the prefix words first,
//! then the positional arguments the exporter uses, in command-signature
//! order. Connection identity (cluster, user, config file) and the operation
//! timeout are applied to every invocation.

use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{parse_request, run_with_timeout, CommandOutput, Conn};
use crate::error::CommandError;

/// Request keys passed through as positional arguments, in order.
const POSITIONAL_ARGS: &[&str] = &["pool", "var", "name", "detail", "dumpcontents", "states"];

/// Runs administrative commands through the `ceph` binary.
#[derive(Debug, Clone)]
pub struct CliConn {
    binary: PathBuf,
    cluster: String,
    user: String,
    config_file: PathBuf,
    timeout: Duration,
}

impl CliConn {
    pub fn new(
        binary: impl Into<PathBuf>,
        cluster: &str,
        user: &str,
        config_file: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            binary: binary.into(),
            cluster: cluster.to_string(),
            user: user.to_string(),
            config_file: config_file.into(),
            timeout,
        }
    }

    fn base_command(&self, format: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--cluster")
            .arg(&self.cluster)
            .arg("--id")
            .arg(&self.user)
            .arg("-c")
            .arg(&self.config_file)
            .arg("--connect-timeout")
            .arg(self.timeout.as_secs().max(1).to_string())
            .arg("--format")
            .arg(format);
        cmd
    }

    fn run(&self, format: &str, args: Vec<String>) -> Result<CommandOutput, CommandError> {
        let mut cmd = self.base_command(format);
        cmd.args(&args);
        debug!(args = ?args, "running ceph command");

        let output = run_with_timeout(cmd, self.timeout)?;
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(CommandError::Failed {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok((output.stdout, stderr))
    }
}

/// Builds the argv tail for one request map.
fn command_args(prefix: &str, fields: &Map<String, Value>) -> Vec<String> {
    let mut args: Vec<String> = prefix.split_whitespace().map(str::to_string).collect();
    for key in POSITIONAL_ARGS {
        match fields.get(*key) {
            Some(Value::String(s)) => args.push(s.clone()),
            Some(Value::Array(items)) => {
                args.extend(items.iter().filter_map(|v| v.as_str().map(str::to_string)))
            }
            Some(Value::Bool(true)) if *key == "detail" => args.push("detail".into()),
            Some(Value::Number(n)) => args.push(n.to_string()),
            _ => {}
        }
    }
    args
}

fn format_of(fields: &Map<String, Value>) -> &str {
    fields.get("format").and_then(Value::as_str).unwrap_or("json")
}

impl Conn for CliConn {
    #[instrument(skip(self, request))]
    fn mon_command(&self, request: &[u8]) -> Result<CommandOutput, CommandError> {
        let (prefix, fields) = parse_request(request)?;
        self.run(format_of(&fields), command_args(&prefix, &fields))
    }

    #[instrument(skip(self, pgid, request))]
    fn pg_command(&self, pgid: &[u8], request: &[u8]) -> Result<CommandOutput, CommandError> {
        let (prefix, fields) = parse_request(request)?;
        let mut args = vec!["pg".to_string(), String::from_utf8_lossy(pgid).to_string()];
        args.extend(command_args(&prefix, &fields));
        self.run(format_of(&fields), args)
    }
}
