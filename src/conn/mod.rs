//! Command transport to the Ceph monitor quorum.
//!
//! Collectors never talk to the cluster directly. They build a [`Request`],
//! hand its bytes to a [`Conn`] and decode whatever comes back. Two adapters
//! exist:
//! - [`CliConn`]: drives the `ceph` command line client
//! - [`MockConn`]: canned responses for tests

mod cli;
mod mock;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{CollectError, CollectResult, CommandError};

pub use cli::CliConn;
pub use mock::{MockConn, RuleBuilder};

/// Raw response of an administrative command: payload plus status text.
pub type CommandOutput = (Vec<u8>, String);

/// Capability to run administrative commands against one cluster.
pub trait Conn: Send + Sync {
    /// Runs a monitor command. `request` is a serialized JSON object
    /// carrying at least `prefix` and `format`.
    fn mon_command(&self, request: &[u8]) -> Result<CommandOutput, CommandError>;

    /// Runs a command scoped to one placement group.
    fn pg_command(&self, pgid: &[u8], request: &[u8]) -> Result<CommandOutput, CommandError>;
}

/// Builder for the JSON request map sent through a [`Conn`].
#[derive(Debug, Clone)]
pub struct Request {
    prefix: String,
    fields: Map<String, Value>,
}

impl Request {
    /// New request with `format: json`.
    pub fn new(prefix: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("prefix".into(), Value::from(prefix));
        fields.insert("format".into(), Value::from("json"));
        Self {
            prefix: prefix.to_string(),
            fields,
        }
    }

    /// New request with `format: plain`.
    pub fn plain(prefix: &str) -> Self {
        Self::new(prefix).arg("format", "plain")
    }

    /// Adds or replaces a command argument.
    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        Value::Object(self.fields.clone()).to_string().into_bytes()
    }
}

/// Decodes request bytes back into a JSON map and returns it with its prefix.
pub(crate) fn parse_request(request: &[u8]) -> Result<(String, Map<String, Value>), CommandError> {
    let fields: Map<String, Value> = serde_json::from_slice(request)
        .map_err(|e| CommandError::InvalidRequest(e.to_string()))?;
    let prefix = fields
        .get("prefix")
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::InvalidRequest("missing 'prefix'".into()))?
        .to_string();
    Ok((prefix, fields))
}

/// Runs a monitor command and returns the raw payload.
pub fn mon_raw(conn: &dyn Conn, request: &Request) -> CollectResult<Vec<u8>> {
    let (body, info) =
        conn.mon_command(&request.to_bytes())
            .map_err(|source| CollectError::Command {
                prefix: request.prefix().to_string(),
                source,
            })?;
    if !info.trim().is_empty() {
        debug!(command = request.prefix(), info = %info.trim(), "command status");
    }
    Ok(body)
}

/// Runs a monitor command and decodes its JSON payload.
pub fn mon_json<T: DeserializeOwned>(conn: &dyn Conn, request: &Request) -> CollectResult<T> {
    let body = mon_raw(conn, request)?;
    decode(request.prefix(), &body)
}

/// Runs a placement-group command and decodes its JSON payload.
pub fn pg_json<T: DeserializeOwned>(
    conn: &dyn Conn,
    pgid: &str,
    request: &Request,
) -> CollectResult<T> {
    let (body, _) = conn
        .pg_command(pgid.as_bytes(), &request.to_bytes())
        .map_err(|source| CollectError::Command {
            prefix: format!("pg {} {}", pgid, request.prefix()),
            source,
        })?;
    decode(request.prefix(), &body)
}

pub(crate) fn decode<T: DeserializeOwned>(prefix: &str, body: &[u8]) -> CollectResult<T> {
    serde_json::from_slice(body).map_err(|source| CollectError::Decode {
        prefix: prefix.to_string(),
        source,
    })
}

/// Poll interval while waiting for a child process.
const WAIT_POLL: Duration = Duration::from_millis(20);

/// Runs `command` to completion, killing it once `timeout` elapses.
///
/// Output pipes are drained on helper threads so a chatty child can never
/// block on a full pipe while we wait for it.
pub(crate) fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> Result<Output, CommandError> {
    let program = command.get_program().to_string_lossy().to_string();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CommandError::Timeout {
                    secs: timeout.as_secs().max(1),
                });
            }
            Ok(None) => thread::sleep(WAIT_POLL),
            Err(source) => return Err(CommandError::Spawn { program, source }),
        }
    };

    Ok(Output {
        status,
        stdout: stdout.and_then(|h| h.join().ok()).unwrap_or_default(),
        stderr: stderr.and_then(|h| h.join().ok()).unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}
