//! Programmable [`Conn`] double.
//!
//! Rules are keyed by command prefix, optionally narrowed by argument values
//! or a placement-group id. The most specific matching rule answers. Each rule
//! holds a response sequence: the n-th matching call gets the n-th response
//! and the last response repeats once the sequence is exhausted.
//!
//! ```
//! use ceph_exporter::conn::MockConn;
//!
//! let conn = MockConn::new();
//! conn.on("status").reply(r#"{"health":{"status":"HEALTH_OK"}}"#);
//! conn.on("status").arg("format", "plain").reply("cluster:\n");
//! ```

use serde_json::Value;
use std::sync::Mutex;

use super::{parse_request, CommandOutput, Conn};
use crate::error::CommandError;

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    pgid: Option<String>,
    args: Vec<(String, Value)>,
    responses: Vec<Result<String, String>>,
    calls: usize,
}

impl Rule {
    fn matches(&self, prefix: &str, pgid: Option<&str>, fields: &serde_json::Map<String, Value>) -> bool {
        self.prefix == prefix
            && self.pgid.as_deref() == pgid
            && self
                .args
                .iter()
                .all(|(k, v)| fields.get(k).is_some_and(|actual| actual == v))
    }

    fn next_response(&mut self) -> Result<CommandOutput, CommandError> {
        let idx = self.calls.min(self.responses.len().saturating_sub(1));
        self.calls += 1;
        match self.responses.get(idx) {
            Some(Ok(body)) => Ok((body.clone().into_bytes(), String::new())),
            Some(Err(msg)) => Err(CommandError::Failed {
                code: -1,
                stderr: msg.clone(),
            }),
            None => Err(CommandError::Unmatched(self.prefix.clone())),
        }
    }
}

/// Canned-response command transport.
#[derive(Debug, Default)]
pub struct MockConn {
    rules: Mutex<Vec<Rule>>,
}

impl MockConn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a rule for monitor commands with the given prefix.
    pub fn on(&self, prefix: &str) -> RuleBuilder<'_> {
        RuleBuilder {
            conn: self,
            rule: Rule {
                prefix: prefix.to_string(),
                pgid: None,
                args: Vec::new(),
                responses: Vec::new(),
                calls: 0,
            },
        }
    }

    /// Starts a rule for a placement-group command.
    pub fn on_pg(&self, pgid: &str, prefix: &str) -> RuleBuilder<'_> {
        let mut builder = self.on(prefix);
        builder.rule.pgid = Some(pgid.to_string());
        builder
    }

    /// Number of calls answered by rules registered for `prefix`.
    pub fn calls(&self, prefix: &str) -> usize {
        self.lock()
            .iter()
            .filter(|r| r.prefix == prefix)
            .map(|r| r.calls)
            .sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Rule>> {
        self.rules.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn answer(&self, pgid: Option<&str>, request: &[u8]) -> Result<CommandOutput, CommandError> {
        let (prefix, fields) = parse_request(request)?;
        let mut rules = self.lock();

        // Most specific rule wins; among equals, the latest registration.
        let best = rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.matches(&prefix, pgid, &fields))
            .max_by_key(|(idx, r)| (r.args.len(), *idx))
            .map(|(idx, _)| idx);

        match best {
            Some(idx) => rules[idx].next_response(),
            None => Err(CommandError::Unmatched(prefix)),
        }
    }
}

impl Conn for MockConn {
    fn mon_command(&self, request: &[u8]) -> Result<CommandOutput, CommandError> {
        self.answer(None, request)
    }

    fn pg_command(&self, pgid: &[u8], request: &[u8]) -> Result<CommandOutput, CommandError> {
        let pgid = String::from_utf8_lossy(pgid).to_string();
        self.answer(Some(&pgid), request)
    }
}

/// Builder returned by [`MockConn::on`]; finishing calls register the rule.
pub struct RuleBuilder<'a> {
    conn: &'a MockConn,
    rule: Rule,
}

impl RuleBuilder<'_> {
    /// Narrows the rule to requests carrying `key == value`.
    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.rule.args.push((key.to_string(), value.into()));
        self
    }

    /// Answers every call with `body`.
    pub fn reply(self, body: impl Into<String>) {
        self.replies([body.into()]);
    }

    /// Answers successive calls with successive bodies.
    pub fn replies<I, S>(mut self, bodies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rule
            .responses
            .extend(bodies.into_iter().map(|b| Ok(b.into())));
        self.register();
    }

    /// Fails every call with a transport error carrying `message`.
    pub fn fail(mut self, message: &str) {
        self.rule.responses.push(Err(message.to_string()));
        self.register();
    }

    /// Answers successive calls with an explicit success/failure sequence.
    pub fn sequence(mut self, responses: Vec<Result<&str, &str>>) {
        self.rule.responses.extend(
            responses
                .into_iter()
                .map(|r| r.map(str::to_string).map_err(str::to_string)),
        );
        self.register();
    }

    fn register(self) {
        self.conn.lock().push(self.rule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::Request;

    fn body(out: CommandOutput) -> String {
        String::from_utf8(out.0).unwrap()
    }

    #[test]
    fn test_sequence_advances_then_repeats_last() {
        let conn = MockConn::new();
        conn.on("df").replies(["first", "second"]);
        let req = Request::new("df").to_bytes();

        assert_eq!(body(conn.mon_command(&req).unwrap()), "first");
        assert_eq!(body(conn.mon_command(&req).unwrap()), "second");
        assert_eq!(body(conn.mon_command(&req).unwrap()), "second");
        assert_eq!(conn.calls("df"), 3);
    }

    #[test]
    fn test_most_specific_rule_wins() {
        let conn = MockConn::new();
        conn.on("status").arg("format", "plain").reply("text");
        conn.on("status").reply("json");

        let plain = conn.mon_command(&Request::plain("status").to_bytes()).unwrap();
        let json = conn.mon_command(&Request::new("status").to_bytes()).unwrap();
        assert_eq!(body(plain), "text");
        assert_eq!(body(json), "json");
    }

    #[test]
    fn test_unmatched_and_failures() {
        let conn = MockConn::new();
        conn.on("osd df").sequence(vec![Err("timeout"), Ok("{}")]);
        let req = Request::new("osd df").to_bytes();

        assert!(matches!(
            conn.mon_command(&req),
            Err(CommandError::Failed { .. })
        ));
        assert_eq!(body(conn.mon_command(&req).unwrap()), "{}");
        assert!(matches!(
            conn.mon_command(&Request::new("osd dump").to_bytes()),
            Err(CommandError::Unmatched(_))
        ));
    }

    #[test]
    fn test_pg_rules_are_scoped_by_pgid() {
        let conn = MockConn::new();
        conn.on_pg("1.0", "query").reply("pg-one");
        let req = Request::new("query").to_bytes();

        assert_eq!(body(conn.pg_command(b"1.0", &req).unwrap()), "pg-one");
        assert!(conn.pg_command(b"2.0", &req).is_err());
        assert!(conn.mon_command(&req).is_err());
    }
}
