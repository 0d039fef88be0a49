//! Tolerant numeric fields for Ceph JSON payloads.
//!
//! Ceph releases disagree on whether counters are JSON numbers or numeric
//! strings (`"total_bytes": "1024"`). Fields are decoded into [`Number`] and
//! converted one by one, so a single bad value degrades to zero with a
//! warning instead of failing the whole document.

use serde::Deserialize;
use tracing::{debug, warn};

/// A JSON value that should be a number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Number {
    pub fn parse(&self) -> Result<f64, String> {
        match self {
            Number::Float(v) => Ok(*v),
            Number::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Number::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("'{}': {}", s, e)),
        }
    }
}

impl Default for Number {
    fn default() -> Self {
        Number::Float(0.0)
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number::Float(v)
    }
}

/// Converts an optional field to `f64`, degrading to 0 on absence or error.
pub fn value(command: &str, field: &str, number: Option<&Number>) -> f64 {
    match number {
        None => {
            debug!(command, field, "field absent, reporting 0");
            0.0
        }
        Some(n) => match n.parse() {
            Ok(v) => v,
            Err(e) => {
                warn!(command, field, error = %e, "unparseable numeric field, reporting 0");
                0.0
            }
        },
    }
}

/// Like [`value`] but warns on absence: for fields every release reports.
pub fn required(command: &str, field: &str, number: Option<&Number>) -> f64 {
    if number.is_none() {
        warn!(command, field, "expected field missing, reporting 0");
        return 0.0;
    }
    value(command, field, number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Doc {
        a: Option<Number>,
        b: Option<Number>,
        c: Option<Number>,
        d: Option<Number>,
    }

    #[test]
    fn test_numbers_and_strings_both_parse() {
        let doc: Doc =
            serde_json::from_str(r#"{"a": 12, "b": "34.5", "c": "garbage", "d": null}"#).unwrap();
        assert_eq!(value("df", "a", doc.a.as_ref()), 12.0);
        assert_eq!(value("df", "b", doc.b.as_ref()), 34.5);
        assert_eq!(value("df", "c", doc.c.as_ref()), 0.0);
        assert_eq!(value("df", "d", doc.d.as_ref()), 0.0);
    }

    #[test]
    fn test_bool_converts_to_ordinal() {
        assert_eq!(Number::Bool(true).parse(), Ok(1.0));
        assert_eq!(Number::Bool(false).parse(), Ok(0.0));
    }
}
