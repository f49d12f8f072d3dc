//! Alert record decoder
//!
//! Turns one trimmed line of the alert log into a [`NormalizedEvent`], the
//! fixed row shape stored in the `logs` table. Decoding is pure: the same line
//! always yields the same event (including its fingerprint) or the same
//! [`DecodeFailure`].
//!
//! Field mapping:
//!
//! | event field        | document path                      |
//! |--------------------|------------------------------------|
//! | `event_time`       | `@timestamp`, else `timestamp`     |
//! | `agent_name`       | `agent.name`                       |
//! | `agent_id`         | `agent.id`                         |
//! | `rule_id`          | `rule.id`                          |
//! | `rule_severity`    | `rule.level`                       |
//! | `rule_description` | `rule.description`                 |
//! | `source_address`   | `data.srcip`, else `srcip`         |
//! | `actor_name`       | `data.user`, else `user`           |

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use soclog_common::Fingerprint;
use std::net::IpAddr;
use thiserror::Error;

/// Offset-carrying layouts tried after RFC 3339 / RFC 2822.
/// `%z` accepts both `+0000` (Wazuh) and `+00:00`.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f %z",
    "%Y-%m-%d %H:%M:%S%.f %z",
];

/// Layouts without an offset; interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// One alert in the shape written to the sink
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub event_time: DateTime<Utc>,
    pub agent_name: Option<String>,
    pub agent_id: Option<String>,
    pub rule_id: Option<i32>,
    pub rule_severity: Option<i32>,
    pub rule_description: Option<String>,
    /// Only ever a valid IP literal
    pub source_address: Option<IpAddr>,
    pub actor_name: Option<String>,
    /// The whole parsed document
    pub raw_payload: Value,
    pub fingerprint: Fingerprint,
}

/// Why a line could not become an event. Neither case is retryable: the same
/// bytes always decode the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("record has no usable timestamp")]
    NoTimestamp,
}

/// Decode one line.
///
/// `line` must already be trimmed; the fingerprint is computed over exactly
/// these bytes.
pub fn decode(line: &str) -> Result<NormalizedEvent, DecodeFailure> {
    let document: Value =
        serde_json::from_str(line).map_err(|e| DecodeFailure::Malformed(e.to_string()))?;

    let Value::Object(doc) = document else {
        return Err(DecodeFailure::Malformed("top-level value is not an object".to_string()));
    };

    let event_time = first_present(doc.get("@timestamp"), doc.get("timestamp"))
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .ok_or(DecodeFailure::NoTimestamp)?;

    let agent_name = nested(&doc, "agent", "name").and_then(text);
    let agent_id = nested(&doc, "agent", "id").and_then(text);
    let rule_id = nested(&doc, "rule", "id").and_then(ordinal);
    let rule_severity = nested(&doc, "rule", "level").and_then(ordinal);
    let rule_description = nested(&doc, "rule", "description").and_then(text);
    let source_address =
        first_present(nested(&doc, "data", "srcip"), doc.get("srcip")).and_then(ip_literal);
    let actor_name = first_present(nested(&doc, "data", "user"), doc.get("user")).and_then(text);

    Ok(NormalizedEvent {
        event_time,
        agent_name,
        agent_id,
        rule_id,
        rule_severity,
        rule_description,
        source_address,
        actor_name,
        raw_payload: Value::Object(doc),
        fingerprint: Fingerprint::of(line),
    })
}

/// Parse the timestamp layouts seen in alert logs and normalize to UTC.
///
/// Values without an offset are taken to be UTC already.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    // `%z` does not take a bare `Z`
    let zulu = raw
        .strip_suffix(['Z', 'z'])
        .map(|head| format!("{head}+0000"));
    let with_offset = zulu.as_deref().unwrap_or(raw);
    for format in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(with_offset, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Missing parents and non-object parents both read as empty.
fn nested<'a>(doc: &'a Map<String, Value>, parent: &str, key: &str) -> Option<&'a Value> {
    doc.get(parent)
        .and_then(Value::as_object)
        .and_then(|object| object.get(key))
}

fn first_present<'a>(primary: Option<&'a Value>, fallback: Option<&'a Value>) -> Option<&'a Value> {
    primary.filter(|v| is_present(v)).or(fallback.filter(|v| is_present(v)))
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer from a JSON number or a numeric string ("5715")
fn ordinal(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Exact literal only; surrounding whitespace is not an address
fn ip_literal(value: &Value) -> Option<IpAddr> {
    value.as_str().and_then(|s| s.parse().ok())
}
