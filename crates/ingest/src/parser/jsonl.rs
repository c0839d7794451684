//! JSON-Lines span format: one JSON object per line, with tolerant field naming.
//!
//! Each logical field is looked up through an ordered alias list; the first non-null value wins.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracelens_core::ids::normalize_parent_id;
use tracelens_core::model::{FileType, Span, SpanEvent, SpanStatus};
use tracelens_core::time::{epoch_int_to_datetime, epoch_to_datetime, parse_iso8601, parse_ms_str};
use tracing::debug;

use super::SpanParser;

const TRACE_ID_KEYS: &[&str] = &["traceId", "trace_id", "traceID", "TraceId"];
const SPAN_ID_KEYS: &[&str] = &["spanId", "span_id", "spanID", "SpanId", "id"];
const PARENT_ID_KEYS: &[&str] = &[
    "parentSpanId",
    "parent_span_id",
    "parentId",
    "parent_id",
    "ParentId",
];
const NAME_KEYS: &[&str] = &["name", "operationName", "operation_name", "Name"];
const DURATION_KEYS: &[&str] = &["duration", "durationNs", "duration_ns", "Duration"];
const STATUS_KEYS: &[&str] = &["status", "Status"];
const STATUS_CODE_KEYS: &[&str] = &["code", "Code"];
const START_KEYS: &[&str] = &[
    "startTime",
    "start_time",
    "startTimeUnixNano",
    "start_time_unix_nano",
    "timestamp",
    "Timestamp",
];
const END_KEYS: &[&str] = &[
    "endTime",
    "end_time",
    "endTimeUnixNano",
    "end_time_unix_nano",
];
const TAG_KEYS: &[&str] = &["attributes", "tags", "Attributes", "Tags"];
const EVENT_KEYS: &[&str] = &["events", "Events"];
const EVENT_NAME_KEYS: &[&str] = &["name", "Name"];
const EVENT_TIME_KEYS: &[&str] = &[
    "timestamp",
    "time",
    "timeUnixNano",
    "time_unix_nano",
    "Timestamp",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonlParser;

impl SpanParser for JsonlParser {
    fn file_type(&self) -> FileType {
        FileType::Jsonl
    }

    fn parse_str(&self, content: &str, source_file: &str) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut dropped = 0usize;

        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value = match serde_json::from_str::<Value>(line) {
                Ok(v) => v,
                Err(e) => {
                    debug!(source = source_file, line = idx + 1, error = %e, "skipping invalid json line");
                    dropped += 1;
                    continue;
                }
            };
            let Some(obj) = value.as_object() else {
                debug!(source = source_file, line = idx + 1, "skipping non-object json line");
                dropped += 1;
                continue;
            };
            match decode_span(obj, source_file) {
                Some(span) => spans.push(span),
                None => {
                    debug!(
                        source = source_file,
                        line = idx + 1,
                        "skipping span without trace id, span id, or name"
                    );
                    dropped += 1;
                }
            }
        }

        debug!(source = source_file, parsed = spans.len(), dropped, "parsed jsonl span file");
        spans
    }
}

fn decode_span(obj: &Map<String, Value>, source_file: &str) -> Option<Span> {
    let trace_id = lookup_text(obj, TRACE_ID_KEYS)?;
    let span_id = lookup_text(obj, SPAN_ID_KEYS)?;
    let name = lookup_text(obj, NAME_KEYS)?;

    let start = lookup(obj, START_KEYS).and_then(value_to_datetime);
    let end = lookup(obj, END_KEYS).and_then(value_to_datetime);
    let duration = lookup(obj, DURATION_KEYS)
        .and_then(value_to_duration)
        .or_else(|| match (start, end) {
            (Some(s), Some(e)) => Some((e - s).to_std().unwrap_or(Duration::ZERO)),
            _ => None,
        })
        .unwrap_or(Duration::ZERO);
    let timestamp = start.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let events = lookup(obj, EVENT_KEYS)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|e| decode_event(e, timestamp))
                .collect()
        })
        .unwrap_or_default();

    Some(Span {
        trace_id,
        span_id,
        parent_id: normalize_parent_id(lookup_text(obj, PARENT_ID_KEYS).as_deref()),
        name,
        duration,
        status: lookup(obj, STATUS_KEYS).map(value_to_status).unwrap_or_default(),
        timestamp,
        tags: flatten_attributes(obj, TAG_KEYS),
        events,
        source_file: source_file.to_string(),
    })
}

fn decode_event(obj: &Map<String, Value>, fallback: DateTime<Utc>) -> SpanEvent {
    SpanEvent {
        timestamp: lookup(obj, EVENT_TIME_KEYS)
            .and_then(value_to_datetime)
            .unwrap_or(fallback),
        name: lookup_text(obj, EVENT_NAME_KEYS).unwrap_or_default(),
        attributes: flatten_attributes(obj, TAG_KEYS),
    }
}

fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// Non-empty text for scalar values; objects and arrays do not count as ids or names.
fn lookup_text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    let text = match lookup(obj, keys)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Canonical text form of any JSON value; strings are unquoted.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numbers (and numeric strings) are nanoseconds; `"<n>ms"` strings are milliseconds.
fn value_to_duration(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => number_to_nanos(n),
        Value::String(s) => {
            let s = s.trim();
            if s.to_ascii_lowercase().ends_with("ms") {
                parse_ms_str(s)
            } else if let Ok(nanos) = s.parse::<u64>() {
                Some(Duration::from_nanos(nanos))
            } else {
                s.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .map(|v| Duration::from_nanos(v.round() as u64))
            }
        }
        _ => None,
    }
}

fn number_to_nanos(n: &serde_json::Number) -> Option<Duration> {
    if let Some(nanos) = n.as_u64() {
        return Some(Duration::from_nanos(nanos));
    }
    n.as_f64()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| Duration::from_nanos(v.round() as u64))
}

fn value_to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => match n.as_u64() {
            Some(v) => epoch_int_to_datetime(v),
            None => n.as_f64().and_then(epoch_to_datetime),
        },
        Value::String(s) => parse_iso8601(s).or_else(|| {
            let s = s.trim();
            match s.parse::<u64>() {
                Ok(v) => epoch_int_to_datetime(v),
                Err(_) => s.parse::<f64>().ok().and_then(epoch_to_datetime),
            }
        }),
        _ => None,
    }
}

fn status_from_code(code: i64) -> SpanStatus {
    match code {
        1 => SpanStatus::Ok,
        2 => SpanStatus::Error,
        _ => SpanStatus::Unset,
    }
}

fn value_to_status(value: &Value) -> SpanStatus {
    match value {
        Value::String(s) => SpanStatus::from_text(s),
        Value::Number(n) => n.as_i64().map(status_from_code).unwrap_or_default(),
        Value::Object(obj) => match lookup(obj, STATUS_CODE_KEYS) {
            Some(Value::Number(n)) => n.as_i64().map(status_from_code).unwrap_or_default(),
            Some(Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(code) => status_from_code(code),
                Err(_) => SpanStatus::from_text(s),
            },
            _ => SpanStatus::Unset,
        },
        _ => SpanStatus::Unset,
    }
}

/// Merges every alias property into one map. Objects contribute their entries; arrays of
/// `{ "key": .., "value": .. }` pairs contribute one entry per pair.
fn flatten_attributes(obj: &Map<String, Value>, keys: &[&str]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for value in keys.iter().filter_map(|k| obj.get(*k)) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    out.insert(k.clone(), value_to_text(v));
                }
            }
            Value::Array(items) => {
                for item in items.iter().filter_map(Value::as_object) {
                    let Some(key) = item.get("key").and_then(Value::as_str) else {
                        continue;
                    };
                    let text = item.get("value").map(unwrap_any_value).unwrap_or_default();
                    out.insert(key.to_string(), text);
                }
            }
            _ => {}
        }
    }
    out
}

/// OTLP-JSON wraps attribute values as `{ "stringValue": "x" }`; take the single inner value.
fn unwrap_any_value(value: &Value) -> String {
    match value {
        Value::Object(map) if map.len() == 1 => map
            .values()
            .next()
            .map(value_to_text)
            .unwrap_or_default(),
        other => value_to_text(other),
    }
}
