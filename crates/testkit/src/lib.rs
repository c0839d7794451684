use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracelens_core::model::{Span, SpanStatus, Trace};

pub fn base_ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 30, 20, 16, 0).unwrap()
}

pub fn span(trace_id: &str, span_id: &str, parent_id: &str, name: &str, ms: u64) -> Span {
    Span {
        trace_id: trace_id.to_string(),
        span_id: span_id.to_string(),
        parent_id: parent_id.to_string(),
        name: name.to_string(),
        duration: Duration::from_millis(ms),
        status: SpanStatus::Ok,
        timestamp: base_ts(),
        tags: BTreeMap::new(),
        events: Vec::new(),
        source_file: "fixture.log".to_string(),
    }
}

pub fn with_status(mut span: Span, status: SpanStatus) -> Span {
    span.status = status;
    span
}

pub fn with_tag(mut span: Span, key: &str, value: &str) -> Span {
    span.tags.insert(key.to_string(), value.to_string());
    span
}

pub fn at_offset_ms(mut span: Span, offset_ms: i64) -> Span {
    span.timestamp = base_ts() + chrono::Duration::milliseconds(offset_ms);
    span
}

/// A single-span trace whose root is `name` with the given status and duration.
pub fn single_span_trace(trace_id: &str, name: &str, status: SpanStatus, ms: u64) -> Trace {
    let root = with_status(span(trace_id, &format!("{trace_id}-root"), "", name, ms), status);
    Trace::new(trace_id.to_string(), vec![root], 0, false).expect("non-empty trace")
}

/// `count` one-span traces named `op` at `base_ms`, followed by one trace at `outlier_ms`.
pub fn traces_with_outlier(count: usize, base_ms: u64, outlier_ms: u64) -> Vec<Trace> {
    let mut traces = (0..count)
        .map(|i| single_span_trace(&format!("t{i:02}"), "op", SpanStatus::Ok, base_ms))
        .collect::<Vec<_>>();
    traces.push(single_span_trace("outlier", "op", SpanStatus::Ok, outlier_ms));
    traces
}

pub const SAMPLE_LOG_BLOCK: &str = "[2026-01-30 20:16:00.949] TRACE
TraceId: abc123
SpanId: def456
ParentId: 0000000000000000
Name: TestOperation
Duration: 100.5ms
Status: Ok
Tags:
  test.key = test.value
--------------------------------------------------------------------------------
";

pub const SAMPLE_LOG_WITH_CHILD: &str = "[2026-01-30 20:16:00.949] TRACE
TraceId: abc123
SpanId: def456
ParentId: 0000000000000000
Name: GET /api/users
Duration: 120ms
Status: Ok
Tags:
  http.method = GET
--------------------------------------------------------------------------------
[2026-01-30 20:16:00.960] TRACE
TraceId: abc123
SpanId: aaa111
ParentId: def456
Name: db.query
Duration: 80ms
Status: Error
Tags:
  db.system = postgres
Events:
  [20:16:00.970000] exception
    exception.type = Timeout
    exception.message = query took too long
while waiting on lock
--------------------------------------------------------------------------------
";

pub const SAMPLE_JSONL: &str = r#"{"traceId":"abc123","spanId":"bbb222","parentSpanId":"def456","name":"cache.get","duration":5000000,"status":"ok","startTime":"2026-01-30T20:16:00.955Z","attributes":{"cache.hit":true}}
{"trace_id":"zzz999","span_id":"r1","name":"POST /api/items","startTimeUnixNano":"1769804160000000000","endTimeUnixNano":"1769804160250000000","status":{"code":2}}
"#;
