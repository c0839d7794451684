//! Compiles `AND`-joined query conditions into a [`TraceFilter`].

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::filter::TraceFilter;
use crate::model::span::SpanStatus;

static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bstatus\s*(?::|\s)\s*"?([A-Za-z_]+)"?"#).expect("status pattern")
});
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bduration\s*(>=|<=|>|<)\s*(\d+(?:\.\d+)?)").expect("duration pattern")
});
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bname\s*:\s*(?:"([^"]*)"|(\S+))"#).expect("name pattern")
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][\w.\-]*)\s*=\s*(?:"([^"]*)"|(\S+))"#).expect("tag pattern")
});

const RESERVED_KEYS: [&str; 3] = ["status", "duration", "name"];
const ERROR_WORDS: [&str; 3] = ["haserror", "errors", "error"];
const ANOMALY_WORDS: [&str; 3] = ["hasanomalies", "anomalies", "anomaly"];

/// Parses query text. Never fails: unrecognised text adds no constraint.
pub fn parse_query(query: &str) -> TraceFilter {
    let mut filter = TraceFilter {
        raw_query: query.trim().to_string(),
        ..TraceFilter::default()
    };
    for condition in split_conditions(query) {
        filter.merge(parse_condition(&condition));
    }
    filter
}

fn parse_condition(condition: &str) -> TraceFilter {
    let mut out = TraceFilter::default();
    let bare = condition.trim().to_ascii_lowercase();
    if ERROR_WORDS.contains(&bare.as_str()) {
        out.has_error = true;
    }
    if ANOMALY_WORDS.contains(&bare.as_str()) {
        out.has_anomalies = true;
    }

    // The name text is taken out first so its contents never read as other conditions.
    let mut rest = condition.to_string();
    if let Some(caps) = NAME_RE.captures(condition) {
        let text = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            out.name_contains = Some(text.to_string());
        }
        if let Some(whole) = caps.get(0) {
            rest.replace_range(whole.range(), " ");
        }
    }

    if let Some(caps) = STATUS_RE.captures(&rest) {
        match SpanStatus::from_str(&caps[1]) {
            Ok(status) => out.status = Some(status),
            Err(_) => warn!(value = &caps[1], "ignoring unknown status in query"),
        }
    }

    if let Some(caps) = DURATION_RE.captures(&rest)
        && let Ok(ms) = caps[2].parse::<f64>()
    {
        // `>` and `>=` both set the minimum, `<` and `<=` the maximum.
        match &caps[1] {
            ">" | ">=" => out.min_duration_ms = Some(ms),
            _ => out.max_duration_ms = Some(ms),
        }
    }

    for caps in TAG_RE.captures_iter(&rest) {
        let key = &caps[1];
        if RESERVED_KEYS.iter().any(|r| key.eq_ignore_ascii_case(r)) {
            continue;
        }
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or_default();
        out.tag_filters.insert(key.to_string(), value.to_string());
    }

    out
}

/// Splits on whitespace-delimited `AND` tokens that are not inside double quotes.
fn split_conditions(query: &str) -> Vec<String> {
    let mut conditions = Vec::new();
    let mut current = String::new();
    let mut token = String::new();
    let mut in_quotes = false;

    for ch in query.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            token.push(ch);
        } else if ch.is_whitespace() && !in_quotes {
            push_token(&mut token, &mut current, &mut conditions);
        } else {
            token.push(ch);
        }
    }
    push_token(&mut token, &mut current, &mut conditions);
    if !current.is_empty() {
        conditions.push(current);
    }
    conditions
}

fn push_token(token: &mut String, current: &mut String, conditions: &mut Vec<String>) {
    if token.is_empty() {
        return;
    }
    if token.eq_ignore_ascii_case("and") {
        if !current.is_empty() {
            conditions.push(std::mem::take(current));
        }
    } else {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(token);
    }
    token.clear();
}
