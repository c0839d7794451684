use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceLensError};
use crate::ids::is_root_parent;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    /// Lenient mapping used by the file parsers: anything unrecognised is `Unset`.
    pub fn from_text(s: &str) -> Self {
        Self::from_str(s).unwrap_or(Self::Unset)
    }
}

impl FromStr for SpanStatus {
    type Err = TraceLensError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ok" | "status_code_ok" => Ok(Self::Ok),
            "error" | "status_code_error" => Ok(Self::Error),
            "unset" | "status_code_unset" => Ok(Self::Unset),
            _ => Err(TraceLensError::Parse(format!("unknown status: {s}"))),
        }
    }
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unset => "Unset",
            Self::Ok => "Ok",
            Self::Error => "Error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanEvent {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_id: String,
    pub name: String,
    pub duration: Duration,
    pub status: SpanStatus,
    pub timestamp: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
    pub events: Vec<SpanEvent>,
    pub source_file: String,
}

impl Span {
    pub fn is_root(&self) -> bool {
        is_root_parent(&self.parent_id)
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_with_parent(parent_id: &str) -> Span {
        Span {
            trace_id: "t1".into(),
            span_id: "s1".into(),
            parent_id: parent_id.into(),
            name: "op".into(),
            duration: Duration::from_micros(100_500),
            status: SpanStatus::Ok,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            tags: BTreeMap::from([("http.method".to_string(), "GET".to_string())]),
            events: Vec::new(),
            source_file: "a.log".into(),
        }
    }

    #[test]
    fn root_follows_parent_sentinel() {
        assert!(span_with_parent("").is_root());
        assert!(span_with_parent("0000000000000000").is_root());
        assert!(!span_with_parent("abc").is_root());
    }

    #[test]
    fn duration_and_tags() {
        let span = span_with_parent("");
        assert!((span.duration_ms() - 100.5).abs() < 1e-9);
        assert_eq!(span.tag("http.method"), Some("GET"));
        assert_eq!(span.tag("missing"), None);
    }

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(SpanStatus::from_str("ERROR").unwrap(), SpanStatus::Error);
        assert_eq!(SpanStatus::from_str("ok").unwrap(), SpanStatus::Ok);
        assert!(SpanStatus::from_str("wat").is_err());
        assert_eq!(SpanStatus::from_text("wat"), SpanStatus::Unset);
        assert_eq!(SpanStatus::Error.to_string(), "Error");
    }
}
