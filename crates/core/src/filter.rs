use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::span::SpanStatus;

/// Compiled form of a query string. Every set field is a conjunctive constraint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TraceFilter {
    pub status: Option<SpanStatus>,
    pub min_duration_ms: Option<f64>,
    pub max_duration_ms: Option<f64>,
    pub name_contains: Option<String>,
    pub tag_filters: BTreeMap<String, String>,
    pub has_error: bool,
    pub has_anomalies: bool,
    pub raw_query: String,
}

impl TraceFilter {
    /// True when no constraint is set; `raw_query` is informational and not considered.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.min_duration_ms.is_none()
            && self.max_duration_ms.is_none()
            && self.name_contains.is_none()
            && self.tag_filters.is_empty()
            && !self.has_error
            && !self.has_anomalies
    }

    /// Folds `other` into `self`: scalars present in `other` win, flags OR together, tag filters
    /// accumulate with the later value winning per key.
    pub fn merge(&mut self, other: TraceFilter) {
        if other.status.is_some() {
            self.status = other.status;
        }
        if other.min_duration_ms.is_some() {
            self.min_duration_ms = other.min_duration_ms;
        }
        if other.max_duration_ms.is_some() {
            self.max_duration_ms = other.max_duration_ms;
        }
        if other.name_contains.is_some() {
            self.name_contains = other.name_contains;
        }
        self.tag_filters.extend(other.tag_filters);
        self.has_error |= other.has_error;
        self.has_anomalies |= other.has_anomalies;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_empty_even_with_raw_text() {
        let f = TraceFilter {
            raw_query: "nothing recognised".into(),
            ..TraceFilter::default()
        };
        assert!(f.is_empty());
        let f = TraceFilter {
            has_anomalies: true,
            ..TraceFilter::default()
        };
        assert!(!f.is_empty());
    }

    #[test]
    fn merge_rules() {
        let mut base = TraceFilter {
            status: Some(SpanStatus::Ok),
            min_duration_ms: Some(10.0),
            has_error: true,
            tag_filters: BTreeMap::from([("env".to_string(), "dev".to_string())]),
            ..TraceFilter::default()
        };
        base.merge(TraceFilter {
            status: Some(SpanStatus::Error),
            max_duration_ms: Some(50.0),
            tag_filters: BTreeMap::from([
                ("env".to_string(), "prod".to_string()),
                ("region".to_string(), "eu".to_string()),
            ]),
            ..TraceFilter::default()
        });

        assert_eq!(base.status, Some(SpanStatus::Error));
        assert_eq!(base.min_duration_ms, Some(10.0));
        assert_eq!(base.max_duration_ms, Some(50.0));
        assert!(base.has_error);
        assert_eq!(base.tag_filters.get("env").map(String::as_str), Some("prod"));
        assert_eq!(base.tag_filters.len(), 2);
    }
}
