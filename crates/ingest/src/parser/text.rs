//! Structured-text span blocks: a `[date time] TRACE` header, `Key: value` fields, then
//! optional `Tags:` and `Events:` sections, closed by a dashed rule.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracelens_core::ids::normalize_parent_id;
use tracelens_core::model::{FileType, Span, SpanEvent, SpanStatus};
use tracelens_core::time::{parse_block_timestamp, parse_ms_str, parse_time_of_day};
use tracing::debug;

use super::SpanParser;

const BLOCK_MARKER: &str = "TRACE";
const MIN_RULE_LEN: usize = 5;

#[derive(Debug, Clone, Copy, Default)]
pub struct TextLogParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Fields,
    Tags,
    Events,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    TraceId,
    SpanId,
    ParentId,
    Name,
    Duration,
    Status,
}

impl Field {
    fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "traceid" => Some(Self::TraceId),
            "spanid" => Some(Self::SpanId),
            "parentid" => Some(Self::ParentId),
            "name" => Some(Self::Name),
            "duration" => Some(Self::Duration),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct BlockBuilder {
    start_line: usize,
    timestamp: Option<DateTime<Utc>>,
    trace_id: Option<String>,
    span_id: Option<String>,
    parent_id: Option<String>,
    name: Option<String>,
    duration: Option<Duration>,
    status: SpanStatus,
    tags: BTreeMap<String, String>,
    events: Vec<SpanEvent>,
    last_attr: Option<String>,
}

impl BlockBuilder {
    fn new(start_line: usize, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            start_line,
            timestamp,
            ..Self::default()
        }
    }

    fn base_timestamp(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    fn set_field(&mut self, field: Field, value: &str) {
        let value = value.trim();
        match field {
            Field::TraceId => self.trace_id = Some(value.to_string()),
            Field::SpanId => self.span_id = Some(value.to_string()),
            Field::ParentId => self.parent_id = Some(value.to_string()),
            Field::Name => self.name = Some(value.to_string()),
            Field::Duration => {
                self.duration = parse_ms_str(value);
                if self.duration.is_none() {
                    debug!(line = self.start_line, value, "unparsable duration, using zero");
                }
            }
            Field::Status => self.status = SpanStatus::from_text(value),
        }
    }

    fn add_tag(&mut self, line: &str) {
        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                self.tags
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => debug!(line = self.start_line, text = line, "skipping malformed tag line"),
        }
    }

    fn continues_attr(&self) -> bool {
        self.last_attr.is_some()
    }

    fn add_event_line(&mut self, line: &str) {
        let date = self.base_timestamp().date_naive();
        if let Some((time, name)) = split_bracketed(line)
            && let Some(timestamp) = parse_time_of_day(time, date)
        {
            self.events.push(SpanEvent {
                timestamp,
                name: name.to_string(),
                attributes: BTreeMap::new(),
            });
            self.last_attr = None;
            return;
        }

        let Some(event) = self.events.last_mut() else {
            debug!(line = self.start_line, text = line, "event attribute before any event");
            return;
        };

        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                let key = key.trim().to_string();
                event
                    .attributes
                    .insert(key.clone(), value.trim().to_string());
                self.last_attr = Some(key);
            }
            _ => {
                // Continuation of the previous attribute's value.
                match self
                    .last_attr
                    .as_ref()
                    .and_then(|k| event.attributes.get_mut(k))
                {
                    Some(value) => {
                        value.push('\n');
                        value.push_str(line);
                    }
                    None => debug!(line = self.start_line, text = line, "dangling event line"),
                }
            }
        }
    }

    fn finish(self, source_file: &str) -> Option<Span> {
        let missing = [
            ("TraceId", self.trace_id.as_deref()),
            ("SpanId", self.span_id.as_deref()),
            ("Name", self.name.as_deref()),
        ]
        .iter()
        .filter(|(_, v)| v.is_none_or(str::is_empty))
        .map(|(k, _)| *k)
        .collect::<Vec<_>>();

        if !missing.is_empty() {
            debug!(
                source = source_file,
                line = self.start_line,
                missing = ?missing,
                "dropping span block without required fields"
            );
            return None;
        }

        let timestamp = self.base_timestamp();
        Some(Span {
            trace_id: self.trace_id.unwrap_or_default(),
            span_id: self.span_id.unwrap_or_default(),
            parent_id: normalize_parent_id(self.parent_id.as_deref()),
            name: self.name.unwrap_or_default(),
            duration: self.duration.unwrap_or(Duration::ZERO),
            status: self.status,
            timestamp,
            tags: self.tags,
            events: self.events,
            source_file: source_file.to_string(),
        })
    }
}

/// Splits `[inner] rest` into `(inner, rest)`.
fn split_bracketed(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim().strip_prefix('[')?;
    let (inner, tail) = rest.split_once(']')?;
    Some((inner, tail.trim()))
}

fn is_rule(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= MIN_RULE_LEN && trimmed.chars().all(|c| c == '-')
}

/// `Some(timestamp)` when `line` is a block header; the timestamp may itself be unparsable.
fn parse_header(line: &str) -> Option<Option<DateTime<Utc>>> {
    let (inner, tail) = split_bracketed(line)?;
    if !tail.eq_ignore_ascii_case(BLOCK_MARKER) {
        return None;
    }
    Some(parse_block_timestamp(inner))
}

fn known_field(line: &str) -> Option<(Field, &str)> {
    let (key, value) = line.split_once(':')?;
    Field::from_key(key).map(|f| (f, value))
}

impl SpanParser for TextLogParser {
    fn file_type(&self) -> FileType {
        FileType::Log
    }

    fn parse_str(&self, content: &str, source_file: &str) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut dropped = 0usize;
        let mut block: Option<BlockBuilder> = None;
        let mut section = Section::Fields;

        let mut flush = |block: &mut Option<BlockBuilder>, spans: &mut Vec<Span>| {
            if let Some(done) = block.take() {
                match done.finish(source_file) {
                    Some(span) => spans.push(span),
                    None => dropped += 1,
                }
            }
        };

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            if is_rule(line) {
                flush(&mut block, &mut spans);
                section = Section::Fields;
                continue;
            }

            let indented = line.starts_with(' ') || line.starts_with('\t');
            if !indented && let Some(timestamp) = parse_header(line) {
                flush(&mut block, &mut spans);
                if timestamp.is_none() {
                    debug!(source = source_file, line = idx + 1, "unparsable block timestamp");
                }
                block = Some(BlockBuilder::new(idx + 1, timestamp));
                section = Section::Fields;
                continue;
            }

            let current = block.get_or_insert_with(|| BlockBuilder::new(idx + 1, None));
            let trimmed = line.trim();

            if !indented {
                if trimmed.eq_ignore_ascii_case("tags:") {
                    section = Section::Tags;
                } else if trimmed.eq_ignore_ascii_case("events:") {
                    section = Section::Events;
                } else if section == Section::Events && current.continues_attr() {
                    current.add_event_line(trimmed);
                } else if let Some((field, value)) = known_field(trimmed) {
                    section = Section::Fields;
                    current.set_field(field, value);
                } else if section == Section::Events {
                    current.add_event_line(trimmed);
                } else {
                    debug!(source = source_file, line = idx + 1, text = trimmed, "ignoring unknown line");
                }
                continue;
            }

            match section {
                Section::Tags => current.add_tag(trimmed),
                Section::Events => current.add_event_line(trimmed),
                Section::Fields => {
                    debug!(source = source_file, line = idx + 1, text = trimmed, "ignoring indented line outside a section");
                }
            }
        }
        flush(&mut block, &mut spans);

        debug!(source = source_file, parsed = spans.len(), dropped, "parsed text span file");
        spans
    }
}
