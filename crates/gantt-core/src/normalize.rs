//! Validation boundary between host records and the layout engine.
//!
//! Every record either becomes a [`Task`] or is dropped with a
//! [`DropReason`]; nothing here fails the batch.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use chrono_tz::Tz;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::datetime::parse_start_value;
use crate::task::{RawRecord, Task, end_after};

pub const MIN_DURATION_HOURS: f64 = 0.1;
pub const MAX_DURATION_HOURS: f64 = 1000.0;

pub const NAME_MAX_CHARS: usize = 100;
pub const COMMENT_MAX_CHARS: usize = 500;
pub const GROUP_KEY_MAX_CHARS: usize = 50;

pub const CONTENT_SEPARATOR: &str = " - ";

const EXECUTABLE_TAGS: [&str; 5] = ["script", "style", "iframe", "object", "embed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MissingStart,
    UnparsableStart,
    StartOutOfRange,
    MissingDuration,
    NonNumericDuration,
    DuplicateId(i64),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::MissingStart => write!(f, "missing start"),
            DropReason::UnparsableStart => write!(f, "unparsable start"),
            DropReason::StartOutOfRange => write!(f, "start out of range"),
            DropReason::MissingDuration => write!(f, "missing duration"),
            DropReason::NonNumericDuration => write!(f, "non-numeric duration"),
            DropReason::DuplicateId(id) => write!(f, "duplicate id {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Task(Task),
    Dropped(DropReason),
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub tasks: Vec<Task>,
    pub dropped: Vec<(usize, DropReason)>,
}

#[derive(Debug, Clone)]
pub struct TaskNormalizer {
    timezone: Tz,
}

impl TaskNormalizer {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    /// Normalizes one record. `position` is its 0-based index in the batch and
    /// stands in for a missing id.
    pub fn normalize_record(&self, record: &RawRecord, position: usize) -> Normalized {
        let start = match &record.start {
            Value::Null => return Normalized::Dropped(DropReason::MissingStart),
            value => match parse_start_value(value, &self.timezone) {
                Some(start) => start,
                None => return Normalized::Dropped(DropReason::UnparsableStart),
            },
        };

        let duration_hours = match &record.duration {
            Value::Null => return Normalized::Dropped(DropReason::MissingDuration),
            value => match value_number(value) {
                Some(hours) => clamp_duration(hours),
                None => return Normalized::Dropped(DropReason::NonNumericDuration),
            },
        };

        if end_after(start, duration_hours).is_none() {
            return Normalized::Dropped(DropReason::StartOutOfRange);
        }

        let id = value_integer(&record.id).unwrap_or(position as i64 + 1);

        Normalized::Task(Task {
            id,
            name: display_name(record),
            start,
            duration_hours,
            group_key1: group_key(&record.group_by),
            group_key2: group_key(&record.group_by2),
            color: value_text(&record.color).and_then(|raw| validate_color(&raw)),
            is_locked: value_flag(&record.is_locked),
            is_global: value_flag(&record.is_global),
            comment: value_text(&record.comment)
                .map(|raw| sanitize_text(&raw, COMMENT_MAX_CHARS))
                .unwrap_or_default(),
        })
    }

    #[tracing::instrument(skip_all, fields(records = records.len()))]
    pub fn normalize_batch(&self, records: &[RawRecord]) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        let mut seen_ids = BTreeSet::new();

        for (position, record) in records.iter().enumerate() {
            let outcome = match self.normalize_record(record, position) {
                Normalized::Task(task) if !seen_ids.insert(task.id) => {
                    warn!(position, id = task.id, "duplicate task id; dropping later record");
                    Normalized::Dropped(DropReason::DuplicateId(task.id))
                }
                other => other,
            };

            match outcome {
                Normalized::Task(task) => batch.tasks.push(task),
                Normalized::Dropped(reason) => {
                    debug!(position, %reason, "dropped record");
                    batch.dropped.push((position, reason));
                }
            }
        }

        debug!(
            kept = batch.tasks.len(),
            dropped = batch.dropped.len(),
            "normalized record batch"
        );
        batch
    }

    pub fn normalize(&self, records: &[RawRecord]) -> Vec<Task> {
        self.normalize_batch(records).tasks
    }
}

pub fn clamp_duration(hours: f64) -> f64 {
    hours.clamp(MIN_DURATION_HOURS, MAX_DURATION_HOURS)
}

fn hex_color_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{4}|[0-9a-fA-F]{6}|[0-9a-fA-F]{8})$").ok()
    })
    .as_ref()
}

fn executable_block_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        let alternatives = EXECUTABLE_TAGS
            .iter()
            .map(|tag| format!(r"<{tag}\b[^>]*>.*?</\s*{tag}\s*>"))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!("(?is){alternatives}")).ok()
    })
    .as_ref()
}

fn dangling_executable_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        let tags = EXECUTABLE_TAGS.join("|");
        Regex::new(&format!(r"(?is)<\s*/?\s*(?:{tags})\b.*$")).ok()
    })
    .as_ref()
}

/// Accepts `#rgb`, `#rgba`, `#rrggbb` and `#rrggbbaa`.
pub fn validate_color(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let re = hex_color_re()?;
    re.is_match(trimmed).then(|| trimmed.to_string())
}

/// Removes executable markup, then escapes what is left for HTML.
/// `max_chars` bounds the escaped output; an entity is never split.
pub fn sanitize_text(raw: &str, max_chars: usize) -> String {
    let stripped = strip_executable(raw);
    let mut out = String::new();
    let mut used = 0;
    for ch in stripped.trim().chars() {
        let piece = escape_char(ch);
        let width = piece.map_or(1, str::len);
        if used + width > max_chars {
            break;
        }
        match piece {
            Some(entity) => out.push_str(entity),
            None => out.push(ch),
        }
        used += width;
    }
    out
}

/// Plain-text variant for values written back to the host: markup removed,
/// bounded, not escaped.
pub fn bound_plain_text(raw: &str, max_chars: usize) -> String {
    strip_executable(raw).trim().chars().take(max_chars).collect()
}

fn strip_executable(raw: &str) -> String {
    let mut text = raw.to_string();
    if let Some(re) = executable_block_re() {
        text = re.replace_all(&text, "").into_owned();
    }
    if let Some(re) = dangling_executable_re() {
        text = re.replace_all(&text, "").into_owned();
    }
    text
}

fn escape_char(ch: char) -> Option<&'static str> {
    match ch {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '"' => Some("&quot;"),
        '\'' => Some("&#39;"),
        _ => None,
    }
}

fn display_name(record: &RawRecord) -> String {
    let parts: Vec<String> = match &record.content {
        Value::Array(values) => values.iter().filter_map(value_text).collect(),
        Value::Null => Vec::new(),
        single => value_text(single).into_iter().collect(),
    };
    let parts: Vec<String> = parts
        .into_iter()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect();

    let raw = if parts.is_empty() {
        value_text(&record.name).unwrap_or_default()
    } else {
        parts.join(CONTENT_SEPARATOR)
    };
    sanitize_text(&raw, NAME_MAX_CHARS)
}

fn group_key(value: &Value) -> Option<String> {
    let key = sanitize_text(&value_text(value)?, GROUP_KEY_MAX_CHARS);
    (!key.is_empty()).then_some(key)
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(values) => {
            let parts: Vec<String> = values.iter().filter_map(value_text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Null | Value::Object(_) => None,
    }
}

fn value_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn value_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            let float = number.as_f64()?;
            (float.fract() == 0.0 && float.abs() < i64::MAX as f64).then_some(float as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn value_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_i64()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        },
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "y" | "yes" | "on" | "true" => Some(true),
            "0" | "n" | "no" | "off" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> RawRecord {
        serde_json::from_value(value).expect("raw record")
    }

    fn normalizer() -> TaskNormalizer {
        TaskNormalizer::new(chrono_tz::UTC)
    }

    #[test]
    fn clamps_duration_instead_of_rejecting() {
        let low = normalizer().normalize(&[record(json!({
            "id": 1, "start": "2025-01-06T08:00:00Z", "duration": -5
        }))]);
        let high = normalizer().normalize(&[record(json!({
            "id": 2, "start": "2025-01-06T08:00:00Z", "duration": 5000
        }))]);

        assert_eq!(low[0].duration_hours, 0.1);
        assert_eq!(high[0].duration_hours, 1000.0);
    }

    #[test]
    fn drops_unparsable_records_only() {
        let batch = normalizer().normalize_batch(&[
            record(json!({"id": 1, "start": "garbage", "duration": 2})),
            record(json!({"id": 2, "duration": 2})),
            record(json!({"id": 3, "start": "2025-01-06", "duration": "abc"})),
            record(json!({"id": 4, "start": "2025-01-06"})),
            record(json!({"id": 5, "start": "2025-01-06", "duration": "3.5"})),
        ]);

        assert_eq!(batch.tasks.len(), 1);
        assert_eq!(batch.tasks[0].id, 5);
        assert_eq!(batch.tasks[0].duration_hours, 3.5);
        assert_eq!(
            batch.dropped,
            vec![
                (0, DropReason::UnparsableStart),
                (1, DropReason::MissingStart),
                (2, DropReason::NonNumericDuration),
                (3, DropReason::MissingDuration),
            ]
        );
    }

    #[test]
    fn drops_starts_whose_end_is_unrepresentable() {
        let batch = normalizer().normalize_batch(&[
            record(json!({"id": 1, "start": 8_210_266_876_000_i64, "duration": 10})),
            record(json!({"id": 2, "start": "2025-01-06T08:00:00Z", "duration": 10})),
        ]);

        assert_eq!(batch.tasks.len(), 1);
        assert_eq!(batch.tasks[0].id, 2);
        assert_eq!(batch.dropped, vec![(0, DropReason::StartOutOfRange)]);
    }

    #[test]
    fn fully_unparsable_batch_is_empty() {
        let tasks = normalizer().normalize(&[
            record(json!({"start": null, "duration": null})),
            record(json!({"start": true, "duration": []})),
        ]);
        assert!(tasks.is_empty());
    }

    #[test]
    fn sanitizes_and_bounds_text() {
        let name = sanitize_text("<script>alert(1)</script>Deploy <b>v2</b>", NAME_MAX_CHARS);
        assert_eq!(name, "Deploy &lt;b&gt;v2&lt;/b&gt;");

        let dangling = sanitize_text("ok <SCRIPT src=x>steal()", NAME_MAX_CHARS);
        assert_eq!(dangling, "ok");

        let long = "x".repeat(80);
        assert_eq!(sanitize_text(&long, GROUP_KEY_MAX_CHARS).chars().count(), 50);
    }

    #[test]
    fn bound_applies_to_escaped_output() {
        let amps = sanitize_text(&"&".repeat(100), NAME_MAX_CHARS);
        assert_eq!(amps, "&amp;".repeat(20));

        let cut = sanitize_text(&format!("{}<b>", "a".repeat(97)), NAME_MAX_CHARS);
        assert_eq!(cut, "a".repeat(97));
    }

    #[test]
    fn accepts_only_hex_colors() {
        assert_eq!(validate_color("#1e90ff"), Some("#1e90ff".to_string()));
        assert_eq!(validate_color(" #abc "), Some("#abc".to_string()));
        assert_eq!(validate_color("red"), None);
        assert_eq!(validate_color("#12345"), None);
        assert_eq!(validate_color("#1e90ff;background:url(x)"), None);
    }

    #[test]
    fn builds_composite_label_and_flags() {
        let tasks = normalizer().normalize(&[record(json!({
            "id": 7,
            "Titre": "ignored",
            "startDate": 1_736_150_400,
            "duration": 4,
            "groupBy": "Team A",
            "groupBy2": "",
            "color": "#ff0000",
            "isLocked": 1,
            "isGlobal": "no",
            "comment": "  needs review ",
            "contentCols": ["Line 3", null, "", 42]
        }))]);

        let task = &tasks[0];
        assert_eq!(task.name, "Line 3 - 42");
        assert_eq!(
            task.start,
            Utc.with_ymd_and_hms(2025, 1, 6, 8, 0, 0).single().expect("instant")
        );
        assert_eq!(task.group_key1.as_deref(), Some("Team A"));
        assert_eq!(task.group_key2, None);
        assert_eq!(task.color.as_deref(), Some("#ff0000"));
        assert_eq!(task.is_locked, Some(true));
        assert_eq!(task.is_global, Some(false));
        assert_eq!(task.comment, "needs review");
    }

    #[test]
    fn missing_id_uses_position_and_duplicates_drop() {
        let batch = normalizer().normalize_batch(&[
            record(json!({"start": "2025-01-06", "duration": 1, "name": "first"})),
            record(json!({"id": 1, "start": "2025-01-06", "duration": 1, "name": "again"})),
        ]);
        assert_eq!(batch.tasks.len(), 1);
        assert_eq!(batch.tasks[0].id, 1);
        assert_eq!(batch.tasks[0].name, "first");
        assert_eq!(batch.dropped, vec![(1, DropReason::DuplicateId(1))]);
    }
}
