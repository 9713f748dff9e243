use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::datetime::MS_PER_HOUR;

/// One loosely-typed record as delivered by the host data source.
///
/// Every field is kept as a raw JSON value; validation happens in
/// [`crate::normalize`]. Hosts often send several spellings of the same
/// column at once, so each field takes the first non-null value among its
/// accepted names (see [`RawRecord::from_map`]).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RawRecord {
    pub id: Value,

    pub name: Value,

    pub start: Value,

    pub duration: Value,

    #[serde(rename = "groupBy")]
    pub group_by: Value,

    #[serde(rename = "groupBy2")]
    pub group_by2: Value,

    pub color: Value,

    #[serde(rename = "isLocked")]
    pub is_locked: Value,

    #[serde(rename = "isGlobal")]
    pub is_global: Value,

    pub comment: Value,

    #[serde(rename = "contentCols")]
    pub content: Value,
}

const NAME_KEYS: &[&str] = &["Titre", "Name", "name", "title", "Title"];
const START_KEYS: &[&str] = &["startDate", "start", "start_date"];
const GROUP_BY_KEYS: &[&str] = &["groupBy", "group_by"];
const GROUP_BY2_KEYS: &[&str] = &["groupBy2", "group_by2"];
const IS_LOCKED_KEYS: &[&str] = &["isLocked", "is_locked"];
const IS_GLOBAL_KEYS: &[&str] = &["isGlobal", "is_global"];
const CONTENT_KEYS: &[&str] = &["contentCols", "content"];

impl RawRecord {
    /// Picks each field from `map` by key precedence; unknown keys are ignored.
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let pick = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| map.get(*key))
                .find(|value| !value.is_null())
                .cloned()
                .unwrap_or(Value::Null)
        };

        Self {
            id: pick(&["id"]),
            name: pick(NAME_KEYS),
            start: pick(START_KEYS),
            duration: pick(&["duration"]),
            group_by: pick(GROUP_BY_KEYS),
            group_by2: pick(GROUP_BY2_KEYS),
            color: pick(&["color"]),
            is_locked: pick(IS_LOCKED_KEYS),
            is_global: pick(IS_GLOBAL_KEYS),
            comment: pick(&["comment"]),
            content: pick(CONTENT_KEYS),
        }
    }
}

impl<'de> Deserialize<'de> for RawRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self::from_map(&map))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,

    pub name: String,

    pub start: DateTime<Utc>,

    pub duration_hours: f64,

    #[serde(default)]
    pub group_key1: Option<String>,

    #[serde(default)]
    pub group_key2: Option<String>,

    #[serde(default)]
    pub color: Option<String>,

    #[serde(default)]
    pub is_locked: Option<bool>,

    #[serde(default)]
    pub is_global: Option<bool>,

    #[serde(default)]
    pub comment: String,
}

impl Task {
    pub fn new(id: i64, name: impl Into<String>, start: DateTime<Utc>, duration_hours: f64) -> Self {
        Self {
            id,
            name: name.into(),
            start,
            duration_hours,
            group_key1: None,
            group_key2: None,
            color: None,
            is_locked: None,
            is_global: None,
            comment: String::new(),
        }
    }

    pub fn with_groups(mut self, group_key1: Option<&str>, group_key2: Option<&str>) -> Self {
        self.group_key1 = group_key1.map(ToString::to_string);
        self.group_key2 = group_key2.map(ToString::to_string);
        self
    }

    /// `start + duration_hours`, rounded to the millisecond. Saturates at
    /// the latest representable instant.
    pub fn end(&self) -> DateTime<Utc> {
        end_after(self.start, self.duration_hours).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn start_ms(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_ms(&self) -> i64 {
        self.end().timestamp_millis()
    }

    /// Lane key for grouping; absent keys group under the empty string.
    pub fn lane_key(&self) -> (&str, &str) {
        (
            self.group_key1.as_deref().unwrap_or_default(),
            self.group_key2.as_deref().unwrap_or_default(),
        )
    }
}

/// `start + hours`, or `None` when the result is not representable.
pub fn end_after(start: DateTime<Utc>, hours: f64) -> Option<DateTime<Utc>> {
    let millis = (hours * MS_PER_HOUR as f64).round();
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
        return None;
    }
    start.checked_add_signed(Duration::try_milliseconds(millis as i64)?)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn first_non_null_spelling_wins() {
        let record: RawRecord = serde_json::from_value(json!({
            "id": 1,
            "Titre": "Pose",
            "Name": "fallback",
            "startDate": "2025-01-06",
            "start": "2024-01-01",
            "duration": 2,
            "groupBy": "A",
            "contentCols": null,
            "content": ["Line 3"]
        }))
        .expect("record with aliased columns");

        assert_eq!(record.name, json!("Pose"));
        assert_eq!(record.start, json!("2025-01-06"));
        assert_eq!(record.group_by, json!("A"));
        assert_eq!(record.content, json!(["Line 3"]));
        assert_eq!(record.comment, Value::Null);
    }

    #[test]
    fn null_preferred_spelling_falls_through() {
        let record: RawRecord =
            serde_json::from_value(json!({"Titre": null, "title": "Backup"})).expect("record");
        assert_eq!(record.name, json!("Backup"));
        assert!(serde_json::from_value::<RawRecord>(json!(42)).is_err());
    }

    #[test]
    fn end_saturates_instead_of_overflowing() {
        let start = DateTime::<Utc>::MAX_UTC - Duration::hours(1);
        let task = Task::new(1, "late", start, 10.0);

        assert_eq!(task.end(), DateTime::<Utc>::MAX_UTC);
        assert_eq!(end_after(start, 10.0), None);
        assert_eq!(end_after(start, f64::MAX), None);

        let early = Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).single().expect("instant");
        assert_eq!(end_after(early, 1.5), Some(early + Duration::minutes(90)));
    }
}
