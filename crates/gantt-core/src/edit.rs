use std::collections::BTreeMap;
use std::fmt;

use anyhow::{
  anyhow,
  bail
};
use chrono::{
  DateTime,
  SecondsFormat,
  Utc
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};
use serde_json::Value;
use tracing::{
  debug,
  instrument,
  warn
};

use crate::datetime::parse_start_text;
use crate::normalize::{
  COMMENT_MAX_CHARS,
  NAME_MAX_CHARS,
  bound_plain_text,
  clamp_duration,
  sanitize_text
};
use crate::task::Task;

/// Record fields a host may declare
/// writable.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EditableField {
  Name,
  Start,
  Duration,
  Comment
}

impl EditableField {
  pub fn from_key(
    key: &str
  ) -> Option<Self> {
    match key
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "name" | "title" => {
        Some(Self::Name)
      }
      | "start" | "startdate" => {
        Some(Self::Start)
      }
      | "duration" | "dur" => {
        Some(Self::Duration)
      }
      | "comment" => Some(Self::Comment),
      | _ => None
    }
  }

  pub fn as_key(self) -> &'static str {
    match self {
      | Self::Name => "name",
      | Self::Start => "start",
      | Self::Duration => "duration",
      | Self::Comment => "comment"
    }
  }
}

impl fmt::Display for EditableField {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_key())
  }
}

/// Requested changes; `None` leaves a
/// field alone.
#[derive(
  Debug, Clone, Default, PartialEq,
)]
pub struct TaskPatch {
  pub name:     Option<String>,
  pub start:    Option<DateTime<Utc>>,
  pub duration: Option<f64>,
  pub comment:  Option<String>
}

impl TaskPatch {
  /// Parses `field=value` or
  /// `field:value` tokens. Start values
  /// without an offset are read in `tz`.
  #[instrument(skip(args, tz))]
  pub fn parse_args(
    args: &[String],
    tz: &Tz
  ) -> anyhow::Result<Self> {
    let mut patch = Self::default();
    for arg in args {
      let Some((key, value)) = arg
        .split_once('=')
        .or_else(|| arg.split_once(':'))
      else {
        bail!(
          "edit: expected field=value, \
           got {arg:?}"
        );
      };

      let field =
        EditableField::from_key(key)
          .ok_or_else(|| {
            anyhow!(
              "edit: unknown field {key:?}"
            )
          })?;

      match field {
        | EditableField::Name => {
          patch.name =
            Some(value.to_string());
        }
        | EditableField::Start => {
          let start =
            parse_start_text(value, tz)
              .ok_or_else(|| {
                anyhow!(
                  "edit: unparsable start \
                   {value:?}"
                )
              })?;
          patch.start = Some(start);
        }
        | EditableField::Duration => {
          let hours = value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|h| h.is_finite())
            .ok_or_else(|| {
              anyhow!(
                "edit: duration must be a \
                 number of hours, got \
                 {value:?}"
              )
            })?;
          patch.duration = Some(hours);
        }
        | EditableField::Comment => {
          patch.comment =
            Some(value.to_string());
        }
      }
    }
    Ok(patch)
  }

  pub fn is_empty(&self) -> bool {
    self.name.is_none()
      && self.start.is_none()
      && self.duration.is_none()
      && self.comment.is_none()
  }

  fn touched(
    &self
  ) -> Vec<EditableField> {
    let mut fields = Vec::new();
    if self.name.is_some() {
      fields.push(EditableField::Name);
    }
    if self.start.is_some() {
      fields.push(EditableField::Start);
    }
    if self.duration.is_some() {
      fields
        .push(EditableField::Duration);
    }
    if self.comment.is_some() {
      fields
        .push(EditableField::Comment);
    }
    fields
  }
}

/// Partial update handed back to the
/// host for one record.
#[derive(
  Debug,
  Clone,
  PartialEq,
  Serialize,
  Deserialize,
)]
pub struct RecordUpdate {
  pub id:     i64,
  pub fields: BTreeMap<String, Value>
}

/// Builds the host update for task `id`.
///
/// Fails when the id is unknown or the
/// patch touches a field the host did not
/// declare editable. Returns `None` when
/// every patched value already matches.
#[instrument(skip(tasks, editable, patch))]
pub fn build_update(
  tasks: &[Task],
  id: i64,
  editable: &[EditableField],
  patch: &TaskPatch
) -> anyhow::Result<Option<RecordUpdate>>
{
  let task = tasks
    .iter()
    .find(|task| task.id == id)
    .ok_or_else(|| {
      anyhow!("no task with id {id}")
    })?;

  for field in patch.touched() {
    if !editable.contains(&field) {
      warn!(id, %field, "refusing edit of read-only field");
      bail!(
        "field {field} is not editable"
      );
    }
  }

  let mut fields = BTreeMap::new();

  if let Some(name) = &patch.name
    && sanitize_text(name, NAME_MAX_CHARS)
      != task.name
  {
    fields.insert(
      EditableField::Name
        .as_key()
        .to_string(),
      Value::String(bound_plain_text(
        name,
        NAME_MAX_CHARS
      ))
    );
  }

  if let Some(start) = patch.start
    && start != task.start
  {
    fields.insert(
      EditableField::Start
        .as_key()
        .to_string(),
      Value::String(start.to_rfc3339_opts(
        SecondsFormat::Secs,
        true
      ))
    );
  }

  if let Some(hours) = patch.duration {
    let hours = clamp_duration(hours);
    if hours != task.duration_hours {
      fields.insert(
        EditableField::Duration
          .as_key()
          .to_string(),
        Value::from(hours)
      );
    }
  }

  if let Some(comment) = &patch.comment
    && sanitize_text(
      comment,
      COMMENT_MAX_CHARS
    ) != task.comment
  {
    fields.insert(
      EditableField::Comment
        .as_key()
        .to_string(),
      Value::String(bound_plain_text(
        comment,
        COMMENT_MAX_CHARS
      ))
    );
  }

  if fields.is_empty() {
    debug!(id, "edit changes nothing");
    return Ok(None);
  }

  debug!(id, fields = fields.len(), "built record update");
  Ok(Some(RecordUpdate {
    id,
    fields
  }))
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use serde_json::json;

  use super::*;

  fn tasks() -> Vec<Task> {
    let start = Utc
      .with_ymd_and_hms(2025, 1, 6, 9, 0, 0)
      .single()
      .expect("valid instant");
    vec![Task::new(7, "Review", start, 2.0)]
  }

  fn all_fields() -> Vec<EditableField> {
    vec![
      EditableField::Name,
      EditableField::Start,
      EditableField::Duration,
      EditableField::Comment,
    ]
  }

  fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn parses_field_tokens() {
    let patch = TaskPatch::parse_args(
      &args(&[
        "name=Final review",
        "start:2025-01-07 10:30",
        "dur=4.5"
      ]),
      &chrono_tz::Europe::Paris
    )
    .expect("parse patch");

    assert_eq!(
      patch.name.as_deref(),
      Some("Final review")
    );
    assert_eq!(
      patch.start,
      Utc
        .with_ymd_and_hms(2025, 1, 7, 9, 30, 0)
        .single()
    );
    assert_eq!(patch.duration, Some(4.5));
    assert!(patch.comment.is_none());

    assert!(TaskPatch::parse_args(
      &args(&["color=#fff"]),
      &chrono_tz::UTC
    )
    .is_err());
    assert!(TaskPatch::parse_args(
      &args(&["duration=lots"]),
      &chrono_tz::UTC
    )
    .is_err());
    assert!(TaskPatch::parse_args(
      &args(&["plain"]),
      &chrono_tz::UTC
    )
    .is_err());
  }

  #[test]
  fn builds_plain_bounded_update() {
    let patch = TaskPatch {
      name: Some(format!(
        "<script>x()</script>  Tom & Jerry {}",
        "z".repeat(200)
      )),
      duration: Some(5000.0),
      ..TaskPatch::default()
    };

    let update =
      build_update(&tasks(), 7, &all_fields(), &patch)
        .expect("build update")
        .expect("something changed");

    assert_eq!(update.id, 7);
    let name = update.fields["name"]
      .as_str()
      .expect("name text");
    assert!(name.starts_with("Tom & Jerry"));
    assert_eq!(name.chars().count(), 100);
    assert_eq!(update.fields["duration"], json!(1000.0));
    assert!(!update.fields.contains_key("start"));
  }

  #[test]
  fn start_is_written_as_rfc3339() {
    let patch = TaskPatch {
      start: Utc
        .with_ymd_and_hms(2025, 1, 8, 12, 0, 0)
        .single(),
      ..TaskPatch::default()
    };
    let update =
      build_update(&tasks(), 7, &all_fields(), &patch)
        .expect("build update")
        .expect("something changed");
    assert_eq!(
      update.fields["start"],
      json!("2025-01-08T12:00:00Z")
    );
  }

  #[test]
  fn unchanged_values_yield_nothing() {
    let patch = TaskPatch {
      name: Some(" Review ".to_string()),
      duration: Some(2.0),
      ..TaskPatch::default()
    };
    assert_eq!(
      build_update(&tasks(), 7, &all_fields(), &patch)
        .expect("build update"),
      None
    );
  }

  #[test]
  fn rejects_unknown_ids_and_read_only_fields() {
    let patch = TaskPatch {
      comment: Some("note".to_string()),
      ..TaskPatch::default()
    };
    assert!(
      build_update(&tasks(), 99, &all_fields(), &patch).is_err()
    );
    assert!(build_update(
      &tasks(),
      7,
      &[EditableField::Name],
      &patch
    )
    .is_err());
  }
}
