use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Datelike,
  Duration,
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};

use crate::datetime::{
  add_days,
  first_day_of_quarter,
  first_day_of_month,
  local_date,
  shift_months,
  start_of_day,
  start_of_week
};
use crate::task::Task;

pub const CUSTOM_PERIOD_DAYS: i64 = 28;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
  #[default]
  Week,
  Month,
  Quarter,
  Custom4Week
}

impl Scale {
  pub const ALL: [Scale; 4] = [
    Scale::Week,
    Scale::Month,
    Scale::Quarter,
    Scale::Custom4Week
  ];

  pub fn from_key(
    value: &str
  ) -> Option<Self> {
    match value
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "week" => Some(Self::Week),
      | "month" => Some(Self::Month),
      | "quarter" => Some(Self::Quarter),
      | "custom4week" | "p4s" => {
        Some(Self::Custom4Week)
      }
      | _ => None
    }
  }

  pub fn as_key(self) -> &'static str {
    match self {
      | Self::Week => "week",
      | Self::Month => "month",
      | Self::Quarter => "quarter",
      | Self::Custom4Week => {
        "custom4week"
      }
    }
  }

  /// Scales whose ruler carries day and
  /// day-slot rows.
  pub fn is_week_based(self) -> bool {
    matches!(
      self,
      Self::Week | Self::Custom4Week
    )
  }
}

impl fmt::Display for Scale {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_key())
  }
}

impl FromStr for Scale {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    Self::from_key(s).ok_or_else(|| {
      anyhow!(
        "unknown scale: {s} (expected \
         week, month, quarter or \
         custom4week)"
      )
    })
  }
}

/// Half-open visible range
/// `[min_date, max_date)`.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct Window {
  pub min_date: DateTime<Utc>,
  pub max_date: DateTime<Utc>,
  pub scale:    Scale,
  pub offset:   i64
}

impl Window {
  /// Builds a window, widening a
  /// non-positive span to 1ms.
  pub fn new(
    min_date: DateTime<Utc>,
    max_date: DateTime<Utc>,
    scale: Scale,
    offset: i64
  ) -> Self {
    let max_date = if max_date <= min_date
    {
      tracing::warn!(
        %min_date,
        %max_date,
        "degenerate window; clamping to 1ms"
      );
      min_date
        + Duration::milliseconds(1)
    } else {
      max_date
    };

    Self {
      min_date,
      max_date,
      scale,
      offset
    }
  }

  pub fn total_ms(&self) -> i64 {
    (self.max_date - self.min_date)
      .num_milliseconds()
      .max(1)
  }

  /// Last instant inside the window.
  pub fn last_instant(
    &self
  ) -> DateTime<Utc> {
    self.max_date
      - Duration::milliseconds(1)
  }

  pub fn intersects(
    &self,
    start: DateTime<Utc>,
    end: DateTime<Utc>
  ) -> bool {
    end > self.min_date
      && start < self.max_date
  }

  /// `(left%, width%)` of `[start, end)`
  /// against the window span.
  pub fn percent_geometry(
    &self,
    start: DateTime<Utc>,
    end: DateTime<Utc>
  ) -> (f64, f64) {
    let total = self.total_ms() as f64;
    let left = (start - self.min_date)
      .num_milliseconds()
      as f64
      / total
      * 100.0;
    let width = (end - start)
      .num_milliseconds()
      as f64
      / total
      * 100.0;
    (left, width)
  }

  /// Range shown by the ruler. Only the
  /// display is padded; bucket geometry
  /// stays relative to the window.
  pub fn display_bounds(
    &self,
    padding_days: u32
  ) -> (DateTime<Utc>, DateTime<Utc>) {
    let pad = Duration::days(i64::from(
      padding_days
    ));
    (
      self.min_date - pad,
      self.max_date + pad
    )
  }
}

/// Default reference instant: earliest
/// task start, else `now`.
pub fn reference_instant(
  tasks: &[Task],
  now: DateTime<Utc>
) -> DateTime<Utc> {
  tasks
    .iter()
    .map(|task| task.start)
    .min()
    .unwrap_or(now)
}

#[derive(Debug, Clone)]
pub struct WindowCalculator {
  timezone:     Tz,
  custom_epoch: NaiveDate
}

impl WindowCalculator {
  /// `custom_epoch` anchors the 28-day
  /// period; it is snapped back to its
  /// Monday.
  pub fn new(
    timezone: Tz,
    custom_epoch: NaiveDate
  ) -> Self {
    Self {
      timezone,
      custom_epoch: start_of_week(
        custom_epoch
      )
    }
  }

  pub fn custom_epoch(
    &self
  ) -> NaiveDate {
    self.custom_epoch
  }

  #[tracing::instrument(skip(self))]
  pub fn compute(
    &self,
    scale: Scale,
    offset: i64,
    reference: DateTime<Utc>
  ) -> Window {
    let tz = &self.timezone;
    let today =
      local_date(tz, reference);

    let (first_day, end_day) =
      match scale {
        | Scale::Week => {
          let baseline =
            start_of_week(today);
          let first = add_days(
            baseline,
            offset.saturating_mul(7)
          );
          (first, add_days(first, 7))
        }
        | Scale::Month => {
          let first = shift_months(
            first_day_of_month(
              today.year(),
              today.month()
            ),
            offset
          );
          (
            first,
            shift_months(first, 1)
          )
        }
        | Scale::Quarter => {
          let first = shift_months(
            first_day_of_quarter(today),
            offset.saturating_mul(3)
          );
          (
            first,
            shift_months(first, 3)
          )
        }
        | Scale::Custom4Week => {
          let first = add_days(
            self.custom_epoch,
            offset.saturating_mul(7)
          );
          (
            first,
            add_days(
              first,
              CUSTOM_PERIOD_DAYS
            )
          )
        }
      };

    let window = Window::new(
      start_of_day(tz, first_day),
      start_of_day(tz, end_day),
      scale,
      offset
    );
    tracing::debug!(
      %scale,
      offset,
      min = %window.min_date,
      max = %window.max_date,
      "computed window"
    );
    window
  }
}
