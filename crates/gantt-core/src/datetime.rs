use std::fs;
use std::path::PathBuf;

use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;

const TIMEZONE_CONFIG_FILE: &str =
  "gantt-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "GANTT_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "GANTT_TIME_CONFIG";

pub const MS_PER_HOUR: i64 = 3_600_000;
pub const MS_PER_DAY: i64 =
  24 * MS_PER_HOUR;

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Resolves the zone used for all calendar
/// arithmetic. Order: `GANTT_TIMEZONE`, the
/// configured value, `gantt-time.toml`,
/// then UTC.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) = parse_timezone(
      raw,
      "timeline.timezone"
    )
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  tracing::debug!(
    "no timezone configured; using UTC"
  );
  chrono_tz::UTC
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured timeline timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Maps a wall-clock time in `tz` to an
/// instant. Ambiguous times take the
/// earliest candidate; times inside a DST
/// gap move forward hour by hour until they
/// exist.
#[must_use]
pub fn local_to_utc(
  tz: &Tz,
  local_naive: NaiveDateTime
) -> DateTime<Utc> {
  let mut candidate = local_naive;
  for _ in 0..4 {
    match tz
      .from_local_datetime(&candidate)
    {
      | LocalResult::Single(local_dt) => {
        return local_dt
          .with_timezone(&Utc);
      }
      | LocalResult::Ambiguous(
        first,
        second
      ) => {
        let chosen = if first <= second
        {
          first
        } else {
          second
        };
        return chosen
          .with_timezone(&Utc);
      }
      | LocalResult::None => {
        tracing::trace!(
          local = %candidate,
          "local time falls in a gap; advancing"
        );
        candidate +=
          Duration::hours(1);
      }
    }
  }

  DateTime::<Utc>::from_naive_utc_and_offset(
    local_naive,
    Utc
  )
}

#[must_use]
pub fn local_date(
  tz: &Tz,
  instant: DateTime<Utc>
) -> NaiveDate {
  instant.with_timezone(tz).date_naive()
}

/// Instant of `hour:00` on `date` in `tz`.
#[must_use]
pub fn at_hour(
  tz: &Tz,
  date: NaiveDate,
  hour: u32
) -> DateTime<Utc> {
  let naive = date
    .and_hms_opt(hour.min(23), 0, 0)
    .unwrap_or_else(|| {
      date.and_time(
        chrono::NaiveTime::MIN
      )
    });
  local_to_utc(tz, naive)
}

#[must_use]
pub fn start_of_day(
  tz: &Tz,
  date: NaiveDate
) -> DateTime<Utc> {
  at_hour(tz, date, 0)
}

#[must_use]
pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  Duration::try_days(days)
    .and_then(|delta| {
      date.checked_add_signed(delta)
    })
    .unwrap_or(date)
}

/// Monday of the ISO week containing
/// `day`.
#[must_use]
pub fn start_of_week(
  day: NaiveDate
) -> NaiveDate {
  let diff = day
    .weekday()
    .num_days_from_monday()
    as i64;
  add_days(day, -diff)
}

#[must_use]
pub fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

#[must_use]
pub fn first_day_of_quarter(
  day: NaiveDate
) -> NaiveDate {
  let quarter_month =
    (day.month0() / 3) * 3 + 1;
  first_day_of_month(
    day.year(),
    quarter_month
  )
}

/// Shifts the first day of a month by
/// `months`, staying on day 1.
#[must_use]
pub fn shift_months(
  date: NaiveDate,
  months: i64
) -> NaiveDate {
  let Some(total) = (date.year() as i64
    * 12
    + date.month0() as i64)
    .checked_add(months)
  else {
    return date;
  };
  let year = total.div_euclid(12);
  let month0 = total.rem_euclid(12);
  let Ok(year) = i32::try_from(year)
  else {
    return date;
  };
  NaiveDate::from_ymd_opt(
    year,
    month0 as u32 + 1,
    1
  )
  .unwrap_or(date)
}

/// ISO-8601 week number: the week holding
/// the year's first Thursday is week 1.
#[must_use]
pub fn iso_week_number(
  date: NaiveDate
) -> u32 {
  date.iso_week().week()
}

#[must_use]
pub fn is_monday(
  date: NaiveDate
) -> bool {
  date.weekday() == Weekday::Mon
}

/// Parses a host start value. Numbers are
/// Unix seconds; text is RFC3339 or a
/// zone-less date/datetime read in `tz`.
pub fn parse_start_value(
  value: &Value,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  match value {
    | Value::Number(number) => {
      let seconds = number.as_f64()?;
      if !seconds.is_finite() {
        return None;
      }
      let millis =
        (seconds * 1000.0).round();
      if millis.abs() > i64::MAX as f64
      {
        return None;
      }
      DateTime::<Utc>::from_timestamp_millis(
        millis as i64
      )
    }
    | Value::String(text) => {
      parse_start_text(text, tz)
    }
    | _ => None
  }
}

pub fn parse_start_text(
  input: &str,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  let token = input.trim();
  if token.is_empty() {
    return None;
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Some(dt.with_timezone(&Utc));
  }

  for fmt in [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M"
  ] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return Some(local_to_utc(
        tz, ndt
      ));
    }
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Some(start_of_day(tz, date));
  }

  None
}
