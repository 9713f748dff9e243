use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::NaiveDate;
use tracing::{
  debug,
  info,
  trace,
  warn
};
use url::Url;

use crate::datetime::{
  is_monday,
  start_of_week
};
use crate::edit::EditableField;
use crate::viewport::LaneMetrics;
use crate::window::Scale;

pub const DEFAULT_EDITABLE_FIELDS: &str =
  "name,start,duration,comment";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("timeline.scale", "week"),
      ("timeline.offset", "0"),
      ("timeline.day_start_hour", "0"),
      (
        "timeline.custom4week.epoch",
        "2024-12-30"
      ),
      (
        "timeline.custom4week.padding_days",
        "0"
      ),
      ("layout.base_lane_height", "32"),
      ("layout.row_height", "24"),
      ("layout.sub_row_gap", "4"),
      ("layout.lane_outer_gap", "6"),
      ("layout.top_margin", "10"),
      (
        "edit.fields",
        DEFAULT_EDITABLE_FIELDS
      ),
      ("color", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    ganttrc_override
  ))]
  pub fn load(
    ganttrc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let ganttrc = resolve_ganttrc_path(
      ganttrc_override
    )?;
    if let Some(path) = ganttrc {
      info!(ganttrc = %path.display(), "loading ganttrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no ganttrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }

  fn get_number<T>(
    &self,
    key: &str,
    default: T
  ) -> T
  where
    T: std::str::FromStr + Copy
  {
    let Some(raw) = self.map.get(key)
    else {
      return default;
    };
    match raw.trim().parse::<T>() {
      | Ok(value) => value,
      | Err(_) => {
        warn!(key, value = %raw, "invalid number; using default");
        default
      }
    }
  }
}

/// Typed, clamped view of the
/// configuration consumed by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineSettings {
  pub scale: Scale,
  pub offset: i64,
  pub day_start_hour: u32,
  pub timezone: Option<String>,
  pub custom_epoch: NaiveDate,
  pub display_padding_days: u32,
  pub metrics: LaneMetrics,
  pub branding_url: Option<String>,
  pub editable_fields: Vec<EditableField>
}

impl Default for TimelineSettings {
  fn default() -> Self {
    Self::from_config(&Config::default())
  }
}

impl TimelineSettings {
  /// Never fails: unusable values fall
  /// back to defaults with a warning.
  #[tracing::instrument(skip(cfg))]
  pub fn from_config(
    cfg: &Config
  ) -> Self {
    let scale = match cfg
      .get("timeline.scale")
    {
      | Some(raw) => {
        Scale::from_key(&raw)
          .unwrap_or_else(|| {
            warn!(value = %raw, "unknown timeline.scale; using week");
            Scale::Week
          })
      }
      | None => Scale::Week
    };

    let raw_hour = cfg.get_number::<i64>(
      "timeline.day_start_hour",
      0
    );
    let day_start_hour =
      clamp_day_start_hour(raw_hour);
    if i64::from(day_start_hour)
      != raw_hour
    {
      warn!(
        value = raw_hour,
        clamped = day_start_hour,
        "day start hour out of range; clamped"
      );
    }

    let defaults = LaneMetrics::default();
    let metric = |key: &str,
                  default: f64| {
      let value =
        cfg.get_number::<f64>(key, default);
      if value.is_finite() && value >= 0.0
      {
        value
      } else {
        warn!(key, value, "invalid layout metric; using default");
        default
      }
    };
    let metrics = LaneMetrics {
      base_lane_height: metric(
        "layout.base_lane_height",
        defaults.base_lane_height
      ),
      row_height: metric(
        "layout.row_height",
        defaults.row_height
      ),
      sub_row_gap: metric(
        "layout.sub_row_gap",
        defaults.sub_row_gap
      ),
      lane_outer_gap: metric(
        "layout.lane_outer_gap",
        defaults.lane_outer_gap
      ),
      top_margin: metric(
        "layout.top_margin",
        defaults.top_margin
      )
    };

    let editable_fields = cfg
      .get("edit.fields")
      .unwrap_or_default()
      .split(',')
      .map(str::trim)
      .filter(|name| !name.is_empty())
      .filter_map(|name| {
        let field =
          EditableField::from_key(name);
        if field.is_none() {
          warn!(field = %name, "ignoring unknown editable field");
        }
        field
      })
      .collect();

    Self {
      scale,
      offset: cfg
        .get_number::<i64>(
          "timeline.offset",
          0
        ),
      day_start_hour,
      timezone: cfg
        .get("timeline.timezone")
        .filter(|tz| !tz.trim().is_empty()),
      custom_epoch: custom_epoch(cfg),
      display_padding_days: cfg
        .get_number::<u32>(
          "timeline.custom4week.padding_days",
          0
        ),
      metrics,
      branding_url: cfg
        .get("branding.url")
        .and_then(|raw| {
          sanitize_branding_url(&raw)
        }),
      editable_fields
    }
  }
}

pub fn clamp_day_start_hour(
  hour: i64
) -> u32 {
  hour.clamp(0, 23) as u32
}

fn custom_epoch(
  cfg: &Config
) -> NaiveDate {
  let fallback =
    NaiveDate::from_ymd_opt(2024, 12, 30)
      .unwrap_or(NaiveDate::MIN);
  let Some(raw) = cfg.get(
    "timeline.custom4week.epoch"
  ) else {
    return fallback;
  };

  match NaiveDate::parse_from_str(
    raw.trim(),
    "%Y-%m-%d"
  ) {
    | Ok(date) if is_monday(date) => {
      date
    }
    | Ok(date) => {
      let monday = start_of_week(date);
      warn!(%date, %monday, "custom period epoch is not a Monday; snapping back");
      monday
    }
    | Err(err) => {
      warn!(value = %raw, error = %err, "invalid custom period epoch; using default");
      fallback
    }
  }
}

/// Accepts http(s) and relative URLs;
/// anything with another scheme
/// (`javascript:`, `data:`, ...) is
/// rejected.
pub fn sanitize_branding_url(
  raw: &str
) -> Option<String> {
  let cleaned: String = raw
    .chars()
    .filter(|c| {
      !c.is_control() && !c.is_whitespace()
    })
    .collect();
  if cleaned.is_empty() {
    return None;
  }

  match Url::parse(&cleaned) {
    | Ok(url)
      if matches!(
        url.scheme(),
        "http" | "https"
      ) =>
    {
      Some(url.to_string())
    }
    | Ok(url) => {
      warn!(scheme = %url.scheme(), "rejected branding url with unsafe scheme");
      None
    }
    | Err(
      url::ParseError::RelativeUrlWithoutBase
    ) => {
      if cleaned.contains(':')
        && !cleaned.starts_with('/')
        && !cleaned.starts_with('.')
      {
        warn!(url = %cleaned, "rejected ambiguous relative branding url");
        None
      } else {
        Some(cleaned)
      }
    }
    | Err(err) => {
      warn!(error = %err, "rejected unparsable branding url");
      None
    }
  }
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_ganttrc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(ganttrc_env) =
    std::env::var("GANTTRC")
  {
    if ganttrc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      ganttrc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping ganttrc"
    );
    return Ok(None);
  };
  let candidate = home.join(".ganttrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

pub(crate) fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
