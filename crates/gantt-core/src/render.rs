use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::buckets::BucketRow;
use crate::config::{Config, TimelineSettings};
use crate::layout::Layout;
use crate::viewport::VisibleTask;
use crate::window::Window;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    timezone: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config, timezone: Tz) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color, timezone })
    }

    #[tracing::instrument(skip(self, layout))]
    pub fn print_lanes(&self, layout: &Layout) -> anyhow::Result<()> {
        self.write_lanes(io::stdout().lock(), layout)
    }

    #[tracing::instrument(skip(self, layout))]
    pub fn print_tasks(&self, layout: &Layout) -> anyhow::Result<()> {
        self.write_tasks(io::stdout().lock(), layout)
    }

    pub fn print_window(
        &self,
        window: &Window,
        display_range: (DateTime<Utc>, DateTime<Utc>),
    ) -> anyhow::Result<()> {
        self.write_window(io::stdout().lock(), window, display_range)
    }

    pub fn print_ruler(&self, rows: &[BucketRow]) -> anyhow::Result<()> {
        self.write_ruler(io::stdout().lock(), rows)
    }

    pub fn print_json<T: serde::Serialize>(&self, value: &T) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        serde_json::to_writer_pretty(&mut out, value)?;
        writeln!(out)?;
        Ok(())
    }

    pub fn write_lanes<W: Write>(&self, out: W, layout: &Layout) -> anyhow::Result<()> {
        let headers = ["#", "Lane", "Rows", "Tasks", "Top", "Height"];
        let mut task_counts: BTreeMap<usize, usize> = BTreeMap::new();
        for item in &layout.positioned {
            *task_counts.entry(item.lane_index).or_default() += 1;
        }

        let rows = layout
            .lanes
            .iter()
            .zip(&layout.lane_geometry)
            .map(|(lane, geometry)| {
                let label = if lane.is_group_header {
                    self.paint(&lane.label, "1")
                } else {
                    format!("  {}", lane.label)
                };
                vec![
                    self.paint(&lane.index.to_string(), "33"),
                    label,
                    geometry.rows.to_string(),
                    task_counts.get(&lane.index).copied().unwrap_or(0).to_string(),
                    format!("{:.0}", geometry.top_px),
                    format!("{:.0}", geometry.height_px),
                ]
            })
            .collect();

        write_table(out, &headers, rows)
    }

    pub fn write_tasks<W: Write>(&self, out: W, layout: &Layout) -> anyhow::Result<()> {
        let headers = [
            "ID", "Lane", "Row", "Start", "End", "Hours", "Left%", "Width%", "Name",
        ];
        let visible: BTreeMap<i64, &VisibleTask> = layout
            .visible
            .iter()
            .map(|item| (item.positioned.task.id, item))
            .collect();

        let rows = layout
            .positioned
            .iter()
            .map(|item| {
                let task = &item.task;
                let (left, width) = match visible.get(&task.id) {
                    Some(shown) => (
                        format!("{:.2}", shown.left_percent),
                        format!("{:.2}", shown.width_percent),
                    ),
                    None => (self.paint("-", "90"), self.paint("-", "90")),
                };
                let name = if task.is_locked == Some(true) {
                    format!("{} [locked]", task.name)
                } else {
                    task.name.clone()
                };
                vec![
                    self.paint(&task.id.to_string(), "33"),
                    item.lane_index.to_string(),
                    item.sub_row_index.to_string(),
                    self.format_instant(task.start),
                    self.format_instant(task.end()),
                    format!("{}", task.duration_hours),
                    left,
                    width,
                    name,
                ]
            })
            .collect();

        write_table(out, &headers, rows)
    }

    pub fn write_window<W: Write>(
        &self,
        mut out: W,
        window: &Window,
        display_range: (DateTime<Utc>, DateTime<Utc>),
    ) -> anyhow::Result<()> {
        writeln!(out, "scale     {}", window.scale)?;
        writeln!(out, "offset    {}", window.offset)?;
        writeln!(out, "timezone  {}", self.timezone)?;
        writeln!(out, "from      {}", self.format_precise(window.min_date))?;
        writeln!(out, "to        {}", self.format_precise(window.last_instant()))?;
        if display_range != (window.min_date, window.max_date) {
            writeln!(
                out,
                "shown     {} .. {}",
                self.format_instant(display_range.0),
                self.format_instant(display_range.1)
            )?;
        }
        Ok(())
    }

    pub fn write_ruler<W: Write>(&self, mut out: W, rows: &[BucketRow]) -> anyhow::Result<()> {
        let headers = ["Unit", "Label", "Left%", "Width%"];
        let table = rows
            .iter()
            .flat_map(|row| {
                row.buckets.iter().map(move |bucket| {
                    vec![
                        format!("{:?}", row.unit).to_ascii_lowercase(),
                        self.paint(&bucket.label, "36"),
                        format!("{:.2}", bucket.left_percent),
                        format!("{:.2}", bucket.width_percent),
                    ]
                })
            })
            .collect();
        write_table(&mut out, &headers, table)
    }

    pub fn print_config(&self, cfg: &Config, settings: &TimelineSettings) -> anyhow::Result<()> {
        self.write_config(io::stdout().lock(), cfg, settings)
    }

    /// Raw entries, except `branding.url` which shows the sanitized value.
    pub fn write_config<W: Write>(
        &self,
        out: W,
        cfg: &Config,
        settings: &TimelineSettings,
    ) -> anyhow::Result<()> {
        let mut entries: Vec<_> = cfg.iter().collect();
        entries.sort();
        let rows = entries
            .into_iter()
            .map(|(key, value)| {
                let shown = if key == "branding.url" {
                    settings
                        .branding_url
                        .clone()
                        .unwrap_or_else(|| "(rejected)".to_string())
                } else {
                    value.clone()
                };
                vec![self.paint(key, "33"), shown]
            })
            .collect();
        write_table(out, &["Key", "Value"], rows)
    }

    fn format_instant(&self, instant: DateTime<Utc>) -> String {
        instant.with_timezone(&self.timezone).format(TIME_FORMAT).to_string()
    }

    fn format_precise(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.timezone)
            .format("%Y-%m-%dT%H:%M:%S%.3f")
            .to_string()
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: &[&str],
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| UnicodeWidthStr::width(*h)).collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let last = column_count.saturating_sub(1);
    for (idx, header) in headers.iter().enumerate() {
        if idx == last {
            write!(writer, "{header}")?;
        } else {
            write!(writer, "{:width$} ", header, width = widths[idx])?;
        }
    }
    writeln!(writer)?;

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(writer, "{}", rule.join(" "))?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            if idx == last {
                write!(writer, "{cell}")?;
                continue;
            }
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
