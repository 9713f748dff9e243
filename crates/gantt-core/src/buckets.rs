//! Ruler rows for the timeline header.
//!
//! Buckets are clipped to the window, so a row that covers the whole
//! window sums to 100%. Labels keep the unclipped calendar unit.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::datetime::{
    add_days, at_hour, first_day_of_month, iso_week_number, local_date, shift_months,
    start_of_day, start_of_week,
};
use crate::window::{Scale, Window};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaySlot {
    Morning,
    Afternoon,
    Night,
}

impl DaySlot {
    pub const ALL: [DaySlot; 3] = [DaySlot::Morning, DaySlot::Afternoon, DaySlot::Night];

    pub fn label(self) -> &'static str {
        match self {
            DaySlot::Morning => "Morning",
            DaySlot::Afternoon => "Afternoon",
            DaySlot::Night => "Night",
        }
    }

    /// `(start_hour, end_hour)`; night ends at 08:00 the next day.
    pub fn hours(self) -> (u32, u32) {
        match self {
            DaySlot::Morning => (8, 14),
            DaySlot::Afternoon => (14, 20),
            DaySlot::Night => (20, 8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketUnit {
    Month,
    Week,
    Day,
    Slot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub left_percent: f64,
    pub width_percent: f64,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<DaySlot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRow {
    pub unit: BucketUnit,
    pub buckets: Vec<Bucket>,
}

impl BucketRow {
    pub fn total_width(&self) -> f64 {
        self.buckets.iter().map(|bucket| bucket.width_percent).sum()
    }
}

#[derive(Debug, Clone)]
pub struct BucketGenerator {
    timezone: Tz,
    day_start_hour: u32,
}

impl BucketGenerator {
    /// `day_start_hour` is clamped to 0..=23.
    pub fn new(timezone: Tz, day_start_hour: u32) -> Self {
        Self {
            timezone,
            day_start_hour: day_start_hour.min(23),
        }
    }

    /// Rows from coarsest to finest for the window's scale.
    #[tracing::instrument(skip(self), fields(scale = %window.scale))]
    pub fn rows(&self, window: &Window) -> Vec<BucketRow> {
        let rows = match window.scale {
            Scale::Week | Scale::Custom4Week => vec![
                self.week_row(window),
                self.shifted_day_row(window),
                self.slot_row(window),
            ],
            Scale::Month => vec![
                self.month_row(window, "%b %y"),
                self.week_row(window),
                self.plain_day_row(window),
            ],
            Scale::Quarter => vec![self.month_row(window, "%b"), self.week_row(window)],
        };

        debug!(
            rows = rows.len(),
            buckets = rows.iter().map(|row| row.buckets.len()).sum::<usize>(),
            "generated ruler rows"
        );
        rows
    }

    fn first_day(&self, window: &Window) -> NaiveDate {
        local_date(&self.timezone, window.min_date)
    }

    fn last_day(&self, window: &Window) -> NaiveDate {
        local_date(&self.timezone, window.last_instant())
    }

    fn week_row(&self, window: &Window) -> BucketRow {
        let mut buckets = Vec::new();
        let mut monday = start_of_week(self.first_day(window));

        loop {
            let start = start_of_day(&self.timezone, monday);
            if start >= window.max_date {
                break;
            }
            let next = add_days(monday, 7);
            if next == monday {
                break;
            }
            let end = start_of_day(&self.timezone, next);
            let label = format!("W{}", iso_week_number(monday));
            buckets.extend(clip(window, start, end, label, Some(start), None));
            monday = next;
        }

        BucketRow {
            unit: BucketUnit::Week,
            buckets,
        }
    }

    /// Day buckets starting at `day_start_hour`. The day before the window is
    /// included so its tail covers the window's first hours.
    fn shifted_day_row(&self, window: &Window) -> BucketRow {
        let hour = self.day_start_hour;
        let buckets = self
            .days(add_days(self.first_day(window), -1), self.last_day(window))
            .into_iter()
            .filter_map(|day| {
                let start = at_hour(&self.timezone, day, hour);
                let end = at_hour(&self.timezone, add_days(day, 1), hour);
                let label = day.format("%a %d").to_string();
                clip(window, start, end, label, Some(start), None)
            })
            .collect();

        BucketRow {
            unit: BucketUnit::Day,
            buckets,
        }
    }

    fn plain_day_row(&self, window: &Window) -> BucketRow {
        let buckets = self
            .days(self.first_day(window), self.last_day(window))
            .into_iter()
            .filter_map(|day| {
                let start = start_of_day(&self.timezone, day);
                let end = start_of_day(&self.timezone, add_days(day, 1));
                let label = day.format("%d").to_string();
                clip(window, start, end, label, Some(start), None)
            })
            .collect();

        BucketRow {
            unit: BucketUnit::Day,
            buckets,
        }
    }

    /// Morning, afternoon and night per day. The previous night is included so
    /// the window's first hours are covered.
    fn slot_row(&self, window: &Window) -> BucketRow {
        let mut buckets = Vec::new();
        for day in self.days(add_days(self.first_day(window), -1), self.last_day(window)) {
            for slot in DaySlot::ALL {
                let (start_hour, end_hour) = slot.hours();
                let start = at_hour(&self.timezone, day, start_hour);
                let end_day = if end_hour <= start_hour {
                    add_days(day, 1)
                } else {
                    day
                };
                let end = at_hour(&self.timezone, end_day, end_hour);
                buckets.extend(clip(
                    window,
                    start,
                    end,
                    slot.label().to_string(),
                    Some(start),
                    Some(slot),
                ));
            }
        }

        BucketRow {
            unit: BucketUnit::Slot,
            buckets,
        }
    }

    fn month_row(&self, window: &Window, label_format: &str) -> BucketRow {
        let first = self.first_day(window);
        let mut month = first_day_of_month(first.year(), first.month());
        let mut buckets = Vec::new();

        loop {
            let start = start_of_day(&self.timezone, month);
            if start >= window.max_date {
                break;
            }
            let next = shift_months(month, 1);
            if next == month {
                break;
            }
            let end = start_of_day(&self.timezone, next);
            let label = month.format(label_format).to_string();
            buckets.extend(clip(window, start, end, label, Some(start), None));
            month = next;
        }

        BucketRow {
            unit: BucketUnit::Month,
            buckets,
        }
    }

    fn days(&self, first: NaiveDate, last: NaiveDate) -> Vec<NaiveDate> {
        let mut out = Vec::new();
        let mut day = first;
        while day <= last {
            out.push(day);
            let next = add_days(day, 1);
            if next == day {
                break;
            }
            day = next;
        }
        out
    }
}

fn clip(
    window: &Window,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    label: String,
    date: Option<DateTime<Utc>>,
    slot: Option<DaySlot>,
) -> Option<Bucket> {
    let clipped_start = start.max(window.min_date);
    let clipped_end = end.min(window.max_date);
    if clipped_end <= clipped_start {
        return None;
    }

    let (left_percent, width_percent) = window.percent_geometry(clipped_start, clipped_end);
    Some(Bucket {
        left_percent,
        width_percent,
        label,
        date,
        slot,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;
    use crate::window::WindowCalculator;

    fn instant(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single().expect("valid instant")
    }

    fn window(scale: Scale, reference: DateTime<Utc>) -> Window {
        let epoch = NaiveDate::from_ymd_opt(2024, 12, 30).expect("epoch");
        WindowCalculator::new(chrono_tz::UTC, epoch).compute(scale, 0, reference)
    }

    fn labels(row: &BucketRow) -> Vec<&str> {
        row.buckets.iter().map(|bucket| bucket.label.as_str()).collect()
    }

    fn assert_full(row: &BucketRow) {
        let total = row.total_width();
        assert!((total - 100.0).abs() < 1e-9, "{:?} row sums to {total}", row.unit);
    }

    #[test]
    fn week_scale_has_week_day_and_slot_rows() {
        let win = window(Scale::Week, instant(2024, 12, 30, 0));
        let rows = BucketGenerator::new(chrono_tz::UTC, 0).rows(&win);

        assert_eq!(rows.len(), 3);
        assert_eq!(labels(&rows[0]), vec!["W1"]);
        assert_eq!(rows[1].buckets.len(), 7);
        assert_eq!(rows[1].buckets[0].label, "Mon 30");
        assert_eq!(rows[1].buckets[6].label, "Sun 05");
        assert_eq!(rows[2].unit, BucketUnit::Slot);
        for row in &rows {
            assert_full(row);
        }
    }

    #[test]
    fn day_start_hour_shifts_day_boundaries() {
        let win = window(Scale::Week, instant(2025, 1, 8, 0));
        let rows = BucketGenerator::new(chrono_tz::UTC, 6).rows(&win);
        let days = &rows[1];

        // Sunday's tail, seven shifted days, the last one clipped.
        assert_eq!(days.buckets.len(), 8);
        assert_eq!(days.buckets[0].label, "Sun 05");
        assert!((days.buckets[0].width_percent - 100.0 * 6.0 / 168.0).abs() < 1e-9);
        assert!((days.buckets[1].left_percent - 100.0 * 6.0 / 168.0).abs() < 1e-9);
        assert_eq!(days.buckets[1].date, Some(instant(2025, 1, 6, 6)));
        assert_full(days);
    }

    #[test]
    fn day_start_hour_is_clamped() {
        let win = window(Scale::Week, instant(2025, 1, 8, 0));
        let rows = BucketGenerator::new(chrono_tz::UTC, 99).rows(&win);
        assert_eq!(rows[1].buckets[1].date, Some(instant(2025, 1, 6, 23)));
    }

    #[test]
    fn slots_cover_morning_afternoon_and_night() {
        let win = window(Scale::Week, instant(2025, 1, 8, 0));
        let rows = BucketGenerator::new(chrono_tz::UTC, 0).rows(&win);
        let slots = &rows[2];

        // Previous night's tail, then three slots for each of the seven days,
        // the last night clipped at the window end.
        assert_eq!(slots.buckets.len(), 1 + 7 * 3);
        assert_eq!(slots.buckets[0].slot, Some(DaySlot::Night));
        assert_eq!(slots.buckets[1].slot, Some(DaySlot::Morning));
        assert_eq!(slots.buckets[1].date, Some(instant(2025, 1, 6, 8)));
        assert!((slots.buckets[1].width_percent - 100.0 * 6.0 / 168.0).abs() < 1e-9);
        assert_eq!(slots.buckets[3].label, "Night");
        assert_full(slots);
    }

    #[test]
    fn month_scale_rows() {
        let win = window(Scale::Month, instant(2025, 1, 15, 0));
        let rows = BucketGenerator::new(chrono_tz::UTC, 0).rows(&win);

        assert_eq!(labels(&rows[0]), vec!["Jan 25"]);
        assert_eq!(labels(&rows[1]), vec!["W1", "W2", "W3", "W4", "W5"]);
        assert_eq!(rows[2].buckets.len(), 31);
        assert_eq!(rows[2].buckets[0].label, "01");
        for row in &rows {
            assert_full(row);
        }
    }

    #[test]
    fn quarter_scale_rows() {
        let win = window(Scale::Quarter, instant(2025, 5, 20, 0));
        let rows = BucketGenerator::new(chrono_tz::UTC, 0).rows(&win);

        assert_eq!(rows.len(), 2);
        assert_eq!(labels(&rows[0]), vec!["Apr", "May", "Jun"]);
        assert_eq!(rows[1].buckets.first().map(|b| b.label.as_str()), Some("W14"));
        assert_eq!(rows[1].buckets.last().map(|b| b.label.as_str()), Some("W27"));
        for row in &rows {
            assert_full(row);
        }
    }

    #[test]
    fn custom_period_spans_four_iso_weeks() {
        let win = window(Scale::Custom4Week, instant(2025, 6, 1, 0));
        let rows = BucketGenerator::new(chrono_tz::UTC, 0).rows(&win);

        assert_eq!(labels(&rows[0]), vec!["W1", "W2", "W3", "W4"]);
        assert_eq!(rows[1].buckets.len(), 28);
        for row in &rows {
            assert_full(row);
        }
    }

    #[test]
    fn local_days_survive_dst_changes() {
        let tz = chrono_tz::Europe::Paris;
        let epoch = NaiveDate::from_ymd_opt(2024, 12, 30).expect("epoch");
        let win = WindowCalculator::new(tz, epoch).compute(
            Scale::Week,
            0,
            instant(2025, 3, 26, 12),
        );
        let rows = BucketGenerator::new(tz, 0).rows(&win);
        let days = &rows[1];

        assert_eq!(days.buckets.len(), 7);
        let sunday = &days.buckets[6];
        assert!((sunday.width_percent - 100.0 * 23.0 / 167.0).abs() < 1e-9);
        assert_full(days);
        assert_full(&rows[2]);
    }
}
