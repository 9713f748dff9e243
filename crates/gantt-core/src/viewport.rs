//! Clipping of positioned tasks to the window and pixel geometry of lanes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::lanes::Lane;
use crate::schedule::PositionedTask;
use crate::window::Window;

/// Fixed pixel metrics of the lane area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaneMetrics {
    /// Height of a single-row lane.
    pub base_lane_height: f64,
    /// Height of one task bar.
    pub row_height: f64,
    pub sub_row_gap: f64,
    pub lane_outer_gap: f64,
    pub top_margin: f64,
}

impl Default for LaneMetrics {
    fn default() -> Self {
        Self {
            base_lane_height: 32.0,
            row_height: 24.0,
            sub_row_gap: 4.0,
            lane_outer_gap: 6.0,
            top_margin: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaneGeometry {
    pub index: usize,
    pub top_px: f64,
    pub height_px: f64,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibleTask {
    #[serde(flatten)]
    pub positioned: PositionedTask,
    pub visible_start: DateTime<Utc>,
    pub visible_end: DateTime<Utc>,
    pub left_percent: f64,
    pub width_percent: f64,
    pub top_px: f64,
    pub height_px: f64,
}

#[derive(Debug, Clone)]
pub struct ViewportProjector {
    metrics: LaneMetrics,
    label_heights: BTreeMap<usize, f64>,
}

impl ViewportProjector {
    pub fn new(metrics: LaneMetrics) -> Self {
        Self {
            metrics,
            label_heights: BTreeMap::new(),
        }
    }

    /// Heights the renderer measured for lane labels, keyed by lane index.
    pub fn with_label_heights(mut self, label_heights: BTreeMap<usize, f64>) -> Self {
        self.label_heights = label_heights;
        self
    }

    pub fn metrics(&self) -> &LaneMetrics {
        &self.metrics
    }

    /// Lane height: the larger of what its rows need and what its label needs.
    pub fn lane_height(&self, lane_index: usize, rows: usize) -> f64 {
        let m = &self.metrics;
        let rows = rows.max(1);
        let bars_height = if rows <= 1 {
            m.base_lane_height
        } else {
            rows as f64 * m.base_lane_height + (rows - 1) as f64 * m.sub_row_gap
        };
        let label_height = self
            .label_heights
            .get(&lane_index)
            .copied()
            .unwrap_or(m.base_lane_height);
        bars_height.max(label_height)
    }

    /// Stacks lanes top to bottom after the top margin, separated by the outer gap.
    pub fn lane_geometry(
        &self,
        lanes: &[Lane],
        row_counts: &BTreeMap<usize, usize>,
    ) -> Vec<LaneGeometry> {
        let mut top = self.metrics.top_margin;
        let mut out = Vec::with_capacity(lanes.len());
        for lane in lanes {
            let rows = row_counts.get(&lane.index).copied().unwrap_or(1).max(1);
            let height_px = self.lane_height(lane.index, rows);
            out.push(LaneGeometry {
                index: lane.index,
                top_px: top,
                height_px,
                rows,
            });
            top += height_px + self.metrics.lane_outer_gap;
        }
        out
    }

    /// Keeps tasks intersecting the window, clipped to it, with horizontal
    /// percentages and vertical pixel placement. Bars are centered when the
    /// lane is taller than its rows need.
    #[tracing::instrument(skip_all, fields(tasks = positioned.len()))]
    pub fn project(
        &self,
        positioned: &[PositionedTask],
        window: &Window,
        geometry: &[LaneGeometry],
    ) -> Vec<VisibleTask> {
        let by_lane: BTreeMap<usize, &LaneGeometry> =
            geometry.iter().map(|lane| (lane.index, lane)).collect();
        let m = &self.metrics;

        let visible: Vec<VisibleTask> = positioned
            .iter()
            .filter(|item| window.intersects(item.task.start, item.task.end()))
            .map(|item| {
                let visible_start = item.task.start.max(window.min_date);
                let visible_end = item.task.end().min(window.max_date);
                let (left_percent, width_percent) =
                    window.percent_geometry(visible_start, visible_end);

                let top_px = match by_lane.get(&item.lane_index) {
                    Some(lane) => {
                        let rows = lane.rows as f64;
                        let rows_block = rows * m.row_height + (rows - 1.0) * m.sub_row_gap;
                        let centering = (lane.height_px - rows_block) / 2.0;
                        lane.top_px
                            + centering
                            + item.sub_row_index as f64 * (m.row_height + m.sub_row_gap)
                    }
                    None => m.top_margin,
                };

                VisibleTask {
                    positioned: item.clone(),
                    visible_start,
                    visible_end,
                    left_percent,
                    width_percent,
                    top_px,
                    height_px: m.row_height,
                }
            })
            .collect();

        debug!(visible = visible.len(), "projected tasks onto window");
        visible
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::lanes::{LaneIndex, index_groups};
    use crate::schedule::{row_counts, schedule};
    use crate::task::Task;
    use crate::window::Scale;

    fn instant(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, d, h, 0, 0).single().expect("valid instant")
    }

    fn week() -> Window {
        Window::new(instant(6, 0), instant(13, 0), Scale::Week, 0)
    }

    fn layout(tasks: &[Task]) -> (Vec<Lane>, Vec<PositionedTask>) {
        let lanes = index_groups(tasks);
        let positioned = schedule(tasks, &LaneIndex::from_lanes(&lanes));
        (lanes, positioned)
    }

    #[test]
    fn clips_tasks_to_window() {
        let tasks = vec![
            Task::new(1, "before", instant(5, 20), 8.0).with_groups(Some("A"), None),
            Task::new(2, "inside", instant(7, 0), 24.0).with_groups(Some("A"), None),
            Task::new(3, "after", instant(12, 12), 48.0).with_groups(Some("A"), None),
            Task::new(4, "outside", instant(14, 0), 1.0).with_groups(Some("A"), None),
            Task::new(5, "ends at min", instant(5, 0), 24.0).with_groups(Some("A"), None),
        ];
        let (lanes, positioned) = layout(&tasks);
        let projector = ViewportProjector::new(LaneMetrics::default());
        let geometry = projector.lane_geometry(&lanes, &row_counts(&positioned));
        let window = week();
        let visible = projector.project(&positioned, &window, &geometry);

        let ids: Vec<i64> = visible.iter().map(|v| v.positioned.task.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        for item in &visible {
            assert!(window.min_date <= item.visible_start);
            assert!(item.visible_start <= item.visible_end);
            assert!(item.visible_end <= window.max_date);
        }

        assert_eq!(visible[0].visible_start, window.min_date);
        assert_eq!(visible[0].left_percent, 0.0);
        assert!((visible[0].width_percent - 100.0 * 4.0 / 168.0).abs() < 1e-9);
        assert!((visible[1].left_percent - 100.0 * 24.0 / 168.0).abs() < 1e-9);
        assert_eq!(visible[2].visible_end, window.max_date);
    }

    #[test]
    fn lane_heights_grow_with_rows_and_labels() {
        let projector = ViewportProjector::new(LaneMetrics::default())
            .with_label_heights(BTreeMap::from([(1, 50.0)]));

        assert_eq!(projector.lane_height(0, 1), 32.0);
        assert_eq!(projector.lane_height(0, 3), 3.0 * 32.0 + 2.0 * 4.0);
        assert_eq!(projector.lane_height(1, 1), 50.0);
        assert_eq!(projector.lane_height(1, 2), 68.0);
    }

    #[test]
    fn lanes_stack_and_bars_center() {
        let start = instant(7, 0);
        let tasks = vec![
            Task::new(1, "a", start, 4.0).with_groups(Some("A"), None),
            Task::new(2, "b", start + Duration::hours(1), 4.0).with_groups(Some("A"), None),
            Task::new(3, "c", start, 4.0).with_groups(Some("B"), None),
        ];
        let (lanes, positioned) = layout(&tasks);
        let projector = ViewportProjector::new(LaneMetrics::default());
        let geometry = projector.lane_geometry(&lanes, &row_counts(&positioned));

        assert_eq!(geometry[0].top_px, 10.0);
        assert_eq!(geometry[0].height_px, 68.0);
        assert_eq!(geometry[0].rows, 2);
        assert_eq!(geometry[1].top_px, 10.0 + 68.0 + 6.0);

        let visible = projector.project(&positioned, &week(), &geometry);
        let top_of = |id: i64| {
            visible
                .iter()
                .find(|v| v.positioned.task.id == id)
                .map(|v| v.top_px)
                .expect("visible task")
        };

        // Lane A: rows block 24 + 4 + 24 = 52 inside 68 -> 8px margin.
        assert_eq!(top_of(1), 18.0);
        assert_eq!(top_of(2), 18.0 + 28.0);
        // Lane B: one 24px bar centered in 32px.
        assert_eq!(top_of(3), 84.0 + 4.0);
    }
}
