//! The full pipeline: records -> tasks -> lanes -> rows, and
//! scale/offset/reference -> window -> ruler, joined by the viewport.
//!
//! Every stage is a pure function of its inputs. [`LayoutCache`] only skips
//! recomputation when the inputs of a stage have not changed.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::buckets::{BucketGenerator, BucketRow};
use crate::config::TimelineSettings;
use crate::lanes::{Lane, LaneIndex, index_groups};
use crate::normalize::TaskNormalizer;
use crate::schedule::{PositionedTask, row_counts, schedule};
use crate::task::{RawRecord, Task};
use crate::viewport::{LaneGeometry, ViewportProjector, VisibleTask};
use crate::window::{Scale, Window, WindowCalculator, reference_instant};

/// Scale and offset currently selected by the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ViewState {
    pub scale: Scale,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrangement {
    pub lanes: Vec<Lane>,
    pub positioned: Vec<PositionedTask>,
    pub row_counts: BTreeMap<usize, usize>,
}

impl Arrangement {
    pub fn compute(tasks: &[Task]) -> Self {
        let lanes = index_groups(tasks);
        let positioned = schedule(tasks, &LaneIndex::from_lanes(&lanes));
        let row_counts = row_counts(&positioned);
        Self {
            lanes,
            positioned,
            row_counts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub window: Window,
    pub rulers: Vec<BucketRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub tasks: Vec<Task>,
    pub dropped: Vec<(usize, String)>,
    pub reference: DateTime<Utc>,
    pub lanes: Vec<Lane>,
    pub positioned: Vec<PositionedTask>,
    pub row_counts: BTreeMap<usize, usize>,
    pub window: Window,
    pub display_range: (DateTime<Utc>, DateTime<Utc>),
    pub rulers: Vec<BucketRow>,
    pub lane_geometry: Vec<LaneGeometry>,
    pub visible: Vec<VisibleTask>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimelineKey {
    view: ViewState,
    reference: DateTime<Utc>,
}

/// Last result of each memoized stage, keyed by its inputs.
#[derive(Debug, Clone, Default)]
pub struct LayoutCache {
    arrangement: Option<(u64, Arrangement)>,
    timeline: Option<(TimelineKey, Timeline)>,
    hits: u64,
    misses: u64,
}

impl LayoutCache {
    pub fn arrangement(&mut self, tasks: &[Task]) -> &Arrangement {
        let key = fingerprint(tasks);
        if self.arrangement.as_ref().is_some_and(|(cached, _)| *cached == key) {
            self.hits += 1;
            trace!(key, "arrangement cache hit");
        } else {
            self.misses += 1;
            self.arrangement = None;
        }
        &self
            .arrangement
            .get_or_insert_with(|| (key, Arrangement::compute(tasks)))
            .1
    }

    fn timeline(
        &mut self,
        key: TimelineKey,
        compute: impl FnOnce() -> Timeline,
    ) -> &Timeline {
        if self.timeline.as_ref().is_some_and(|(cached, _)| *cached == key) {
            self.hits += 1;
            trace!(?key, "timeline cache hit");
        } else {
            self.misses += 1;
            self.timeline = None;
        }
        &self.timeline.get_or_insert_with(|| (key, compute())).1
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

/// Stable fingerprint of a task list; floats hash by bit pattern.
pub fn fingerprint(tasks: &[Task]) -> u64 {
    let mut hasher = DefaultHasher::new();
    tasks.len().hash(&mut hasher);
    for task in tasks {
        task.id.hash(&mut hasher);
        task.name.hash(&mut hasher);
        task.start.hash(&mut hasher);
        task.duration_hours.to_bits().hash(&mut hasher);
        task.group_key1.hash(&mut hasher);
        task.group_key2.hash(&mut hasher);
        task.color.hash(&mut hasher);
        task.is_locked.hash(&mut hasher);
        task.is_global.hash(&mut hasher);
        task.comment.hash(&mut hasher);
    }
    hasher.finish()
}

#[derive(Debug, Clone)]
pub struct LayoutEngine {
    settings: TimelineSettings,
    normalizer: TaskNormalizer,
    windows: WindowCalculator,
    buckets: BucketGenerator,
    projector: ViewportProjector,
    cache: LayoutCache,
}

impl LayoutEngine {
    pub fn new(settings: TimelineSettings, timezone: Tz) -> Self {
        Self {
            normalizer: TaskNormalizer::new(timezone),
            windows: WindowCalculator::new(timezone, settings.custom_epoch),
            buckets: BucketGenerator::new(timezone, settings.day_start_hour),
            projector: ViewportProjector::new(settings.metrics),
            settings,
            cache: LayoutCache::default(),
        }
    }

    pub fn with_label_heights(mut self, label_heights: BTreeMap<usize, f64>) -> Self {
        self.projector = self.projector.with_label_heights(label_heights);
        self
    }

    pub fn settings(&self) -> &TimelineSettings {
        &self.settings
    }

    pub fn cache(&self) -> &LayoutCache {
        &self.cache
    }

    /// View selected by configuration.
    pub fn default_view(&self) -> ViewState {
        ViewState {
            scale: self.settings.scale,
            offset: self.settings.offset,
        }
    }

    pub fn timeline(&mut self, view: ViewState, reference: DateTime<Utc>) -> Timeline {
        let windows = &self.windows;
        let buckets = &self.buckets;
        self.cache
            .timeline(TimelineKey { view, reference }, || {
                let window = windows.compute(view.scale, view.offset, reference);
                let rulers = buckets.rows(&window);
                Timeline { window, rulers }
            })
            .clone()
    }

    /// Recomputes the whole layout for a fresh record batch. `now` is only
    /// used as the reference instant when no task survives normalization.
    #[tracing::instrument(skip(self, records, now), fields(records = records.len()))]
    pub fn layout(&mut self, records: &[RawRecord], view: ViewState, now: DateTime<Utc>) -> Layout {
        let batch = self.normalizer.normalize_batch(records);
        let dropped = batch
            .dropped
            .iter()
            .map(|(position, reason)| (*position, reason.to_string()))
            .collect();
        self.layout_tasks(batch.tasks, dropped, view, now)
    }

    pub fn layout_tasks(
        &mut self,
        tasks: Vec<Task>,
        dropped: Vec<(usize, String)>,
        view: ViewState,
        now: DateTime<Utc>,
    ) -> Layout {
        let reference = reference_instant(&tasks, now);
        let arrangement = self.cache.arrangement(&tasks).clone();
        let Timeline { window, rulers } = self.timeline(view, reference);

        let lane_geometry = self
            .projector
            .lane_geometry(&arrangement.lanes, &arrangement.row_counts);
        let visible = self
            .projector
            .project(&arrangement.positioned, &window, &lane_geometry);
        let display_range = if view.scale == Scale::Custom4Week {
            window.display_bounds(self.settings.display_padding_days)
        } else {
            (window.min_date, window.max_date)
        };

        info!(
            tasks = tasks.len(),
            dropped = dropped.len(),
            lanes = arrangement.lanes.len(),
            visible = visible.len(),
            scale = %view.scale,
            offset = view.offset,
            "computed layout"
        );
        debug!(hits = self.cache.hits(), misses = self.cache.misses(), "layout cache");

        Layout {
            tasks,
            dropped,
            reference,
            lanes: arrangement.lanes,
            positioned: arrangement.positioned,
            row_counts: arrangement.row_counts,
            window,
            display_range,
            rulers,
            lane_geometry,
            visible,
        }
    }
}
