//! Greedy interval partitioning of each lane into collision-free sub-rows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::lanes::LaneIndex;
use crate::task::Task;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionedTask {
    #[serde(flatten)]
    pub task: Task,
    pub lane_index: usize,
    pub sub_row_index: usize,
}

/// Places every task in its lane. Output is ordered by lane index, then by
/// start instant (stable with respect to input order).
///
/// Within a lane a task goes to the lowest row whose last end is `<=` its
/// start, so touching intervals share a row and the row count equals the
/// lane's overlap depth.
#[tracing::instrument(skip_all, fields(tasks = tasks.len(), lanes = index.len()))]
pub fn schedule(tasks: &[Task], index: &LaneIndex) -> Vec<PositionedTask> {
    let mut by_lane: BTreeMap<usize, Vec<&Task>> = BTreeMap::new();
    for task in tasks {
        let (group_key1, group_key2) = task.lane_key();
        by_lane
            .entry(index.lookup(group_key1, group_key2))
            .or_default()
            .push(task);
    }

    let mut positioned = Vec::with_capacity(tasks.len());
    for (lane_index, mut members) in by_lane {
        members.sort_by_key(|task| task.start_ms());

        let mut row_ends: Vec<i64> = Vec::new();
        for task in members {
            let (start, end) = (task.start_ms(), task.end_ms());
            let sub_row_index = match row_ends.iter().position(|&last_end| last_end <= start) {
                Some(row) => {
                    row_ends[row] = end;
                    row
                }
                None => {
                    row_ends.push(end);
                    row_ends.len() - 1
                }
            };

            positioned.push(PositionedTask {
                task: task.clone(),
                lane_index,
                sub_row_index,
            });
        }

        trace!(lane_index, rows = row_ends.len(), "scheduled lane");
    }

    positioned
}

/// Rows used per lane (`max sub_row_index + 1`).
pub fn row_counts(positioned: &[PositionedTask]) -> BTreeMap<usize, usize> {
    let mut counts = BTreeMap::new();
    for item in positioned {
        let needed = item.sub_row_index + 1;
        let current = counts.entry(item.lane_index).or_insert(0);
        if needed > *current {
            *current = needed;
        }
    }
    counts
}
