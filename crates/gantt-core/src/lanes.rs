//! Lane discovery. Groups and sub-groups appear in the order they are first
//! seen in the task list, never sorted.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::task::Task;

pub const UNGROUPED_LABEL: &str = "—";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lane {
    pub index: usize,
    pub group_key1: String,
    pub group_key2: String,
    pub label: String,
    pub is_group_header: bool,
}

/// Lookup from `(group_key1, group_key2)` to lane index.
#[derive(Debug, Clone, Default)]
pub struct LaneIndex {
    by_key: BTreeMap<(String, String), usize>,
}

impl LaneIndex {
    pub fn from_lanes(lanes: &[Lane]) -> Self {
        let by_key = lanes
            .iter()
            .map(|lane| ((lane.group_key1.clone(), lane.group_key2.clone()), lane.index))
            .collect();
        Self { by_key }
    }

    /// Falls back to the group's header lane, then to lane 0.
    pub fn lookup(&self, group_key1: &str, group_key2: &str) -> usize {
        self.get(group_key1, group_key2)
            .or_else(|| self.get(group_key1, ""))
            .unwrap_or(0)
    }

    fn get(&self, group_key1: &str, group_key2: &str) -> Option<usize> {
        self.by_key
            .get(&(group_key1.to_string(), group_key2.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Emits one header lane per distinct `group_key1` followed by one lane per
/// distinct non-empty `group_key2` of that group, indices dense from 0.
#[tracing::instrument(skip_all, fields(tasks = tasks.len()))]
pub fn index_groups(tasks: &[Task]) -> Vec<Lane> {
    let mut group_order: Vec<&str> = Vec::new();
    let mut members: BTreeMap<&str, Vec<&Task>> = BTreeMap::new();

    for task in tasks {
        let (group_key1, _) = task.lane_key();
        let entry = members.entry(group_key1).or_default();
        if entry.is_empty() {
            group_order.push(group_key1);
        }
        entry.push(task);
    }

    let mut lanes = Vec::new();
    let mut next_index = 0_usize;

    for group_key1 in group_order {
        lanes.push(Lane {
            index: next_index,
            group_key1: group_key1.to_string(),
            group_key2: String::new(),
            label: if group_key1.is_empty() {
                UNGROUPED_LABEL.to_string()
            } else {
                group_key1.to_string()
            },
            is_group_header: true,
        });
        next_index += 1;

        let mut seen_sub = BTreeSet::new();
        for task in members.get(group_key1).into_iter().flatten() {
            let (_, group_key2) = task.lane_key();
            if group_key2.is_empty() || !seen_sub.insert(group_key2) {
                continue;
            }
            lanes.push(Lane {
                index: next_index,
                group_key1: group_key1.to_string(),
                group_key2: group_key2.to_string(),
                label: group_key2.to_string(),
                is_group_header: false,
            });
            next_index += 1;
        }
    }

    debug!(lanes = lanes.len(), "indexed groups");
    lanes
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn task(id: i64, g1: Option<&str>, g2: Option<&str>) -> Task {
        let start = Utc.with_ymd_and_hms(2025, 1, 6, 8, 0, 0).single().expect("instant");
        Task::new(id, format!("task {id}"), start, 1.0).with_groups(g1, g2)
    }

    #[test]
    fn sub_groups_follow_their_header_in_record_order() {
        let lanes = index_groups(&[
            task(1, Some("Team A"), Some("X")),
            task(2, Some("Team A"), Some("Y")),
        ]);

        let keys: Vec<(&str, &str, bool)> = lanes
            .iter()
            .map(|lane| (lane.group_key1.as_str(), lane.group_key2.as_str(), lane.is_group_header))
            .collect();
        assert_eq!(
            keys,
            vec![("Team A", "", true), ("Team A", "X", false), ("Team A", "Y", false)]
        );
    }

    #[test]
    fn discovery_order_wins_over_lexical_order() {
        let lanes = index_groups(&[
            task(1, Some("Zeta"), None),
            task(2, Some("Alpha"), Some("b")),
            task(3, Some("Zeta"), Some("a")),
            task(4, Some("Alpha"), Some("a")),
            task(5, Some("Alpha"), Some("b")),
        ]);

        let labels: Vec<&str> = lanes.iter().map(|lane| lane.label.as_str()).collect();
        assert_eq!(labels, vec!["Zeta", "a", "Alpha", "b", "a"]);

        let indices: Vec<usize> = lanes.iter().map(|lane| lane.index).collect();
        assert_eq!(indices, (0..lanes.len()).collect::<Vec<_>>());
    }

    #[test]
    fn ungrouped_tasks_share_a_placeholder_header() {
        let lanes = index_groups(&[task(1, None, None), task(2, None, Some("sub"))]);
        assert_eq!(lanes.len(), 2);
        assert_eq!(lanes[0].label, UNGROUPED_LABEL);
        assert_eq!(lanes[0].group_key1, "");
        assert_eq!(lanes[1].label, "sub");
    }

    #[test]
    fn lookup_falls_back_to_header_lane() {
        let lanes = index_groups(&[task(1, Some("A"), None), task(2, Some("B"), Some("x"))]);
        let index = LaneIndex::from_lanes(&lanes);

        assert_eq!(index.lookup("B", "x"), 2);
        assert_eq!(index.lookup("B", "unknown"), 1);
        assert_eq!(index.lookup("missing", ""), 0);
        assert!(index_groups(&[]).is_empty());
    }
}
