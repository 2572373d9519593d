//! Result materialization.
//!
//! Converts the merged per-group state into final records: the mean is
//! computed with a single floating point division and the dominant category
//! comes from the merged frequency table. Records are emitted in ascending
//! group key order so output is deterministic; no group is filtered out.

use crate::aggregation::{GroupKey, RunningAggregate};
use crate::records::FinalRecord;
use std::collections::HashMap;

impl FinalRecord {
    /// Builds the final record for one group.
    ///
    /// Groups only exist after their first row, so `count` is at least one
    /// and the frequency table is non-empty.
    pub fn from_aggregate(group: GroupKey, aggregate: &RunningAggregate) -> Self {
        Self {
            group,
            average_value: aggregate.mean().unwrap_or_default(),
            dominant_category: aggregate
                .dominant_category()
                .map(str::to_string)
                .unwrap_or_default(),
        }
    }
}

/// Materializes one final record per group, ordered by `(first, second)`.
pub fn materialize(groups: HashMap<GroupKey, RunningAggregate>) -> Vec<FinalRecord> {
    let mut records: Vec<FinalRecord> = groups
        .into_iter()
        .map(|(group, aggregate)| FinalRecord::from_aggregate(group, &aggregate))
        .collect();
    records.sort_by(|a, b| a.group.cmp(&b.group));
    records
}
