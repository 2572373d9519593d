//! Core aggregation framework for chunked group-by statistics.
//!
//! This module provides the engine that turns a stream of row chunks into
//! per-group aggregate state. It defines:
//! - The group key and row types produced by a record source
//! - The partial aggregator, which folds exactly one chunk
//! - The aggregate merger, which owns the running state for a job
//! - Mode selection with a deterministic tie-break
//!
//! Final records are produced from the merged state by
//! `crate::records::materialize`.
//!
//! The mode is always chosen from the globally merged frequency table. A
//! per-chunk "most common" value cannot be merged correctly, so partial
//! aggregates carry full frequency tables across chunk boundaries.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

use crate::records::{materialize::materialize, FinalRecord};

/// Composite grouping key, e.g. a facility and a category identifier.
///
/// Keys compare by exact string equality and order by `first`, then
/// `second`. No normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub first: String,
    pub second: String,
}

impl GroupKey {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }
}

impl Display for GroupKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.first, self.second)
    }
}

/// A single decoded input row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub group: GroupKey,
    pub numeric_measure: f64,
    pub categorical_measure: String,
}

impl Row {
    pub fn new(group: GroupKey, numeric_measure: f64, categorical_measure: impl Into<String>) -> Self {
        Self {
            group,
            numeric_measure,
            categorical_measure: categorical_measure.into(),
        }
    }
}

/// Additive aggregate state for one group.
///
/// The same shape serves both as the per-chunk partial state and as the
/// running state held across chunks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    /// Sum of the numeric measure, accumulated in row order
    pub sum: f64,
    /// Number of rows observed
    pub count: u64,
    /// Occurrences of each categorical value, ordered by category
    pub frequencies: BTreeMap<String, u64>,
}

/// Aggregate state scoped to a single chunk.
pub type PartialAggregate = Aggregate;

/// Aggregate state accumulated over every chunk of a job.
pub type RunningAggregate = Aggregate;

/// Per-group partial state for one chunk.
pub type PartialAggregates = HashMap<GroupKey, PartialAggregate>;

impl Aggregate {
    /// Folds one row's measures into this state.
    pub fn observe(&mut self, numeric_measure: f64, categorical_measure: String) {
        self.sum += numeric_measure;
        self.count += 1;
        *self.frequencies.entry(categorical_measure).or_insert(0) += 1;
    }

    /// Adds another aggregate's sum, count and frequencies into this one.
    pub fn merge(&mut self, other: Aggregate) {
        self.sum += other.sum;
        self.count += other.count;
        for (category, occurrences) in other.frequencies {
            *self.frequencies.entry(category).or_insert(0) += occurrences;
        }
    }

    /// Arithmetic mean of the observed numeric measures.
    ///
    /// Returns `None` for an empty aggregate.
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }

    /// The most frequent category.
    ///
    /// Among categories sharing the highest count, the lexicographically
    /// smallest wins. Frequencies iterate in ascending key order, so the
    /// first category to reach the maximum is kept.
    pub fn dominant_category(&self) -> Option<&str> {
        let mut best: Option<(&str, u64)> = None;
        for (category, &occurrences) in &self.frequencies {
            if best.map_or(true, |(_, top)| occurrences > top) {
                best = Some((category.as_str(), occurrences));
            }
        }
        best.map(|(category, _)| category)
    }
}

/// Builds per-group partial aggregates for exactly one chunk of rows.
///
/// An empty chunk yields an empty mapping.
pub fn aggregate_chunk<I>(rows: I) -> PartialAggregates
where
    I: IntoIterator<Item = Row>,
{
    let mut partials = PartialAggregates::new();
    for row in rows {
        partials
            .entry(row.group)
            .or_default()
            .observe(row.numeric_measure, row.categorical_measure);
    }
    partials
}

/// Owner of the running aggregate state for one job.
///
/// Partial aggregates must be merged in source order so that the floating
/// point sums are reproducible for a fixed chunk partition.
#[derive(Debug, Default)]
pub struct AggregateMerger {
    groups: HashMap<GroupKey, RunningAggregate>,
    chunks_merged: usize,
    rows_merged: u64,
}

impl AggregateMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one chunk's partial aggregates into the running state.
    pub fn merge(&mut self, partials: PartialAggregates) {
        for (group, partial) in partials {
            self.rows_merged += partial.count;
            self.groups.entry(group).or_default().merge(partial);
        }
        self.chunks_merged += 1;
    }

    /// Number of chunks merged so far.
    pub fn chunks_merged(&self) -> usize {
        self.chunks_merged
    }

    /// Number of rows merged so far, across all groups.
    pub fn rows_merged(&self) -> u64 {
        self.rows_merged
    }

    /// Number of distinct groups seen so far.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn get(&self, group: &GroupKey) -> Option<&RunningAggregate> {
        self.groups.get(group)
    }

    /// Releases the running state without materializing it.
    pub fn into_groups(self) -> HashMap<GroupKey, RunningAggregate> {
        self.groups
    }

    /// Consumes the merger and materializes one final record per group,
    /// ordered by group key.
    pub fn finish(self) -> Vec<FinalRecord> {
        materialize(self.groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(first: &str, second: &str, category: &str, value: f64) -> Row {
        Row::new(GroupKey::new(first, second), value, category)
    }

    fn run_chunked(rows: &[Row], chunk_size: usize) -> Vec<FinalRecord> {
        let mut merger = AggregateMerger::new();
        for chunk in rows.chunks(chunk_size) {
            merger.merge(aggregate_chunk(chunk.to_vec()));
        }
        merger.finish()
    }

    #[test]
    fn test_empty_chunk_yields_no_partials() {
        let partials = aggregate_chunk(Vec::new());
        assert!(partials.is_empty());

        let mut merger = AggregateMerger::new();
        merger.merge(partials);
        assert_eq!(merger.group_count(), 0);
        assert!(merger.finish().is_empty());
    }

    #[test]
    fn test_partial_aggregate_single_chunk() {
        let partials = aggregate_chunk(vec![
            row("H1", "D1", "TxA", 10.0),
            row("H1", "D1", "TxA", 20.0),
            row("H1", "D2", "TxB", 5.0),
            row("H1", "D1", "TxB", 30.0),
        ]);

        assert_eq!(partials.len(), 2);
        let d1 = &partials[&GroupKey::new("H1", "D1")];
        assert_eq!(d1.count, 3);
        assert_eq!(d1.sum, 60.0);
        assert_eq!(d1.frequencies["TxA"], 2);
        assert_eq!(d1.frequencies["TxB"], 1);

        let d2 = &partials[&GroupKey::new("H1", "D2")];
        assert_eq!(d2.count, 1);
        assert_eq!(d2.sum, 5.0);
    }

    #[test]
    fn test_end_to_end_single_chunk() {
        let records = run_chunked(
            &[
                row("H1", "D1", "TxA", 10.0),
                row("H1", "D1", "TxA", 20.0),
                row("H1", "D1", "TxB", 30.0),
            ],
            10_000,
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].group, GroupKey::new("H1", "D1"));
        assert_eq!(records[0].average_value, 20.0);
        assert_eq!(records[0].dominant_category, "TxA");
    }

    #[test]
    fn test_mode_requires_cross_chunk_merge() {
        // Chunk one favours A, chunk two favours C, but B wins overall.
        let chunk_one = vec![
            row("H1", "D1", "A", 1.0),
            row("H1", "D1", "A", 1.0),
            row("H1", "D1", "A", 1.0),
            row("H1", "D1", "B", 1.0),
            row("H1", "D1", "B", 1.0),
        ];
        let chunk_two = vec![
            row("H1", "D1", "B", 1.0),
            row("H1", "D1", "B", 1.0),
            row("H1", "D1", "C", 1.0),
            row("H1", "D1", "C", 1.0),
            row("H1", "D1", "C", 1.0),
        ];

        let local_one = aggregate_chunk(chunk_one.clone());
        let local_two = aggregate_chunk(chunk_two.clone());
        let group = GroupKey::new("H1", "D1");
        assert_eq!(local_one[&group].dominant_category(), Some("A"));
        assert_eq!(local_two[&group].dominant_category(), Some("C"));

        let mut merger = AggregateMerger::new();
        merger.merge(local_one);
        merger.merge(local_two);
        let merged = merger.get(&group).unwrap();
        assert_eq!(merged.frequencies["A"], 3);
        assert_eq!(merged.frequencies["B"], 4);
        assert_eq!(merged.frequencies["C"], 3);

        let records = merger.finish();
        assert_eq!(records[0].dominant_category, "B");
    }

    #[test]
    fn test_tie_break_picks_lexicographically_smallest() {
        // Encounter order puts "zeta" first; the tie still resolves to "alpha".
        let rows = vec![
            row("H1", "D1", "zeta", 1.0),
            row("H1", "D1", "alpha", 1.0),
            row("H1", "D1", "zeta", 1.0),
            row("H1", "D1", "alpha", 1.0),
            row("H1", "D1", "mid", 1.0),
        ];

        for _ in 0..5 {
            for chunk_size in 1..=rows.len() {
                let records = run_chunked(&rows, chunk_size);
                assert_eq!(records[0].dominant_category, "alpha");
            }
        }
    }

    #[test]
    fn test_tie_break_is_byte_order() {
        let mut aggregate = Aggregate::default();
        aggregate.observe(1.0, "b".to_string());
        aggregate.observe(1.0, "B".to_string());
        assert_eq!(aggregate.dominant_category(), Some("B"));
    }

    #[test]
    fn test_merger_tracks_chunks_and_rows() {
        let mut merger = AggregateMerger::new();
        merger.merge(aggregate_chunk(vec![
            row("H1", "D1", "TxA", 1.0),
            row("H2", "D1", "TxA", 2.0),
        ]));
        merger.merge(aggregate_chunk(vec![row("H1", "D1", "TxB", 3.0)]));

        assert_eq!(merger.chunks_merged(), 2);
        assert_eq!(merger.rows_merged(), 3);
        assert_eq!(merger.group_count(), 2);
        assert_eq!(merger.get(&GroupKey::new("H1", "D1")).unwrap().count, 2);
    }

    #[test]
    fn test_keys_are_not_normalized() {
        let partials = aggregate_chunk(vec![
            row("H1", "D1", "TxA", 1.0),
            row("h1", "D1", "TxA", 1.0),
            row("H1 ", "D1", "TxA", 1.0),
        ]);
        assert_eq!(partials.len(), 3);
    }

    #[test]
    fn test_mean_of_empty_aggregate() {
        assert_eq!(Aggregate::default().mean(), None);
        assert_eq!(Aggregate::default().dominant_category(), None);
    }

    fn dataset() -> impl Strategy<Value = Vec<Row>> {
        prop::collection::vec(
            (0..3usize, 0..3usize, 0..4usize, -1_000.0f64..1_000.0),
            0..200,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .map(|(h, d, t, value)| {
                    row(&format!("H{}", h), &format!("D{}", d), &format!("Tx{}", t), value)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_results_are_chunk_invariant(rows in dataset(), chunk_size in 1..50usize) {
            let whole = run_chunked(&rows, rows.len().max(1));
            let chunked = run_chunked(&rows, chunk_size);

            prop_assert_eq!(whole.len(), chunked.len());
            for (a, b) in whole.iter().zip(chunked.iter()) {
                prop_assert_eq!(&a.group, &b.group);
                prop_assert_eq!(&a.dominant_category, &b.dominant_category);
                let tolerance = 1e-9 * a.average_value.abs().max(1.0);
                prop_assert!((a.average_value - b.average_value).abs() <= tolerance);
            }
        }

        #[test]
        fn prop_counts_and_means_are_conserved(rows in dataset(), chunk_size in 1..50usize) {
            let mut merger = AggregateMerger::new();
            for chunk in rows.chunks(chunk_size) {
                merger.merge(aggregate_chunk(chunk.to_vec()));
            }
            prop_assert_eq!(merger.rows_merged(), rows.len() as u64);

            let groups = merger.into_groups();
            for (group, aggregate) in &groups {
                let members: Vec<f64> = rows
                    .iter()
                    .filter(|r| &r.group == group)
                    .map(|r| r.numeric_measure)
                    .collect();
                prop_assert_eq!(aggregate.count, members.len() as u64);

                let expected = members.iter().sum::<f64>() / members.len() as f64;
                let mean = aggregate.mean().unwrap();
                prop_assert!((mean - expected).abs() <= 1e-9 * expected.abs().max(1.0));
            }
        }
    }
}
