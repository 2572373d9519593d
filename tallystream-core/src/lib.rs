/*!
# Tallystream Core: Chunked Group-By Aggregation

Tallystream computes grouped statistics over delimited datasets that are too
large to hold comfortably in memory. Rows are read in fixed-size chunks; each
chunk is folded into a partial aggregate, merged into running per-group
state, and finally materialized into one record per group carrying the mean
of a numeric measure and the mode of a categorical measure.

## Key Features

### Streaming Ingestion
- Lazy CSV decoding from a local directory or S3 (`s3` feature)
- Header-driven field mapping, configurable chunk size
- Fatal errors for unparsable measures rather than silently skewed averages

### Exact Merged Aggregation
- Running sums and counts merged in source order for reproducible results
- Frequency tables merged globally before the mode is chosen
- Deterministic tie-break: the lexicographically smallest category wins
- Memory bounded by the number of distinct groups, not rows

### Key-Value Persistence
- Results addressed by request id and `#diagnosis#..#hospital#..` sort key
- DuckDB and in-memory backends, Arrow record batches for read-back

## Usage

```rust,no_run
use tallystream_core::aggregation::{aggregate_chunk, AggregateMerger, GroupKey, Row};

let chunks = vec![
    vec![
        Row::new(GroupKey::new("H1", "D1"), 10.0, "TxA"),
        Row::new(GroupKey::new("H1", "D1"), 20.0, "TxA"),
    ],
    vec![Row::new(GroupKey::new("H1", "D1"), 30.0, "TxB")],
];

let mut merger = AggregateMerger::new();
for chunk in chunks {
    merger.merge(aggregate_chunk(chunk));
}

let records = merger.finish();
assert_eq!(records[0].average_value, 20.0);
assert_eq!(records[0].dominant_category, "TxA");
```

For configuration and backend details, see:
- [`config`](crate::config) module for configuration options
- [`source`](crate::source) module for record sources
- [`storage`](crate::storage) module for storage backend details
*/

pub mod aggregation;
pub mod config;
pub mod records;
pub mod source;
pub mod storage;

pub use aggregation::{aggregate_chunk, AggregateMerger, GroupKey, Row};
pub use records::{FinalRecord, SinkItem};
pub use source::{RecordSource, SourceError};
pub use storage::{StorageBackend, StorageError};
