pub mod materialize;

use crate::aggregation::GroupKey;
use arrow_array::{ArrayRef, Float64Array, RecordBatch, StringArray};
use arrow_schema::{ArrowError, DataType, Field, Schema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Final statistics for one group, produced once at the end of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalRecord {
    pub group: GroupKey,
    /// Mean of the numeric measure over every row of the group
    pub average_value: f64,
    /// Most frequent categorical value, ties broken lexicographically
    pub dominant_category: String,
}

/// A final record addressed for the destination key-value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkItem {
    /// Job or request identifier, constant across one job
    pub partition_key: String,
    /// `#diagnosis#{second}#hospital#{first}`
    pub sort_key: String,
    pub group: GroupKey,
    pub average_value: f64,
    pub dominant_category: String,
}

impl SinkItem {
    /// Addresses a final record under the given partition key.
    pub fn from_record(partition_key: &str, record: FinalRecord) -> Self {
        Self {
            partition_key: partition_key.to_string(),
            sort_key: sort_key(&record.group),
            group: record.group,
            average_value: record.average_value,
            dominant_category: record.dominant_category,
        }
    }
}

/// Builds the store sort key for a group.
pub fn sort_key(group: &GroupKey) -> String {
    format!("#diagnosis#{}#hospital#{}", group.second, group.first)
}

/// Gets the schema for stored sink items in Arrow format.
pub fn get_sink_item_schema() -> Schema {
    Schema::new(vec![
        Field::new("pk", DataType::Utf8, false),
        Field::new("sk", DataType::Utf8, false),
        Field::new("group_first", DataType::Utf8, false),
        Field::new("group_second", DataType::Utf8, false),
        Field::new("average_value", DataType::Float64, false),
        Field::new("dominant_category", DataType::Utf8, false),
    ])
}

/// Creates a RecordBatch from a slice of SinkItems.
pub fn create_record_batch(items: &[SinkItem]) -> Result<RecordBatch, ArrowError> {
    let schema = get_sink_item_schema();

    let pks = StringArray::from_iter_values(items.iter().map(|i| i.partition_key.as_str()));
    let sks = StringArray::from_iter_values(items.iter().map(|i| i.sort_key.as_str()));
    let firsts = StringArray::from_iter_values(items.iter().map(|i| i.group.first.as_str()));
    let seconds = StringArray::from_iter_values(items.iter().map(|i| i.group.second.as_str()));
    let averages = Float64Array::from_iter_values(items.iter().map(|i| i.average_value));
    let categories =
        StringArray::from_iter_values(items.iter().map(|i| i.dominant_category.as_str()));

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(pks),
        Arc::new(sks),
        Arc::new(firsts),
        Arc::new(seconds),
        Arc::new(averages),
        Arc::new(categories),
    ];

    RecordBatch::try_new(Arc::new(schema), arrays)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, ArrowError> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| ArrowError::SchemaError(format!("Invalid {} column", name)))
}

/// Decodes a RecordBatch back into SinkItems.
pub fn decode_record_batch(batch: &RecordBatch) -> Result<Vec<SinkItem>, ArrowError> {
    let pks = string_column(batch, "pk")?;
    let sks = string_column(batch, "sk")?;
    let firsts = string_column(batch, "group_first")?;
    let seconds = string_column(batch, "group_second")?;
    let categories = string_column(batch, "dominant_category")?;
    let averages = batch
        .column_by_name("average_value")
        .and_then(|col| col.as_any().downcast_ref::<Float64Array>())
        .ok_or_else(|| ArrowError::SchemaError("Invalid average_value column".to_string()))?;

    let mut items = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        items.push(SinkItem {
            partition_key: pks.value(i).to_string(),
            sort_key: sks.value(i).to_string(),
            group: GroupKey::new(firsts.value(i), seconds.value(i)),
            average_value: averages.value(i),
            dominant_category: categories.value(i).to_string(),
        });
    }

    Ok(items)
}
