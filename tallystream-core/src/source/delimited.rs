use crate::aggregation::{GroupKey, Row};
use crate::source::{FieldMapping, RecordSource, SourceError};
use csv::{Reader, ReaderBuilder, StringRecord, Trim};
use std::io::Read;
use tracing::debug;

/// Decoding options for delimited text.
#[derive(Debug, Clone, Copy)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Trim surrounding whitespace from every field
    pub trim: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            trim: false,
        }
    }
}

/// Column positions of the mapped fields within a record.
#[derive(Debug, Clone, Copy)]
struct ColumnIndices {
    group_first: usize,
    group_second: usize,
    numeric: usize,
    categorical: usize,
}

impl ColumnIndices {
    fn resolve(headers: &StringRecord, fields: &FieldMapping) -> Result<Self, SourceError> {
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| SourceError::MissingField(name.to_string()))
        };

        Ok(Self {
            group_first: position(&fields.group_first)?,
            group_second: position(&fields.group_second)?,
            numeric: position(&fields.numeric)?,
            categorical: position(&fields.categorical)?,
        })
    }
}

/// Chunked record source over delimited text with a header row.
///
/// Rows are decoded lazily; at most one chunk is held in memory. A numeric
/// field that does not parse fails the read rather than skipping the row.
pub struct CsvRecordSource<R: Read> {
    reader: Reader<R>,
    fields: FieldMapping,
    columns: ColumnIndices,
    chunk_size: usize,
    record: StringRecord,
    rows_read: u64,
    exhausted: bool,
}

impl<R: Read> CsvRecordSource<R> {
    /// Reads the header row and resolves the mapped fields.
    pub fn new(
        reader: R,
        fields: FieldMapping,
        options: CsvOptions,
        chunk_size: usize,
    ) -> Result<Self, SourceError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(options.delimiter)
            .trim(if options.trim { Trim::All } else { Trim::None })
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let columns = ColumnIndices::resolve(&headers, &fields)?;

        Ok(Self {
            reader,
            fields,
            columns,
            chunk_size: chunk_size.max(1),
            record: StringRecord::new(),
            rows_read: 0,
            exhausted: false,
        })
    }

    /// Total rows decoded so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn line(&self) -> u64 {
        self.record.position().map(|p| p.line()).unwrap_or(0)
    }

    fn field(&self, index: usize, name: &str) -> Result<&str, SourceError> {
        self.record.get(index).ok_or_else(|| SourceError::MissingValue {
            line: self.line(),
            field: name.to_string(),
        })
    }

    fn decode_row(&self) -> Result<Row, SourceError> {
        let first = self.field(self.columns.group_first, &self.fields.group_first)?;
        let second = self.field(self.columns.group_second, &self.fields.group_second)?;
        let category = self.field(self.columns.categorical, &self.fields.categorical)?;
        let raw = self.field(self.columns.numeric, &self.fields.numeric)?;

        // NaN and infinities parse, but would poison the group's mean.
        let numeric = raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| SourceError::InvalidNumeric {
                line: self.line(),
                field: self.fields.numeric.clone(),
                value: raw.to_string(),
            })?;

        Ok(Row::new(GroupKey::new(first, second), numeric, category))
    }
}

impl<R: Read + Send> RecordSource for CsvRecordSource<R> {
    fn next_chunk(&mut self) -> Result<Option<Vec<Row>>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut chunk = Vec::with_capacity(self.chunk_size);
        while chunk.len() < self.chunk_size {
            if !self.reader.read_record(&mut self.record)? {
                self.exhausted = true;
                debug!(rows = self.rows_read, "Reached end of input");
                break;
            }
            chunk.push(self.decode_row()?);
            self.rows_read += 1;
        }

        if chunk.is_empty() {
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }
}
