use chrono::DateTime;
use itertools::Itertools;
use serde_json::{Map, Value};

pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const TIME_COLUMN: &str = "time";

/// One input line, terminator excluded.
pub type RawRecord = Vec<u8>;

/// A decoded JSON object, keyed by field name.
pub type GenericRecord = Map<String, Value>;

/// Decodes a raw line and derives a `time` column from an RFC 3339
/// `timestamp` field. A `timestamp` that isn't RFC 3339 is left alone.
pub fn transform(raw: &[u8]) -> serde_json::Result<GenericRecord> {
    let mut record: GenericRecord = serde_json::from_slice(raw)?;

    let millis = record
        .get(TIMESTAMP_FIELD)
        .and_then(Value::as_str)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.timestamp_millis());

    if let Some(millis) = millis {
        record.insert(TIME_COLUMN.to_owned(), Value::from(millis));
    }

    Ok(record)
}

/// One row: column names and a parallel list of values.
/// `time` leads when present, the rest of the columns are in lexical order.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Point {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl From<GenericRecord> for Point {
    fn from(mut record: GenericRecord) -> Self {
        let mut columns = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());

        if let Some(time) = record.remove(TIME_COLUMN) {
            columns.push(TIME_COLUMN.to_owned());
            values.push(time);
        }

        for (column, value) in record.into_iter().sorted_by(|(a, _), (b, _)| a.cmp(b)) {
            columns.push(column);
            values.push(value);
        }

        Self { columns, values }
    }
}

/// A single point bound for a named series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesWrite {
    pub series: String,
    pub point: Point,
}

impl SeriesWrite {
    pub fn new(series: impl Into<String>, record: GenericRecord) -> Self {
        Self {
            series: series.into(),
            point: Point::from(record),
        }
    }
}
