// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Parquet snapshot encoding for a [`RecordSet`].
//!
//! Columns are located by name when reading, so snapshots written by older
//! pipeline stages (which used `filename`, `includes_case_manager_email` and
//! `error`, and stored timestamps as text) still decode.

use arrow::array::{Array, ArrayRef, BooleanArray, StringArray, TimestampMicrosecondArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;
use thiserror::Error;

use crate::record::{Record, RecordSet, TIMESTAMP_PRECISION};

pub const COL_OCCURRENCE_TIMESTAMP: &str = "occurrence_timestamp";
pub const COL_WORK_ITEM_KEY: &str = "work_item_key";
pub const COL_ELIGIBLE: &str = "eligible";
pub const COL_PROCESSED: &str = "processed";
pub const COL_ERRORED: &str = "errored";
pub const COL_ERROR_MESSAGE: &str = "error_message";

const LEGACY_ALIASES: &[(&str, &str)] = &[
    (COL_WORK_ITEM_KEY, "filename"),
    (COL_ELIGIBLE, "includes_case_manager_email"),
    (COL_ERRORED, "error"),
];

const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
    #[error("snapshot is missing column {name}")]
    MissingColumn { name: &'static str },
    #[error("column {name} has unsupported type {found}")]
    ColumnType {
        name: &'static str,
        found: DataType,
    },
    #[error("column {name} has a null at row {row}")]
    NullValue { name: &'static str, row: usize },
    #[error("unreadable timestamp {value:?} at row {row}")]
    Timestamp { value: String, row: usize },
}

pub fn snapshot_schema() -> Schema {
    Schema::new(vec![
        Field::new(
            COL_OCCURRENCE_TIMESTAMP,
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new(COL_WORK_ITEM_KEY, DataType::Utf8, false),
        Field::new(COL_ELIGIBLE, DataType::Boolean, false),
        Field::new(COL_PROCESSED, DataType::Boolean, false),
        Field::new(COL_ERRORED, DataType::Boolean, false),
        Field::new(COL_ERROR_MESSAGE, DataType::Utf8, true),
    ])
}

pub fn encode(records: &RecordSet) -> Result<Bytes, CodecError> {
    let schema: SchemaRef = Arc::new(snapshot_schema());
    let mut timestamps = Vec::with_capacity(records.len());
    let mut keys = Vec::with_capacity(records.len());
    let mut eligible = Vec::with_capacity(records.len());
    let mut processed = Vec::with_capacity(records.len());
    let mut errored = Vec::with_capacity(records.len());
    let mut messages = Vec::with_capacity(records.len());
    for record in records {
        timestamps.push(record.occurrence_timestamp.timestamp_micros());
        keys.push(record.work_item_key.as_str());
        eligible.push(record.eligible);
        processed.push(record.processed);
        errored.push(record.errored);
        messages.push(record.error_message.as_deref());
    }
    let columns: Vec<ArrayRef> = vec![
        Arc::new(TimestampMicrosecondArray::from(timestamps).with_timezone("UTC")),
        Arc::new(StringArray::from(keys)),
        Arc::new(BooleanArray::from(eligible)),
        Arc::new(BooleanArray::from(processed)),
        Arc::new(BooleanArray::from(errored)),
        Arc::new(StringArray::from(messages)),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(Vec::new(), schema, Some(props))?;
    if batch.num_rows() > 0 {
        writer.write(&batch)?;
    }
    Ok(Bytes::from(writer.into_inner()?))
}

pub fn decode(bytes: Bytes) -> Result<RecordSet, CodecError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
    let mut records = RecordSet::new();
    for batch in reader {
        let batch = batch?;
        for record in decode_batch(&batch)? {
            merge(&mut records, record);
        }
    }
    Ok(records)
}

/// Older writers appended rows without deduplicating; the newest one wins.
fn merge(records: &mut RecordSet, record: Record) {
    if let Some(existing) = records.get(&record.work_item_key) {
        log::warn!(
            "snapshot holds duplicate rows for {}; keeping the newer one",
            record.work_item_key
        );
        if existing.occurrence_timestamp > record.occurrence_timestamp {
            return;
        }
    }
    records.replace(record);
}

fn decode_batch(batch: &RecordBatch) -> Result<Vec<Record>, CodecError> {
    let timestamps = timestamp_column(batch)?;
    let keys = string_column(batch, COL_WORK_ITEM_KEY)?;
    let eligible = bool_column(batch, COL_ELIGIBLE)?;
    let processed = bool_column(batch, COL_PROCESSED)?;
    let errored = bool_column(batch, COL_ERRORED)?;
    let messages = optional_string_column(batch, COL_ERROR_MESSAGE)?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        rows.push(Record {
            occurrence_timestamp: timestamps[row],
            work_item_key: required_str(&keys, COL_WORK_ITEM_KEY, row)?.to_string(),
            eligible: required_bool(&eligible, COL_ELIGIBLE, row)?,
            processed: required_bool(&processed, COL_PROCESSED, row)?,
            errored: required_bool(&errored, COL_ERRORED, row)?,
            error_message: messages
                .as_ref()
                .filter(|array| array.is_valid(row))
                .map(|array| array.value(row).to_string()),
        });
    }
    Ok(rows)
}

fn column<'a>(batch: &'a RecordBatch, name: &'static str) -> Result<&'a ArrayRef, CodecError> {
    if let Some(array) = batch.column_by_name(name) {
        return Ok(array);
    }
    LEGACY_ALIASES
        .iter()
        .filter(|(current, _)| *current == name)
        .find_map(|(_, legacy)| batch.column_by_name(legacy))
        .ok_or(CodecError::MissingColumn { name })
}

fn string_column(batch: &RecordBatch, name: &'static str) -> Result<StringArray, CodecError> {
    let array = column(batch, name)?;
    match array.data_type() {
        DataType::Utf8 | DataType::LargeUtf8 => {
            downcast::<StringArray>(&cast(array, &DataType::Utf8)?, name)
        }
        other => Err(CodecError::ColumnType {
            name,
            found: other.clone(),
        }),
    }
}

/// `None` when the column is absent or typed `Null` (all values missing).
fn optional_string_column(
    batch: &RecordBatch,
    name: &'static str,
) -> Result<Option<StringArray>, CodecError> {
    match column(batch, name) {
        Ok(array) if array.data_type() == &DataType::Null => Ok(None),
        Ok(_) => string_column(batch, name).map(Some),
        Err(CodecError::MissingColumn { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

fn bool_column(batch: &RecordBatch, name: &'static str) -> Result<BooleanArray, CodecError> {
    let array = column(batch, name)?;
    match array.data_type() {
        DataType::Boolean => downcast::<BooleanArray>(array, name),
        other => Err(CodecError::ColumnType {
            name,
            found: other.clone(),
        }),
    }
}

fn timestamp_column(batch: &RecordBatch) -> Result<Vec<DateTime<Utc>>, CodecError> {
    let name = COL_OCCURRENCE_TIMESTAMP;
    let array = column(batch, name)?;
    match array.data_type() {
        DataType::Timestamp(_, tz) => {
            let micros = cast(array, &DataType::Timestamp(TimeUnit::Microsecond, tz.clone()))?;
            let micros = downcast::<TimestampMicrosecondArray>(&micros, name)?;
            (0..micros.len())
                .map(|row| {
                    if micros.is_null(row) {
                        return Err(CodecError::NullValue { name, row });
                    }
                    let value = micros.value(row);
                    DateTime::from_timestamp_micros(value).ok_or(CodecError::Timestamp {
                        value: value.to_string(),
                        row,
                    })
                })
                .collect()
        }
        DataType::Utf8 | DataType::LargeUtf8 => {
            let text = string_column(batch, name)?;
            (0..text.len())
                .map(|row| parse_legacy_timestamp(required_str(&text, name, row)?, row))
                .collect()
        }
        other => Err(CodecError::ColumnType {
            name,
            found: other.clone(),
        }),
    }
}

fn parse_legacy_timestamp(value: &str, row: usize) -> Result<DateTime<Utc>, CodecError> {
    let parsed = match NaiveDateTime::parse_from_str(value, LEGACY_TIMESTAMP_FORMAT) {
        Ok(naive) => naive.and_utc(),
        Err(_) => DateTime::parse_from_rfc3339(value)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|_| CodecError::Timestamp {
                value: value.to_string(),
                row,
            })?,
    };
    Ok(parsed.trunc_subsecs(TIMESTAMP_PRECISION))
}

fn downcast<T: Array + Clone + 'static>(
    array: &ArrayRef,
    name: &'static str,
) -> Result<T, CodecError> {
    array
        .as_any()
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| CodecError::ColumnType {
            name,
            found: array.data_type().clone(),
        })
}

fn required_str<'a>(
    array: &'a StringArray,
    name: &'static str,
    row: usize,
) -> Result<&'a str, CodecError> {
    if array.is_null(row) {
        return Err(CodecError::NullValue { name, row });
    }
    Ok(array.value(row))
}

fn required_bool(array: &BooleanArray, name: &'static str, row: usize) -> Result<bool, CodecError> {
    if array.is_null(row) {
        return Err(CodecError::NullValue { name, row });
    }
    Ok(array.value(row))
}
