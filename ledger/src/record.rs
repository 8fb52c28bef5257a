use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Digits of sub-second precision a snapshot keeps.
pub const TIMESTAMP_PRECISION: u16 = 6;

/// Wall clock at snapshot precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(TIMESTAMP_PRECISION)
}

/// Bookkeeping row for one work item. Stamps are truncated to microseconds so
/// a row compares equal to itself after a save and reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub occurrence_timestamp: DateTime<Utc>,
    pub work_item_key: String,
    pub eligible: bool,
    pub processed: bool,
    pub errored: bool,
    pub error_message: Option<String>,
}

/// Coarse view of a record's lifecycle position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Claimed or confirmed; the two are indistinguishable by design.
    Processed,
    Failed,
    /// Neither flag set. Only legacy rows end up here.
    Idle,
}

impl Record {
    /// Optimistic claim written on first admission.
    pub fn claimed(work_item_key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            occurrence_timestamp: now.trunc_subsecs(TIMESTAMP_PRECISION),
            work_item_key: work_item_key.into(),
            eligible: true,
            processed: true,
            errored: false,
            error_message: None,
        }
    }

    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.occurrence_timestamp = now.trunc_subsecs(TIMESTAMP_PRECISION);
        self.processed = true;
        self.errored = false;
        self.error_message = None;
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.occurrence_timestamp = now.trunc_subsecs(TIMESTAMP_PRECISION);
        self.processed = false;
        self.errored = true;
        self.error_message = Some(message.into());
    }

    pub fn state(&self) -> RecordState {
        match (self.processed, self.errored) {
            (true, _) => RecordState::Processed,
            (false, true) => RecordState::Failed,
            (false, false) => RecordState::Idle,
        }
    }

    /// `processed` and `errored` exclusive; a message only accompanies an error.
    pub fn is_consistent(&self) -> bool {
        !(self.processed && self.errored) && (self.errored == self.error_message.is_some())
    }
}

/// Full record set of one partition, unique by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    records: BTreeMap<String, Record>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, work_item_key: &str) -> Option<&Record> {
        self.records.get(work_item_key)
    }

    pub fn get_mut(&mut self, work_item_key: &str) -> Option<&mut Record> {
        self.records.get_mut(work_item_key)
    }

    pub fn contains(&self, work_item_key: &str) -> bool {
        self.records.contains_key(work_item_key)
    }

    /// Inserts or replaces the row with the same key; returns the old row.
    pub fn replace(&mut self, record: Record) -> Option<Record> {
        self.records.insert(record.work_item_key.clone(), record)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::collections::btree_map::Values<'a, String, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.values()
    }
}
