use chrono::{DateTime, Datelike, Utc};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Calendar-year slice of the ledger, stored as its own snapshot blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Partition {
    year: i32,
}

impl Partition {
    pub fn new(year: i32) -> Self {
        Self { year }
    }

    pub fn current() -> Self {
        Self::for_timestamp(Utc::now())
    }

    pub fn for_timestamp(ts: DateTime<Utc>) -> Self {
        Self { year: ts.year() }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// Blob key of this partition's snapshot, e.g. `2024/ingest_filename_record.parquet`.
    pub fn object_key(&self, object_name: &str) -> String {
        format!("{}/{}", self.year, object_name)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.year)
    }
}

impl FromStr for Partition {
    type Err = ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.trim().parse::<i32>().map(Partition::new)
    }
}
