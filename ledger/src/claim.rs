//! Admission decision taken before a stage starts work on a key.

use chrono::{DateTime, Utc};

use crate::{
    error::{LedgerError, Result},
    record::{Record, RecordSet},
};

/// Why a claim was admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// First time this key is seen in the partition.
    Fresh,
    /// A previously failed key is being retried; `prior` is the failed row.
    Resumed { prior: Record },
}

impl Admission {
    pub fn prior(&self) -> Option<&Record> {
        match self {
            Admission::Fresh => None,
            Admission::Resumed { prior } => Some(prior),
        }
    }
}

/// Applies the claim table to `records`.
///
/// | eligible | present | processed | result |
/// |---|---|---|---|
/// | false | any | any | `Ineligible`, untouched |
/// | true | no | - | new row, `processed=true` |
/// | true | yes | true | `DuplicateProcessing`, untouched |
/// | true | yes | false | row flipped to `processed=true, errored=false` |
///
/// A stored row flagged ineligible is treated like an ineligible request.
pub fn admit(
    records: &mut RecordSet,
    work_item_key: &str,
    eligible: bool,
    now: DateTime<Utc>,
) -> Result<Admission> {
    if !eligible {
        return Err(LedgerError::Ineligible {
            key: work_item_key.to_string(),
        });
    }
    match records.get_mut(work_item_key) {
        None => {
            records.replace(Record::claimed(work_item_key, now));
            Ok(Admission::Fresh)
        }
        Some(existing) if existing.processed => Err(LedgerError::DuplicateProcessing {
            key: work_item_key.to_string(),
        }),
        Some(existing) if !existing.eligible => Err(LedgerError::Ineligible {
            key: work_item_key.to_string(),
        }),
        Some(existing) => {
            let prior = existing.clone();
            existing.mark_processed(now);
            Ok(Admission::Resumed { prior })
        }
    }
}
