//! Terminal results reported after a stage finishes with a claimed key.

use chrono::{DateTime, Utc};

use crate::{
    error::{LedgerError, Result},
    record::{Record, RecordSet},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure { message: String },
}

impl Outcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Outcome::Failure {
            message: message.into(),
        }
    }
}

/// Rewrites the row of `work_item_key` with `outcome` and returns the new row.
/// Applying the same outcome twice converges to the same flags.
pub fn apply(
    records: &mut RecordSet,
    work_item_key: &str,
    outcome: &Outcome,
    now: DateTime<Utc>,
) -> Result<Record> {
    let record = records
        .get_mut(work_item_key)
        .ok_or_else(|| LedgerError::UnknownKey {
            key: work_item_key.to_string(),
        })?;
    match outcome {
        Outcome::Success => record.mark_processed(now),
        Outcome::Failure { message } => record.mark_failed(message.clone(), now),
    }
    Ok(record.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn claimed(key: &str) -> RecordSet {
        let mut records = RecordSet::new();
        records.replace(Record::claimed(key, ts(1)));
        records
    }

    #[test]
    fn success_confirms_claim() {
        let mut records = claimed("k1");
        let record = apply(&mut records, "k1", &Outcome::Success, ts(2)).unwrap();
        assert!(record.processed);
        assert!(!record.errored);
        assert_eq!(record.error_message, None);
    }

    #[test]
    fn failure_retracts_claim_idempotently() {
        let mut records = claimed("k2");
        let outcome = Outcome::failure("encode error");
        let first = apply(&mut records, "k2", &outcome, ts(2)).unwrap();
        let second = apply(&mut records, "k2", &outcome, ts(2)).unwrap();
        assert_eq!(first, second);
        assert!(!second.processed);
        assert!(second.errored);
        assert_eq!(second.error_message.as_deref(), Some("encode error"));
    }

    #[test]
    fn unknown_key_is_reported() {
        let mut records = claimed("k1");
        let err = apply(&mut records, "missing", &Outcome::Success, ts(2)).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownKey { ref key } if key == "missing"));
        assert_eq!(records.len(), 1);
    }
}
