use storage::BlobError;
use thiserror::Error;

use crate::codec::CodecError;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Item failed upfront validity checks; never persisted.
    #[error("work item {key} is not eligible for processing")]
    Ineligible { key: String },
    #[error("work item {key} is already being processed or was processed")]
    DuplicateProcessing { key: String },
    #[error("snapshot {object} kept changing underneath us after {attempts} attempts")]
    ConcurrentModification { object: String, attempts: usize },
    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(#[source] BlobError),
    /// An outcome was reported for a key that was never claimed.
    #[error("work item {key} has no ledger record")]
    UnknownKey { key: String },
    #[error("snapshot codec error: {0}")]
    Codec(#[from] CodecError),
}

impl LedgerError {
    /// Whether the whole claim/record call may be retried after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrentModification { .. } | LedgerError::StoreUnavailable(_)
        )
    }

    /// Terminal business decisions the caller should log and drop.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::Ineligible { .. } | LedgerError::DuplicateProcessing { .. }
        )
    }
}
