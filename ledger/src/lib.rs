//! Processing ledger shared by the ingestion pipeline stages.
//!
//! The crate exposes:
//! - [`LedgerController`]: claim / outcome API used by pipeline stages.
//! - [`LedgerStore`]: one partition's snapshot blob with compare-and-retry writes.
//! - [`codec`]: Parquet encoding of the [`RecordSet`].

pub mod claim;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod outcome;
pub mod partition;
pub mod record;
pub mod store;

pub use claim::Admission;
pub use codec::CodecError;
pub use config::LedgerConfig;
pub use controller::{LedgerController, LedgerSummary, ProcessError};
pub use error::{LedgerError, Result};
pub use outcome::Outcome;
pub use partition::Partition;
pub use record::{Record, RecordSet, RecordState};
pub use store::{LedgerStore, Snapshot};
