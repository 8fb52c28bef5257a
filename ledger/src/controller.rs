use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use futures::FutureExt;
use storage::BlobStore;
use thiserror::Error;

use crate::{
    claim::{self, Admission},
    config::LedgerConfig,
    error::{LedgerError, Result},
    outcome::{self, Outcome},
    partition::Partition,
    record::{self, Record, RecordState},
    store::{LedgerStore, Snapshot},
};

/// Counts over one partition's records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub idle: usize,
}

#[derive(Debug, Error)]
pub enum ProcessError<T, E> {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("stage work failed: {0}")]
    Work(E),
    /// The work finished but the success could not be written back; `value`
    /// is handed back and the key stays claimed.
    #[error("stage work succeeded but the success was not recorded: {ledger}")]
    Unconfirmed { value: T, ledger: LedgerError },
    /// The work failed and the failure could not be written back either; the
    /// key stays claimed until an operator intervenes.
    #[error("stage work failed ({work}) and the failure was not recorded: {ledger}")]
    Unrecorded { work: E, ledger: LedgerError },
}

/// Entry point for pipeline stages: claim, report outcomes, audit.
#[derive(Clone)]
pub struct LedgerController {
    store: LedgerStore,
}

impl LedgerController {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    pub fn bootstrap(blobs: Arc<dyn BlobStore>, config: LedgerConfig) -> Self {
        Self::new(LedgerStore::new(blobs, config))
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn partition(&self) -> Partition {
        self.store.partition()
    }

    /// Decides whether work on `work_item_key` may start. Ineligible items are
    /// rejected without touching the store.
    pub async fn claim(&self, work_item_key: &str, eligible: bool) -> Result<Admission> {
        if !eligible {
            log::info!("rejecting ineligible work item {}", work_item_key);
            return Err(LedgerError::Ineligible {
                key: work_item_key.to_string(),
            });
        }
        let result = self
            .store
            .mutate(|records| claim::admit(records, work_item_key, eligible, record::now()))
            .await;
        match &result {
            Ok(Admission::Fresh) => log::info!("admitted work item {}", work_item_key),
            Ok(Admission::Resumed { prior }) => log::info!(
                "resuming work item {} after failure: {}",
                work_item_key,
                prior.error_message.as_deref().unwrap_or("<no message>")
            ),
            Err(LedgerError::DuplicateProcessing { .. }) => log::info!(
                "work item {} is processing or was already processed",
                work_item_key
            ),
            Err(LedgerError::Ineligible { .. }) => log::info!(
                "work item {} has an ineligible record; not resuming",
                work_item_key
            ),
            Err(err) => log::warn!("claim for {} failed: {}", work_item_key, err),
        }
        result
    }

    pub async fn record_success(&self, work_item_key: &str) -> Result<Record> {
        self.record(work_item_key, Outcome::Success).await
    }

    pub async fn record_failure(
        &self,
        work_item_key: &str,
        message: impl Into<String>,
    ) -> Result<Record> {
        self.record(work_item_key, Outcome::failure(message)).await
    }

    pub async fn record(&self, work_item_key: &str, outcome: Outcome) -> Result<Record> {
        let result = self
            .store
            .mutate(|records| outcome::apply(records, work_item_key, &outcome, record::now()))
            .await;
        match (&result, &outcome) {
            (Ok(_), Outcome::Success) => log::info!("work item {} processed", work_item_key),
            (Ok(_), Outcome::Failure { message }) => {
                log::warn!("work item {} failed: {}", work_item_key, message)
            }
            (Err(LedgerError::UnknownKey { .. }), _) => log::error!(
                "outcome reported for unclaimed work item {}",
                work_item_key
            ),
            (Err(err), _) => log::warn!(
                "recording outcome for {} failed: {}",
                work_item_key,
                err
            ),
        }
        result
    }

    /// Claims `work_item_key`, runs `work`, and records its outcome on every
    /// exit path. A panic inside `work` is recorded as a failure and then
    /// resumed.
    pub async fn process<F, Fut, T, E>(
        &self,
        work_item_key: &str,
        eligible: bool,
        stage: &str,
        work: F,
    ) -> std::result::Result<T, ProcessError<T, E>>
    where
        F: FnOnce(Admission) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let admission = self.claim(work_item_key, eligible).await?;
        let guarded = AssertUnwindSafe(async move { work(admission).await });
        match guarded.catch_unwind().await {
            Ok(Ok(value)) => match self.record_success(work_item_key).await {
                Ok(_) => Ok(value),
                Err(ledger) => Err(ProcessError::Unconfirmed { value, ledger }),
            },
            Ok(Err(err)) => {
                let message = format!("An error occurred during {stage}: {err}");
                match self.record_failure(work_item_key, message).await {
                    Ok(_) => Err(ProcessError::Work(err)),
                    Err(ledger) => Err(ProcessError::Unrecorded { work: err, ledger }),
                }
            }
            Err(panic) => {
                let message = format!(
                    "An error occurred during {stage}: panicked: {}",
                    panic_message(panic.as_ref())
                );
                if let Err(err) = self.record_failure(work_item_key, message).await {
                    log::error!(
                        "could not record panic of {} for {}: {}",
                        stage,
                        work_item_key,
                        err
                    );
                }
                resume_unwind(panic)
            }
        }
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.store.load().await
    }

    /// Rows whose last attempt failed; each one is admissible again.
    pub async fn failed(&self) -> Result<Vec<Record>> {
        let snapshot = self.store.load().await?;
        Ok(snapshot
            .records
            .iter()
            .filter(|record| record.state() == RecordState::Failed)
            .cloned()
            .collect())
    }

    /// Claimed rows not rewritten for `older_than`. A stage that crashed
    /// between claim and outcome leaves exactly this shape behind, so these
    /// need checking against downstream artifacts.
    pub async fn stale_claims(&self, older_than: TimeDelta) -> Result<Vec<Record>> {
        let cutoff = Utc::now() - older_than;
        let snapshot = self.store.load().await?;
        Ok(snapshot
            .records
            .iter()
            .filter(|record| record.processed && record.occurrence_timestamp < cutoff)
            .cloned()
            .collect())
    }

    pub async fn summary(&self) -> Result<LedgerSummary> {
        let snapshot = self.store.load().await?;
        let mut summary = LedgerSummary::default();
        for record in &snapshot.records {
            summary.total += 1;
            match record.state() {
                RecordState::Processed => summary.processed += 1,
                RecordState::Failed => summary.failed += 1,
                RecordState::Idle => summary.idle += 1,
            }
        }
        Ok(summary)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
