use std::sync::Arc;

use storage::{BlobError, BlobStore, Generation, WriteCondition};
use tokio::time::sleep;

use crate::{
    codec,
    config::LedgerConfig,
    error::{LedgerError, Result},
    partition::Partition,
    record::RecordSet,
};

/// Record set as read, together with the generation it was read at.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub records: RecordSet,
    /// `None` when no snapshot blob existed yet.
    pub generation: Option<Generation>,
}

/// Owns the snapshot blob of one ledger partition.
#[derive(Clone)]
pub struct LedgerStore {
    blobs: Arc<dyn BlobStore>,
    config: LedgerConfig,
    object_key: String,
}

impl LedgerStore {
    pub fn new(blobs: Arc<dyn BlobStore>, config: LedgerConfig) -> Self {
        let object_key = config.object_key();
        Self {
            blobs,
            config,
            object_key,
        }
    }

    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    pub fn partition(&self) -> Partition {
        self.config.partition
    }

    pub async fn exists(&self) -> Result<bool> {
        self.blobs
            .exists(&self.object_key)
            .await
            .map_err(LedgerError::StoreUnavailable)
    }

    pub async fn load(&self) -> Result<Snapshot> {
        match self.blobs.get(&self.object_key).await {
            Ok(blob) => {
                let records = codec::decode(blob.bytes)?;
                log::debug!(
                    "loaded {} records from {} at generation {}",
                    records.len(),
                    self.object_key,
                    blob.generation
                );
                Ok(Snapshot {
                    records,
                    generation: Some(blob.generation),
                })
            }
            Err(BlobError::NotFound { .. }) => {
                log::debug!("no snapshot at {}; starting empty", self.object_key);
                Ok(Snapshot::default())
            }
            Err(err) => Err(LedgerError::StoreUnavailable(err)),
        }
    }

    /// Writes `records` only if the blob is still at `expected`; a stale
    /// writer gets `ConcurrentModification`.
    pub async fn save(
        &self,
        records: &RecordSet,
        expected: Option<&Generation>,
    ) -> Result<Generation> {
        let bytes = codec::encode(records)?;
        let condition = WriteCondition::from_observed(expected);
        match self.blobs.put(&self.object_key, bytes, condition).await {
            Ok(generation) => Ok(generation),
            Err(BlobError::PreconditionFailed { .. }) => Err(LedgerError::ConcurrentModification {
                object: self.object_key.clone(),
                attempts: 1,
            }),
            Err(err) => Err(LedgerError::StoreUnavailable(err)),
        }
    }

    /// Runs `load -> apply -> save` until a save wins its precondition or the
    /// contention policy runs out of attempts. An error from `apply` ends the
    /// loop without writing.
    pub async fn mutate<T, F>(&self, mut apply: F) -> Result<T>
    where
        F: FnMut(&mut RecordSet) -> Result<T>,
    {
        let policy = &self.config.contention;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut snapshot = self.load().await?;
            let value = apply(&mut snapshot.records)?;
            match self
                .save(&snapshot.records, snapshot.generation.as_ref())
                .await
            {
                Ok(generation) => {
                    log::debug!(
                        "saved {} records to {} at generation {} (attempt {})",
                        snapshot.records.len(),
                        self.object_key,
                        generation,
                        attempt
                    );
                    return Ok(value);
                }
                Err(LedgerError::ConcurrentModification { .. })
                    if attempt < policy.max_attempts =>
                {
                    let delay = policy.next_delay(attempt - 1);
                    log::info!(
                        "snapshot {} changed during attempt {}; retrying in {:?}",
                        self.object_key,
                        attempt,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(LedgerError::ConcurrentModification { object, .. }) => {
                    log::warn!(
                        "giving up on {} after {} conflicting attempts",
                        object,
                        attempt
                    );
                    return Err(LedgerError::ConcurrentModification {
                        object,
                        attempts: attempt,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;
    use core_types::retry::RetryPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use storage::{Blob, MemoryBlobStore};

    fn config() -> LedgerConfig {
        LedgerConfig::new(Partition::new(2024)).with_contention(RetryPolicy::new(3, 1, 2, 0.0))
    }

    fn store_over(blobs: MemoryBlobStore) -> LedgerStore {
        LedgerStore::new(Arc::new(blobs), config())
    }

    /// Lets another writer slip in a row right before each of the first
    /// `interfere` puts.
    struct InterferingStore {
        inner: MemoryBlobStore,
        interfere: usize,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for InterferingStore {
        async fn exists(&self, key: &str) -> std::result::Result<bool, BlobError> {
            self.inner.exists(key).await
        }

        async fn get(&self, key: &str) -> std::result::Result<Blob, BlobError> {
            self.inner.get(key).await
        }

        async fn put(
            &self,
            key: &str,
            bytes: Bytes,
            condition: WriteCondition,
        ) -> std::result::Result<Generation, BlobError> {
            let n = self.puts.fetch_add(1, Ordering::SeqCst);
            if n < self.interfere {
                let rival = LedgerStore::new(Arc::new(self.inner.clone()), config());
                let mut snapshot = rival.load().await.unwrap();
                snapshot
                    .records
                    .replace(Record::claimed(format!("rival-{n}"), Utc::now()));
                rival
                    .save(&snapshot.records, snapshot.generation.as_ref())
                    .await
                    .unwrap();
            }
            self.inner.put(key, bytes, condition).await
        }
    }

    #[tokio::test]
    async fn missing_blob_loads_as_empty() {
        let store = store_over(MemoryBlobStore::new());
        assert!(!store.exists().await.unwrap());
        let snapshot = store.load().await.unwrap();
        assert!(snapshot.records.is_empty());
        assert!(snapshot.generation.is_none());
    }

    #[tokio::test]
    async fn save_then_load_returns_generation() {
        let blobs = MemoryBlobStore::new();
        let store = store_over(blobs.clone());
        let mut records = RecordSet::new();
        records.replace(Record::claimed("k1", Utc::now()));
        let generation = store.save(&records, None).await.unwrap();

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.records, records);
        assert_eq!(snapshot.generation, Some(generation));
        assert!(blobs.exists("2024/ingest_filename_record.parquet").await.unwrap());
    }

    #[tokio::test]
    async fn stale_save_is_a_concurrent_modification() {
        let store = store_over(MemoryBlobStore::new());
        let base = store.load().await.unwrap();

        let mut first = base.records.clone();
        first.replace(Record::claimed("a", Utc::now()));
        store.save(&first, base.generation.as_ref()).await.unwrap();

        let mut second = base.records.clone();
        second.replace(Record::claimed("b", Utc::now()));
        let err = store
            .save(&second, base.generation.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ConcurrentModification { .. }));

        let records = store.load().await.unwrap().records;
        assert!(records.contains("a"));
        assert!(!records.contains("b"));
    }

    #[tokio::test]
    async fn mutate_retries_from_a_fresh_load() {
        let blobs = InterferingStore {
            inner: MemoryBlobStore::new(),
            interfere: 2,
            puts: AtomicUsize::new(0),
        };
        let inner = blobs.inner.clone();
        let store = LedgerStore::new(Arc::new(blobs), config());
        let mut calls = 0;
        store
            .mutate(|records| {
                calls += 1;
                records.replace(Record::claimed("mine", Utc::now()));
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(calls, 3);

        let records = store_over(inner).load().await.unwrap().records;
        assert!(records.contains("mine"));
        assert!(records.contains("rival-0"));
        assert!(records.contains("rival-1"));
    }

    #[tokio::test]
    async fn mutate_gives_up_after_max_attempts() {
        let blobs = InterferingStore {
            inner: MemoryBlobStore::new(),
            interfere: usize::MAX,
            puts: AtomicUsize::new(0),
        };
        let store = LedgerStore::new(Arc::new(blobs), config());
        let err = store
            .mutate(|records| {
                records.replace(Record::claimed("mine", Utc::now()));
                Ok(())
            })
            .await
            .unwrap_err();
        match err {
            LedgerError::ConcurrentModification { object, attempts } => {
                assert_eq!(object, "2024/ingest_filename_record.parquet");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn mutate_error_skips_the_write() {
        let blobs = MemoryBlobStore::new();
        let store = store_over(blobs.clone());
        let err = store
            .mutate(|_| -> Result<()> {
                Err(LedgerError::UnknownKey {
                    key: "k".to_string(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownKey { .. }));
        assert_eq!(blobs.write_count(), 0);
    }

    #[tokio::test]
    async fn outage_surfaces_as_store_unavailable() {
        let blobs = MemoryBlobStore::new();
        blobs.set_offline(true);
        let store = store_over(blobs);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_codec_error() {
        let blobs = MemoryBlobStore::new();
        blobs
            .put(
                "2024/ingest_filename_record.parquet",
                Bytes::from_static(b"garbage"),
                WriteCondition::DoesNotExist,
            )
            .await
            .unwrap();
        let err = store_over(blobs).load().await.unwrap_err();
        assert!(matches!(err, LedgerError::Codec(_)));
    }
}
