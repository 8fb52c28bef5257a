use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use core_types::retry::RetryPolicy;
use ledger::{Admission, LedgerConfig, LedgerController, LedgerError, Partition, Record};
use storage::{BlobStore, MemoryBlobStore};

fn worker(blobs: &MemoryBlobStore, attempts: usize) -> LedgerController {
    let config = LedgerConfig::new(Partition::new(2025))
        .with_contention(RetryPolicy::new(attempts, 1, 8, 0.5));
    let shared: Arc<dyn BlobStore> = Arc::new(blobs.clone());
    LedgerController::bootstrap(shared, config)
}

#[tokio::test]
async fn stale_writer_retries_and_keeps_both_keys() {
    let blobs = MemoryBlobStore::new();
    let a = worker(&blobs, 5);
    let b = worker(&blobs, 5);

    // Both workers read the same (empty) generation.
    let seen_by_a = a.store().load().await.unwrap();
    let seen_by_b = b.store().load().await.unwrap();
    assert_eq!(seen_by_a.generation, seen_by_b.generation);

    let mut with_k4 = seen_by_a.records.clone();
    with_k4.replace(Record::claimed("K4", Utc::now()));
    a.store()
        .save(&with_k4, seen_by_a.generation.as_ref())
        .await
        .unwrap();

    let mut with_k5 = seen_by_b.records.clone();
    with_k5.replace(Record::claimed("K5", Utc::now()));
    let conflict = b
        .store()
        .save(&with_k5, seen_by_b.generation.as_ref())
        .await
        .unwrap_err();
    assert!(matches!(
        conflict,
        LedgerError::ConcurrentModification { .. }
    ));

    // The full claim path reloads and lands on top of A's write.
    assert_eq!(b.claim("K5", true).await.unwrap(), Admission::Fresh);
    let records = a.snapshot().await.unwrap().records;
    assert!(records.contains("K4"));
    assert!(records.contains("K5"));
    assert_eq!(records.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_on_distinct_keys_are_all_kept() {
    let blobs = MemoryBlobStore::new();
    let mut handles = Vec::new();
    for i in 0..8 {
        let ledger = worker(&blobs, 64);
        handles.push(tokio::spawn(async move {
            let key = format!("conversation-{i}");
            ledger.claim(&key, true).await.map(|admission| (key, admission))
        }));
    }

    let mut admitted = HashSet::new();
    for handle in handles {
        let (key, admission) = handle.await.unwrap().unwrap();
        assert_eq!(admission, Admission::Fresh);
        admitted.insert(key);
    }

    let records = worker(&blobs, 1).snapshot().await.unwrap().records;
    assert_eq!(records.len(), 8);
    for key in &admitted {
        assert!(records.get(key).unwrap().processed, "{key} lost");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_on_one_key_admit_exactly_once() {
    let blobs = MemoryBlobStore::new();
    let mut handles = Vec::new();
    for _ in 0..6 {
        let ledger = worker(&blobs, 64);
        handles.push(tokio::spawn(async move {
            ledger.claim("hot-key", true).await
        }));
    }

    let mut fresh = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(Admission::Fresh) => fresh += 1,
            Err(LedgerError::DuplicateProcessing { .. }) => duplicates += 1,
            other => panic!("unexpected claim result: {other:?}"),
        }
    }
    assert_eq!(fresh, 1);
    assert_eq!(duplicates, 5);
    assert_eq!(worker(&blobs, 1).snapshot().await.unwrap().records.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_outcomes_and_claims_keep_one_row_per_key() {
    let blobs = MemoryBlobStore::new();
    let seed = worker(&blobs, 8);
    for i in 0..4 {
        seed.claim(&format!("k{i}"), true).await.unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..4 {
        let ledger = worker(&blobs, 64);
        handles.push(tokio::spawn(async move {
            let key = format!("k{i}");
            if i % 2 == 0 {
                ledger.record_success(&key).await.map(|_| ())
            } else {
                ledger.record_failure(&key, "stage error").await.map(|_| ())
            }
        }));
        let ledger = worker(&blobs, 64);
        handles.push(tokio::spawn(async move {
            ledger.claim(&format!("new{i}"), true).await.map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let records = seed.snapshot().await.unwrap().records;
    assert_eq!(records.len(), 8);
    for i in 0..4 {
        let record = records.get(&format!("k{i}")).unwrap();
        assert!(record.is_consistent());
        assert_eq!(record.errored, i % 2 == 1);
        assert!(records.contains(&format!("new{i}")));
    }
}
