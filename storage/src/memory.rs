use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{Blob, BlobError, BlobStore, Generation, WriteCondition};

#[derive(Default)]
struct Objects {
    entries: HashMap<String, (Bytes, u64)>,
    next_generation: u64,
}

/// In-process blob store with monotonically increasing generations.
///
/// Clones share the same objects, so a clone per worker behaves like
/// independent clients of one bucket.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<Mutex<Objects>>,
    offline: Arc<AtomicBool>,
    writes: Arc<Mutex<u64>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage; every call fails with `Unavailable` while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful writes since creation.
    pub fn write_count(&self) -> u64 {
        *self.writes.lock()
    }

    pub fn generation_of(&self, key: &str) -> Option<Generation> {
        self.objects
            .lock()
            .entries
            .get(key)
            .map(|(_, generation)| Generation::new(generation.to_string()))
    }

    fn check_online(&self) -> Result<(), BlobError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BlobError::unavailable(io::Error::new(
                io::ErrorKind::NotConnected,
                "memory blob store is offline",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        self.check_online()?;
        Ok(self.objects.lock().entries.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Blob, BlobError> {
        self.check_online()?;
        let objects = self.objects.lock();
        match objects.entries.get(key) {
            Some((bytes, generation)) => Ok(Blob {
                bytes: bytes.clone(),
                generation: Generation::new(generation.to_string()),
            }),
            None => Err(BlobError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        condition: WriteCondition,
    ) -> Result<Generation, BlobError> {
        self.check_online()?;
        let mut objects = self.objects.lock();
        let current = objects.entries.get(key).map(|(_, generation)| *generation);
        let allowed = match (&condition, current) {
            (WriteCondition::DoesNotExist, None) => true,
            (WriteCondition::DoesNotExist, Some(_)) => false,
            (WriteCondition::Matches(_), None) => false,
            (WriteCondition::Matches(expected), Some(current)) => {
                expected.as_str() == current.to_string()
            }
        };
        if !allowed {
            log::debug!(
                "memory blob {} rejected write: condition {:?}, current {:?}",
                key,
                condition,
                current
            );
            return Err(BlobError::PreconditionFailed {
                key: key.to_string(),
            });
        }
        objects.next_generation += 1;
        let generation = objects.next_generation;
        objects.entries.insert(key.to_string(), (bytes, generation));
        *self.writes.lock() += 1;
        Ok(Generation::new(generation.to_string()))
    }
}
