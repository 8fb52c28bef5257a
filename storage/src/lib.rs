// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Object storage collaborator for the processing ledger.
//!
//! Every blob carries an opaque [`Generation`] token. Writers pass a
//! [`WriteCondition`] so a stale writer is refused instead of overwriting a
//! newer blob.

mod memory;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

pub use memory::MemoryBlobStore;
pub use s3::{S3BlobStore, S3Settings};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Version token of one blob as observed by a reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Generation(String);

impl Generation {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Precondition attached to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Succeeds only if no blob exists under the key.
    DoesNotExist,
    /// Succeeds only if the current blob still has this generation.
    Matches(Generation),
}

impl WriteCondition {
    pub fn from_observed(generation: Option<&Generation>) -> Self {
        match generation {
            Some(generation) => WriteCondition::Matches(generation.clone()),
            None => WriteCondition::DoesNotExist,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Bytes,
    pub generation: Generation,
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob {key} not found")]
    NotFound { key: String },
    #[error("write precondition failed for blob {key}")]
    PreconditionFailed { key: String },
    #[error("blob store unavailable: {source}")]
    Unavailable {
        #[source]
        source: BoxError,
    },
}

impl BlobError {
    pub fn unavailable(source: impl Into<BoxError>) -> Self {
        BlobError::Unavailable {
            source: source.into(),
        }
    }

    /// Errors worth retrying at the transport layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, BlobError::Unavailable { .. })
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    async fn exists(&self, key: &str) -> Result<bool, BlobError>;

    async fn get(&self, key: &str) -> Result<Blob, BlobError>;

    /// Writes `bytes` under `key` if `condition` holds and returns the new
    /// generation.
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        condition: WriteCondition,
    ) -> Result<Generation, BlobError>;
}
