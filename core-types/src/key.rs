// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Privacy-preserving work-item keys derived from triggering object paths.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("hash key is empty")]
    EmptySecret,
    #[error("hash key is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("object path is empty")]
    EmptyPath,
}

/// Stable identifier of one unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkItemKey(String);

impl WorkItemKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for WorkItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkItemKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkItemKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for WorkItemKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Keyed hash over the trailing `folder/filename` of an object path.
#[derive(Clone)]
pub struct KeyDeriver {
    secret: Vec<u8>,
}

impl fmt::Debug for KeyDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDeriver").finish_non_exhaustive()
    }
}

impl KeyDeriver {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, KeyError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(KeyError::EmptySecret);
        }
        Ok(Self { secret })
    }

    pub fn from_hex(secret_hex: &str) -> Result<Self, KeyError> {
        Self::new(hex::decode(secret_hex.trim())?)
    }

    pub fn derive(&self, object_path: &str) -> Result<WorkItemKey, KeyError> {
        let canonical = canonical_name(object_path)?;
        Ok(WorkItemKey(self.sign(canonical.as_bytes())?))
    }

    fn sign(&self, data: &[u8]) -> Result<String, KeyError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|_| KeyError::EmptySecret)?;
        mac.update(data);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Reduces `a/b/folder/file.wav` to `folder/file.wav`; a bare name becomes
/// `/file.wav`.
pub fn canonical_name(object_path: &str) -> Result<String, KeyError> {
    if object_path.is_empty() {
        return Err(KeyError::EmptyPath);
    }
    let parts: Vec<&str> = object_path.split('/').collect();
    if parts.len() == 1 {
        return Ok(format!("/{}", parts[0]));
    }
    let filename = parts[parts.len() - 1];
    let folder = parts[parts.len() - 2];
    Ok(format!("{folder}/{filename}"))
}
