// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared configuration, retry policy, and work-item key derivation for the processing ledger.

pub mod config;
pub mod key;
pub mod retry;

pub use key::{KeyDeriver, KeyError, WorkItemKey};
pub use retry::RetryPolicy;
