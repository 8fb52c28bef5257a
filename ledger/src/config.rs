use core_types::config::LedgerSettings;
use core_types::retry::RetryPolicy;

use crate::partition::Partition;

pub const DEFAULT_OBJECT_NAME: &str = "ingest_filename_record.parquet";

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub partition: Partition,
    pub object_name: String,
    /// Backoff for the compare-and-retry loop around `save`.
    pub contention: RetryPolicy,
}

impl LedgerConfig {
    pub fn new(partition: Partition) -> Self {
        Self {
            partition,
            object_name: DEFAULT_OBJECT_NAME.to_string(),
            contention: RetryPolicy::default_contention(),
        }
    }

    pub fn from_settings(settings: &LedgerSettings, partition: Partition) -> Self {
        Self {
            partition,
            object_name: settings.object_name.clone(),
            contention: RetryPolicy::new(
                settings.max_attempts,
                settings.base_delay_ms,
                settings.max_delay_ms,
                settings.jitter_pct,
            ),
        }
    }

    pub fn with_contention(mut self, contention: RetryPolicy) -> Self {
        self.contention = contention;
        self
    }

    pub fn object_key(&self) -> String {
        self.partition.object_key(&self.object_name)
    }
}
