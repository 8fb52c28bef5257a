use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "ledger.toml";
pub const ENV_PREFIX: &str = "LEDGER";

/// Top-level settings for services that talk to the processing ledger.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub keys: KeyConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    S3,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default = "default_object_name")]
    pub object_name: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: f64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            object_name: default_object_name(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_pct: default_jitter_pct(),
        }
    }
}

fn default_object_name() -> String {
    "ingest_filename_record.parquet".to_string()
}

fn default_max_attempts() -> usize {
    5
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    1_000
}

fn default_jitter_pct() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeyConfig {
    /// Hex-encoded HMAC secret used to derive work-item keys.
    #[serde(default)]
    pub hash_key_hex: Option<String>,
}

/// `LEDGER_` then the section path joined by `__`.
fn env_overrides() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Reads `path` (optional) and then `LEDGER_*` environment overrides,
    /// e.g. `LEDGER_STORE__BUCKET`.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        Self::load_with(path, env_overrides())
    }

    fn load_with(path: &str, env: config::Environment) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(env)
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.backend == StoreBackend::S3 && self.store.bucket.is_empty() {
            return Err(ConfigError::Message(
                "LEDGER_STORE__BUCKET is required for the s3 backend".to_string(),
            ));
        }
        if self.ledger.object_name.is_empty() {
            return Err(ConfigError::Message(
                "ledger.object_name must not be empty".to_string(),
            ));
        }
        if self.ledger.max_attempts == 0 {
            return Err(ConfigError::Message(
                "ledger.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
