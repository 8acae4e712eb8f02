use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::MemoryError;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct MnemeConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub recall: RecallConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
    pub lock: LockConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub data_dir: String,
}

/// Decay policy for the session-start "recent facts" slice.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct RecallConfig {
    /// Days (counting today) whose facts are all eligible.
    pub load_days_full: u32,
    /// Days (counting today) after which only `partial_per_day` facts per day survive.
    pub load_days_partial: u32,
    /// Total trailing window; older days are never read.
    pub load_days_max: u32,
    pub partial_per_day: usize,
    /// Beyond the partial window, only facts at or above this confidence survive.
    pub important_confidence: f64,
    pub facts_limit: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    pub chunk_tokens: usize,
    pub chunk_overlap: usize,
    pub sync_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    pub default_max_results: usize,
    pub rrf_k: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    pub timeout_secs: f64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// `"local"` (ONNX Runtime) or `"none"`.
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
}

impl Default for MnemeConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
            recall: RecallConfig::default(),
            index: IndexConfig::default(),
            search: SearchConfig::default(),
            lock: LockConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = default_mneme_dir()
            .join("data")
            .to_string_lossy()
            .into_owned();
        Self { data_dir }
    }
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            load_days_full: 2,
            load_days_partial: 5,
            load_days_max: 7,
            partial_per_day: 3,
            important_confidence: 0.9,
            facts_limit: 15,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: 400,
            chunk_overlap: 80,
            sync_timeout_secs: 25,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_max_results: 10,
            rrf_k: 60,
        }
    }
}

/// Upper bound for `lock.timeout_secs`.
pub const MAX_LOCK_TIMEOUT_SECS: f64 = 3600.0;

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10.0,
            poll_interval_ms: 100,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_mneme_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
        }
    }
}

impl LockConfig {
    /// The configured wait, clamped to `0..=MAX_LOCK_TIMEOUT_SECS`.
    pub fn timeout(&self) -> Duration {
        let secs = if self.timeout_secs.is_finite() {
            self.timeout_secs.clamp(0.0, MAX_LOCK_TIMEOUT_SECS)
        } else {
            MAX_LOCK_TIMEOUT_SECS
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_secs(MAX_LOCK_TIMEOUT_SECS as u64))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Returns `~/.mneme/`, falling back to `./.mneme` when there is no home directory.
pub fn default_mneme_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mneme")
}

/// Returns the default config file path: `~/.mneme/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mneme_dir().join("config.toml")
}

impl MnemeConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, apply env var overrides, then validate.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            Self::parse(&contents)?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemeConfig::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text. Unknown keys are rejected with `UNKNOWN_CONFIG_KEY`.
    pub fn parse(contents: &str) -> std::result::Result<Self, MemoryError> {
        toml::from_str(contents).map_err(|e| {
            let message = e.message().to_string();
            match unknown_field_name(&message) {
                Some(key) => MemoryError::UnknownConfigKey { key },
                None => MemoryError::InvalidConfig {
                    key: "<file>".into(),
                    reason: message,
                },
            }
        })
    }

    /// Apply environment variable overrides (MNEME_DATA_DIR, MNEME_LOG_LEVEL,
    /// MNEME_FACTS_LIMIT, MNEME_EMBEDDING_MODEL).
    fn apply_env_overrides(&mut self) -> std::result::Result<(), MemoryError> {
        if let Ok(val) = std::env::var("MNEME_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("MNEME_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("MNEME_FACTS_LIMIT") {
            self.recall.facts_limit = val.parse().map_err(|_| MemoryError::InvalidConfig {
                key: "recall.facts_limit".into(),
                reason: format!("MNEME_FACTS_LIMIT is not an integer: {val}"),
            })?;
        }
        if let Ok(val) = std::env::var("MNEME_EMBEDDING_MODEL") {
            self.embedding.model = val;
        }
        Ok(())
    }

    /// Range-check every tunable.
    pub fn validate(&self) -> std::result::Result<(), MemoryError> {
        fn check(ok: bool, key: &str, reason: &str) -> std::result::Result<(), MemoryError> {
            if ok {
                Ok(())
            } else {
                Err(MemoryError::InvalidConfig {
                    key: key.into(),
                    reason: reason.into(),
                })
            }
        }

        let r = &self.recall;
        check((1..=365).contains(&r.load_days_full), "recall.load_days_full", "must be within 1..=365")?;
        check((1..=365).contains(&r.load_days_partial), "recall.load_days_partial", "must be within 1..=365")?;
        check((1..=365).contains(&r.load_days_max), "recall.load_days_max", "must be within 1..=365")?;
        check((1..=100).contains(&r.partial_per_day), "recall.partial_per_day", "must be within 1..=100")?;
        check(
            (0.0..=1.0).contains(&r.important_confidence),
            "recall.important_confidence",
            "must be within 0.0..=1.0",
        )?;
        check((1..=500).contains(&r.facts_limit), "recall.facts_limit", "must be within 1..=500")?;

        let i = &self.index;
        check((50..=2000).contains(&i.chunk_tokens), "index.chunk_tokens", "must be within 50..=2000")?;
        check(
            i.chunk_overlap < i.chunk_tokens,
            "index.chunk_overlap",
            "must be smaller than index.chunk_tokens",
        )?;
        check(i.sync_timeout_secs > 0, "index.sync_timeout_secs", "must be positive")?;

        check(self.search.default_max_results > 0, "search.default_max_results", "must be positive")?;
        check(self.search.rrf_k > 0, "search.rrf_k", "must be positive")?;

        check(
            (0.0..=MAX_LOCK_TIMEOUT_SECS).contains(&self.lock.timeout_secs),
            "lock.timeout_secs",
            "must be within 0..=3600 seconds",
        )?;
        check(self.lock.poll_interval_ms > 0, "lock.poll_interval_ms", "must be positive")?;

        check(
            matches!(self.embedding.provider.as_str(), "local" | "none"),
            "embedding.provider",
            "must be \"local\" or \"none\"",
        )?;
        check(
            matches!(
                self.logging.level.to_ascii_lowercase().as_str(),
                "trace" | "debug" | "info" | "warn" | "error"
            ),
            "logging.level",
            "must be one of trace, debug, info, warn, error",
        )?;
        Ok(())
    }

    /// Look up a single value by dotted path, e.g. `recall.facts_limit`.
    pub fn get(&self, dotted: &str) -> std::result::Result<serde_json::Value, MemoryError> {
        let root = serde_json::to_value(self)?;
        let mut cur = &root;
        for part in dotted.split('.') {
            cur = cur
                .get(part)
                .ok_or_else(|| MemoryError::UnknownConfigKey {
                    key: dotted.to_string(),
                })?;
        }
        Ok(cur.clone())
    }

    /// Resolve the data directory, expanding `~` if needed.
    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.data_dir)
    }
}

/// Extract the field name from serde's "unknown field `x`, expected ..." message.
fn unknown_field_name(message: &str) -> Option<String> {
    let rest = message.strip_prefix("unknown field `")?;
    let end = rest.find('`')?;
    Some(rest[..end].to_string())
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        }
    } else {
        PathBuf::from(path)
    }
}
