//! Configuration file parser for `tidemark.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`,
//! which mirrors the XKCD archive (`comics`) and the SpaceX v3 launch list
//! (`space`). Unknown top-level keys are accepted but logged as warnings.
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::sources::SourceKind;
use crate::transport::Transport;

/// Environment variable overriding `concurrency`.
pub const CONCURRENCY_ENV: &str = "TIDEMARK_CONCURRENCY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value for TIDEMARK_CONCURRENCY: {0}")]
    InvalidConcurrency(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// A `[sources]` table replaces the default sources entirely.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the SQLite cache file.
    pub database: String,

    /// Maximum requests in flight within one batch.
    pub concurrency: usize,

    /// User agent sent with every remote request.
    pub user_agent: String,

    /// Sources keyed by slug.
    pub sources: BTreeMap<String, SourceSettings>,
}

/// Settings for one mirrored source.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SourceSettings {
    /// Display name stored on the source row.
    pub name: String,

    pub kind: SourceKind,

    pub base_url: String,

    /// Item path: an `{index}` template for comics, the collection path for launches.
    pub item_path: String,

    /// Path of the document carrying the remote latest index.
    pub index_path: String,

    /// Items per batch. Defaults per kind (comics 20, launches 10).
    #[serde(default)]
    pub batch_size: Option<usize>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Ceiling for one whole catch-up cycle.
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,

    /// Page size used by reads that do not pass a limit.
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Extra static query parameters appended to window URLs.
    #[serde(default)]
    pub query: BTreeMap<String, String>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_cycle_timeout_secs() -> u64 {
    300
}

fn default_limit() -> u32 {
    25
}

impl Default for Config {
    fn default() -> Self {
        let mut sources = BTreeMap::new();
        sources.insert(
            "comics".to_string(),
            SourceSettings {
                name: "XKCD".to_string(),
                kind: SourceKind::Comics,
                base_url: "https://xkcd.com".to_string(),
                item_path: "/{index}/info.0.json".to_string(),
                index_path: "/info.0.json".to_string(),
                batch_size: Some(20),
                request_timeout_secs: default_request_timeout_secs(),
                cycle_timeout_secs: default_cycle_timeout_secs(),
                default_limit: default_limit(),
                query: BTreeMap::new(),
            },
        );
        sources.insert(
            "space".to_string(),
            SourceSettings {
                name: "SpaceX".to_string(),
                kind: SourceKind::Launches,
                base_url: "https://api.spacexdata.com/v3".to_string(),
                item_path: "/launches".to_string(),
                index_path: "/launches/latest".to_string(),
                batch_size: Some(10),
                request_timeout_secs: default_request_timeout_secs(),
                cycle_timeout_secs: default_cycle_timeout_secs(),
                default_limit: default_limit(),
                query: BTreeMap::from([(
                    "filter".to_string(),
                    "flight_number,launch_date_unix,mission_name,links/article_link,details"
                        .to_string(),
                )]),
            },
        );

        Self {
            database: "tidemark.db".to_string(),
            concurrency: Transport::DEFAULT_CONCURRENCY,
            user_agent: concat!("tidemark/", env!("CARGO_PKG_VERSION")).to_string(),
            sources,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 4] = ["database", "concurrency", "user_agent", "sources"];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            sources = config.sources.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply a `TIDEMARK_CONCURRENCY` value, if one is set.
    ///
    /// The environment takes precedence over the config file.
    pub fn with_concurrency_override(mut self, value: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(raw) = value {
            let concurrency: usize = raw
                .trim()
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidConcurrency(raw.to_string()))?;
            self.concurrency = concurrency;
        }
        Ok(self)
    }

    /// Load the file, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let env_value = std::env::var(CONCURRENCY_ENV).ok();
        Self::load(path)?.with_concurrency_override(env_value.as_deref())
    }
}

// ============================================================================
// Tests
// ============================================================================
