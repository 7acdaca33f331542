//! Configuration loaded from `~/.mimo/semantic.toml`, with defaults.

use crate::error::{MimoError, MimoResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Top-level semantic store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    pub storage: StorageConfig,
    pub query: QueryConfig,
    pub resolver: ResolverConfig,
    pub observer: ObserverConfig,
}

/// SQLite storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file. `None` means `~/.mimo/semantic.db`.
    pub db_path: Option<PathBuf>,
    /// Rows per write transaction in `batch_create`. Default: 500.
    pub batch_chunk_size: usize,
    /// How long a writer waits on a locked database. Default: 5000ms.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            batch_chunk_size: 500,
            busy_timeout_ms: 5000,
        }
    }
}

impl StorageConfig {
    /// Configured database path, or the default under the home directory.
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| mimo_home().join("semantic.db"))
    }
}

/// Traversal defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Transitive closure depth bound. Default: 5.
    pub max_depth: u32,
    /// Transitive closure edge confidence floor. Default: 0.7.
    pub min_confidence: f32,
    /// Path search depth bound. Default: 10.
    pub path_max_depth: u32,
    /// Path search edge confidence floor. Default: 0.7.
    pub path_min_confidence: f32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            min_confidence: 0.7,
            path_max_depth: 10,
            path_min_confidence: 0.7,
        }
    }
}

/// Entity resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum similarity for a match. Default: 0.85.
    pub min_score: f32,
    /// Gap between the top two scores for a clear winner. Default: 0.1.
    pub clear_margin: f32,
    /// Hits requested per search. Default: 10.
    pub candidate_limit: usize,
    /// Pending anchor enrichment jobs before new ones are dropped. Default: 256.
    pub enrichment_queue_capacity: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_score: 0.85,
            clear_margin: 0.1,
            candidate_limit: 10,
            enrichment_queue_capacity: 256,
        }
    }
}

/// Proactive suggestion filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Relevance floor. Default: 0.90.
    pub min_confidence: f32,
    /// Seconds an entity stays quiet after being discussed. Default: 300.
    pub cooldown_secs: i64,
    /// Suggestions remembered per session for repeat suppression. Default: 10.
    pub history_len: usize,
    /// Suggestions returned per call. Default: 2.
    pub max_suggestions: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.90,
            cooldown_secs: 300,
            history_len: 10,
            max_suggestions: 2,
        }
    }
}

impl SemanticConfig {
    /// Reject values that would make the store misbehave.
    pub fn validate(&self) -> MimoResult<()> {
        if self.storage.batch_chunk_size == 0 {
            return Err(MimoError::Config(
                "storage.batch_chunk_size must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("query.min_confidence", self.query.min_confidence),
            ("query.path_min_confidence", self.query.path_min_confidence),
            ("resolver.min_score", self.resolver.min_score),
            ("resolver.clear_margin", self.resolver.clear_margin),
            ("observer.min_confidence", self.observer.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MimoError::Config(format!(
                    "{name} must be within [0.0, 1.0], got {value}"
                )));
            }
        }
        if self.resolver.candidate_limit == 0 || self.resolver.enrichment_queue_capacity == 0 {
            return Err(MimoError::Config(
                "resolver.candidate_limit and resolver.enrichment_queue_capacity must be positive"
                    .to_string(),
            ));
        }
        if self.observer.cooldown_secs < 0 {
            return Err(MimoError::Config(
                "observer.cooldown_secs must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// `~/.mimo`, or `./.mimo` when no home directory is known.
pub fn mimo_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mimo")
}

fn default_config_path() -> PathBuf {
    mimo_home().join("semantic.toml")
}

/// Load configuration from a TOML file, falling back to defaults.
///
/// A missing, unreadable, malformed, or invalid file is logged and replaced
/// by `SemanticConfig::default()`.
pub fn load_config(path: Option<&Path>) -> SemanticConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return SemanticConfig::default();
    }

    let contents = match std::fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            return SemanticConfig::default();
        }
    };

    match toml::from_str::<SemanticConfig>(&contents) {
        Ok(config) => match config.validate() {
            Ok(()) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Invalid config values, using defaults"
                );
                SemanticConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to parse config, using defaults"
            );
            SemanticConfig::default()
        }
    }
}
