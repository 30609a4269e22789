//! Server configuration.
//!
//! The recognized options form a closed schema: unknown keys are rejected at
//! load time rather than silently ignored. The loaded snapshot is immutable
//! for the lifetime of the process.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};

// ============================================================================
// DEFAULTS
// ============================================================================

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_days() -> u32 {
    7
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_collection_name() -> String {
    "engram_memories".to_string()
}

fn default_fetch_multiplier() -> usize {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_session_ttl_hours() -> u64 {
    48
}

fn default_pool_size() -> usize {
    4
}

fn default_pool_acquire_timeout_secs() -> u64 {
    5
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_rerank_weights() -> [f64; 4] {
    [0.6, 0.2, 0.1, 0.1]
}

fn default_recent_query_window() -> usize {
    10
}

fn default_shown_id_cap() -> usize {
    1000
}

// ============================================================================
// CONFIG
// ============================================================================

/// Analytics toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyticsConfig {
    /// Enables composite re-ranking of retrieval results.
    #[serde(default = "default_true")]
    pub usage_tracking: bool,
    /// Weights for (similarity, recency, usage, lifecycle). Must sum to 1.0.
    #[serde(default = "default_rerank_weights")]
    pub rerank_weights: [f64; 4],
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            usage_tracking: true,
            rerank_weights: default_rerank_weights(),
        }
    }
}

/// Conversation-tracking toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Stores query vectors in session state for expansion.
    #[serde(default = "default_true")]
    pub conversation_tracking: bool,
    /// Recent queries kept per session (FIFO window).
    #[serde(default = "default_recent_query_window")]
    pub recent_query_window: usize,
    /// LRU cap on the per-session shown-memory-id set.
    #[serde(default = "default_shown_id_cap")]
    pub shown_id_cap: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            conversation_tracking: true,
            recent_query_window: default_recent_query_window(),
            shown_id_cap: default_shown_id_cap(),
        }
    }
}

/// The process-wide configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngramConfig {
    /// Rejects all mutating operations with READ_ONLY.
    #[serde(default)]
    pub read_only_mode: bool,

    /// Name of the embedding backend; also part of the cache key.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Embedding cache policy.
    #[serde(default = "default_true")]
    pub embedding_cache_enabled: bool,
    #[serde(default = "default_cache_ttl_days")]
    pub embedding_cache_ttl_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_cache_path: Option<PathBuf>,

    /// Reference backend wiring.
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default = "default_collection_name")]
    pub qdrant_collection_name: String,

    /// Fetch multiplier applied when session deduplication is active.
    #[serde(default = "default_fetch_multiplier")]
    pub deduplication_fetch_multiplier: usize,

    /// Logging verbosity (passed to the tracing subscriber).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Concurrency knobs.
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_pool_acquire_timeout_secs")]
    pub pool_acquire_timeout_secs: u64,
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Nested toggles.
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Default for EngramConfig {
    fn default() -> Self {
        // An empty document exercises every serde default.
        toml::from_str("").expect("empty config parses")
    }
}

impl EngramConfig {
    /// Load from a TOML file, rejecting unknown keys and invalid values.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngramError::validation("config", format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    /// Parse from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: EngramConfig = toml::from_str(raw)
            .map_err(|e| EngramError::validation("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.deduplication_fetch_multiplier < 1 {
            return Err(EngramError::validation(
                "deduplication_fetch_multiplier",
                "must be at least 1",
            ));
        }
        if self.pool_size < 1 {
            return Err(EngramError::validation("pool_size", "must be at least 1"));
        }
        if self.operation_timeout_secs == 0 {
            return Err(EngramError::validation(
                "operation_timeout_secs",
                "must be positive",
            ));
        }
        if self.session_ttl_hours == 0 {
            return Err(EngramError::validation(
                "session_ttl_hours",
                "must be positive",
            ));
        }
        let weight_sum: f64 = self.analytics.rerank_weights.iter().sum();
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(EngramError::validation(
                "analytics.rerank_weights",
                format!("weights must sum to 1.0, got {weight_sum}"),
            ));
        }
        if self.analytics.rerank_weights.iter().any(|w| *w < 0.0) {
            return Err(EngramError::validation(
                "analytics.rerank_weights",
                "weights must be non-negative",
            ));
        }
        Ok(())
    }

    /// Per-operation ceiling as a duration.
    pub fn operation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.operation_timeout_secs)
    }

    /// Default on-disk location for the embedding cache.
    pub fn resolved_cache_path(&self) -> PathBuf {
        if let Some(ref path) = self.embedding_cache_path {
            return path.clone();
        }
        if let Some(dirs) = directories::ProjectDirs::from("ai", "engram", "engram") {
            return dirs.cache_dir().join("embeddings.db");
        }
        PathBuf::from(".engram_cache/embeddings.db")
    }
}

// ============================================================================
// TESTS
// ============================================================================
