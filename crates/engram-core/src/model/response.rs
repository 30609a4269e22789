//! Response shapes shared across services.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::unit::MemoryUnit;

/// A memory paired with its raw backend similarity, as returned by the
/// vector store (descending score order, cosine-equivalent in [0, 1]).
#[derive(Debug, Clone)]
pub struct ScoredUnit {
    pub unit: MemoryUnit,
    pub score: f32,
}

/// A single search result surfaced to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryResult {
    pub memory: MemoryUnit,
    /// Final score, clamped to [0, 1].
    pub score: f64,
}

/// Response for `retrieve_memories`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub results: Vec<MemoryResult>,
    pub total_found: usize,
    pub query_time_ms: f64,
    pub used_cache: bool,
}

/// Paginated listing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPage {
    pub memories: Vec<MemoryUnit>,
    pub total_count: usize,
    pub returned_count: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

/// Breakdown returned by query-based deletion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteBreakdown {
    pub by_project: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_lifecycle: BTreeMap<String, usize>,
}

/// Per-project aggregate statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectStats {
    pub project_name: String,
    pub memory_count: usize,
    pub categories: BTreeMap<String, usize>,
    pub lifecycle_states: BTreeMap<String, usize>,
    pub avg_importance: f64,
}
