//! Vector store adapters.
//!
//! The engine talks to a logical KV+ANN interface: points carry the full
//! serialized [`MemoryUnit`] as payload next to the embedding vector.
//! Backends must support exact-match, range, and set-membership predicates
//! over the indexed payload fields.

mod mem;
#[cfg(feature = "qdrant")]
mod qdrant;

pub use mem::MemoryStore;
#[cfg(feature = "qdrant")]
pub use qdrant::QdrantStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    ContextLevel, DeleteBreakdown, MemoryCategory, MemoryProvenance, MemoryScope, MemoryUnit,
    ProjectStats, ScoredUnit, SearchFilters, SortField, SortOrder,
};

/// Hard cap on query-based bulk deletion.
pub const MAX_DELETE_BATCH: usize = 1000;

// ============================================================================
// PATCH
// ============================================================================

/// Partial update applied atomically to a stored point. Readers observe
/// either the old or the new record, never a blend.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub category: Option<MemoryCategory>,
    pub context_level: Option<ContextLevel>,
    pub scope: Option<MemoryScope>,
    /// `Some(None)` clears the project binding (migration to global scope).
    pub project_name: Option<Option<String>>,
    pub importance: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub provenance: Option<MemoryProvenance>,
    pub last_accessed: Option<DateTime<Utc>>,
    /// Set when an update does not preserve timestamps.
    pub created_at: Option<DateTime<Utc>>,
    /// Bump `updated_at` to now.
    pub touch_updated_at: bool,
}

impl MemoryPatch {
    pub fn apply(&self, unit: &mut MemoryUnit, now: DateTime<Utc>) {
        if let Some(ref content) = self.content {
            unit.content = content.clone();
        }
        if let Some(category) = self.category {
            unit.category = category;
        }
        if let Some(level) = self.context_level {
            unit.context_level = level;
        }
        if let Some(scope) = self.scope {
            unit.scope = scope;
        }
        if let Some(ref project) = self.project_name {
            unit.project_name = project.clone();
        }
        if let Some(importance) = self.importance {
            unit.importance = importance;
        }
        if let Some(ref tags) = self.tags {
            unit.tags = tags.clone();
        }
        if let Some(ref metadata) = self.metadata {
            unit.metadata = metadata.clone();
        }
        if let Some(ref provenance) = self.provenance {
            unit.provenance = provenance.clone();
        }
        if let Some(accessed) = self.last_accessed {
            unit.last_accessed = accessed;
            unit.refresh_lifecycle(now);
        }
        if let Some(created) = self.created_at {
            unit.created_at = created;
        }
        if self.touch_updated_at {
            unit.updated_at = now;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.category.is_none()
            && self.context_level.is_none()
            && self.scope.is_none()
            && self.project_name.is_none()
            && self.importance.is_none()
            && self.tags.is_none()
            && self.metadata.is_none()
            && self.provenance.is_none()
            && self.last_accessed.is_none()
            && self.created_at.is_none()
            && !self.touch_updated_at
    }
}

// ============================================================================
// REPORTS
// ============================================================================

/// Result of a query-based bulk deletion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteByFilterReport {
    pub deleted_count: usize,
    pub total_matches: usize,
    pub breakdown: DeleteBreakdown,
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// The single inbound dependency of the memory engine.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert a point carrying the unit's full payload. Returns the id.
    async fn store(&self, unit: &MemoryUnit, vector: Vec<f32>) -> Result<String>;

    /// At-least-once batch upsert; re-running with the same ids is
    /// idempotent.
    async fn batch_store(&self, items: Vec<(MemoryUnit, Vec<f32>)>) -> Result<Vec<String>>;

    /// Semantic query with metadata predicates. Scores are
    /// cosine-equivalent in [0, 1], returned in descending order.
    async fn retrieve(
        &self,
        query_vector: &[f32],
        filters: Option<&SearchFilters>,
        limit: usize,
    ) -> Result<Vec<ScoredUnit>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<MemoryUnit>>;

    /// Apply a partial update; returns false when the id is unknown.
    async fn update(
        &self,
        id: &str,
        patch: MemoryPatch,
        new_vector: Option<Vec<f32>>,
    ) -> Result<bool>;

    /// Best-effort access-time bump for retrieved records.
    async fn touch(&self, ids: &[String], at: DateTime<Utc>) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<bool>;

    /// Delete everything matching `filters`, capped at
    /// `min(max_count, MAX_DELETE_BATCH)`.
    async fn delete_by_filter(
        &self,
        filters: &SearchFilters,
        max_count: usize,
    ) -> Result<DeleteByFilterReport>;

    /// Filtered, sorted, paginated listing plus the total match count.
    async fn list(
        &self,
        filters: &SearchFilters,
        sort_by: SortField,
        sort_order: SortOrder,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<MemoryUnit>, usize)>;

    async fn count(&self, filters: Option<&SearchFilters>) -> Result<usize>;

    async fn all_projects(&self) -> Result<Vec<String>>;

    async fn project_stats(&self, project: &str) -> Result<ProjectStats>;

    async fn health_check(&self) -> Result<bool>;

    /// Drain in-flight work and release resources.
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// SHARED FILTER MATCHING
// ============================================================================

/// Evaluate the full filter contract against a unit. Used directly by the
/// in-process store and by post-filters; the Qdrant adapter translates the
/// same predicates into native payload conditions.
pub(crate) fn matches_filters(unit: &MemoryUnit, filters: &SearchFilters) -> bool {
    if let Some(level) = filters.context_level {
        if unit.context_level != level {
            return false;
        }
    }
    if let Some(scope) = filters.scope {
        if unit.scope != scope {
            return false;
        }
    }
    if let Some(ref project) = filters.project_name {
        if unit.project_name.as_deref() != Some(project.as_str()) {
            return false;
        }
    }
    if let Some(category) = filters.category {
        if unit.category != category {
            return false;
        }
    }
    if unit.importance < filters.min_importance || unit.importance > filters.max_importance {
        return false;
    }
    // Plain tag filter matches ANY of the given tags.
    if !filters.tags.is_empty() && !filters.tags.iter().any(|t| unit.tags.contains(t)) {
        return false;
    }
    if let Some(after) = filters.created_after {
        if unit.created_at < after {
            return false;
        }
    }
    if let Some(before) = filters.created_before {
        if unit.created_at > before {
            return false;
        }
    }

    let Some(ref advanced) = filters.advanced else {
        return true;
    };

    let windows = [
        (advanced.created_after, advanced.created_before, unit.created_at),
        (advanced.updated_after, advanced.updated_before, unit.updated_at),
        (
            advanced.accessed_after,
            advanced.accessed_before,
            unit.last_accessed,
        ),
    ];
    for (after, before, value) in windows {
        if let Some(after) = after {
            if value < after {
                return false;
            }
        }
        if let Some(before) = before {
            if value > before {
                return false;
            }
        }
    }

    if let Some(ref any) = advanced.tags_any {
        if !any.is_empty() && !any.iter().any(|t| unit.tags.contains(t)) {
            return false;
        }
    }
    if let Some(ref all) = advanced.tags_all {
        if !all.iter().all(|t| unit.tags.contains(t)) {
            return false;
        }
    }
    if let Some(ref none) = advanced.tags_none {
        if none.iter().any(|t| unit.tags.contains(t)) {
            return false;
        }
    }
    if let Some(ref states) = advanced.lifecycle_states {
        if !states.contains(&unit.lifecycle_state) {
            return false;
        }
    }
    if let Some(ref excluded) = advanced.exclude_categories {
        if excluded.contains(&unit.category) {
            return false;
        }
    }
    if let Some(ref excluded) = advanced.exclude_projects {
        if let Some(ref project) = unit.project_name {
            if excluded.contains(project) {
                return false;
            }
        }
    }
    if let Some(min_trust) = advanced.min_trust_score {
        if unit.provenance.confidence < min_trust {
            return false;
        }
    }
    if let Some(source) = advanced.source {
        if unit.provenance.source != source {
            return false;
        }
    }
    true
}

/// Sort a listing in place by the requested field and direction, with a
/// stable id tie-break.
pub(crate) fn sort_units(units: &mut [MemoryUnit], sort_by: SortField, sort_order: SortOrder) {
    units.sort_by(|a, b| {
        let ordering = match sort_by {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::Importance => a
                .importance
                .partial_cmp(&b.importance)
                .unwrap_or(std::cmp::Ordering::Equal),
        };
        let ordering = ordering.then_with(|| a.id.cmp(&b.id));
        match sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

/// Aggregate a deletion breakdown over the matched units.
pub(crate) fn breakdown_for(units: &[MemoryUnit]) -> DeleteBreakdown {
    let mut breakdown = DeleteBreakdown::default();
    for unit in units {
        let project = unit
            .project_name
            .clone()
            .unwrap_or_else(|| "global".to_string());
        *breakdown.by_project.entry(project).or_default() += 1;
        *breakdown
            .by_category
            .entry(unit.category.as_str().to_string())
            .or_default() += 1;
        *breakdown
            .by_lifecycle
            .entry(unit.lifecycle_state.as_str().to_string())
            .or_default() += 1;
    }
    breakdown
}

pub(crate) fn now_utc() -> DateTime<Utc> {
    Utc::now()
}
