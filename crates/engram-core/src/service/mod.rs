//! Memory service: store, retrieve, update, delete, list, merge, and the
//! aggregate views built on top of the vector store.

mod admin;
mod retrieve;

pub use admin::{MergeOutcome, MigrateOutcome, ReclassifyOutcome};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::classify::classify_content;
use crate::config::EngramConfig;
use crate::embeddings::Embedder;
use crate::error::{EngramError, Result};
use crate::health::MetricsCollector;
use crate::model::{
    ContextLevel, DeleteBreakdown, MemoryUnit, SearchFilters, SortField, SortOrder,
    StoreMemoryRequest, UpdateMemoryRequest,
};
use crate::ops::with_ceiling;
use crate::session::ConversationTracker;
use crate::store::{MemoryPatch, VectorStore, MAX_DELETE_BATCH};
use crate::usage::UsageTracker;

// ============================================================================
// SERVICE STATISTICS
// ============================================================================

/// Scalar counters guarded by a service-local mutex.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ServiceStats {
    pub memories_stored: u64,
    pub memories_retrieved: u64,
    pub memories_updated: u64,
    pub memories_deleted: u64,
    pub queries_processed: u64,
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StoreOutcome {
    pub memory_id: String,
    pub status: String,
    pub context_level: ContextLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub memory_id: String,
    pub status: String,
    pub updated_fields: Vec<String>,
    pub embedding_regenerated: bool,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub status: String,
    pub memory_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteByQueryOutcome {
    pub status: String,
    pub preview: bool,
    pub deleted_count: usize,
    pub total_matches: usize,
    pub would_delete_count: usize,
    pub breakdown: DeleteBreakdown,
    pub warnings: Vec<String>,
}

// ============================================================================
// SERVICE
// ============================================================================

/// The operation core over the data model.
///
/// Depends only on the store adapter, the embedder, and the optional
/// trackers; no inheritance, capabilities come in through the constructor.
pub struct MemoryService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    config: Arc<EngramConfig>,
    usage: Option<Arc<UsageTracker>>,
    tracker: Option<Arc<ConversationTracker>>,
    metrics: Option<Arc<MetricsCollector>>,
    project_name: Option<String>,
    stats: Mutex<ServiceStats>,
}

impl MemoryService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<Embedder>,
        config: Arc<EngramConfig>,
        usage: Option<Arc<UsageTracker>>,
        tracker: Option<Arc<ConversationTracker>>,
        metrics: Option<Arc<MetricsCollector>>,
        project_name: Option<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            usage,
            tracker,
            metrics,
            project_name,
            stats: Mutex::new(ServiceStats::default()),
        }
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    pub fn store_handle(&self) -> Arc<dyn VectorStore> {
        self.store.clone()
    }

    pub fn embedder_handle(&self) -> Arc<Embedder> {
        self.embedder.clone()
    }

    pub(crate) fn ceiling(&self) -> Duration {
        self.config.operation_timeout()
    }

    /// Conversation tracker, when session features are wired in.
    pub(crate) fn tracker(&self) -> Option<Arc<ConversationTracker>> {
        self.tracker.clone()
    }

    /// Usage tracker; present only when `analytics.usage_tracking` was
    /// enabled at wiring time.
    pub(crate) fn usage_tracker(&self) -> Option<Arc<UsageTracker>> {
        self.usage.clone()
    }

    pub(crate) fn metrics_handle(&self) -> Option<Arc<MetricsCollector>> {
        self.metrics.clone()
    }

    pub(crate) fn dedup_multiplier(&self) -> usize {
        self.config.deduplication_fetch_multiplier
    }

    pub(crate) fn conversation_vectors_enabled(&self) -> bool {
        self.config.memory.conversation_tracking
    }

    pub(crate) fn current_project(&self) -> Option<String> {
        self.project_name.clone()
    }

    pub(crate) fn note_query(&self, returned: usize) {
        self.bump(|s| {
            s.queries_processed += 1;
            s.memories_retrieved += returned as u64;
        });
    }

    pub(crate) fn record_retrieve_error(&self, err: &EngramError) {
        self.record_error("retrieve_memories", err);
    }

    fn bump<F: FnOnce(&mut ServiceStats)>(&self, f: F) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    fn guard_writable(&self, operation: &str) -> Result<()> {
        if self.config.read_only_mode {
            return Err(EngramError::read_only(operation));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // store_memory
    // ------------------------------------------------------------------

    /// Validate, classify, embed, and persist a new memory.
    pub async fn store_memory(&self, mut request: StoreMemoryRequest) -> Result<StoreOutcome> {
        self.guard_writable("store_memory")?;
        request.validate()?;
        tracing::info!(
            "storing memory: {}...",
            request.content.chars().take(50).collect::<String>()
        );

        let context_level = request
            .context_level
            .unwrap_or_else(|| classify_content(&request.content, request.category));

        let vector = self.embedder.embed(&request.content).await?;

        let unit = MemoryUnit::create(
            &request.content,
            request.category,
            context_level,
            request.scope,
            request.project_name.clone(),
            request.importance,
            self.embedder.model_name(),
            &request.tags,
            request.metadata.clone(),
        )?;

        let memory_id = with_ceiling(self.ceiling(), "store", self.store.store(&unit, vector))
            .await
            .inspect_err(|e| self.record_error("store_memory", e))?;

        self.bump(|s| s.memories_stored += 1);
        tracing::info!("stored memory: {memory_id}");
        Ok(StoreOutcome {
            memory_id,
            status: "success".to_string(),
            context_level,
        })
    }

    // ------------------------------------------------------------------
    // get / update / delete
    // ------------------------------------------------------------------

    pub async fn get_memory_by_id(&self, memory_id: &str) -> Result<Option<MemoryUnit>> {
        with_ceiling(
            self.ceiling(),
            "get_by_id",
            self.store.get_by_id(memory_id),
        )
        .await
    }

    /// Mutate named attributes only; regenerates the embedding when the
    /// content changed and the caller asked for it.
    pub async fn update_memory(&self, mut request: UpdateMemoryRequest) -> Result<UpdateOutcome> {
        self.guard_writable("update_memory")?;
        request.validate()?;

        let mut updated_fields = Vec::new();
        let mut patch = MemoryPatch {
            touch_updated_at: true,
            ..Default::default()
        };
        if let Some(ref content) = request.content {
            patch.content = Some(content.clone());
            updated_fields.push("content".to_string());
        }
        if let Some(category) = request.category {
            patch.category = Some(category);
            updated_fields.push("category".to_string());
        }
        if let Some(importance) = request.importance {
            patch.importance = Some(importance);
            updated_fields.push("importance".to_string());
        }
        if let Some(ref tags) = request.tags {
            patch.tags = Some(tags.clone());
            updated_fields.push("tags".to_string());
        }
        if let Some(ref metadata) = request.metadata {
            patch.metadata = Some(metadata.clone());
            updated_fields.push("metadata".to_string());
        }
        if let Some(level) = request.context_level {
            patch.context_level = Some(level);
            updated_fields.push("context_level".to_string());
        }
        if !request.preserve_timestamps {
            patch.created_at = Some(Utc::now());
        }

        let mut embedding_regenerated = false;
        let new_vector = match (&request.content, request.regenerate_embedding) {
            (Some(content), true) => {
                embedding_regenerated = true;
                Some(self.embedder.embed(content).await?)
            }
            _ => None,
        };

        let found = with_ceiling(
            self.ceiling(),
            "update",
            self.store.update(&request.memory_id, patch, new_vector),
        )
        .await
        .inspect_err(|e| self.record_error("update_memory", e))?;

        if !found {
            return Ok(UpdateOutcome {
                memory_id: request.memory_id,
                status: "not_found".to_string(),
                updated_fields: Vec::new(),
                embedding_regenerated: false,
                updated_at: Utc::now().to_rfc3339(),
            });
        }
        self.bump(|s| s.memories_updated += 1);
        Ok(UpdateOutcome {
            memory_id: request.memory_id,
            status: "updated".to_string(),
            updated_fields,
            embedding_regenerated,
            updated_at: Utc::now().to_rfc3339(),
        })
    }

    /// Hard delete by id.
    pub async fn delete_memory(&self, memory_id: &str) -> Result<DeleteOutcome> {
        self.guard_writable("delete_memory")?;
        if memory_id.is_empty() {
            return Err(EngramError::validation("memory_id", "memory_id is required"));
        }
        tracing::info!("deleting memory: {memory_id}");
        let deleted = with_ceiling(self.ceiling(), "delete", self.store.delete(memory_id))
            .await
            .inspect_err(|e| self.record_error("delete_memory", e))?;
        if deleted {
            self.bump(|s| s.memories_deleted += 1);
            Ok(DeleteOutcome {
                status: "success".to_string(),
                memory_id: memory_id.to_string(),
            })
        } else {
            Ok(DeleteOutcome {
                status: "not_found".to_string(),
                memory_id: memory_id.to_string(),
            })
        }
    }

    /// Query-based bulk deletion with a dry-run mode and a hard cap.
    pub async fn delete_memories_by_query(
        &self,
        filters: SearchFilters,
        max_count: usize,
        dry_run: bool,
    ) -> Result<DeleteByQueryOutcome> {
        self.guard_writable("delete_memories_by_query")?;
        if filters.is_empty() {
            return Err(EngramError::validation(
                "filters",
                "query-based deletion requires at least one filter",
            ));
        }
        let cap = max_count.min(MAX_DELETE_BATCH);

        // Preview pass feeds both the dry-run response and the warnings.
        let (candidates, total_matches) = with_ceiling(
            self.ceiling(),
            "list",
            self.store
                .list(&filters, SortField::CreatedAt, SortOrder::Asc, cap, 0),
        )
        .await?;

        let mut warnings = Vec::new();
        let important = candidates.iter().filter(|m| m.importance >= 0.8).count();
        if important > 0 {
            warnings.push(format!(
                "{important} high-importance memories (importance >= 0.8) match this deletion"
            ));
        }
        let projects: std::collections::BTreeSet<&str> = candidates
            .iter()
            .filter_map(|m| m.project_name.as_deref())
            .collect();
        if projects.len() > 1 {
            warnings.push(format!("deletion spans {} projects", projects.len()));
        }

        if dry_run {
            return Ok(DeleteByQueryOutcome {
                status: "success".to_string(),
                preview: true,
                deleted_count: 0,
                total_matches,
                would_delete_count: candidates.len(),
                breakdown: crate::store::breakdown_for(&candidates),
                warnings,
            });
        }

        let report = with_ceiling(
            self.ceiling(),
            "delete_by_filter",
            self.store.delete_by_filter(&filters, cap),
        )
        .await
        .inspect_err(|e| self.record_error("delete_memories_by_query", e))?;

        self.bump(|s| s.memories_deleted += report.deleted_count as u64);
        tracing::info!(
            "deleted {} of {} matching memories",
            report.deleted_count,
            report.total_matches
        );
        Ok(DeleteByQueryOutcome {
            status: "success".to_string(),
            preview: false,
            deleted_count: report.deleted_count,
            total_matches: report.total_matches,
            would_delete_count: report.deleted_count,
            breakdown: report.breakdown,
            warnings,
        })
    }

    fn record_error(&self, operation: &'static str, err: &EngramError) {
        if let Some(ref metrics) = self.metrics {
            metrics.log_error(operation, err.error_code());
        }
    }

    /// Drain in-flight store work and release resources, bounded by a
    /// 5-second grace window.
    pub async fn close(&self) -> Result<()> {
        with_ceiling(
            Duration::from_secs(5),
            "close",
            self.store.close(),
        )
        .await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryCategory;
    use crate::testutil::{service_fixture, store_request};

    #[tokio::test]
    async fn test_store_and_get_round_trip() {
        let fixture = service_fixture(false).await;
        let outcome = fixture
            .service
            .store_memory(store_request(
                "User prefers Python over JavaScript for backend",
                MemoryCategory::Preference,
            ))
            .await
            .unwrap();
        assert_eq!(outcome.status, "success");
        assert_eq!(outcome.context_level, ContextLevel::UserPreference);

        let unit = fixture
            .service
            .get_memory_by_id(&outcome.memory_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unit.category, MemoryCategory::Preference);
        assert_eq!(fixture.service.stats().memories_stored, 1);
    }

    #[tokio::test]
    async fn test_store_auto_classifies_event_as_session_state() {
        let fixture = service_fixture(false).await;
        let outcome = fixture
            .service
            .store_memory(store_request(
                "Currently working on refactoring the database layer",
                MemoryCategory::Event,
            ))
            .await
            .unwrap();
        assert_eq!(outcome.context_level, ContextLevel::SessionState);
    }

    #[tokio::test]
    async fn test_read_only_rejects_mutations_before_side_effects() {
        let fixture = service_fixture(true).await;
        let err = fixture
            .service
            .store_memory(store_request("anything", MemoryCategory::Fact))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "E003");
        assert_eq!(
            fixture.service.store_handle().count(None).await.unwrap(),
            0
        );

        let err = fixture.service.delete_memory("some-id").await.unwrap_err();
        assert_eq!(err.error_code(), "E003");
    }

    #[tokio::test]
    async fn test_update_changes_named_fields_only() {
        let fixture = service_fixture(false).await;
        let stored = fixture
            .service
            .store_memory(store_request("original content here", MemoryCategory::Fact))
            .await
            .unwrap();
        let before = fixture
            .service
            .get_memory_by_id(&stored.memory_id)
            .await
            .unwrap()
            .unwrap();

        let outcome = fixture
            .service
            .update_memory(UpdateMemoryRequest {
                memory_id: stored.memory_id.clone(),
                importance: Some(0.9),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.status, "updated");
        assert_eq!(outcome.updated_fields, vec!["importance"]);
        assert!(!outcome.embedding_regenerated);

        let after = fixture
            .service
            .get_memory_by_id(&stored.memory_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.content, before.content);
        assert_eq!(after.importance, 0.9);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at >= before.updated_at);
    }

    #[tokio::test]
    async fn test_update_content_regenerates_embedding() {
        let fixture = service_fixture(false).await;
        let stored = fixture
            .service
            .store_memory(store_request("first version", MemoryCategory::Fact))
            .await
            .unwrap();
        let outcome = fixture
            .service
            .update_memory(UpdateMemoryRequest {
                memory_id: stored.memory_id,
                content: Some("second version entirely different".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(outcome.embedding_regenerated);
    }

    #[tokio::test]
    async fn test_update_unknown_id_reports_not_found() {
        let fixture = service_fixture(false).await;
        let outcome = fixture
            .service
            .update_memory(UpdateMemoryRequest {
                memory_id: "nope".to_string(),
                importance: Some(0.1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.status, "not_found");
    }

    #[tokio::test]
    async fn test_delete_outcomes() {
        let fixture = service_fixture(false).await;
        let stored = fixture
            .service
            .store_memory(store_request("to be deleted", MemoryCategory::Fact))
            .await
            .unwrap();
        let outcome = fixture
            .service
            .delete_memory(&stored.memory_id)
            .await
            .unwrap();
        assert_eq!(outcome.status, "success");
        let outcome = fixture
            .service
            .delete_memory(&stored.memory_id)
            .await
            .unwrap();
        assert_eq!(outcome.status, "not_found");
    }

    #[tokio::test]
    async fn test_delete_by_query_dry_run_leaves_corpus_unchanged() {
        let fixture = service_fixture(false).await;
        for i in 0..5 {
            let mut request = store_request(&format!("project memory {i}"), MemoryCategory::Fact);
            request.scope = crate::model::MemoryScope::Project;
            request.project_name = Some("P".to_string());
            fixture.service.store_memory(request).await.unwrap();
        }

        let filters = SearchFilters::for_project("P");
        let preview = fixture
            .service
            .delete_memories_by_query(filters.clone(), MAX_DELETE_BATCH, true)
            .await
            .unwrap();
        assert!(preview.preview);
        assert_eq!(preview.deleted_count, 0);
        assert_eq!(preview.total_matches, 5);
        assert_eq!(
            fixture
                .service
                .store_handle()
                .count(Some(&filters))
                .await
                .unwrap(),
            5
        );

        let real = fixture
            .service
            .delete_memories_by_query(filters.clone(), MAX_DELETE_BATCH, false)
            .await
            .unwrap();
        assert_eq!(real.deleted_count, 5);
        assert_eq!(
            fixture
                .service
                .store_handle()
                .count(Some(&filters))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_delete_by_query_warns_on_high_importance() {
        let fixture = service_fixture(false).await;
        let mut request = store_request("crucial memory", MemoryCategory::Fact);
        request.importance = 0.95;
        request.tags = vec!["keep".to_string()];
        fixture.service.store_memory(request).await.unwrap();

        let filters = SearchFilters {
            tags: vec!["keep".to_string()],
            ..Default::default()
        };
        let preview = fixture
            .service
            .delete_memories_by_query(filters, 10, true)
            .await
            .unwrap();
        assert!(preview.warnings.iter().any(|w| w.contains("high-importance")));
    }

    #[tokio::test]
    async fn test_delete_by_query_requires_filters() {
        let fixture = service_fixture(false).await;
        let err = fixture
            .service
            .delete_memories_by_query(SearchFilters::default(), 10, false)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "E002");
    }
}
