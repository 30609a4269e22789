//! Listing, scope migration, reclassification, merging, and aggregate
//! views.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::error::{EngramError, Result};
use crate::model::{
    ContextLevel, ListPage, ListRequest, MemoryScope, MemoryUnit, MergeStrategy, SearchFilters,
    SortField, SortOrder,
};
use crate::ops::with_ceiling;
use crate::service::MemoryService;
use crate::store::MemoryPatch;

/// Ceiling on internal scans that back bulk operations.
const BULK_SCAN_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct MigrateOutcome {
    pub status: String,
    pub memory_id: String,
    pub scope: String,
    pub project_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReclassifyOutcome {
    pub status: String,
    pub count: usize,
    pub new_context_level: ContextLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub status: String,
    pub merged_id: String,
    pub source_ids: Vec<String>,
    pub count: usize,
    pub strategy: MergeStrategy,
}

impl MemoryService {
    // ------------------------------------------------------------------
    // list
    // ------------------------------------------------------------------

    /// Paginated browsing with filters and sorting.
    pub async fn list_memories(&self, mut request: ListRequest) -> Result<ListPage> {
        let filters = request.validate()?;
        let (memories, total_count) = with_ceiling(
            self.ceiling(),
            "list",
            self.store_handle().list(
                &filters,
                request.sort_by,
                request.sort_order,
                request.limit,
                request.offset,
            ),
        )
        .await?;

        let returned_count = memories.len();
        tracing::info!("listed {returned_count} memories (total {total_count})");
        Ok(ListPage {
            memories,
            total_count,
            returned_count,
            offset: request.offset,
            limit: request.limit,
            has_more: request.offset + returned_count < total_count,
        })
    }

    // ------------------------------------------------------------------
    // migrate scope
    // ------------------------------------------------------------------

    /// Reassign scope and project binding atomically.
    pub async fn migrate_memory_scope(
        &self,
        memory_id: &str,
        new_project_name: Option<String>,
    ) -> Result<MigrateOutcome> {
        self.guard_writable("migrate_memory_scope")?;
        let scope = match new_project_name {
            Some(_) => MemoryScope::Project,
            None => MemoryScope::Global,
        };
        let patch = MemoryPatch {
            scope: Some(scope),
            project_name: Some(new_project_name.clone()),
            touch_updated_at: true,
            ..Default::default()
        };
        let found = with_ceiling(
            self.ceiling(),
            "update",
            self.store_handle().update(memory_id, patch, None),
        )
        .await?;

        if !found {
            return Ok(MigrateOutcome {
                status: "not_found".to_string(),
                memory_id: memory_id.to_string(),
                scope: scope.as_str().to_string(),
                project_name: new_project_name,
            });
        }
        tracing::info!(
            "migrated memory {memory_id} to scope {}",
            new_project_name.as_deref().unwrap_or("global")
        );
        Ok(MigrateOutcome {
            status: "success".to_string(),
            memory_id: memory_id.to_string(),
            scope: scope.as_str().to_string(),
            project_name: new_project_name,
        })
    }

    // ------------------------------------------------------------------
    // bulk reclassify
    // ------------------------------------------------------------------

    /// Set a new context level on every memory matching the filters.
    pub async fn bulk_reclassify(
        &self,
        new_context_level: ContextLevel,
        project_name: Option<String>,
        current_context_level: Option<ContextLevel>,
        category: Option<crate::model::MemoryCategory>,
    ) -> Result<ReclassifyOutcome> {
        self.guard_writable("bulk_reclassify")?;
        let filters = SearchFilters {
            project_name,
            context_level: current_context_level,
            category,
            ..Default::default()
        };
        let (matched, _total) = with_ceiling(
            self.ceiling(),
            "list",
            self.store_handle().list(
                &filters,
                SortField::CreatedAt,
                SortOrder::Asc,
                BULK_SCAN_LIMIT,
                0,
            ),
        )
        .await?;

        let mut count = 0;
        let mut errors = 0;
        for unit in &matched {
            let patch = MemoryPatch {
                context_level: Some(new_context_level),
                touch_updated_at: true,
                ..Default::default()
            };
            match self.store_handle().update(&unit.id, patch, None).await {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => {
                    errors += 1;
                    tracing::warn!("reclassify failed for {}: {e}", unit.id);
                }
            }
        }

        tracing::info!(
            "bulk reclassified {count} memories to {} ({errors} errors)",
            new_context_level.as_str()
        );
        Ok(ReclassifyOutcome {
            status: if errors == 0 { "success" } else { "partial" }.to_string(),
            count,
            new_context_level,
        })
    }

    // ------------------------------------------------------------------
    // merge
    // ------------------------------------------------------------------

    /// Collapse two or more memories into one survivor.
    pub async fn merge_memories(
        &self,
        memory_ids: &[String],
        keep_id: Option<String>,
        strategy: Option<MergeStrategy>,
    ) -> Result<MergeOutcome> {
        self.guard_writable("merge_memories")?;
        if memory_ids.len() < 2 {
            return Err(EngramError::validation(
                "memory_ids",
                "need at least 2 memories to merge",
            ));
        }

        let mut units = Vec::with_capacity(memory_ids.len());
        for id in memory_ids {
            match self.get_memory_by_id(id).await? {
                Some(unit) => units.push(unit),
                None => return Err(EngramError::not_found(id.clone())),
            }
        }

        let strategy = match keep_id {
            Some(_) => MergeStrategy::UserSelected,
            None => strategy.unwrap_or_default(),
        };
        let survivor_id = match (&keep_id, strategy) {
            (Some(keep), _) => {
                if !memory_ids.contains(keep) {
                    return Err(EngramError::validation(
                        "keep_id",
                        "keep_id must be one of memory_ids",
                    ));
                }
                keep.clone()
            }
            (None, MergeStrategy::KeepHighestImportance) => units
                .iter()
                .max_by(|a, b| {
                    a.importance
                        .partial_cmp(&b.importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|u| u.id.clone())
                .expect("non-empty"),
            (None, MergeStrategy::KeepMostAccessed) => {
                let usage = self.usage_tracker();
                units
                    .iter()
                    .max_by_key(|u| {
                        usage
                            .as_ref()
                            .and_then(|t| t.get_usage_stats(&u.id))
                            .map(|s| s.use_count)
                            .unwrap_or(0)
                    })
                    .map(|u| u.id.clone())
                    .expect("non-empty")
            }
            // KeepMostRecent, MergeContent, and the UserSelected fallback
            // all anchor on the newest record.
            (None, _) => units
                .iter()
                .max_by_key(|u| u.updated_at)
                .map(|u| u.id.clone())
                .expect("non-empty"),
        };

        let survivor = units
            .iter()
            .find(|u| u.id == survivor_id)
            .expect("survivor is in the set")
            .clone();
        let absorbed: Vec<&MemoryUnit> =
            units.iter().filter(|u| u.id != survivor_id).collect();

        // Union tags, keep the highest importance seen.
        let mut tags = survivor.tags.clone();
        for unit in &absorbed {
            for tag in &unit.tags {
                if !tags.contains(tag) && tags.len() < crate::model::MAX_TAGS {
                    tags.push(tag.clone());
                }
            }
        }
        let importance = units
            .iter()
            .map(|u| u.importance)
            .fold(survivor.importance, f64::max);

        let merged_content = (strategy == MergeStrategy::MergeContent).then(|| {
            let mut parts = vec![survivor.content.clone()];
            parts.extend(absorbed.iter().map(|u| u.content.clone()));
            parts.join("\n\n")
        });
        let new_vector = match &merged_content {
            Some(content) => Some(self.embedder_handle().embed(content).await?),
            None => None,
        };

        // The surviving record references the absorbed ids.
        let mut metadata = survivor.metadata.clone();
        metadata.insert(
            "merged_from".to_string(),
            json!(absorbed.iter().map(|u| u.id.clone()).collect::<Vec<_>>()),
        );
        metadata.insert("merged_at".to_string(), json!(Utc::now().to_rfc3339()));
        metadata.insert("merge_strategy".to_string(), json!(strategy));

        let patch = MemoryPatch {
            content: merged_content,
            tags: Some(tags),
            importance: Some(importance),
            metadata: Some(metadata),
            touch_updated_at: true,
            ..Default::default()
        };
        let updated = with_ceiling(
            self.ceiling(),
            "update",
            self.store_handle().update(&survivor_id, patch, new_vector),
        )
        .await?;
        if !updated {
            return Err(EngramError::not_found(survivor_id));
        }

        // Absorbed records go away in the same logical operation.
        for unit in &absorbed {
            if let Err(e) = self.store_handle().delete(&unit.id).await {
                tracing::warn!("failed to delete absorbed memory {}: {e}", unit.id);
            }
        }

        tracing::info!(
            "merged {} memories into {survivor_id}",
            memory_ids.len()
        );
        Ok(MergeOutcome {
            status: "success".to_string(),
            merged_id: survivor_id,
            source_ids: memory_ids.to_vec(),
            count: memory_ids.len(),
            strategy,
        })
    }

    // ------------------------------------------------------------------
    // aggregate views
    // ------------------------------------------------------------------

    /// Aggregated statistics for dashboards.
    pub async fn get_dashboard_stats(&self) -> Result<serde_json::Value> {
        let store = self.store_handle();
        let total_memories =
            with_ceiling(self.ceiling(), "count", store.count(None)).await?;
        let projects = with_ceiling(self.ceiling(), "projects", store.all_projects()).await?;

        let mut project_stats = Vec::new();
        let mut categories = std::collections::BTreeMap::<String, usize>::new();
        let mut lifecycle_states = std::collections::BTreeMap::<String, usize>::new();
        for project in &projects {
            match store.project_stats(project).await {
                Ok(stats) => {
                    for (category, count) in &stats.categories {
                        *categories.entry(category.clone()).or_default() += count;
                    }
                    for (state, count) in &stats.lifecycle_states {
                        *lifecycle_states.entry(state.clone()).or_default() += count;
                    }
                    project_stats.push(stats);
                }
                Err(e) => {
                    tracing::warn!("failed to get stats for project {project}: {e}");
                }
            }
        }

        let global_filters = SearchFilters {
            scope: Some(MemoryScope::Global),
            ..Default::default()
        };
        let global_memories = store.count(Some(&global_filters)).await.unwrap_or(0);

        Ok(json!({
            "status": "success",
            "total_memories": total_memories,
            "num_projects": projects.len(),
            "global_memories": global_memories,
            "projects": project_stats,
            "categories": categories,
            "lifecycle_states": lifecycle_states,
        }))
    }

    /// Most recently created and updated memories.
    pub async fn get_recent_activity(
        &self,
        limit: usize,
        project_name: Option<String>,
    ) -> Result<serde_json::Value> {
        let limit = limit.clamp(1, 100);
        let filters = SearchFilters {
            project_name,
            ..Default::default()
        };
        let (additions, _) = with_ceiling(
            self.ceiling(),
            "list",
            self.store_handle()
                .list(&filters, SortField::CreatedAt, SortOrder::Desc, limit, 0),
        )
        .await?;
        let (updates, _) = with_ceiling(
            self.ceiling(),
            "list",
            self.store_handle()
                .list(&filters, SortField::UpdatedAt, SortOrder::Desc, limit, 0),
        )
        .await?;

        let brief = |unit: &MemoryUnit| {
            json!({
                "memory_id": unit.id,
                "content": unit.content.chars().take(120).collect::<String>(),
                "category": unit.category,
                "project_name": unit.project_name,
                "created_at": unit.created_at,
                "updated_at": unit.updated_at,
            })
        };
        Ok(json!({
            "status": "success",
            "recent_additions": additions.iter().map(brief).collect::<Vec<_>>(),
            "recent_updates": updates.iter().map(brief).collect::<Vec<_>>(),
        }))
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
    async fn test_list_pagination_shape() {
        let fixture = service_fixture(false).await;
        for i in 0..7 {
            fixture
                .service
                .store_memory(store_request(&format!("entry {i}"), MemoryCategory::Fact))
                .await
                .unwrap();
        }
        let page = fixture
            .service
            .list_memories(ListRequest {
                limit: 3,
                offset: 5,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total_count, 7);
        assert_eq!(page.returned_count, 2);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_list_rejects_bad_bounds() {
        let fixture = service_fixture(false).await;
        let err = fixture
            .service
            .list_memories(ListRequest {
                limit: 0,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "E002");
    }

    #[tokio::test]
    async fn test_migrate_scope_round_trip() {
        let fixture = service_fixture(false).await;
        let stored = fixture
            .service
            .store_memory(store_request("movable memory", MemoryCategory::Fact))
            .await
            .unwrap();

        let outcome = fixture
            .service
            .migrate_memory_scope(&stored.memory_id, Some("new-project".to_string()))
            .await
            .unwrap();
        assert_eq!(outcome.status, "success");

        let unit = fixture
            .service
            .get_memory_by_id(&stored.memory_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unit.scope, MemoryScope::Project);
        assert_eq!(unit.project_name.as_deref(), Some("new-project"));

        let outcome = fixture
            .service
            .migrate_memory_scope(&stored.memory_id, None)
            .await
            .unwrap();
        assert_eq!(outcome.scope, "global");
        let unit = fixture
            .service
            .get_memory_by_id(&stored.memory_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unit.scope, MemoryScope::Global);
        assert!(unit.project_name.is_none());
    }

    #[tokio::test]
    async fn test_bulk_reclassify_counts() {
        let fixture = service_fixture(false).await;
        for i in 0..3 {
            fixture
                .service
                .store_memory(store_request(
                    &format!("workflow note {i} for the build"),
                    MemoryCategory::Workflow,
                ))
                .await
                .unwrap();
        }
        let outcome = fixture
            .service
            .bulk_reclassify(
                ContextLevel::SessionState,
                None,
                None,
                Some(MemoryCategory::Workflow),
            )
            .await
            .unwrap();
        assert_eq!(outcome.count, 3);
        assert_eq!(outcome.status, "success");
    }

    #[tokio::test]
    async fn test_merge_keeps_survivor_and_absorbs_rest() {
        let fixture = service_fixture(false).await;
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut request =
                store_request(&format!("duplicate note variant {i}"), MemoryCategory::Fact);
            request.importance = 0.3 + i as f64 * 0.2;
            request.tags = vec![format!("tag{i}")];
            ids.push(
                fixture
                    .service
                    .store_memory(request)
                    .await
                    .unwrap()
                    .memory_id,
            );
        }

        let outcome = fixture
            .service
            .merge_memories(&ids, None, Some(MergeStrategy::KeepHighestImportance))
            .await
            .unwrap();
        assert_eq!(outcome.merged_id, ids[2]);

        let survivor = fixture
            .service
            .get_memory_by_id(&outcome.merged_id)
            .await
            .unwrap()
            .unwrap();
        let merged_from = survivor.metadata.get("merged_from").unwrap();
        assert_eq!(merged_from.as_array().unwrap().len(), 2);
        assert_eq!(survivor.importance, 0.7);
        assert!(survivor.tags.len() >= 3);

        for id in &ids[..2] {
            assert!(fixture.service.get_memory_by_id(id).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_merge_requires_two_ids() {
        let fixture = service_fixture(false).await;
        let err = fixture
            .service
            .merge_memories(&["one".to_string()], None, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "E002");
    }

    #[tokio::test]
    async fn test_merge_missing_id_is_not_found() {
        let fixture = service_fixture(false).await;
        let stored = fixture
            .service
            .store_memory(store_request("only one", MemoryCategory::Fact))
            .await
            .unwrap();
        let err = fixture
            .service
            .merge_memories(
                &[stored.memory_id, "ghost".to_string()],
                None,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "E012");
    }

    #[tokio::test]
    async fn test_dashboard_stats_aggregate() {
        let fixture = service_fixture(false).await;
        fixture
            .service
            .store_memory(store_request("global note", MemoryCategory::Fact))
            .await
            .unwrap();
        let mut request = store_request("project note", MemoryCategory::Fact);
        request.scope = MemoryScope::Project;
        request.project_name = Some("alpha".to_string());
        fixture.service.store_memory(request).await.unwrap();

        let stats = fixture.service.get_dashboard_stats().await.unwrap();
        assert_eq!(stats["total_memories"], 2);
        assert_eq!(stats["num_projects"], 1);
        assert_eq!(stats["global_memories"], 1);
    }

    #[tokio::test]
    async fn test_recent_activity_lists_additions() {
        let fixture = service_fixture(false).await;
        fixture
            .service
            .store_memory(store_request("fresh addition", MemoryCategory::Fact))
            .await
            .unwrap();
        let activity = fixture
            .service
            .get_recent_activity(10, None)
            .await
            .unwrap();
        assert_eq!(activity["recent_additions"].as_array().unwrap().len(), 1);
    }
}
