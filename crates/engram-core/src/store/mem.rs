//! In-process vector store.
//!
//! Brute-force cosine scan over an id-keyed arena. This is the embedded
//! backend for tests and single-process deployments; the Qdrant adapter is
//! the reference production backend. Both implement the same trait and the
//! same filter contract.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::embeddings::cosine_similarity;
use crate::error::{EngramError, Result};
use crate::model::{
    MemoryUnit, ProjectStats, ScoredUnit, SearchFilters, SortField, SortOrder,
};
use crate::store::{
    breakdown_for, matches_filters, now_utc, sort_units, DeleteByFilterReport, MemoryPatch,
    VectorStore, MAX_DELETE_BATCH,
};

/// Flat arena of records keyed by id; vectors live next to their payloads.
#[derive(Default)]
pub struct MemoryStore {
    points: RwLock<HashMap<String, (MemoryUnit, Vec<f32>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalized_score(query: &[f32], vector: &[f32]) -> f32 {
        // Map cosine [-1, 1] into the contract range [0, 1].
        let cosine = cosine_similarity(query, vector);
        ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
    }

    async fn matching_units(&self, filters: &SearchFilters) -> Vec<MemoryUnit> {
        let now = now_utc();
        let points = self.points.read().await;
        points
            .values()
            .map(|(unit, _)| {
                let mut unit = unit.clone();
                unit.refresh_lifecycle(now);
                unit
            })
            .filter(|unit| matches_filters(unit, filters))
            .collect()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn store(&self, unit: &MemoryUnit, vector: Vec<f32>) -> Result<String> {
        let mut points = self.points.write().await;
        points.insert(unit.id.clone(), (unit.clone(), vector));
        Ok(unit.id.clone())
    }

    async fn batch_store(&self, items: Vec<(MemoryUnit, Vec<f32>)>) -> Result<Vec<String>> {
        let mut points = self.points.write().await;
        let mut ids = Vec::with_capacity(items.len());
        for (unit, vector) in items {
            ids.push(unit.id.clone());
            points.insert(unit.id.clone(), (unit, vector));
        }
        Ok(ids)
    }

    async fn retrieve(
        &self,
        query_vector: &[f32],
        filters: Option<&SearchFilters>,
        limit: usize,
    ) -> Result<Vec<ScoredUnit>> {
        let now = now_utc();
        let points = self.points.read().await;
        let mut scored: Vec<ScoredUnit> = points
            .values()
            .filter_map(|(unit, vector)| {
                let mut unit = unit.clone();
                unit.refresh_lifecycle(now);
                if let Some(filters) = filters {
                    if !matches_filters(&unit, filters) {
                        return None;
                    }
                }
                let score = Self::normalized_score(query_vector, vector);
                Some(ScoredUnit { unit, score })
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.unit.id.cmp(&b.unit.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<MemoryUnit>> {
        let points = self.points.read().await;
        Ok(points.get(id).map(|(unit, _)| {
            let mut unit = unit.clone();
            unit.refresh_lifecycle(now_utc());
            unit
        }))
    }

    async fn update(
        &self,
        id: &str,
        patch: MemoryPatch,
        new_vector: Option<Vec<f32>>,
    ) -> Result<bool> {
        let mut points = self.points.write().await;
        let Some((unit, vector)) = points.get_mut(id) else {
            return Ok(false);
        };
        // Build the replacement off to the side so readers never observe a
        // half-applied record even if validation fails.
        let mut updated = unit.clone();
        patch.apply(&mut updated, now_utc());
        updated.validate()?;
        *unit = updated;
        if let Some(v) = new_vector {
            *vector = v;
        }
        Ok(true)
    }

    async fn touch(&self, ids: &[String], at: DateTime<Utc>) -> Result<()> {
        let mut points = self.points.write().await;
        for id in ids {
            if let Some((unit, _)) = points.get_mut(id) {
                unit.touch(at);
            }
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut points = self.points.write().await;
        Ok(points.remove(id).is_some())
    }

    async fn delete_by_filter(
        &self,
        filters: &SearchFilters,
        max_count: usize,
    ) -> Result<DeleteByFilterReport> {
        let cap = max_count.min(MAX_DELETE_BATCH);
        let mut matched = self.matching_units(filters).await;
        let total_matches = matched.len();
        // Deterministic victim order under the cap.
        sort_units(&mut matched, SortField::CreatedAt, SortOrder::Asc);
        matched.truncate(cap);

        let mut points = self.points.write().await;
        for unit in &matched {
            points.remove(&unit.id);
        }
        Ok(DeleteByFilterReport {
            deleted_count: matched.len(),
            total_matches,
            breakdown: breakdown_for(&matched),
        })
    }

    async fn list(
        &self,
        filters: &SearchFilters,
        sort_by: SortField,
        sort_order: SortOrder,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<MemoryUnit>, usize)> {
        let mut matched = self.matching_units(filters).await;
        let total = matched.len();
        sort_units(&mut matched, sort_by, sort_order);
        let page = matched.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn count(&self, filters: Option<&SearchFilters>) -> Result<usize> {
        match filters {
            None => Ok(self.points.read().await.len()),
            Some(filters) => Ok(self.matching_units(filters).await.len()),
        }
    }

    async fn all_projects(&self) -> Result<Vec<String>> {
        let points = self.points.read().await;
        let mut projects: Vec<String> = points
            .values()
            .filter_map(|(unit, _)| unit.project_name.clone())
            .collect();
        projects.sort();
        projects.dedup();
        Ok(projects)
    }

    async fn project_stats(&self, project: &str) -> Result<ProjectStats> {
        let units = self
            .matching_units(&SearchFilters::for_project(project))
            .await;
        if units.is_empty() {
            return Err(EngramError::not_found(project));
        }
        let mut stats = ProjectStats {
            project_name: project.to_string(),
            memory_count: units.len(),
            ..Default::default()
        };
        let mut importance_sum = 0.0;
        for unit in &units {
            *stats
                .categories
                .entry(unit.category.as_str().to_string())
                .or_default() += 1;
            *stats
                .lifecycle_states
                .entry(unit.lifecycle_state.as_str().to_string())
                .or_default() += 1;
            importance_sum += unit.importance;
        }
        stats.avg_importance = importance_sum / units.len() as f64;
        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContextLevel, MemoryCategory, MemoryScope};

    fn unit(content: &str, project: Option<&str>) -> MemoryUnit {
        let scope = if project.is_some() {
            MemoryScope::Project
        } else {
            MemoryScope::Global
        };
        MemoryUnit::create(
            content,
            MemoryCategory::Fact,
            ContextLevel::ProjectContext,
            scope,
            project.map(String::from),
            0.5,
            "test-model",
            &[],
            serde_json::Map::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let store = MemoryStore::new();
        let m = unit("hello", None);
        let id = store.store(&m, vec![1.0, 0.0]).await.unwrap();
        let got = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(got.content, "hello");
        assert!(store.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retrieve_orders_by_score() {
        let store = MemoryStore::new();
        let a = unit("close", None);
        let b = unit("far", None);
        store.store(&a, vec![1.0, 0.0]).await.unwrap();
        store.store(&b, vec![0.0, 1.0]).await.unwrap();

        let results = store.retrieve(&[1.0, 0.0], None, 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].unit.id, a.id);
        assert!(results[0].score > results[1].score);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    }

    #[tokio::test]
    async fn test_filters_restrict_results() {
        let store = MemoryStore::new();
        store
            .store(&unit("p1 fact", Some("p1")), vec![1.0, 0.0])
            .await
            .unwrap();
        store
            .store(&unit("p2 fact", Some("p2")), vec![1.0, 0.0])
            .await
            .unwrap();

        let filters = SearchFilters::for_project("p1");
        let results = store
            .retrieve(&[1.0, 0.0], Some(&filters), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].unit.project_name.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_update_is_atomic_and_validated() {
        let store = MemoryStore::new();
        let m = unit("original", None);
        store.store(&m, vec![1.0]).await.unwrap();

        let patch = MemoryPatch {
            importance: Some(2.0),
            touch_updated_at: true,
            ..Default::default()
        };
        assert!(store.update(&m.id, patch, None).await.is_err());
        // Failed update leaves the old record fully intact.
        let got = store.get_by_id(&m.id).await.unwrap().unwrap();
        assert_eq!(got.importance, 0.5);

        let patch = MemoryPatch {
            content: Some("replaced".to_string()),
            touch_updated_at: true,
            ..Default::default()
        };
        assert!(store.update(&m.id, patch, None).await.unwrap());
        let got = store.get_by_id(&m.id).await.unwrap().unwrap();
        assert_eq!(got.content, "replaced");
        assert!(got.updated_at >= got.created_at);
    }

    #[tokio::test]
    async fn test_delete_by_filter_caps_and_reports() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .store(&unit(&format!("m{i}"), Some("p")), vec![1.0])
                .await
                .unwrap();
        }
        let filters = SearchFilters::for_project("p");
        let report = store.delete_by_filter(&filters, 3).await.unwrap();
        assert_eq!(report.deleted_count, 3);
        assert_eq!(report.total_matches, 5);
        assert_eq!(report.breakdown.by_project["p"], 3);
        assert_eq!(store.count(Some(&filters)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_pagination_and_sort() {
        let store = MemoryStore::new();
        for i in 0..7 {
            let mut m = unit(&format!("m{i}"), None);
            m.importance = i as f64 / 10.0;
            store.store(&m, vec![1.0]).await.unwrap();
        }
        let (page, total) = store
            .list(
                &SearchFilters::default(),
                SortField::Importance,
                SortOrder::Desc,
                3,
                2,
            )
            .await
            .unwrap();
        assert_eq!(total, 7);
        assert_eq!(page.len(), 3);
        assert!(page[0].importance >= page[1].importance);
    }

    #[tokio::test]
    async fn test_project_stats() {
        let store = MemoryStore::new();
        store
            .store(&unit("a", Some("proj")), vec![1.0])
            .await
            .unwrap();
        store
            .store(&unit("b", Some("proj")), vec![1.0])
            .await
            .unwrap();
        let stats = store.project_stats("proj").await.unwrap();
        assert_eq!(stats.memory_count, 2);
        assert_eq!(stats.categories["fact"], 2);
        assert!(store.project_stats("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_batch_store_idempotent() {
        let store = MemoryStore::new();
        let m = unit("same", None);
        let items = vec![(m.clone(), vec![1.0])];
        store.batch_store(items.clone()).await.unwrap();
        store.batch_store(items).await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 1);
    }
}
