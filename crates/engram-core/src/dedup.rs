//! Duplicate detection over the memory corpus.
//!
//! Cosine-similarity clustering with three confidence bands:
//! high (auto-merge safe), medium (user review), low (flag as related).
//! Corpus-wide scans collapse symmetric pairs into clusters with union-find
//! and pick a canonical member per cluster.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::embeddings::Embedder;
use crate::error::{EngramError, Result};
use crate::model::{MemoryCategory, MemoryUnit, ScoredUnit, SearchFilters, SortField, SortOrder};
use crate::store::VectorStore;

/// Wide net cast per memory when hunting duplicates.
const CANDIDATE_LIMIT: usize = 100;

/// Ceiling on corpus scans.
const SCAN_LIMIT: usize = 10_000;

// ============================================================================
// CLUSTER TYPES
// ============================================================================

/// Confidence band for a similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityBand {
    High,
    Medium,
    Low,
    None,
}

/// Member of a duplicate cluster.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateMember {
    pub id: String,
    pub file_path: String,
    pub unit_name: String,
    pub similarity: f32,
    pub line_count: u64,
}

/// A group of near-identical memories with a canonical representative.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCluster {
    pub canonical_id: String,
    pub canonical_name: String,
    pub canonical_file: String,
    pub members: Vec<DuplicateMember>,
    pub average_similarity: f32,
    pub cluster_size: usize,
}

// ============================================================================
// DETECTOR
// ============================================================================

/// Stateless between calls; all transient state lives on the stack.
pub struct DuplicateDetector {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    high_threshold: f32,
    medium_threshold: f32,
    low_threshold: f32,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<Embedder>) -> Self {
        Self::with_thresholds(store, embedder, 0.95, 0.85, 0.75)
            .expect("default thresholds are ordered")
    }

    pub fn with_thresholds(
        store: Arc<dyn VectorStore>,
        embedder: Arc<Embedder>,
        high: f32,
        medium: f32,
        low: f32,
    ) -> Result<Self> {
        if !(0.0 <= low && low <= medium && medium <= high && high <= 1.0) {
            return Err(EngramError::validation(
                "thresholds",
                "thresholds must satisfy 0 <= low <= medium <= high <= 1",
            ));
        }
        Ok(Self {
            store,
            embedder,
            high_threshold: high,
            medium_threshold: medium,
            low_threshold: low,
        })
    }

    /// Band a similarity score.
    pub fn classify_similarity(&self, score: f32) -> SimilarityBand {
        if score >= self.high_threshold {
            SimilarityBand::High
        } else if score >= self.medium_threshold {
            SimilarityBand::Medium
        } else if score >= self.low_threshold {
            SimilarityBand::Low
        } else {
            SimilarityBand::None
        }
    }

    /// Find memories similar to `memory`, above `min_threshold` (defaults to
    /// the low band), sorted by score descending.
    pub async fn find_duplicates(
        &self,
        memory: &MemoryUnit,
        min_threshold: Option<f32>,
    ) -> Result<Vec<ScoredUnit>> {
        let threshold = min_threshold.unwrap_or(self.low_threshold);
        let vector = self.embedder.embed(&memory.content).await?;

        // Same category/scope/project narrows the candidate set.
        let filters = SearchFilters {
            category: Some(memory.category),
            scope: Some(memory.scope),
            project_name: memory.project_name.clone(),
            ..Default::default()
        };
        let candidates = self
            .store
            .retrieve(&vector, Some(&filters), CANDIDATE_LIMIT)
            .await?;

        let mut duplicates: Vec<ScoredUnit> = candidates
            .into_iter()
            .filter(|c| c.unit.id != memory.id && c.score >= threshold)
            .collect();
        duplicates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        tracing::debug!(
            "found {} duplicates for {} (threshold={threshold:.2})",
            duplicates.len(),
            &memory.id[..8.min(memory.id.len())]
        );
        Ok(duplicates)
    }

    /// Scan the corpus and group symmetric duplicate pairs into clusters.
    pub async fn cluster_duplicates(
        &self,
        min_threshold: Option<f32>,
        project_name: Option<String>,
        category: Option<MemoryCategory>,
    ) -> Result<Vec<DuplicateCluster>> {
        let threshold = min_threshold.unwrap_or(self.medium_threshold);
        let filters = SearchFilters {
            project_name,
            category,
            ..Default::default()
        };
        let (all, _) = self
            .store
            .list(&filters, SortField::CreatedAt, SortOrder::Asc, SCAN_LIMIT, 0)
            .await?;
        if all.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!("clustering {} memories (threshold={threshold:.2})", all.len());

        // Symmetric pair set, deduplicated by ordered id pair.
        let mut edges: HashMap<(String, String), f32> = HashMap::new();
        for unit in &all {
            let duplicates = self.find_duplicates(unit, Some(threshold)).await?;
            for dup in duplicates {
                let (a, b) = if unit.id <= dup.unit.id {
                    (unit.id.clone(), dup.unit.id.clone())
                } else {
                    (dup.unit.id.clone(), unit.id.clone())
                };
                let entry = edges.entry((a, b)).or_insert(dup.score);
                if dup.score > *entry {
                    *entry = dup.score;
                }
            }
        }

        let clusters = union_find_clusters(&all, &edges);
        let by_id: HashMap<&str, &MemoryUnit> =
            all.iter().map(|u| (u.id.as_str(), u)).collect();

        let mut result = Vec::new();
        for (root, member_ids) in clusters {
            if member_ids.is_empty() {
                continue;
            }
            let mut cluster_ids = vec![root.clone()];
            cluster_ids.extend(member_ids.iter().cloned());
            let canonical_id = select_canonical(&cluster_ids, &by_id);
            let Some(canonical) = by_id.get(canonical_id.as_str()) else {
                continue;
            };

            let mut members = Vec::new();
            let mut total_similarity = 0.0f32;
            for id in cluster_ids.iter().filter(|id| **id != canonical_id) {
                let Some(unit) = by_id.get(id.as_str()) else {
                    continue;
                };
                let pair = if canonical_id <= *id {
                    (canonical_id.clone(), (*id).clone())
                } else {
                    ((*id).clone(), canonical_id.clone())
                };
                let similarity = edges.get(&pair).copied().unwrap_or(0.0);
                total_similarity += similarity;
                members.push(DuplicateMember {
                    id: (*id).clone(),
                    file_path: metadata_str(unit, "file_path"),
                    unit_name: metadata_str(unit, "unit_name"),
                    similarity,
                    line_count: metadata_u64(unit, "line_count"),
                });
            }
            if members.is_empty() {
                continue;
            }
            let average_similarity = total_similarity / members.len() as f32;
            result.push(DuplicateCluster {
                canonical_id: canonical_id.clone(),
                canonical_name: metadata_str(canonical, "unit_name"),
                canonical_file: metadata_str(canonical, "file_path"),
                cluster_size: members.len() + 1,
                members,
                average_similarity,
            });
        }
        result.sort_by(|a, b| b.cluster_size.cmp(&a.cluster_size));
        tracing::info!("found {} duplicate clusters", result.len());
        Ok(result)
    }

    /// Clusters safe for automatic merging: every member in the high band.
    pub async fn auto_merge_candidates(
        &self,
        category: Option<MemoryCategory>,
    ) -> Result<Vec<DuplicateCluster>> {
        let clusters = self
            .cluster_duplicates(Some(self.high_threshold), None, category)
            .await?;
        Ok(clusters
            .into_iter()
            .filter(|c| c.members.iter().all(|m| m.similarity >= self.high_threshold))
            .collect())
    }

    /// Clusters with at least one medium-band member: queued for review.
    pub async fn user_review_candidates(
        &self,
        category: Option<MemoryCategory>,
    ) -> Result<Vec<DuplicateCluster>> {
        let clusters = self
            .cluster_duplicates(Some(self.medium_threshold), None, category)
            .await?;
        Ok(clusters
            .into_iter()
            .filter(|c| {
                c.members.iter().any(|m| {
                    m.similarity >= self.medium_threshold && m.similarity < self.high_threshold
                })
            })
            .collect())
    }

    /// Duplication score for one unit: the highest similarity found, or 0.
    pub async fn duplication_score(&self, unit: &MemoryUnit) -> Result<f32> {
        let duplicates = self.find_duplicates(unit, Some(self.low_threshold)).await?;
        Ok(duplicates.first().map(|d| d.score).unwrap_or(0.0))
    }
}

// ============================================================================
// UNION-FIND
// ============================================================================

/// Group connected components; returns root -> other member ids.
fn union_find_clusters(
    all: &[MemoryUnit],
    edges: &HashMap<(String, String), f32>,
) -> HashMap<String, Vec<String>> {
    let mut parent: HashMap<String, String> =
        all.iter().map(|u| (u.id.clone(), u.id.clone())).collect();

    fn find(parent: &mut HashMap<String, String>, x: &str) -> String {
        let p = parent.get(x).cloned().unwrap_or_else(|| x.to_string());
        if p == x {
            return p;
        }
        let root = find(parent, &p);
        // Path compression.
        parent.insert(x.to_string(), root.clone());
        root
    }

    for (a, b) in edges.keys() {
        let root_a = find(&mut parent, a);
        let root_b = find(&mut parent, b);
        if root_a != root_b {
            parent.insert(root_b, root_a);
        }
    }

    let mut clusters: HashMap<String, Vec<String>> = HashMap::new();
    for unit in all {
        let root = find(&mut parent, &unit.id);
        let members = clusters.entry(root.clone()).or_default();
        if unit.id != root {
            members.push(unit.id.clone());
        }
    }
    clusters.retain(|_, members| !members.is_empty());
    clusters
}

/// Canonical preference: documented, then lower complexity, then fewer
/// lines; id as the final stable tie-break.
fn select_canonical(ids: &[String], by_id: &HashMap<&str, &MemoryUnit>) -> String {
    let mut best: Option<(&String, (bool, i64, i64))> = None;
    for id in ids {
        let Some(unit) = by_id.get(id.as_str()) else {
            continue;
        };
        let has_docs = unit
            .metadata
            .get("has_documentation")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let complexity = unit
            .metadata
            .get("cyclomatic_complexity")
            .and_then(|v| v.as_i64())
            .unwrap_or(999);
        let lines = unit
            .metadata
            .get("line_count")
            .and_then(|v| v.as_i64())
            .unwrap_or(999);
        let rank = (has_docs, -complexity, -lines);
        let better = match &best {
            None => true,
            Some((best_id, best_rank)) => {
                rank > *best_rank || (rank == *best_rank && id < *best_id)
            }
        };
        if better {
            best = Some((id, rank));
        }
    }
    best.map(|(id, _)| id.clone())
        .unwrap_or_else(|| ids[0].clone())
}

fn metadata_str(unit: &MemoryUnit, key: &str) -> String {
    unit.metadata
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

fn metadata_u64(unit: &MemoryUnit, key: &str) -> u64 {
    unit.metadata.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
}

// ============================================================================
// TESTS
// ============================================================================
