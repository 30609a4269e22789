//! Relationship detection between memories.
//!
//! Derives advisory edges for a new memory against its same-category,
//! same-scope, same-project neighborhood: contradictions (preference
//! extraction plus mutually exclusive tool groups), duplicates, support, and
//! supersession. Detection never mutates the memories.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;

use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::Result;
use crate::model::{
    MemoryCategory, MemoryRelationship, MemoryUnit, RelationshipType, SearchFilters,
};
use crate::store::VectorStore;

/// Duplicate edge threshold.
const DUPLICATE_THRESHOLD: f32 = 0.9;

/// Support edges live in this half-open similarity band.
const SUPPORT_BAND: (f32, f32) = (0.7, 0.85);

/// Days of separation before a framework conflict counts as a changed
/// preference.
const CONTRADICTION_GAP_DAYS: i64 = 30;

static PREFERENCE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:i\s+)?prefer\s+(\w+(?:\s+\w+)?)",
        r"(?:i\s+)?like\s+(\w+(?:\s+\w+)?)",
        r"(?:i\s+)?use\s+(\w+(?:\s+\w+)?)",
        r"always\s+use\s+(\w+(?:\s+\w+)?)",
        r"never\s+use\s+(\w+(?:\s+\w+)?)",
        r"(?:i\s+)?choose\s+(\w+(?:\s+\w+)?)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("preference pattern compiles"))
    .collect()
});

/// Negation pattern pairs: a positive statement whose captured term is
/// negated outright by the other memory. `{term}` is substituted with the
/// escaped capture before matching.
static NEGATION_PAIRS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"i\s+prefer\s+(\w+)", r"i\s+don't\s+(?:prefer|like)\s+{term}"),
        (r"always\s+use\s+(\w+)", r"never\s+use\s+{term}"),
    ]
    .into_iter()
    .map(|(positive, negative)| {
        (
            Regex::new(positive).expect("negation pattern compiles"),
            negative,
        )
    })
    .collect()
});

/// Mutually exclusive tool groups: naming two different members of one
/// group reads as a conflict.
const FRAMEWORK_GROUPS: [(&str, &[&str]); 6] = [
    ("frontend", &["react", "vue", "angular", "svelte", "solid"]),
    ("backend", &["express", "fastapi", "django", "flask", "nest"]),
    ("database", &["postgres", "mysql", "mongodb", "sqlite"]),
    ("testing", &["jest", "vitest", "mocha", "jasmine"]),
    ("bundler", &["webpack", "vite", "rollup", "parcel", "esbuild"]),
    ("package_manager", &["npm", "yarn", "pnpm"]),
];

fn extract_preferences(content: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    let mut preferences = Vec::new();
    for pattern in PREFERENCE_PATTERNS.iter() {
        for captures in pattern.captures_iter(&lower) {
            if let Some(m) = captures.get(1) {
                preferences.push(m.as_str().to_string());
            }
        }
    }
    preferences
}

fn framework_conflict(prefs_a: &[String], prefs_b: &[String]) -> Option<String> {
    for (group, frameworks) in FRAMEWORK_GROUPS {
        let found_a = frameworks
            .iter()
            .find(|f| prefs_a.iter().any(|p| p.contains(*f)));
        let found_b = frameworks
            .iter()
            .find(|f| prefs_b.iter().any(|p| p.contains(*f)));
        if let (Some(a), Some(b)) = (found_a, found_b) {
            if a != b {
                return Some(format!("{group}: {a} vs {b}"));
            }
        }
    }
    None
}

// ============================================================================
// DETECTOR
// ============================================================================

pub struct RelationshipDetector {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
}

impl RelationshipDetector {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<Embedder>) -> Self {
        Self { store, embedder }
    }

    fn neighborhood_filters(memory: &MemoryUnit) -> SearchFilters {
        SearchFilters {
            category: Some(memory.category),
            scope: Some(memory.scope),
            project_name: memory.project_name.clone(),
            ..Default::default()
        }
    }

    /// Contradictions of `new_memory` against its neighborhood. Only
    /// preferences and facts participate.
    pub async fn detect_contradictions(
        &self,
        new_memory: &MemoryUnit,
    ) -> Result<Vec<MemoryRelationship>> {
        if !matches!(
            new_memory.category,
            MemoryCategory::Preference | MemoryCategory::Fact
        ) {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(&new_memory.content).await?;
        let candidates = self
            .store
            .retrieve(&vector, Some(&Self::neighborhood_filters(new_memory)), 50)
            .await?;

        let mut contradictions = Vec::new();
        for candidate in candidates {
            if candidate.unit.id == new_memory.id {
                continue;
            }
            if let Some((confidence, reason)) =
                preference_contradiction(new_memory, &candidate.unit)
            {
                tracing::info!(
                    "detected contradiction: {} <-> {} (confidence={confidence:.2})",
                    &new_memory.id[..8.min(new_memory.id.len())],
                    &candidate.unit.id[..8.min(candidate.unit.id.len())],
                );
                contradictions.push(MemoryRelationship::auto(
                    &new_memory.id,
                    &candidate.unit.id,
                    RelationshipType::Contradicts,
                    confidence,
                    reason,
                )?);
            }
        }
        Ok(contradictions)
    }

    /// Duplicate edges above the similarity threshold.
    pub async fn detect_duplicates(
        &self,
        new_memory: &MemoryUnit,
        threshold: Option<f32>,
    ) -> Result<Vec<MemoryRelationship>> {
        let threshold = threshold.unwrap_or(DUPLICATE_THRESHOLD);
        let vector = self.embedder.embed(&new_memory.content).await?;
        let candidates = self
            .store
            .retrieve(&vector, Some(&Self::neighborhood_filters(new_memory)), 20)
            .await?;

        let mut duplicates = Vec::new();
        for candidate in candidates {
            if candidate.unit.id == new_memory.id || candidate.score < threshold {
                continue;
            }
            duplicates.push(MemoryRelationship::auto(
                &new_memory.id,
                &candidate.unit.id,
                RelationshipType::Duplicate,
                candidate.score as f64,
                format!("semantic similarity: {:.3}", candidate.score),
            )?);
        }
        Ok(duplicates)
    }

    /// Support edge when two memories are similar but not duplicates.
    pub async fn detect_support(
        &self,
        memory_a: &MemoryUnit,
        memory_b: &MemoryUnit,
    ) -> Result<Option<MemoryRelationship>> {
        if memory_a.category != memory_b.category {
            return Ok(None);
        }
        let vector_a = self.embedder.embed(&memory_a.content).await?;
        let vector_b = self.embedder.embed(&memory_b.content).await?;
        let similarity = cosine_similarity(&vector_a, &vector_b);

        if similarity >= SUPPORT_BAND.0 && similarity < SUPPORT_BAND.1 {
            return Ok(Some(MemoryRelationship::auto(
                &memory_a.id,
                &memory_b.id,
                RelationshipType::Supports,
                similarity as f64,
                format!("supporting evidence (similarity={similarity:.3})"),
            )?));
        }
        Ok(None)
    }

    /// Supersession: newer and higher-confidence subsumes older.
    pub async fn detect_supersession(
        &self,
        new_memory: &MemoryUnit,
    ) -> Result<Vec<MemoryRelationship>> {
        let vector = self.embedder.embed(&new_memory.content).await?;
        let candidates = self
            .store
            .retrieve(&vector, Some(&Self::neighborhood_filters(new_memory)), 20)
            .await?;

        let mut supersessions = Vec::new();
        for candidate in candidates {
            if candidate.unit.id == new_memory.id || candidate.score <= DUPLICATE_THRESHOLD {
                continue;
            }
            let existing = &candidate.unit;
            let is_newer = new_memory.created_at > existing.created_at;
            let is_better = new_memory.provenance.confidence > existing.provenance.confidence
                || (new_memory.provenance.verified && !existing.provenance.verified);
            if !(is_newer && is_better) {
                continue;
            }
            let gap_days = (new_memory.created_at - existing.created_at).num_days();
            let confidence_gap =
                new_memory.provenance.confidence - existing.provenance.confidence;
            let confidence =
                (0.7 + confidence_gap * 0.3 + (gap_days as f64 / 365.0) * 0.1).min(0.95);
            supersessions.push(MemoryRelationship::auto(
                &new_memory.id,
                &existing.id,
                RelationshipType::Supersedes,
                confidence,
                format!("newer and higher confidence (gap={gap_days}d)"),
            )?);
        }
        Ok(supersessions)
    }

    /// Run every detector for a newly stored memory.
    pub async fn detect_all(&self, new_memory: &MemoryUnit) -> Result<Vec<MemoryRelationship>> {
        let mut edges = self.detect_contradictions(new_memory).await?;
        edges.extend(self.detect_duplicates(new_memory, None).await?);
        edges.extend(self.detect_supersession(new_memory).await?);
        Ok(edges)
    }
}

/// Decide whether two memories state conflicting preferences.
///
/// Returns `(confidence, reason)` when they do.
fn preference_contradiction(a: &MemoryUnit, b: &MemoryUnit) -> Option<(f64, String)> {
    let prefs_a = extract_preferences(&a.content);
    let prefs_b = extract_preferences(&b.content);
    if prefs_a.is_empty() || prefs_b.is_empty() {
        return None;
    }

    if let Some(conflict) = framework_conflict(&prefs_a, &prefs_b) {
        let gap_days = (a.created_at - b.created_at).num_days().abs();
        if gap_days > CONTRADICTION_GAP_DAYS {
            // Larger temporal separation reads as a changed preference.
            let confidence = (0.7 + (gap_days as f64 / 365.0) * 0.2).min(0.9);
            return Some((confidence, format!("conflicting_preferences: {conflict}")));
        }
    }

    // Explicit negation: "i prefer X" vs "i don't prefer/like X", or
    // "always use X" vs "never use X".
    let lower_a = a.content.to_lowercase();
    let lower_b = b.content.to_lowercase();
    for (positive, negative_template) in NEGATION_PAIRS.iter() {
        let Some(captures) = positive.captures(&lower_a) else {
            continue;
        };
        let term = &captures[1];
        let negative = negative_template.replace("{term}", &regex::escape(term));
        let negated = Regex::new(&negative)
            .map(|pattern| pattern.is_match(&lower_b))
            .unwrap_or(false);
        if negated {
            return Some((0.95, format!("explicit_negation: {term}")));
        }
    }
    None
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryCategory;
    use crate::testutil::{service_fixture, store_request, test_unit};
    use chrono::Duration;

    #[test]
    fn test_extract_preferences() {
        let prefs = extract_preferences("I prefer react and always use vite");
        assert!(prefs.iter().any(|p| p.contains("react")));
        assert!(prefs.iter().any(|p| p.contains("vite")));
        assert!(extract_preferences("nothing stated here at all").is_empty());
    }

    #[test]
    fn test_framework_conflict_groups() {
        let conflict = framework_conflict(
            &["react".to_string()],
            &["vue for the dashboard".to_string()],
        );
        assert_eq!(conflict.unwrap(), "frontend: react vs vue");
        assert!(framework_conflict(&["react".to_string()], &["react".to_string()]).is_none());
    }

    #[test]
    fn test_contradiction_requires_temporal_gap() {
        let mut a = test_unit("I prefer react for new frontends", MemoryCategory::Preference);
        let b = test_unit("I prefer vue for new frontends", MemoryCategory::Preference);

        // Same day: treated as noise, not a changed preference.
        assert!(preference_contradiction(&a, &b).is_none());

        a.created_at = b.created_at + Duration::days(90);
        let (confidence, reason) = preference_contradiction(&a, &b).unwrap();
        assert!(confidence >= 0.7);
        assert!(reason.contains("frontend"));
    }

    #[test]
    fn test_explicit_negation_high_confidence() {
        let a = test_unit("always use pnpm in this house", MemoryCategory::Preference);
        let b = test_unit("never use pnpm anywhere", MemoryCategory::Preference);
        let (confidence, reason) = preference_contradiction(&a, &b).unwrap();
        assert_eq!(confidence, 0.95);
        assert!(reason.starts_with("explicit_negation"));
    }

    #[test]
    fn test_prefer_vs_dont_like_negation() {
        // Same-day memories, no framework group involved: only the
        // prefer/don't-like pair catches this.
        let a = test_unit("I prefer vim for quick edits", MemoryCategory::Preference);
        let b = test_unit("I don't like vim at all", MemoryCategory::Preference);
        let (confidence, reason) = preference_contradiction(&a, &b).unwrap();
        assert_eq!(confidence, 0.95);
        assert_eq!(reason, "explicit_negation: vim");

        let unrelated = test_unit("I don't like emacs at all", MemoryCategory::Preference);
        assert!(preference_contradiction(&a, &unrelated).is_none());
    }

    #[tokio::test]
    async fn test_detect_duplicates_returns_auto_edges() {
        let fixture = service_fixture(false).await;
        fixture
            .service
            .store_memory(store_request(
                "renew the tls certificates in march",
                MemoryCategory::Fact,
            ))
            .await
            .unwrap();
        let stored = fixture
            .service
            .store_memory(store_request(
                "renew the tls certificates in march every year",
                MemoryCategory::Fact,
            ))
            .await
            .unwrap();

        let detector = RelationshipDetector::new(
            fixture.service.store_handle(),
            fixture.service.embedder_handle(),
        );
        let unit = fixture
            .service
            .get_memory_by_id(&stored.memory_id)
            .await
            .unwrap()
            .unwrap();
        let edges = detector.detect_duplicates(&unit, Some(0.7)).await.unwrap();
        assert!(!edges.is_empty());
        assert!(edges
            .iter()
            .all(|e| e.detected_by == "auto"
                && e.relationship_type == RelationshipType::Duplicate));
    }

    #[tokio::test]
    async fn test_event_memories_skip_contradiction_check() {
        let fixture = service_fixture(false).await;
        let detector = RelationshipDetector::new(
            fixture.service.store_handle(),
            fixture.service.embedder_handle(),
        );
        let unit = test_unit("I prefer vim today", MemoryCategory::Event);
        let edges = detector.detect_contradictions(&unit).await.unwrap();
        assert!(edges.is_empty());
    }
}
