//! Cross-project search with explicit consent.
//!
//! A small persistent registry maps projects to their opt-in state; search
//! fans out in parallel to every opted-in project, tolerates per-project
//! failures, and merges results by relevance.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use crate::embeddings::Embedder;
use crate::error::{EngramError, Result};
use crate::model::{validate_content, SearchFilters, MAX_QUERY_LEN};
use crate::store::VectorStore;

// ============================================================================
// CONSENT REGISTRY
// ============================================================================

/// Opt-in state for one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    OptedIn,
    OptedOut,
}

/// Read-mostly registry persisted as a small JSON map.
pub struct ConsentRegistry {
    path: Option<PathBuf>,
    state: RwLock<BTreeMap<String, ConsentState>>,
}

impl ConsentRegistry {
    /// Load from disk, or start empty when the file does not exist.
    pub fn open(path: PathBuf) -> Result<Self> {
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                EngramError::validation("consent_registry", format!("corrupt registry: {e}"))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(EngramError::storage(format!(
                    "cannot read consent registry: {e}"
                )))
            }
        };
        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    /// Ephemeral registry for tests and consent-less deployments.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            state: RwLock::new(BTreeMap::new()),
        }
    }

    async fn persist(&self, state: &BTreeMap<String, ConsentState>) {
        let Some(ref path) = self.path else {
            return;
        };
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let raw = serde_json::to_string_pretty(state)?;
            std::fs::write(path, raw)
        };
        if let Err(e) = write() {
            tracing::warn!("failed to persist consent registry: {e}");
        }
    }

    /// Idempotent opt-in.
    pub async fn opt_in(&self, project: &str) {
        let mut state = self.state.write().await;
        state.insert(project.to_string(), ConsentState::OptedIn);
        self.persist(&state).await;
    }

    /// Idempotent opt-out.
    pub async fn opt_out(&self, project: &str) {
        let mut state = self.state.write().await;
        state.insert(project.to_string(), ConsentState::OptedOut);
        self.persist(&state).await;
    }

    pub async fn opted_in_projects(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .iter()
            .filter(|(_, s)| **s == ConsentState::OptedIn)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub async fn opted_out_projects(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .iter()
            .filter(|(_, s)| **s == ConsentState::OptedOut)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, ConsentState> {
        self.state.read().await.clone()
    }
}

// ============================================================================
// SERVICE
// ============================================================================

/// Consented multi-project fan-out search.
pub struct CrossProjectService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    consent: Arc<ConsentRegistry>,
}

impl CrossProjectService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<Embedder>,
        consent: Arc<ConsentRegistry>,
    ) -> Self {
        Self {
            store,
            embedder,
            consent,
        }
    }

    /// Search every opted-in project in parallel, merge by relevance.
    pub async fn search_all_projects(
        &self,
        query: &str,
        limit: usize,
        filters: Option<SearchFilters>,
    ) -> Result<serde_json::Value> {
        let started = Instant::now();
        let query = query.trim();
        if query.is_empty() || query.chars().count() > MAX_QUERY_LEN {
            return Err(EngramError::validation("query", "query must be 1-1000 characters"));
        }
        validate_content(query)?;
        let limit = limit.clamp(1, 100);

        let opted_in = self.consent.opted_in_projects().await;
        if opted_in.is_empty() {
            return Ok(json!({
                "results": [],
                "total_found": 0,
                "projects_searched": [],
                "query": query,
                "message": "No projects have opted in for cross-project search",
            }));
        }

        // Embed once, fan out per project.
        let vector = self.embedder.embed(query).await?;
        let searches = opted_in.iter().map(|project| {
            let store = self.store.clone();
            let vector = vector.clone();
            let base = filters.clone().unwrap_or_default();
            let project = project.clone();
            async move {
                let project_filters = SearchFilters {
                    project_name: Some(project.clone()),
                    ..base
                };
                let result = store.retrieve(&vector, Some(&project_filters), limit).await;
                (project, result)
            }
        });
        let outcomes = join_all(searches).await;

        let mut results = Vec::new();
        let mut projects_searched = Vec::new();
        let mut failed_projects = Vec::new();
        for (project, outcome) in outcomes {
            match outcome {
                Ok(scored) => {
                    for hit in scored {
                        results.push(json!({
                            "memory": hit.unit,
                            "score": (hit.score as f64).clamp(0.0, 1.0),
                            "project_name": project,
                        }));
                    }
                    projects_searched.push(project);
                }
                Err(e) => {
                    // Partial failure is reported, not fatal.
                    tracing::error!("failed to search project {project}: {e}");
                    failed_projects.push(json!({
                        "project": project,
                        "error": e.to_string(),
                    }));
                }
            }
        }

        results.sort_by(|a, b| {
            let score_a = a["score"].as_f64().unwrap_or(0.0);
            let score_b = b["score"].as_f64().unwrap_or(0.0);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        let query_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        tracing::info!(
            "cross-project search found {} results across {} projects in {query_time_ms:.2}ms",
            results.len(),
            projects_searched.len()
        );

        let mut response = json!({
            "results": results,
            "total_found": results.len(),
            "projects_searched": projects_searched,
            "query": query,
            "query_time_ms": query_time_ms,
        });
        if !failed_projects.is_empty() {
            response["failed_projects"] = json!(failed_projects);
        }
        Ok(response)
    }

    pub async fn opt_in(&self, project: &str) -> Result<serde_json::Value> {
        if project.trim().is_empty() {
            return Err(EngramError::validation("project_name", "project name is required"));
        }
        self.consent.opt_in(project).await;
        tracing::info!("project {project} opted in for cross-project search");
        Ok(json!({
            "status": "success",
            "project_name": project,
            "action": "opted_in",
        }))
    }

    pub async fn opt_out(&self, project: &str) -> Result<serde_json::Value> {
        if project.trim().is_empty() {
            return Err(EngramError::validation("project_name", "project name is required"));
        }
        self.consent.opt_out(project).await;
        tracing::info!("project {project} opted out of cross-project search");
        Ok(json!({
            "status": "success",
            "project_name": project,
            "action": "opted_out",
        }))
    }

    pub async fn list_opted_in(&self) -> Result<serde_json::Value> {
        let opted_in = self.consent.opted_in_projects().await;
        let opted_out = self.consent.opted_out_projects().await;
        Ok(json!({
            "opted_in_projects": opted_in,
            "opted_out_projects": opted_out,
            "statistics": {
                "opted_in_count": opted_in.len(),
                "opted_out_count": opted_out.len(),
            },
        }))
    }
}

// ============================================================================
// TESTS
// ============================================================================
