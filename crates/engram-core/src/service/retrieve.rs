//! The retrieval pipeline.
//!
//! Query expansion from session history, cache-or-generate embedding,
//! filtered vector search with a dedup fetch multiplier, session-level
//! deduplication, composite re-ranking, and conversation tracking.

use std::time::Instant;

use chrono::Utc;

use crate::error::Result;
use crate::expand::expand_query;
use crate::model::{
    ContextLevel, MemoryResult, QueryRequest, RetrievalResponse, ScoredUnit,
};
use crate::ops::with_ceiling;
use crate::service::MemoryService;

impl MemoryService {
    /// Retrieve relevance-ranked memories for a query.
    pub async fn retrieve_memories(
        &self,
        mut request: QueryRequest,
        session_id: Option<&str>,
    ) -> Result<RetrievalResponse> {
        let started = Instant::now();
        request.validate()?;
        tracing::info!(
            "retrieving memories: query='{}', limit={}",
            request.query.chars().take(50).collect::<String>(),
            request.limit
        );

        // Conversation-aware query expansion.
        let mut expanded = request.query.clone();
        if let (Some(session), Some(tracker)) = (session_id, self.tracker()) {
            let recent = tracker.get_recent_queries(session).await;
            if !recent.is_empty() {
                expanded = expand_query(&request.query, &recent);
                if expanded != request.query {
                    tracing::debug!("expanded query: '{}' -> '{}'", request.query, expanded);
                }
            }
        }

        let (query_vector, used_cache) = self
            .embedder_handle()
            .embed_with_origin(&expanded)
            .await?;

        let filters = request.filters();
        let filters_opt = (!filters.is_empty()).then_some(&filters);

        // Over-fetch when session deduplication may drop results.
        let dedup_active = session_id.is_some() && self.tracker().is_some();
        let fetch_limit = if dedup_active {
            request.limit * self.dedup_multiplier()
        } else {
            request.limit
        };

        let mut results = with_ceiling(
            self.ceiling(),
            "retrieve",
            self.store_handle()
                .retrieve(&query_vector, filters_opt, fetch_limit),
        )
        .await
        .inspect_err(|e| self.record_retrieve_error(e))?;

        // Drop results already shown in this session, preserving order.
        if let (Some(session), Some(tracker)) = (session_id, self.tracker()) {
            let shown = tracker.get_shown_memory_ids(session).await;
            if !shown.is_empty() {
                let shown: std::collections::HashSet<&String> = shown.iter().collect();
                results.retain(|r| !shown.contains(&r.unit.id));
            }
        }
        results.truncate(request.limit);

        // Composite re-rank when usage tracking is enabled.
        if let Some(usage) = self.usage_tracker() {
            let now = Utc::now();
            let mut reranked: Vec<(ScoredUnit, f64)> = results
                .into_iter()
                .map(|scored| {
                    // Memories without usage history keep their raw
                    // similarity; blending starts once stats exist.
                    let composite = match usage.get_usage_stats(&scored.unit.id) {
                        Some(stats) => usage.composite_score(
                            scored.score as f64,
                            stats.last_used,
                            stats.use_count,
                            scored.unit.lifecycle_state,
                            now,
                        ),
                        None => scored.score as f64,
                    };
                    (scored, composite)
                })
                .collect();
            reranked.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.0.unit.created_at.cmp(&a.0.unit.created_at))
                    .then_with(|| a.0.unit.id.cmp(&b.0.unit.id))
            });

            usage.record_batch(
                &reranked
                    .iter()
                    .map(|(scored, _)| (scored.unit.id.clone(), scored.unit.content.len()))
                    .collect::<Vec<_>>(),
            );

            results = reranked
                .into_iter()
                .map(|(mut scored, composite)| {
                    scored.score = composite as f32;
                    scored
                })
                .collect();
        }

        let memory_results: Vec<MemoryResult> = results
            .into_iter()
            .map(|scored| MemoryResult {
                memory: scored.unit,
                score: (scored.score as f64).clamp(0.0, 1.0),
            })
            .collect();

        // Successful retrieval counts as access.
        let returned_ids: Vec<String> =
            memory_results.iter().map(|r| r.memory.id.clone()).collect();
        if !returned_ids.is_empty() {
            if let Err(e) = self.store_handle().touch(&returned_ids, Utc::now()).await {
                tracing::warn!("failed to update access times: {e}");
            }
        }

        let query_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.note_query(memory_results.len());

        // Record into the session before replying, so the next query in
        // the session observes these ids as shown.
        if let (Some(session), Some(tracker)) = (session_id, self.tracker()) {
            let vector_for_session = self
                .conversation_vectors_enabled()
                .then(|| query_vector.clone());
            tracker
                .track_query(session, &request.query, &returned_ids, vector_for_session)
                .await;
        }

        if let Some(metrics) = self.metrics_handle() {
            let avg_relevance = if memory_results.is_empty() {
                0.0
            } else {
                memory_results.iter().map(|r| r.score).sum::<f64>() / memory_results.len() as f64
            };
            metrics.log_query(&request.query, query_time_ms, memory_results.len(), avg_relevance);
        }

        tracing::info!(
            "retrieved {} memories in {query_time_ms:.2}ms",
            memory_results.len()
        );
        Ok(RetrievalResponse {
            total_found: memory_results.len(),
            results: memory_results,
            query_time_ms,
            used_cache,
        })
    }

    // ------------------------------------------------------------------
    // Convenience retrievers
    // ------------------------------------------------------------------

    /// User preferences and style guidelines.
    pub async fn retrieve_preferences(
        &self,
        query: &str,
        limit: usize,
        session_id: Option<&str>,
    ) -> Result<RetrievalResponse> {
        self.retrieve_scoped(query, limit, ContextLevel::UserPreference, None, session_id)
            .await
    }

    /// Project-specific context; defaults to the detected current project.
    pub async fn retrieve_project_context(
        &self,
        query: &str,
        limit: usize,
        project_name: Option<String>,
        session_id: Option<&str>,
    ) -> Result<RetrievalResponse> {
        let project = project_name.or_else(|| self.current_project());
        self.retrieve_scoped(query, limit, ContextLevel::ProjectContext, project, session_id)
            .await
    }

    /// Current session state; a small default limit favors recency.
    pub async fn retrieve_session_state(
        &self,
        query: &str,
        limit: usize,
        session_id: Option<&str>,
    ) -> Result<RetrievalResponse> {
        self.retrieve_scoped(query, limit, ContextLevel::SessionState, None, session_id)
            .await
    }

    async fn retrieve_scoped(
        &self,
        query: &str,
        limit: usize,
        context_level: ContextLevel,
        project_name: Option<String>,
        session_id: Option<&str>,
    ) -> Result<RetrievalResponse> {
        let request = QueryRequest {
            query: query.to_string(),
            limit,
            context_level: Some(context_level),
            scope: None,
            project_name,
            category: None,
            min_importance: 0.0,
            tags: Vec::new(),
            advanced_filters: None,
        };
        self.retrieve_memories(request, session_id).await
    }
}

// ============================================================================
// TESTS
// ============================================================================
