//! Usage analytics: query patterns, frequently accessed code, token
//! savings, and search-quality feedback.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{EngramError, Result};
use crate::health::MetricsCollector;
use crate::model::{FeedbackRating, MemoryCategory};
use crate::store::VectorStore;
use crate::usage::UsageTracker;

// ============================================================================
// FEEDBACK
// ============================================================================

/// One user rating for a search and its results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFeedback {
    pub id: String,
    pub search_id: String,
    pub query: String,
    pub result_ids: Vec<String>,
    pub rating: FeedbackRating,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

// ============================================================================
// SERVICE
// ============================================================================

/// Analytics over the metrics window, the usage tracker, and feedback.
pub struct AnalyticsService {
    store: Arc<dyn VectorStore>,
    metrics: Arc<MetricsCollector>,
    usage: Option<Arc<UsageTracker>>,
    feedback: Mutex<Vec<SearchFeedback>>,
}

impl AnalyticsService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        metrics: Arc<MetricsCollector>,
        usage: Option<Arc<UsageTracker>>,
    ) -> Self {
        Self {
            store,
            metrics,
            usage,
            feedback: Mutex::new(Vec::new()),
        }
    }

    fn usage(&self) -> Result<&Arc<UsageTracker>> {
        self.usage
            .as_ref()
            .ok_or_else(|| EngramError::storage("usage tracking is not configured"))
    }

    /// Overall usage statistics for the window.
    pub async fn get_usage_statistics(&self, days: i64) -> Result<serde_json::Value> {
        let cutoff = Utc::now() - Duration::days(days);
        let history = self.metrics.query_history();
        let in_window: Vec<_> = history.iter().filter(|(_, at, _)| *at >= cutoff).collect();
        let total_memories = self.store.count(None).await?;
        let metrics = self.metrics.current_metrics();

        Ok(json!({
            "status": "success",
            "period_days": days,
            "statistics": {
                "total_memories": total_memories,
                "queries_in_period": in_window.len(),
                "avg_results_per_query": if in_window.is_empty() { 0.0 } else {
                    in_window.iter().map(|(_, _, n)| *n as f64).sum::<f64>()
                        / in_window.len() as f64
                },
                "avg_latency_ms": metrics.avg_latency_ms,
                "cache_hit_rate": metrics.cache_hit_rate,
            },
        }))
    }

    /// Most frequently executed queries in the window.
    pub fn get_top_queries(&self, limit: usize, days: i64) -> serde_json::Value {
        let cutoff = Utc::now() - Duration::days(days);
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for (query, at, _) in self.metrics.query_history() {
            if at >= cutoff {
                *counts.entry(query.to_lowercase()).or_default() += 1;
            }
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(limit);

        json!({
            "status": "success",
            "period_days": days,
            "total_count": ranked.len(),
            "queries": ranked
                .into_iter()
                .map(|(query, count)| json!({"query": query, "count": count}))
                .collect::<Vec<_>>(),
        })
    }

    /// Most accessed code memories in the window.
    pub async fn get_frequently_accessed_code(
        &self,
        limit: usize,
        days: i64,
    ) -> Result<serde_json::Value> {
        let usage = self.usage()?;
        let cutoff = Utc::now() - Duration::days(days);
        let mut code = Vec::new();
        for (memory_id, stats) in usage.most_used(limit * 4) {
            if stats.last_used.is_none_or(|at| at < cutoff) {
                continue;
            }
            let Some(unit) = self.store.get_by_id(&memory_id).await? else {
                continue;
            };
            if unit.category != MemoryCategory::Code {
                continue;
            }
            code.push(json!({
                "memory_id": memory_id,
                "file_path": unit.metadata.get("file_path"),
                "unit_name": unit.metadata.get("unit_name"),
                "access_count": stats.use_count,
                "last_accessed": stats.last_used,
            }));
            if code.len() >= limit {
                break;
            }
        }
        Ok(json!({
            "status": "success",
            "period_days": days,
            "total_count": code.len(),
            "frequently_accessed": code,
        }))
    }

    /// Token analytics: an estimate of context tokens served from memory.
    pub fn get_token_analytics(&self, period_days: i64) -> Result<serde_json::Value> {
        let usage = self.usage()?;
        let total_tokens = usage.total_tokens_served();
        let metrics = self.metrics.current_metrics();
        Ok(json!({
            "status": "success",
            "period_days": period_days,
            "analytics": {
                "tokens_served_from_memory": total_tokens,
                "queries_processed": metrics.total_queries,
                "avg_tokens_per_query": if metrics.total_queries == 0 { 0.0 } else {
                    total_tokens as f64 / metrics.total_queries as f64
                },
            },
        }))
    }

    /// Record one rating for a search.
    pub fn submit_search_feedback(
        &self,
        search_id: &str,
        query: &str,
        result_ids: Vec<String>,
        rating: FeedbackRating,
        comment: Option<String>,
        project_name: Option<String>,
    ) -> Result<serde_json::Value> {
        if search_id.trim().is_empty() {
            return Err(EngramError::validation("search_id", "search_id is required"));
        }
        let feedback = SearchFeedback {
            id: Uuid::new_v4().to_string(),
            search_id: search_id.to_string(),
            query: query.to_string(),
            result_ids,
            rating,
            comment,
            project_name,
            submitted_at: Utc::now(),
        };
        let feedback_id = feedback.id.clone();
        self.feedback
            .lock()
            .map_err(|e| EngramError::storage(format!("feedback lock poisoned: {e}")))?
            .push(feedback);
        tracing::info!("submitted feedback {feedback_id} for search {search_id}");
        Ok(json!({
            "status": "success",
            "feedback_id": feedback_id,
            "search_id": search_id,
            "rating": rating,
        }))
    }

    /// Aggregated quality metrics over a time window.
    pub fn get_quality_metrics(
        &self,
        time_range_hours: i64,
        project_name: Option<&str>,
    ) -> Result<serde_json::Value> {
        let cutoff = Utc::now() - Duration::hours(time_range_hours);
        let feedback = self
            .feedback
            .lock()
            .map_err(|e| EngramError::storage(format!("feedback lock poisoned: {e}")))?;
        let in_window: Vec<&SearchFeedback> = feedback
            .iter()
            .filter(|f| f.submitted_at >= cutoff)
            .filter(|f| match project_name {
                Some(project) => f.project_name.as_deref() == Some(project),
                None => true,
            })
            .collect();

        let helpful = in_window
            .iter()
            .filter(|f| f.rating == FeedbackRating::Helpful)
            .count();
        let not_helpful = in_window.len() - helpful;
        let rated = helpful + not_helpful;
        let helpfulness_rate = if rated == 0 {
            0.0
        } else {
            helpful as f64 / rated as f64
        };
        let avg_result_count = if in_window.is_empty() {
            0.0
        } else {
            in_window.iter().map(|f| f.result_ids.len() as f64).sum::<f64>()
                / in_window.len() as f64
        };

        Ok(json!({
            "status": "success",
            "metrics": {
                "time_range_hours": time_range_hours,
                "total_searches_rated": in_window.len(),
                "helpful_count": helpful,
                "not_helpful_count": not_helpful,
                "helpfulness_rate": helpfulness_rate,
                "avg_result_count": avg_result_count,
                "project_name": project_name,
            },
        }))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn analytics(usage: bool) -> AnalyticsService {
        AnalyticsService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MetricsCollector::new()),
            usage.then(|| Arc::new(UsageTracker::new([0.6, 0.2, 0.1, 0.1]))),
        )
    }

    #[test]
    fn test_top_queries_grouped_case_insensitively() {
        let service = analytics(true);
        service.metrics.log_query("Auth Flow", 5.0, 3, 0.9);
        service.metrics.log_query("auth flow", 6.0, 2, 0.8);
        service.metrics.log_query("other", 4.0, 1, 0.5);

        let top = service.get_top_queries(10, 7);
        let queries = top["queries"].as_array().unwrap();
        assert_eq!(queries[0]["query"], "auth flow");
        assert_eq!(queries[0]["count"], 2);
    }

    #[test]
    fn test_unconfigured_usage_tracking_is_an_error() {
        let service = analytics(false);
        let err = service.get_token_analytics(30).unwrap_err();
        assert_eq!(err.error_code(), "E001");
    }

    #[test]
    fn test_feedback_aggregation() {
        let service = analytics(true);
        for rating in [
            FeedbackRating::Helpful,
            FeedbackRating::Helpful,
            FeedbackRating::NotHelpful,
        ] {
            service
                .submit_search_feedback(
                    "search-1",
                    "auth",
                    vec!["a".to_string(), "b".to_string()],
                    rating,
                    None,
                    None,
                )
                .unwrap();
        }
        let metrics = service.get_quality_metrics(24, None).unwrap();
        let inner = &metrics["metrics"];
        assert_eq!(inner["helpful_count"], 2);
        assert_eq!(inner["not_helpful_count"], 1);
        assert!((inner["helpfulness_rate"].as_f64().unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(inner["avg_result_count"], 2.0);
    }

    #[test]
    fn test_feedback_requires_search_id() {
        let service = analytics(true);
        let err = service
            .submit_search_feedback("  ", "q", vec![], FeedbackRating::Helpful, None, None)
            .unwrap_err();
        assert_eq!(err.error_code(), "E002");
    }

    #[test]
    fn test_quality_metrics_project_filter() {
        let service = analytics(true);
        service
            .submit_search_feedback(
                "s1",
                "q",
                vec![],
                FeedbackRating::Helpful,
                None,
                Some("alpha".to_string()),
            )
            .unwrap();
        service
            .submit_search_feedback("s2", "q", vec![], FeedbackRating::NotHelpful, None, None)
            .unwrap();

        let metrics = service.get_quality_metrics(24, Some("alpha")).unwrap();
        assert_eq!(metrics["metrics"]["total_searches_rated"], 1);
        assert_eq!(metrics["metrics"]["helpful_count"], 1);
    }
}
