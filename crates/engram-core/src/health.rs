//! Health monitoring: metrics collection, scoring, insights, alerts, and
//! capacity forecasting.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{AdvancedSearchFilters, LifecycleState, SearchFilters};
use crate::store::VectorStore;

/// Bounded window of query samples retained for percentile math.
const SAMPLE_WINDOW: usize = 4096;

// ============================================================================
// METRICS COLLECTOR
// ============================================================================

#[derive(Debug, Clone)]
struct QuerySample {
    at: DateTime<Utc>,
    latency_ms: f64,
    result_count: usize,
    avg_relevance: f64,
    query: String,
}

#[derive(Default)]
struct MetricsInner {
    samples: VecDeque<QuerySample>,
    op_counts: BTreeMap<String, u64>,
    error_counts: BTreeMap<String, u64>,
    total_errors: u64,
    cache_hit_rate: f64,
}

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CurrentMetrics {
    pub queries_per_day: usize,
    pub avg_latency_ms: f64,
    pub search_latency_p50_ms: f64,
    pub search_latency_p95_ms: f64,
    pub search_latency_p99_ms: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub total_queries: usize,
    pub avg_result_count: f64,
    pub avg_relevance: f64,
    pub operations: BTreeMap<String, u64>,
    pub errors_by_operation: BTreeMap<String, u64>,
}

/// Collects per-operation counters and query latency samples.
pub struct MetricsCollector {
    inner: Mutex<MetricsInner>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsInner::default()),
        }
    }

    pub fn log_query(&self, query: &str, latency_ms: f64, result_count: usize, avg_relevance: f64) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.samples.push_back(QuerySample {
            at: Utc::now(),
            latency_ms,
            result_count,
            avg_relevance,
            query: query.to_string(),
        });
        while inner.samples.len() > SAMPLE_WINDOW {
            inner.samples.pop_front();
        }
        *inner
            .op_counts
            .entry("retrieve_memories".to_string())
            .or_default() += 1;
    }

    pub fn log_op(&self, operation: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            *inner.op_counts.entry(operation.to_string()).or_default() += 1;
        }
    }

    pub fn log_error(&self, operation: &str, code: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            *inner
                .error_counts
                .entry(format!("{operation}:{code}"))
                .or_default() += 1;
            inner.total_errors += 1;
        }
    }

    /// Cache hit rate is pushed in from the embedder's counters.
    pub fn set_cache_hit_rate(&self, rate: f64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.cache_hit_rate = rate.clamp(0.0, 1.0);
        }
    }

    pub fn current_metrics(&self) -> CurrentMetrics {
        let Ok(inner) = self.inner.lock() else {
            return CurrentMetrics::default();
        };
        let mut latencies: Vec<f64> = inner.samples.iter().map(|s| s.latency_ms).collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let total_queries = inner.samples.len();
        let avg_latency_ms = if total_queries == 0 {
            0.0
        } else {
            latencies.iter().sum::<f64>() / total_queries as f64
        };
        let day_ago = Utc::now() - Duration::days(1);
        let total_ops: u64 = inner.op_counts.values().sum();
        let error_rate = if total_ops + inner.total_errors == 0 {
            0.0
        } else {
            inner.total_errors as f64 / (total_ops + inner.total_errors) as f64
        };

        CurrentMetrics {
            queries_per_day: inner.samples.iter().filter(|s| s.at >= day_ago).count(),
            avg_latency_ms,
            search_latency_p50_ms: percentile(&latencies, 50.0),
            search_latency_p95_ms: percentile(&latencies, 95.0),
            search_latency_p99_ms: percentile(&latencies, 99.0),
            error_rate,
            cache_hit_rate: inner.cache_hit_rate,
            total_queries,
            avg_result_count: if total_queries == 0 {
                0.0
            } else {
                inner.samples.iter().map(|s| s.result_count as f64).sum::<f64>()
                    / total_queries as f64
            },
            avg_relevance: if total_queries == 0 {
                0.0
            } else {
                inner.samples.iter().map(|s| s.avg_relevance).sum::<f64>()
                    / total_queries as f64
            },
            operations: inner.op_counts.clone(),
            errors_by_operation: inner.error_counts.clone(),
        }
    }

    /// Query texts and timestamps from the sample window, newest first.
    pub(crate) fn query_history(&self) -> Vec<(String, DateTime<Utc>, usize)> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        inner
            .samples
            .iter()
            .rev()
            .map(|s| (s.query.clone(), s.at, s.result_count))
            .collect()
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

// ============================================================================
// ALERTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertSeverity {
    #[serde(rename = "CRITICAL")]
    Critical,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "INFO")]
    Info,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// In-memory alert state derived from metric snapshots.
pub struct AlertEngine {
    active: Mutex<Vec<Alert>>,
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertEngine {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(Vec::new()),
        }
    }

    /// Raise alerts for threshold breaches; one live alert per condition.
    pub fn evaluate(&self, metrics: &CurrentMetrics) {
        let mut conditions: Vec<(AlertSeverity, String)> = Vec::new();
        if metrics.error_rate > 0.10 {
            conditions.push((
                AlertSeverity::Critical,
                format!("error rate at {:.1}%", metrics.error_rate * 100.0),
            ));
        }
        if metrics.avg_latency_ms > 100.0 {
            conditions.push((
                AlertSeverity::Warning,
                format!("average search latency at {:.0}ms", metrics.avg_latency_ms),
            ));
        }
        if metrics.total_queries > 0 && metrics.cache_hit_rate < 0.5 {
            conditions.push((
                AlertSeverity::Info,
                format!(
                    "embedding cache hit rate at {:.0}%",
                    metrics.cache_hit_rate * 100.0
                ),
            ));
        }
        let Ok(mut active) = self.active.lock() else {
            return;
        };
        for (severity, message) in conditions {
            if active.iter().any(|a| a.message == message) {
                continue;
            }
            active.push(Alert {
                id: Uuid::new_v4().simple().to_string()[..8].to_string(),
                severity,
                message,
                created_at: Utc::now(),
            });
        }
    }

    pub fn active_alerts(&self, severity: Option<AlertSeverity>) -> Vec<Alert> {
        self.active
            .lock()
            .map(|alerts| {
                alerts
                    .iter()
                    .filter(|a| severity.is_none_or(|s| a.severity == s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn resolve(&self, alert_id: &str) -> bool {
        let Ok(mut active) = self.active.lock() else {
            return false;
        };
        let before = active.len();
        active.retain(|a| a.id != alert_id);
        active.len() < before
    }
}

// ============================================================================
// HEALTH SERVICE
// ============================================================================

/// Health score, insights, alert snapshots, and forecasts.
pub struct HealthService {
    store: Arc<dyn VectorStore>,
    metrics: Arc<MetricsCollector>,
    alerts: Arc<AlertEngine>,
}

impl HealthService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        metrics: Arc<MetricsCollector>,
        alerts: Arc<AlertEngine>,
    ) -> Self {
        Self {
            store,
            metrics,
            alerts,
        }
    }

    /// Piecewise 0-100 score over current metrics.
    pub fn simple_health_score(metrics: &CurrentMetrics) -> i64 {
        let mut score: i64 = 100;
        if metrics.avg_latency_ms > 100.0 {
            score -= 20;
        } else if metrics.avg_latency_ms > 50.0 {
            score -= 10;
        }
        if metrics.error_rate > 0.10 {
            score -= 30;
        } else if metrics.error_rate > 0.05 {
            score -= 15;
        }
        if metrics.total_queries > 0 && metrics.cache_hit_rate < 0.5 {
            score -= 10;
        }
        score.clamp(0, 100)
    }

    pub async fn get_health_score(&self) -> Result<serde_json::Value> {
        let store_healthy = self.store.health_check().await?;
        let metrics = self.metrics.current_metrics();
        let score = Self::simple_health_score(&metrics);
        let status = if score >= 80 {
            "healthy"
        } else if score >= 50 {
            "degraded"
        } else {
            "unhealthy"
        };
        Ok(json!({
            "status": "success",
            "health_score": score,
            "store_available": store_healthy,
            "components": {
                "store": if store_healthy { "healthy" } else { "unhealthy" },
                "metrics": if score > 70 { "healthy" } else { "degraded" },
            },
            "health_status": status,
        }))
    }

    pub fn get_performance_metrics(&self) -> serde_json::Value {
        let current = self.metrics.current_metrics();
        json!({
            "status": "success",
            "current": current,
        })
    }

    /// Rule-based summaries, ordered by priority (lower = more urgent).
    pub async fn insights(&self) -> Result<Vec<serde_json::Value>> {
        let metrics = self.metrics.current_metrics();
        let mut insights: Vec<(u8, serde_json::Value)> = Vec::new();

        let score = Self::simple_health_score(&metrics);
        if score < 50 {
            insights.push((
                0,
                json!({
                    "priority": 0,
                    "title": "overall health is poor",
                    "detail": format!("health score {score}; investigate latency and errors"),
                }),
            ));
        }
        if metrics.avg_latency_ms > 100.0 {
            insights.push((
                1,
                json!({
                    "priority": 1,
                    "title": "high search latency",
                    "detail": format!("average {:.0}ms, p99 {:.0}ms",
                        metrics.avg_latency_ms, metrics.search_latency_p99_ms),
                }),
            ));
        }
        if metrics.total_queries > 0 && metrics.cache_hit_rate < 0.5 {
            insights.push((
                2,
                json!({
                    "priority": 2,
                    "title": "low embedding cache hit rate",
                    "detail": format!("{:.0}% of lookups miss the cache",
                        (1.0 - metrics.cache_hit_rate) * 100.0),
                }),
            ));
        }

        let total = self.store.count(None).await?;
        let stale_filters = SearchFilters {
            advanced: Some(AdvancedSearchFilters {
                lifecycle_states: Some(vec![LifecycleState::Stale]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let stale = self.store.count(Some(&stale_filters)).await.unwrap_or(0);
        if total > 0 && stale * 2 > total {
            insights.push((
                3,
                json!({
                    "priority": 3,
                    "title": "corpus is going stale",
                    "detail": format!("{stale} of {total} memories have not been touched in 180+ days"),
                }),
            ));
        }
        if total < 10 {
            insights.push((
                4,
                json!({
                    "priority": 4,
                    "title": "low memory density",
                    "detail": format!("only {total} memories stored; retrieval quality improves with corpus size"),
                }),
            ));
        }

        insights.sort_by_key(|(priority, _)| *priority);
        Ok(insights.into_iter().map(|(_, v)| v).collect())
    }

    pub fn get_active_alerts(&self, severity: Option<AlertSeverity>) -> serde_json::Value {
        self.alerts.evaluate(&self.metrics.current_metrics());
        let alerts = self.alerts.active_alerts(severity);
        json!({
            "status": "success",
            "total_count": alerts.len(),
            "alerts": alerts,
        })
    }

    pub fn resolve_alert(&self, alert_id: &str) -> serde_json::Value {
        if self.alerts.resolve(alert_id) {
            json!({"status": "success", "alert_id": alert_id, "action": "resolved"})
        } else {
            json!({"status": "not_found", "alert_id": alert_id})
        }
    }

    /// Linear growth forecast from the recent addition rate.
    pub async fn capacity_forecast(&self, days_ahead: i64) -> Result<serde_json::Value> {
        let total = self.store.count(None).await?;
        let week_ago = Utc::now() - Duration::days(7);
        let recent_filters = SearchFilters {
            created_after: Some(week_ago),
            ..Default::default()
        };
        let recent = self.store.count(Some(&recent_filters)).await.unwrap_or(0);
        let per_day = recent as f64 / 7.0;
        let projected = total as f64 + per_day * days_ahead as f64;
        Ok(json!({
            "status": "success",
            "days_ahead": days_ahead,
            "current_memories": total,
            "memories_per_day": per_day,
            "projected_memories": projected.round() as i64,
        }))
    }

    pub async fn weekly_report(&self) -> Result<serde_json::Value> {
        let health = self.get_health_score().await?;
        let metrics = self.metrics.current_metrics();
        let insights = self.insights().await?;
        Ok(json!({
            "status": "success",
            "period": "weekly",
            "health_score": health["health_score"],
            "metrics_summary": metrics,
            "insights": insights,
        }))
    }
}

// ============================================================================
// TESTS
// ============================================================================
