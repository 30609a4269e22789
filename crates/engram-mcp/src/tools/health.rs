//! Health, metrics, and dashboard tools.

use engram_core::{AlertSeverity, EngramError, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::protocol::messages::ToolDescription;
use crate::state::AppState;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "get_performance_metrics".to_string(),
            description: Some(
                "Current latency percentiles, error rate, and cache hit rate.".to_string(),
            ),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDescription {
            name: "get_health_score".to_string(),
            description: Some("Overall 0-100 health score with components.".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDescription {
            name: "get_active_alerts".to_string(),
            description: Some("Active system alerts, optionally by severity.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "severity_filter": {"type": "string", "enum": ["CRITICAL", "WARNING", "INFO"]},
                },
            }),
        },
        ToolDescription {
            name: "resolve_alert".to_string(),
            description: Some("Mark an alert as resolved.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {"alert_id": {"type": "string"}},
                "required": ["alert_id"],
            }),
        },
        ToolDescription {
            name: "get_capacity_forecast".to_string(),
            description: Some(
                "Linear corpus-growth forecast from the recent addition rate.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {"days_ahead": {"type": "integer", "minimum": 1}},
            }),
        },
        ToolDescription {
            name: "get_weekly_report".to_string(),
            description: Some("Weekly health summary with insights.".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDescription {
            name: "get_dashboard_stats".to_string(),
            description: Some(
                "Aggregate memory counts by project, category, and lifecycle.".to_string(),
            ),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDescription {
            name: "get_recent_activity".to_string(),
            description: Some("Recently created and updated memories.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100},
                    "project_name": {"type": "string"},
                },
            }),
        },
    ]
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn get_performance_metrics(state: &AppState, _args: Value) -> Result<Value> {
    state.refresh_cache_metrics();
    Ok(state.health.get_performance_metrics())
}

pub async fn get_health_score(state: &AppState, _args: Value) -> Result<Value> {
    state.refresh_cache_metrics();
    state.health.get_health_score().await
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AlertsArgs {
    #[serde(default)]
    severity_filter: Option<String>,
}

pub async fn get_active_alerts(state: &AppState, args: Value) -> Result<Value> {
    let args: AlertsArgs = parse_args(args)?;
    let severity = match args.severity_filter.as_deref() {
        None => None,
        Some("CRITICAL") => Some(AlertSeverity::Critical),
        Some("WARNING") => Some(AlertSeverity::Warning),
        Some("INFO") => Some(AlertSeverity::Info),
        Some(other) => {
            return Err(EngramError::validation(
                "severity_filter",
                format!("unknown severity: {other}"),
            ))
        }
    };
    state.refresh_cache_metrics();
    Ok(state.health.get_active_alerts(severity))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ResolveAlertArgs {
    alert_id: String,
}

pub async fn resolve_alert(state: &AppState, args: Value) -> Result<Value> {
    let args: ResolveAlertArgs = parse_args(args)?;
    Ok(state.health.resolve_alert(&args.alert_id))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ForecastArgs {
    #[serde(default = "default_days_ahead")]
    days_ahead: i64,
}

fn default_days_ahead() -> i64 {
    30
}

pub async fn get_capacity_forecast(state: &AppState, args: Value) -> Result<Value> {
    let args: ForecastArgs = parse_args(args)?;
    state.health.capacity_forecast(args.days_ahead).await
}

pub async fn get_weekly_report(state: &AppState, _args: Value) -> Result<Value> {
    state.refresh_cache_metrics();
    state.health.weekly_report().await
}

pub async fn get_dashboard_stats(state: &AppState, _args: Value) -> Result<Value> {
    state.memory.get_dashboard_stats().await
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ActivityArgs {
    #[serde(default = "default_activity_limit")]
    limit: usize,
    #[serde(default)]
    project_name: Option<String>,
}

fn default_activity_limit() -> usize {
    20
}

pub async fn get_recent_activity(state: &AppState, args: Value) -> Result<Value> {
    let args: ActivityArgs = parse_args(args)?;
    state
        .memory
        .get_recent_activity(args.limit, args.project_name)
        .await
}
