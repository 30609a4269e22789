//! Usage analytics and search-quality tools.

use engram_core::{FeedbackRating, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::protocol::messages::ToolDescription;
use crate::state::AppState;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "get_usage_statistics".to_string(),
            description: Some("Overall usage statistics for a window of days.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {"days": {"type": "integer", "minimum": 1}},
            }),
        },
        ToolDescription {
            name: "get_top_queries".to_string(),
            description: Some("Most frequently executed queries.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "minimum": 1},
                    "days": {"type": "integer", "minimum": 1},
                },
            }),
        },
        ToolDescription {
            name: "get_frequently_accessed_code".to_string(),
            description: Some("Most frequently accessed indexed code units.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "minimum": 1},
                    "days": {"type": "integer", "minimum": 1},
                },
            }),
        },
        ToolDescription {
            name: "get_token_analytics".to_string(),
            description: Some(
                "Estimated context tokens served from memory.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {"period_days": {"type": "integer", "minimum": 1}},
            }),
        },
        ToolDescription {
            name: "submit_search_feedback".to_string(),
            description: Some(
                "Record a helpful/not_helpful rating for a search.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "search_id": {"type": "string"},
                    "query": {"type": "string"},
                    "result_ids": {"type": "array", "items": {"type": "string"}},
                    "rating": {"type": "string", "enum": ["helpful", "not_helpful"]},
                    "comment": {"type": "string"},
                    "project_name": {"type": "string"},
                },
                "required": ["search_id", "query", "rating"],
            }),
        },
        ToolDescription {
            name: "get_quality_metrics".to_string(),
            description: Some(
                "Aggregated search-quality metrics over a time window.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "time_range_hours": {"type": "integer", "minimum": 1},
                    "project_name": {"type": "string"},
                },
            }),
        },
    ]
}

// ============================================================================
// HANDLERS
// ============================================================================

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WindowArgs {
    #[serde(default = "default_days")]
    days: i64,
    #[serde(default = "default_top")]
    limit: usize,
}

fn default_days() -> i64 {
    30
}

fn default_top() -> usize {
    10
}

pub async fn get_usage_statistics(state: &AppState, args: Value) -> Result<Value> {
    let args: WindowArgs = parse_args(args)?;
    state.refresh_cache_metrics();
    state.analytics.get_usage_statistics(args.days).await
}

pub async fn get_top_queries(state: &AppState, args: Value) -> Result<Value> {
    let args: WindowArgs = parse_args(args)?;
    Ok(state.analytics.get_top_queries(args.limit, args.days))
}

pub async fn get_frequently_accessed_code(state: &AppState, args: Value) -> Result<Value> {
    let args: WindowArgs = parse_args(args)?;
    state
        .analytics
        .get_frequently_accessed_code(args.limit, args.days)
        .await
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TokenArgs {
    #[serde(default = "default_days")]
    period_days: i64,
}

pub async fn get_token_analytics(state: &AppState, args: Value) -> Result<Value> {
    let args: TokenArgs = parse_args(args)?;
    state.analytics.get_token_analytics(args.period_days)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FeedbackArgs {
    search_id: String,
    query: String,
    #[serde(default)]
    result_ids: Vec<String>,
    rating: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    project_name: Option<String>,
}

pub async fn submit_search_feedback(state: &AppState, args: Value) -> Result<Value> {
    let args: FeedbackArgs = parse_args(args)?;
    let rating = FeedbackRating::parse(&args.rating)?;
    state.analytics.submit_search_feedback(
        &args.search_id,
        &args.query,
        args.result_ids,
        rating,
        args.comment,
        args.project_name,
    )
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct QualityArgs {
    #[serde(default = "default_hours")]
    time_range_hours: i64,
    #[serde(default)]
    project_name: Option<String>,
}

fn default_hours() -> i64 {
    24
}

pub async fn get_quality_metrics(state: &AppState, args: Value) -> Result<Value> {
    let args: QualityArgs = parse_args(args)?;
    state
        .analytics
        .get_quality_metrics(args.time_range_hours, args.project_name.as_deref())
}
