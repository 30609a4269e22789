//! Retrieval tools: general semantic search plus the context-scoped
//! convenience retrievers.

use engram_core::{
    AdvancedSearchFilters, ContextLevel, MemoryCategory, MemoryScope, QueryRequest, Result,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::protocol::messages::ToolDescription;
use crate::state::AppState;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "retrieve_memories".to_string(),
            description: Some(
                "Semantic search over stored memories with filters, session-aware \
                 deduplication, and composite re-ranking."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "minLength": 1, "maxLength": 1000},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100},
                    "context_level": {"type": "string", "enum": ["USER_PREFERENCE", "PROJECT_CONTEXT", "SESSION_STATE"]},
                    "scope": {"type": "string", "enum": ["global", "project"]},
                    "project_name": {"type": "string"},
                    "category": {"type": "string"},
                    "min_importance": {"type": "number"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "session_id": {"type": "string"},
                    "advanced_filters": {"type": "object"},
                },
                "required": ["query"],
            }),
        },
        ToolDescription {
            name: "retrieve_preferences".to_string(),
            description: Some("Retrieve user preferences and style guidelines.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100},
                    "session_id": {"type": "string"},
                },
                "required": ["query"],
            }),
        },
        ToolDescription {
            name: "retrieve_project_context".to_string(),
            description: Some(
                "Retrieve project-specific facts; defaults to the current project."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100},
                    "project_name": {"type": "string"},
                    "session_id": {"type": "string"},
                },
                "required": ["query"],
            }),
        },
        ToolDescription {
            name: "retrieve_session_state".to_string(),
            description: Some(
                "Retrieve current session state and temporary context.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100},
                    "session_id": {"type": "string"},
                },
                "required": ["query"],
            }),
        },
    ]
}

// ============================================================================
// HANDLERS
// ============================================================================

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RetrieveArgs {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    context_level: Option<ContextLevel>,
    #[serde(default)]
    scope: Option<MemoryScope>,
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    category: Option<MemoryCategory>,
    #[serde(default)]
    min_importance: f64,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    advanced_filters: Option<AdvancedSearchFilters>,
}

fn default_limit() -> usize {
    5
}

pub async fn retrieve_memories(state: &AppState, args: Value) -> Result<Value> {
    let args: RetrieveArgs = parse_args(args)?;
    let request = QueryRequest {
        query: args.query,
        limit: args.limit,
        context_level: args.context_level,
        scope: args.scope,
        project_name: args.project_name,
        category: args.category,
        min_importance: args.min_importance,
        tags: args.tags,
        advanced_filters: args.advanced_filters,
    };
    let response = state
        .memory
        .retrieve_memories(request, args.session_id.as_deref())
        .await?;
    state.refresh_cache_metrics();
    Ok(serde_json::to_value(response).expect("response serializes"))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ScopedRetrieveArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

pub async fn retrieve_preferences(state: &AppState, args: Value) -> Result<Value> {
    let args: ScopedRetrieveArgs = parse_args(args)?;
    let response = state
        .memory
        .retrieve_preferences(&args.query, args.limit.unwrap_or(5), args.session_id.as_deref())
        .await?;
    Ok(serde_json::to_value(response).expect("response serializes"))
}

pub async fn retrieve_project_context(state: &AppState, args: Value) -> Result<Value> {
    let args: ScopedRetrieveArgs = parse_args(args)?;
    let response = state
        .memory
        .retrieve_project_context(
            &args.query,
            args.limit.unwrap_or(5),
            args.project_name,
            args.session_id.as_deref(),
        )
        .await?;
    Ok(serde_json::to_value(response).expect("response serializes"))
}

pub async fn retrieve_session_state(state: &AppState, args: Value) -> Result<Value> {
    let args: ScopedRetrieveArgs = parse_args(args)?;
    // A small default limit favors recency for session state.
    let response = state
        .memory
        .retrieve_session_state(&args.query, args.limit.unwrap_or(3), args.session_id.as_deref())
        .await?;
    Ok(serde_json::to_value(response).expect("response serializes"))
}
