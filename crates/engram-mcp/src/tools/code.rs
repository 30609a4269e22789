//! Code search and indexing tools.

use std::path::PathBuf;

use engram_core::{CodeSearchFilters, CodeSortBy, Result, SortOrder};
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::protocol::messages::ToolDescription;
use crate::state::AppState;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "search_code".to_string(),
            description: Some(
                "Semantic code search with glob, complexity, line-count and \
                 modification-date filters and multi-criteria sorting."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "project_name": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100},
                    "file_pattern": {"type": "string"},
                    "exclude_patterns": {"type": "array", "items": {"type": "string"}},
                    "complexity_min": {"type": "integer"},
                    "complexity_max": {"type": "integer"},
                    "line_count_min": {"type": "integer"},
                    "line_count_max": {"type": "integer"},
                    "modified_after": {"type": "string"},
                    "modified_before": {"type": "string"},
                    "sort_by": {"type": "string", "enum": ["relevance", "complexity", "size", "recency", "importance"]},
                    "sort_order": {"type": "string", "enum": ["asc", "desc"]},
                },
                "required": ["query"],
            }),
        },
        ToolDescription {
            name: "find_similar_code".to_string(),
            description: Some(
                "Find code units semantically similar to an indexed unit.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "memory_id": {"type": "string"},
                    "similarity_threshold": {"type": "number"},
                },
                "required": ["memory_id"],
            }),
        },
        ToolDescription {
            name: "index_codebase".to_string(),
            description: Some(
                "Walk a directory (honoring .gitignore) and index source files as code \
                 memories for a project."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "project_name": {"type": "string"},
                },
                "required": ["path", "project_name"],
            }),
        },
    ]
}

// ============================================================================
// HANDLERS
// ============================================================================

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchCodeArgs {
    query: String,
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    file_pattern: Option<String>,
    #[serde(default)]
    exclude_patterns: Option<Vec<String>>,
    #[serde(default)]
    complexity_min: Option<u32>,
    #[serde(default)]
    complexity_max: Option<u32>,
    #[serde(default)]
    line_count_min: Option<u32>,
    #[serde(default)]
    line_count_max: Option<u32>,
    #[serde(default)]
    modified_after: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    modified_before: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    sort_by: CodeSortBy,
    #[serde(default)]
    sort_order: SortOrder,
}

fn default_limit() -> usize {
    10
}

pub async fn search_code(state: &AppState, args: Value) -> Result<Value> {
    let args: SearchCodeArgs = parse_args(args)?;
    let filters = CodeSearchFilters {
        file_pattern: args.file_pattern,
        exclude_patterns: args.exclude_patterns,
        complexity_min: args.complexity_min,
        complexity_max: args.complexity_max,
        line_count_min: args.line_count_min,
        line_count_max: args.line_count_max,
        modified_after: args.modified_after,
        modified_before: args.modified_before,
        sort_by: args.sort_by,
        sort_order: args.sort_order,
    };
    state.metrics.log_op("search_code");
    state
        .code
        .search_code(&args.query, args.project_name, filters, args.limit)
        .await
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SimilarCodeArgs {
    memory_id: String,
    #[serde(default)]
    similarity_threshold: Option<f32>,
}

pub async fn find_similar_code(state: &AppState, args: Value) -> Result<Value> {
    let args: SimilarCodeArgs = parse_args(args)?;
    state
        .code
        .find_similar_code(&args.memory_id, args.similarity_threshold)
        .await
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexArgs {
    path: PathBuf,
    project_name: String,
}

pub async fn index_codebase(state: &AppState, args: Value) -> Result<Value> {
    let args: IndexArgs = parse_args(args)?;
    state.metrics.log_op("index_codebase");
    state.code.index_codebase(&args.path, &args.project_name).await
}
