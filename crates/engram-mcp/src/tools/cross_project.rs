//! Cross-project search and consent tools.

use engram_core::{MemoryCategory, Result, SearchFilters};
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::protocol::messages::ToolDescription;
use crate::state::AppState;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "search_all_projects".to_string(),
            description: Some(
                "Search every opted-in project in parallel; per-project failures are \
                 reported, not fatal."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100},
                    "category": {"type": "string"},
                },
                "required": ["query"],
            }),
        },
        ToolDescription {
            name: "opt_in_cross_project".to_string(),
            description: Some(
                "Allow a project's memories to appear in cross-project search.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {"project_name": {"type": "string"}},
                "required": ["project_name"],
            }),
        },
        ToolDescription {
            name: "opt_out_cross_project".to_string(),
            description: Some(
                "Exclude a project's memories from cross-project search.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {"project_name": {"type": "string"}},
                "required": ["project_name"],
            }),
        },
        ToolDescription {
            name: "list_opted_in_projects".to_string(),
            description: Some("List cross-project consent state.".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
        },
    ]
}

// ============================================================================
// HANDLERS
// ============================================================================

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchAllArgs {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    category: Option<MemoryCategory>,
}

fn default_limit() -> usize {
    10
}

pub async fn search_all_projects(state: &AppState, args: Value) -> Result<Value> {
    let args: SearchAllArgs = parse_args(args)?;
    let filters = args.category.map(|category| SearchFilters {
        category: Some(category),
        ..Default::default()
    });
    state.metrics.log_op("search_all_projects");
    state
        .cross
        .search_all_projects(&args.query, args.limit, filters)
        .await
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectArgs {
    project_name: String,
}

pub async fn opt_in_cross_project(state: &AppState, args: Value) -> Result<Value> {
    let args: ProjectArgs = parse_args(args)?;
    state.cross.opt_in(&args.project_name).await
}

pub async fn opt_out_cross_project(state: &AppState, args: Value) -> Result<Value> {
    let args: ProjectArgs = parse_args(args)?;
    state.cross.opt_out(&args.project_name).await
}

pub async fn list_opted_in_projects(state: &AppState, _args: Value) -> Result<Value> {
    state.cross.list_opted_in().await
}
