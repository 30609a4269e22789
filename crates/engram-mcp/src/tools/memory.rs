//! Memory CRUD and lifecycle tools.

use engram_core::{
    ContextLevel, ListRequest, MemoryCategory, MemoryScope, MergeStrategy, Result,
    SearchFilters, StoreMemoryRequest, UpdateMemoryRequest, MAX_DELETE_BATCH,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::protocol::messages::ToolDescription;
use crate::state::AppState;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "store_memory".to_string(),
            description: Some(
                "Store a memory with automatic context-level classification. Scope 'project' \
                 requires project_name."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string"},
                    "category": {"type": "string", "enum": ["preference", "fact", "event", "workflow", "context", "code"]},
                    "scope": {"type": "string", "enum": ["global", "project"]},
                    "project_name": {"type": "string"},
                    "importance": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "metadata": {"type": "object"},
                    "context_level": {"type": "string", "enum": ["USER_PREFERENCE", "PROJECT_CONTEXT", "SESSION_STATE"]},
                },
                "required": ["content", "category"],
            }),
        },
        ToolDescription {
            name: "get_memory_by_id".to_string(),
            description: Some("Retrieve a specific memory by its id.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {"memory_id": {"type": "string"}},
                "required": ["memory_id"],
            }),
        },
        ToolDescription {
            name: "update_memory".to_string(),
            description: Some(
                "Update named fields of a memory. Regenerates the embedding when content \
                 changes unless regenerate_embedding is false."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "memory_id": {"type": "string"},
                    "content": {"type": "string"},
                    "category": {"type": "string"},
                    "importance": {"type": "number"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "metadata": {"type": "object"},
                    "context_level": {"type": "string"},
                    "preserve_timestamps": {"type": "boolean"},
                    "regenerate_embedding": {"type": "boolean"},
                },
                "required": ["memory_id"],
            }),
        },
        ToolDescription {
            name: "delete_memory".to_string(),
            description: Some("Hard-delete a memory by id.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {"memory_id": {"type": "string"}},
                "required": ["memory_id"],
            }),
        },
        ToolDescription {
            name: "delete_memories_by_query".to_string(),
            description: Some(
                "Bulk-delete memories matching filters, capped at 1000 per call. Use \
                 dry_run to preview."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "category": {"type": "string"},
                    "context_level": {"type": "string"},
                    "scope": {"type": "string"},
                    "project_name": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "min_importance": {"type": "number"},
                    "max_importance": {"type": "number"},
                    "max_count": {"type": "integer", "maximum": 1000},
                    "dry_run": {"type": "boolean"},
                },
            }),
        },
        ToolDescription {
            name: "list_memories".to_string(),
            description: Some(
                "Browse memories with filters, sorting and pagination.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "category": {"type": "string"},
                    "context_level": {"type": "string"},
                    "scope": {"type": "string"},
                    "project_name": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "min_importance": {"type": "number"},
                    "max_importance": {"type": "number"},
                    "date_from": {"type": "string"},
                    "date_to": {"type": "string"},
                    "sort_by": {"type": "string", "enum": ["created_at", "updated_at", "importance"]},
                    "sort_order": {"type": "string", "enum": ["asc", "desc"]},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100},
                    "offset": {"type": "integer", "minimum": 0},
                },
            }),
        },
        ToolDescription {
            name: "migrate_memory_scope".to_string(),
            description: Some(
                "Move a memory between global and project scope.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "memory_id": {"type": "string"},
                    "new_project_name": {"type": "string"},
                },
                "required": ["memory_id"],
            }),
        },
        ToolDescription {
            name: "bulk_reclassify".to_string(),
            description: Some(
                "Change the context level of every memory matching the filters.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "new_context_level": {"type": "string"},
                    "project_name": {"type": "string"},
                    "current_context_level": {"type": "string"},
                    "category": {"type": "string"},
                },
                "required": ["new_context_level"],
            }),
        },
        ToolDescription {
            name: "merge_memories".to_string(),
            description: Some(
                "Merge two or more memories into one survivor per the chosen strategy."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "memory_ids": {"type": "array", "items": {"type": "string"}, "minItems": 2},
                    "keep_id": {"type": "string"},
                    "strategy": {"type": "string", "enum": ["keep_most_recent", "keep_highest_importance", "keep_most_accessed", "merge_content", "user_selected"]},
                },
                "required": ["memory_ids"],
            }),
        },
    ]
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn store_memory(state: &AppState, args: Value) -> Result<Value> {
    let request: StoreMemoryRequest = parse_args(args)?;
    state.metrics.log_op("store_memory");
    let outcome = state.memory.store_memory(request).await?;
    Ok(serde_json::to_value(outcome).expect("outcome serializes"))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoryIdArgs {
    memory_id: String,
}

pub async fn get_memory_by_id(state: &AppState, args: Value) -> Result<Value> {
    let args: MemoryIdArgs = parse_args(args)?;
    match state.memory.get_memory_by_id(&args.memory_id).await? {
        Some(memory) => Ok(json!({"status": "success", "memory": memory})),
        None => Ok(json!({
            "status": "not_found",
            "message": format!("Memory {} not found", args.memory_id),
        })),
    }
}

pub async fn update_memory(state: &AppState, args: Value) -> Result<Value> {
    let request: UpdateMemoryRequest = parse_args(args)?;
    state.metrics.log_op("update_memory");
    let outcome = state.memory.update_memory(request).await?;
    Ok(serde_json::to_value(outcome).expect("outcome serializes"))
}

pub async fn delete_memory(state: &AppState, args: Value) -> Result<Value> {
    let args: MemoryIdArgs = parse_args(args)?;
    state.metrics.log_op("delete_memory");
    let outcome = state.memory.delete_memory(&args.memory_id).await?;
    Ok(serde_json::to_value(outcome).expect("outcome serializes"))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DeleteByQueryArgs {
    #[serde(default)]
    category: Option<MemoryCategory>,
    #[serde(default)]
    context_level: Option<ContextLevel>,
    #[serde(default)]
    scope: Option<MemoryScope>,
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    min_importance: f64,
    #[serde(default = "one")]
    max_importance: f64,
    #[serde(default = "max_delete")]
    max_count: usize,
    #[serde(default)]
    dry_run: bool,
}

fn one() -> f64 {
    1.0
}

fn max_delete() -> usize {
    MAX_DELETE_BATCH
}

pub async fn delete_memories_by_query(state: &AppState, args: Value) -> Result<Value> {
    let args: DeleteByQueryArgs = parse_args(args)?;
    let filters = SearchFilters {
        category: args.category,
        context_level: args.context_level,
        scope: args.scope,
        project_name: args.project_name,
        tags: args.tags,
        min_importance: args.min_importance,
        max_importance: args.max_importance,
        ..Default::default()
    };
    state.metrics.log_op("delete_memories_by_query");
    let outcome = state
        .memory
        .delete_memories_by_query(filters, args.max_count, args.dry_run)
        .await?;
    Ok(serde_json::to_value(outcome).expect("outcome serializes"))
}

pub async fn list_memories(state: &AppState, args: Value) -> Result<Value> {
    let request: ListRequest = parse_args(args)?;
    let page = state.memory.list_memories(request).await?;
    Ok(serde_json::to_value(page).expect("page serializes"))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MigrateArgs {
    memory_id: String,
    #[serde(default)]
    new_project_name: Option<String>,
}

pub async fn migrate_memory_scope(state: &AppState, args: Value) -> Result<Value> {
    let args: MigrateArgs = parse_args(args)?;
    state.metrics.log_op("migrate_memory_scope");
    let outcome = state
        .memory
        .migrate_memory_scope(&args.memory_id, args.new_project_name)
        .await?;
    Ok(serde_json::to_value(outcome).expect("outcome serializes"))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ReclassifyArgs {
    new_context_level: String,
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    current_context_level: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

pub async fn bulk_reclassify(state: &AppState, args: Value) -> Result<Value> {
    let args: ReclassifyArgs = parse_args(args)?;
    let new_level = ContextLevel::parse(&args.new_context_level)?;
    let current = args
        .current_context_level
        .as_deref()
        .map(ContextLevel::parse)
        .transpose()?;
    let category = args
        .category
        .as_deref()
        .map(MemoryCategory::parse)
        .transpose()?;
    state.metrics.log_op("bulk_reclassify");
    let outcome = state
        .memory
        .bulk_reclassify(new_level, args.project_name, current, category)
        .await?;
    Ok(serde_json::to_value(outcome).expect("outcome serializes"))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MergeArgs {
    memory_ids: Vec<String>,
    #[serde(default)]
    keep_id: Option<String>,
    #[serde(default)]
    strategy: Option<String>,
}

pub async fn merge_memories(state: &AppState, args: Value) -> Result<Value> {
    let args: MergeArgs = parse_args(args)?;
    let strategy = args
        .strategy
        .as_deref()
        .map(MergeStrategy::parse)
        .transpose()?;
    state.metrics.log_op("merge_memories");
    let outcome = state
        .memory
        .merge_memories(&args.memory_ids, args.keep_id, strategy)
        .await?;
    Ok(serde_json::to_value(outcome).expect("outcome serializes"))
}
