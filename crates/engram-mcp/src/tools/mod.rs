//! Tool surface: one module per tool group, dispatched by name.
//!
//! Every call runs through the operation driver, which allocates the
//! operation id, installs the tracing span, enforces the deadline, and maps
//! failures into the structured error taxonomy.

pub mod analytics;
pub mod backup;
pub mod code;
pub mod cross_project;
pub mod dedup;
pub mod health;
pub mod memory;
pub mod search;

use engram_core::{EngramError, Result};
use serde_json::Value;

use crate::protocol::messages::ToolDescription;
use crate::state::AppState;

/// All tool descriptors, in presentation order.
pub fn descriptors() -> Vec<ToolDescription> {
    let mut tools = Vec::new();
    tools.extend(memory::descriptors());
    tools.extend(search::descriptors());
    tools.extend(dedup::descriptors());
    tools.extend(backup::descriptors());
    tools.extend(code::descriptors());
    tools.extend(cross_project::descriptors());
    tools.extend(analytics::descriptors());
    tools.extend(health::descriptors());
    tools
}

/// Parse tool arguments into a typed shape.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| EngramError::validation("arguments", e.to_string()))
}

/// Route a tool call to its handler, under the operation driver.
pub async fn dispatch(state: &AppState, name: &str, args: Value) -> Result<Value> {
    macro_rules! run {
        ($op:literal, $handler:expr) => {
            state.driver.run($op, $handler).await
        };
    }

    match name {
        "store_memory" => run!("store_memory", memory::store_memory(state, args)),
        "retrieve_memories" => run!("retrieve_memories", search::retrieve_memories(state, args)),
        "get_memory_by_id" => run!("get_memory_by_id", memory::get_memory_by_id(state, args)),
        "update_memory" => run!("update_memory", memory::update_memory(state, args)),
        "delete_memory" => run!("delete_memory", memory::delete_memory(state, args)),
        "delete_memories_by_query" => run!(
            "delete_memories_by_query",
            memory::delete_memories_by_query(state, args)
        ),
        "list_memories" => run!("list_memories", memory::list_memories(state, args)),
        "migrate_memory_scope" => run!(
            "migrate_memory_scope",
            memory::migrate_memory_scope(state, args)
        ),
        "bulk_reclassify" => run!("bulk_reclassify", memory::bulk_reclassify(state, args)),
        "find_duplicate_memories" => run!(
            "find_duplicate_memories",
            dedup::find_duplicate_memories(state, args)
        ),
        "merge_memories" => run!("merge_memories", memory::merge_memories(state, args)),
        "export_memories" => run!("export_memories", backup::export_memories(state, args)),
        "import_memories" => run!("import_memories", backup::import_memories(state, args)),
        "retrieve_preferences" => run!(
            "retrieve_preferences",
            search::retrieve_preferences(state, args)
        ),
        "retrieve_project_context" => run!(
            "retrieve_project_context",
            search::retrieve_project_context(state, args)
        ),
        "retrieve_session_state" => run!(
            "retrieve_session_state",
            search::retrieve_session_state(state, args)
        ),
        "search_code" => run!("search_code", code::search_code(state, args)),
        "find_similar_code" => run!("find_similar_code", code::find_similar_code(state, args)),
        "index_codebase" => run!("index_codebase", code::index_codebase(state, args)),
        "search_all_projects" => run!(
            "search_all_projects",
            cross_project::search_all_projects(state, args)
        ),
        "opt_in_cross_project" => run!(
            "opt_in_cross_project",
            cross_project::opt_in_cross_project(state, args)
        ),
        "opt_out_cross_project" => run!(
            "opt_out_cross_project",
            cross_project::opt_out_cross_project(state, args)
        ),
        "list_opted_in_projects" => run!(
            "list_opted_in_projects",
            cross_project::list_opted_in_projects(state, args)
        ),
        "get_usage_statistics" => run!(
            "get_usage_statistics",
            analytics::get_usage_statistics(state, args)
        ),
        "get_top_queries" => run!("get_top_queries", analytics::get_top_queries(state, args)),
        "get_frequently_accessed_code" => run!(
            "get_frequently_accessed_code",
            analytics::get_frequently_accessed_code(state, args)
        ),
        "get_token_analytics" => run!(
            "get_token_analytics",
            analytics::get_token_analytics(state, args)
        ),
        "submit_search_feedback" => run!(
            "submit_search_feedback",
            analytics::submit_search_feedback(state, args)
        ),
        "get_quality_metrics" => run!(
            "get_quality_metrics",
            analytics::get_quality_metrics(state, args)
        ),
        "get_performance_metrics" => run!(
            "get_performance_metrics",
            health::get_performance_metrics(state, args)
        ),
        "get_health_score" => run!("get_health_score", health::get_health_score(state, args)),
        "get_active_alerts" => run!("get_active_alerts", health::get_active_alerts(state, args)),
        "resolve_alert" => run!("resolve_alert", health::resolve_alert(state, args)),
        "get_capacity_forecast" => run!(
            "get_capacity_forecast",
            health::get_capacity_forecast(state, args)
        ),
        "get_weekly_report" => run!("get_weekly_report", health::get_weekly_report(state, args)),
        "get_dashboard_stats" => run!(
            "get_dashboard_stats",
            health::get_dashboard_stats(state, args)
        ),
        "get_recent_activity" => run!(
            "get_recent_activity",
            health::get_recent_activity(state, args)
        ),
        other => Err(EngramError::validation(
            "tool",
            format!("unknown tool: {other}"),
        )),
    }
}
