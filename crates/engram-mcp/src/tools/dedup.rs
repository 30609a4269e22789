//! Duplicate detection tool.

use engram_core::{MemoryCategory, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::protocol::messages::ToolDescription;
use crate::state::AppState;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![ToolDescription {
        name: "find_duplicate_memories".to_string(),
        description: Some(
            "Scan for near-duplicate memories and group them into clusters with a \
             canonical representative."
                .to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "project_name": {"type": "string"},
                "category": {"type": "string"},
                "similarity_threshold": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            },
        }),
    }]
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FindDuplicatesArgs {
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    category: Option<MemoryCategory>,
    #[serde(default)]
    similarity_threshold: Option<f32>,
}

pub async fn find_duplicate_memories(state: &AppState, args: Value) -> Result<Value> {
    let args: FindDuplicatesArgs = parse_args(args)?;
    let clusters = state
        .detector
        .cluster_duplicates(args.similarity_threshold, args.project_name.clone(), args.category)
        .await?;
    Ok(json!({
        "status": "success",
        "total_groups": clusters.len(),
        "duplicate_groups": clusters,
        "similarity_threshold": args.similarity_threshold,
        "project_name": args.project_name,
    }))
}
