//! Export and import tools.

use std::path::PathBuf;

use engram_core::{
    parse_date_filter, ConflictMode, ContextLevel, EngramError, MemoryCategory, MemoryScope,
    Result, SearchFilters,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::protocol::messages::ToolDescription;
use crate::state::AppState;

pub fn descriptors() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "export_memories".to_string(),
            description: Some(
                "Export memories as a versioned JSON document, Markdown, or a portable \
                 archive directory with checksums."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "format": {"type": "string", "enum": ["json", "markdown", "archive"]},
                    "output_path": {"type": "string"},
                    "include_embeddings": {"type": "boolean"},
                    "category": {"type": "string"},
                    "context_level": {"type": "string"},
                    "scope": {"type": "string"},
                    "project_name": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "min_importance": {"type": "number"},
                    "max_importance": {"type": "number"},
                    "date_from": {"type": "string"},
                    "date_to": {"type": "string"},
                },
            }),
        },
        ToolDescription {
            name: "import_memories".to_string(),
            description: Some(
                "Import memories from an export document with skip/overwrite/merge \
                 conflict handling; per-record errors never abort the batch."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string"},
                    "content": {"type": "string"},
                    "conflict_mode": {"type": "string", "enum": ["skip", "overwrite", "merge"]},
                    "dry_run": {"type": "boolean"},
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
struct ExportArgs {
    #[serde(default = "default_format")]
    format: String,
    #[serde(default)]
    output_path: Option<PathBuf>,
    #[serde(default)]
    include_embeddings: bool,
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
    #[serde(default)]
    date_from: Option<String>,
    #[serde(default)]
    date_to: Option<String>,
}

fn default_format() -> String {
    "json".to_string()
}

fn one() -> f64 {
    1.0
}

impl ExportArgs {
    fn filters(&self) -> Result<SearchFilters> {
        Ok(SearchFilters {
            category: self.category,
            context_level: self.context_level,
            scope: self.scope,
            project_name: self.project_name.clone(),
            tags: self.tags.clone(),
            min_importance: self.min_importance,
            max_importance: self.max_importance,
            created_after: self.date_from.as_deref().map(parse_date_filter).transpose()?,
            created_before: self.date_to.as_deref().map(parse_date_filter).transpose()?,
            ..Default::default()
        })
    }
}

pub async fn export_memories(state: &AppState, args: Value) -> Result<Value> {
    let args: ExportArgs = parse_args(args)?;
    let filters = args.filters()?;
    state.metrics.log_op("export_memories");

    match args.format.as_str() {
        "json" => {
            let document = state.exporter.export_json(&filters).await?;
            match args.output_path {
                Some(path) => {
                    write_text(&path, &serde_json::to_string_pretty(&document).unwrap())?;
                    Ok(json!({
                        "status": "success",
                        "format": "json",
                        "file_path": path.display().to_string(),
                        "count": document["memory_count"],
                    }))
                }
                None => Ok(json!({
                    "status": "success",
                    "format": "json",
                    "count": document["memory_count"],
                    "document": document,
                })),
            }
        }
        "markdown" => {
            let content = state.exporter.export_markdown(&filters).await?;
            match args.output_path {
                Some(path) => {
                    write_text(&path, &content)?;
                    Ok(json!({
                        "status": "success",
                        "format": "markdown",
                        "file_path": path.display().to_string(),
                    }))
                }
                None => Ok(json!({
                    "status": "success",
                    "format": "markdown",
                    "content": content,
                })),
            }
        }
        "archive" => {
            let dir = args.output_path.ok_or_else(|| {
                EngramError::validation("output_path", "archive export requires output_path")
            })?;
            state
                .exporter
                .write_portable_archive(&dir, &filters, args.include_embeddings)
                .await
        }
        other => Err(EngramError::validation(
            "format",
            format!("format must be json, markdown or archive, got: {other}"),
        )),
    }
}

fn write_text(path: &PathBuf, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| EngramError::storage(format!("cannot create export dir: {e}")))?;
    }
    std::fs::write(path, content)
        .map_err(|e| EngramError::storage(format!("cannot write {}: {e}", path.display())))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ImportArgs {
    #[serde(default)]
    file_path: Option<PathBuf>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    conflict_mode: Option<String>,
    #[serde(default)]
    dry_run: bool,
}

pub async fn import_memories(state: &AppState, args: Value) -> Result<Value> {
    let args: ImportArgs = parse_args(args)?;
    let conflict_mode = args
        .conflict_mode
        .as_deref()
        .map(ConflictMode::parse)
        .transpose()?
        .unwrap_or_default();

    let content = match (args.file_path, args.content) {
        (Some(path), None) => std::fs::read_to_string(&path).map_err(|e| {
            EngramError::validation("file_path", format!("cannot read {}: {e}", path.display()))
        })?,
        (None, Some(content)) => content,
        _ => {
            return Err(EngramError::validation(
                "content",
                "provide exactly one of file_path or content",
            ))
        }
    };

    state.metrics.log_op("import_memories");
    state
        .importer
        .import_json(&content, conflict_mode, args.dry_run)
        .await
}
