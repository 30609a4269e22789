//! Export and import of the memory corpus.
//!
//! Exports produce a versioned JSON document (or human-readable Markdown);
//! portable archives are directories carrying the document, a manifest, an
//! optional embedding blob, and SHA-256 checksums over each file. Imports
//! resolve conflicts per mode, never abort on a single bad record, and
//! support a dry run.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::config::EngramConfig;
use crate::embeddings::{vector_to_bytes, Embedder};
use crate::error::{EngramError, Result};
use crate::model::{
    ContextLevel, MemoryCategory, MemoryProvenance, MemoryScope, MemoryUnit, ProvenanceSource,
    SearchFilters, SortField, SortOrder,
};
use crate::store::{MemoryPatch, VectorStore};

/// Document format version.
const EXPORT_VERSION: &str = "1.0.0";

/// Memory schema version carried in every export.
const SCHEMA_VERSION: &str = "3.0.0";

/// Ceiling on exported records per call.
const EXPORT_SCAN_LIMIT: usize = 100_000;

// ============================================================================
// CONFLICT MODE
// ============================================================================

/// Conflict resolution for records whose id already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictMode {
    #[default]
    Skip,
    Overwrite,
    Merge,
}

impl ConflictMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "skip" => Ok(ConflictMode::Skip),
            "overwrite" => Ok(ConflictMode::Overwrite),
            "merge" => Ok(ConflictMode::Merge),
            other => Err(EngramError::validation(
                "conflict_mode",
                format!("conflict_mode must be skip, overwrite or merge, got: {other}"),
            )),
        }
    }
}

// ============================================================================
// EXPORTER
// ============================================================================

/// Serializes filtered slices of the corpus.
pub struct Exporter {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
}

impl Exporter {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<Embedder>) -> Self {
        Self { store, embedder }
    }

    async fn filtered_memories(&self, filters: &SearchFilters) -> Result<Vec<MemoryUnit>> {
        let (memories, _) = self
            .store
            .list(
                filters,
                SortField::CreatedAt,
                SortOrder::Asc,
                EXPORT_SCAN_LIMIT,
                0,
            )
            .await?;
        Ok(memories)
    }

    /// The canonical export document.
    pub async fn export_json(&self, filters: &SearchFilters) -> Result<serde_json::Value> {
        let memories = self.filtered_memories(filters).await?;
        let export_type = if filters.is_empty() { "full" } else { "filtered" };
        tracing::info!("exporting {} memories ({export_type})", memories.len());
        Ok(json!({
            "version": EXPORT_VERSION,
            "schema_version": SCHEMA_VERSION,
            "export_date": Utc::now().to_rfc3339(),
            "export_type": export_type,
            "filters": filters,
            "memory_count": memories.len(),
            "memories": memories,
        }))
    }

    /// Human-readable Markdown, grouped by project and category.
    pub async fn export_markdown(&self, filters: &SearchFilters) -> Result<String> {
        let memories = self.filtered_memories(filters).await?;
        let mut lines = vec![
            "# Memory Export".to_string(),
            String::new(),
            format!(
                "**Export Date:** {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            ),
            format!("**Total Memories:** {}", memories.len()),
            String::new(),
            "---".to_string(),
            String::new(),
        ];

        let mut grouped: std::collections::BTreeMap<String, Vec<&MemoryUnit>> =
            std::collections::BTreeMap::new();
        for memory in &memories {
            let project = memory
                .project_name
                .clone()
                .unwrap_or_else(|| "global".to_string());
            grouped.entry(project).or_default().push(memory);
        }

        for (project, group) in grouped {
            lines.push(format!("## {project}"));
            lines.push(String::new());
            for memory in group {
                lines.push(format!("### Memory: {}", memory.id));
                lines.push(format!("**Category:** {}", memory.category.as_str()));
                lines.push(format!("**Importance:** {:.2}", memory.importance));
                lines.push(format!(
                    "**Context Level:** {}",
                    memory.context_level.as_str()
                ));
                if !memory.tags.is_empty() {
                    lines.push(format!("**Tags:** {}", memory.tags.join(", ")));
                }
                lines.push(format!("**Created:** {}", memory.created_at.to_rfc3339()));
                lines.push(String::new());
                lines.push(memory.content.clone());
                lines.push(String::new());
                lines.push("---".to_string());
                lines.push(String::new());
            }
        }
        Ok(lines.join("\n"))
    }

    /// Write a portable archive directory: memories.json, manifest.json,
    /// optional embeddings.bin, and checksums.sha256 over each file.
    pub async fn write_portable_archive(
        &self,
        dir: &Path,
        filters: &SearchFilters,
        include_embeddings: bool,
    ) -> Result<serde_json::Value> {
        std::fs::create_dir_all(dir)
            .map_err(|e| EngramError::storage(format!("cannot create archive dir: {e}")))?;

        let document = self.export_json(filters).await?;
        let memories: Vec<MemoryUnit> =
            serde_json::from_value(document["memories"].clone())
                .map_err(|e| EngramError::storage(format!("archive serialization: {e}")))?;

        let memories_path = dir.join("memories.json");
        let document_text = serde_json::to_string_pretty(&document)
            .map_err(|e| EngramError::storage(format!("archive serialization: {e}")))?;
        write_file(&memories_path, document_text.as_bytes())?;

        let mut files = vec!["memories.json".to_string()];
        if include_embeddings && !memories.is_empty() {
            // Embeddings are derived data; regenerate deterministically in
            // memory order.
            let mut blob = Vec::new();
            for memory in &memories {
                let vector = self.embedder.embed(&memory.content).await?;
                blob.extend_from_slice(&vector_to_bytes(&vector));
            }
            write_file(&dir.join("embeddings.bin"), &blob)?;
            files.push("embeddings.bin".to_string());
        }

        let manifest = json!({
            "version": EXPORT_VERSION,
            "schema_version": SCHEMA_VERSION,
            "created_at": Utc::now().to_rfc3339(),
            "memory_count": memories.len(),
            "includes_embeddings": include_embeddings && !memories.is_empty(),
            "embedding_model": self.embedder.model_name(),
            "embedding_dimensions": self.embedder.dimensions(),
            "files": files,
        });
        let manifest_text = serde_json::to_string_pretty(&manifest)
            .map_err(|e| EngramError::storage(format!("archive serialization: {e}")))?;
        write_file(&dir.join("manifest.json"), manifest_text.as_bytes())?;

        // Checksums last, over everything else in the archive.
        let mut checksum_lines = Vec::new();
        let mut names = files.clone();
        names.push("manifest.json".to_string());
        for name in &names {
            let bytes = std::fs::read(dir.join(name))
                .map_err(|e| EngramError::storage(format!("cannot checksum {name}: {e}")))?;
            checksum_lines.push(format!("{}  {name}", sha256_hex(&bytes)));
        }
        write_file(
            &dir.join("checksums.sha256"),
            checksum_lines.join("\n").as_bytes(),
        )?;

        tracing::info!(
            "wrote portable archive with {} memories to {}",
            memories.len(),
            dir.display()
        );
        Ok(json!({
            "status": "success",
            "output_dir": dir.display().to_string(),
            "memory_count": memories.len(),
            "includes_embeddings": include_embeddings && !memories.is_empty(),
        }))
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes)
        .map_err(|e| EngramError::storage(format!("cannot write {}: {e}", path.display())))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// IMPORTER
// ============================================================================

/// Per-record conflict-aware importer.
pub struct Importer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    config: Arc<EngramConfig>,
}

impl Importer {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<Embedder>,
        config: Arc<EngramConfig>,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Import an export document. Single-record failures accumulate in the
    /// response; they never abort the batch.
    pub async fn import_json(
        &self,
        content: &str,
        conflict_mode: ConflictMode,
        dry_run: bool,
    ) -> Result<serde_json::Value> {
        if self.config.read_only_mode {
            return Err(EngramError::read_only("import_memories"));
        }
        let document: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| EngramError::validation("content", format!("invalid JSON: {e}")))?;
        let Some(records) = document.get("memories").and_then(|m| m.as_array()) else {
            return Err(EngramError::validation(
                "content",
                "import document must contain a 'memories' list",
            ));
        };

        let mut created = 0usize;
        let mut updated = 0usize;
        let mut skipped = 0usize;
        let mut errors: Vec<String> = Vec::new();

        for (index, record) in records.iter().enumerate() {
            match self
                .import_record(index, record, conflict_mode, dry_run)
                .await
            {
                Ok(RecordOutcome::Created) => created += 1,
                Ok(RecordOutcome::Updated) => updated += 1,
                Ok(RecordOutcome::Skipped) => skipped += 1,
                Err(e) => errors.push(format!("memory at index {index}: {e}")),
            }
        }

        tracing::info!(
            "import completed: {created} created, {updated} updated, {skipped} skipped, \
             {} errors (dry_run={dry_run})",
            errors.len()
        );
        Ok(json!({
            "status": if errors.is_empty() { "success" } else { "partial" },
            "dry_run": dry_run,
            "created": created,
            "updated": updated,
            "skipped": skipped,
            "errors": errors,
            "total_processed": records.len(),
        }))
    }

    async fn import_record(
        &self,
        index: usize,
        record: &serde_json::Value,
        conflict_mode: ConflictMode,
        dry_run: bool,
    ) -> Result<RecordOutcome> {
        let memory_id = record
            .get("memory_id")
            .or_else(|| record.get("id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                EngramError::validation("memory_id", format!("record {index} has no id"))
            })?
            .to_string();

        let unit = unit_from_record(&memory_id, record, self.embedder.model_name())?;
        let existing = self.store.get_by_id(&memory_id).await?;

        match (existing, conflict_mode) {
            (Some(_), ConflictMode::Skip) => Ok(RecordOutcome::Skipped),
            (Some(_), ConflictMode::Overwrite) => {
                if dry_run {
                    return Ok(RecordOutcome::Updated);
                }
                let vector = self.embedder.embed(&unit.content).await?;
                self.store.store(&unit, vector).await?;
                Ok(RecordOutcome::Updated)
            }
            (Some(_), ConflictMode::Merge) => {
                if dry_run {
                    return Ok(RecordOutcome::Updated);
                }
                // Merge folds the incoming fields over the existing record.
                let vector = Some(self.embedder.embed(&unit.content).await?);
                let patch = MemoryPatch {
                    content: Some(unit.content.clone()),
                    category: Some(unit.category),
                    context_level: Some(unit.context_level),
                    scope: Some(unit.scope),
                    project_name: Some(unit.project_name.clone()),
                    importance: Some(unit.importance),
                    tags: Some(unit.tags.clone()),
                    metadata: Some(unit.metadata.clone()),
                    touch_updated_at: true,
                    ..Default::default()
                };
                self.store.update(&memory_id, patch, vector).await?;
                Ok(RecordOutcome::Updated)
            }
            (None, _) => {
                if dry_run {
                    return Ok(RecordOutcome::Created);
                }
                let vector = self.embedder.embed(&unit.content).await?;
                self.store.store(&unit, vector).await?;
                Ok(RecordOutcome::Created)
            }
        }
    }
}

enum RecordOutcome {
    Created,
    Updated,
    Skipped,
}

/// Build a validated unit from an import record, preserving the incoming id
/// and timestamps where present.
fn unit_from_record(
    memory_id: &str,
    record: &serde_json::Value,
    default_model: &str,
) -> Result<MemoryUnit> {
    // Full export documents deserialize directly.
    if let Ok(mut unit) = serde_json::from_value::<MemoryUnit>(record.clone()) {
        unit.id = memory_id.to_string();
        unit.validate()?;
        return Ok(unit);
    }

    // Otherwise assemble from the minimal field set.
    let content = record
        .get("content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| EngramError::validation("content", "record has no content"))?;
    let category = record
        .get("category")
        .and_then(|v| v.as_str())
        .map(MemoryCategory::parse)
        .transpose()?
        .unwrap_or(MemoryCategory::Fact);
    let context_level = record
        .get("context_level")
        .and_then(|v| v.as_str())
        .map(ContextLevel::parse)
        .transpose()?
        .unwrap_or(ContextLevel::SessionState);
    let scope = record
        .get("scope")
        .and_then(|v| v.as_str())
        .map(MemoryScope::parse)
        .transpose()?
        .unwrap_or(MemoryScope::Global);
    let project_name = record
        .get("project_name")
        .and_then(|v| v.as_str())
        .map(String::from);
    let importance = record
        .get("importance")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.5);
    let tags: Vec<String> = record
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|t| t.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    let metadata = record
        .get("metadata")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    let mut unit = MemoryUnit::create(
        content,
        category,
        context_level,
        scope,
        project_name,
        importance,
        default_model,
        &tags,
        metadata,
    )?;
    unit.id = memory_id.to_string();
    unit.provenance = MemoryProvenance {
        source: ProvenanceSource::Imported,
        created_by: "import".to_string(),
        ..Default::default()
    };
    unit.validate()?;
    Ok(unit)
}

// ============================================================================
// TESTS
// ============================================================================
