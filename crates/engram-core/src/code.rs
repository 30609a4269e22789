//! Code indexing and code search.
//!
//! Indexed code fragments are ordinary CODE-category memories whose
//! metadata carries the code-specific keys (`file_path`, `unit_name`,
//! `language`, `line_count`, `cyclomatic_complexity`, `has_documentation`,
//! `modified_at`). Search layers glob, complexity, size, and date filters on
//! top of semantic retrieval.

use std::path::Path;
use std::sync::Arc;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use glob::Pattern;
use regex::Regex;
use serde_json::json;

use crate::config::EngramConfig;
use crate::dedup::DuplicateDetector;
use crate::embeddings::Embedder;
use crate::error::{EngramError, Result};
use crate::model::{
    CodeSearchFilters, CodeSortBy, MemoryCategory, MemoryScope, MemoryUnit, ProvenanceSource,
    ScoredUnit, SearchFilters, SortOrder,
};
use crate::store::VectorStore;

/// Source files larger than this are skipped outright.
const MAX_FILE_BYTES: u64 = 262_144;

/// Whole files up to this many lines index as one unit.
const WHOLE_FILE_LINES: usize = 160;

/// Chunk window and step for larger files.
const CHUNK_LINES: usize = 120;
const CHUNK_STEP: usize = 100;

const INDEXED_EXTENSIONS: [(&str, &str); 14] = [
    ("rs", "rust"),
    ("py", "python"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("go", "go"),
    ("java", "java"),
    ("rb", "ruby"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("kt", "kotlin"),
    ("swift", "swift"),
];

static UNIT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:pub\s+)?(?:fn|def|class|function|struct|enum|trait|interface|impl)\s+([A-Za-z_][A-Za-z0-9_]*)")
        .expect("unit name pattern compiles")
});

static BRANCH_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(if|else if|elif|for|while|match|case|when|catch|and|or)\b|&&|\|\|")
        .expect("branch pattern compiles")
});

const DOC_MARKERS: [&str; 5] = ["///", "//!", "/**", "\"\"\"", "'''"];

// ============================================================================
// METRICS
// ============================================================================

fn language_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    INDEXED_EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

/// Branch-count approximation of cyclomatic complexity.
fn complexity_of(chunk: &str) -> u64 {
    1 + BRANCH_KEYWORD.find_iter(chunk).count() as u64
}

fn has_documentation(chunk: &str) -> bool {
    DOC_MARKERS.iter().any(|m| chunk.contains(m))
        || chunk
            .lines()
            .any(|line| line.trim_start().starts_with("# ") || line.trim_start().starts_with("// "))
}

fn unit_name_of(chunk: &str, fallback: &str) -> String {
    UNIT_NAME
        .captures(chunk)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

// ============================================================================
// SERVICE
// ============================================================================

/// Code-search surface over the shared store.
pub struct CodeService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    config: Arc<EngramConfig>,
}

impl CodeService {
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

    // ------------------------------------------------------------------
    // index_codebase
    // ------------------------------------------------------------------

    /// Walk `root` (honoring .gitignore) and index recognized source files
    /// as CODE memories for `project_name`.
    pub async fn index_codebase(&self, root: &Path, project_name: &str) -> Result<serde_json::Value> {
        if self.config.read_only_mode {
            return Err(EngramError::read_only("index_codebase"));
        }
        if project_name.trim().is_empty() {
            return Err(EngramError::validation("project_name", "project name is required"));
        }
        if !root.is_dir() {
            return Err(EngramError::validation(
                "path",
                format!("not a directory: {}", root.display()),
            ));
        }

        let mut files_indexed = 0usize;
        let mut units_stored = 0usize;
        let mut errors: Vec<String> = Vec::new();

        for entry in ignore::WalkBuilder::new(root).build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    errors.push(e.to_string());
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(language) = language_for(path) else {
                continue;
            };
            if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                continue;
            }
            let Ok(source) = std::fs::read_to_string(path) else {
                errors.push(format!("unreadable file: {}", path.display()));
                continue;
            };
            let modified_at: Option<DateTime<Utc>> = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);
            let relative = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();

            let mut stored_any = false;
            for (start_line, chunk) in chunk_source(&source) {
                match self
                    .store_chunk(project_name, &relative, language, start_line, chunk, modified_at)
                    .await
                {
                    Ok(()) => {
                        units_stored += 1;
                        stored_any = true;
                    }
                    Err(e) => errors.push(format!("{relative}:{start_line}: {e}")),
                }
            }
            if stored_any {
                files_indexed += 1;
            }
        }

        tracing::info!(
            "indexed {files_indexed} files into {units_stored} code units for {project_name} \
             ({} errors)",
            errors.len()
        );
        Ok(json!({
            "status": if errors.is_empty() { "success" } else { "partial" },
            "project_name": project_name,
            "files_indexed": files_indexed,
            "units_stored": units_stored,
            "errors": errors,
        }))
    }

    async fn store_chunk(
        &self,
        project_name: &str,
        file_path: &str,
        language: &str,
        start_line: usize,
        chunk: &str,
        modified_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let stem = Path::new(file_path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.to_string());
        let mut metadata = serde_json::Map::new();
        metadata.insert("file_path".into(), json!(file_path));
        metadata.insert("unit_name".into(), json!(unit_name_of(chunk, &stem)));
        metadata.insert("language".into(), json!(language));
        metadata.insert("line_count".into(), json!(chunk.lines().count()));
        metadata.insert("start_line".into(), json!(start_line));
        metadata.insert("cyclomatic_complexity".into(), json!(complexity_of(chunk)));
        metadata.insert("has_documentation".into(), json!(has_documentation(chunk)));
        if let Some(modified) = modified_at {
            metadata.insert("modified_at".into(), json!(modified.to_rfc3339()));
        }

        let mut unit = MemoryUnit::create(
            chunk,
            MemoryCategory::Code,
            crate::model::ContextLevel::ProjectContext,
            MemoryScope::Project,
            Some(project_name.to_string()),
            0.5,
            self.embedder.model_name(),
            &[language.to_string(), "code".to_string()],
            metadata,
        )?;
        unit.provenance.source = ProvenanceSource::CodeIndexed;
        unit.provenance.created_by = "code_indexer".to_string();

        let vector = self.embedder.embed(&unit.content).await?;
        self.store.store(&unit, vector).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // search_code
    // ------------------------------------------------------------------

    /// Semantic code search with glob, complexity, size, and date filters.
    pub async fn search_code(
        &self,
        query: &str,
        project_name: Option<String>,
        filters: CodeSearchFilters,
        limit: usize,
    ) -> Result<serde_json::Value> {
        let query = query.trim();
        if query.is_empty() {
            return Err(EngramError::validation("query", "query cannot be empty"));
        }
        filters.validate()?;
        let limit = limit.clamp(1, 100);

        let vector = self.embedder.embed(query).await?;
        let base = SearchFilters {
            category: Some(MemoryCategory::Code),
            project_name,
            ..Default::default()
        };
        // Over-fetch so post-filters still fill the page.
        let candidates = self
            .store
            .retrieve(&vector, Some(&base), limit * 3)
            .await?;

        let mut hits: Vec<ScoredUnit> = candidates
            .into_iter()
            .filter(|hit| passes_code_filters(&hit.unit, &filters))
            .collect();
        sort_code_hits(&mut hits, filters.sort_by, filters.sort_order);
        hits.truncate(limit);

        Ok(json!({
            "status": "success",
            "query": query,
            "total_found": hits.len(),
            "results": hits
                .iter()
                .map(|hit| {
                    json!({
                        "memory_id": hit.unit.id,
                        "score": (hit.score as f64).clamp(0.0, 1.0),
                        "file_path": hit.unit.metadata.get("file_path"),
                        "unit_name": hit.unit.metadata.get("unit_name"),
                        "language": hit.unit.metadata.get("language"),
                        "line_count": hit.unit.metadata.get("line_count"),
                        "cyclomatic_complexity": hit.unit.metadata.get("cyclomatic_complexity"),
                        "has_documentation": hit.unit.metadata.get("has_documentation"),
                        "preview": hit.unit.content.chars().take(240).collect::<String>(),
                    })
                })
                .collect::<Vec<_>>(),
        }))
    }

    // ------------------------------------------------------------------
    // find_similar_code
    // ------------------------------------------------------------------

    /// Code units semantically similar to an indexed unit.
    pub async fn find_similar_code(
        &self,
        memory_id: &str,
        threshold: Option<f32>,
    ) -> Result<serde_json::Value> {
        let Some(unit) = self.store.get_by_id(memory_id).await? else {
            return Err(EngramError::not_found(memory_id));
        };
        if unit.category != MemoryCategory::Code {
            return Err(EngramError::validation(
                "memory_id",
                "find_similar_code requires a code memory",
            ));
        }
        let detector = DuplicateDetector::new(self.store.clone(), self.embedder.clone());
        let similar = detector.find_duplicates(&unit, threshold).await?;
        Ok(json!({
            "status": "success",
            "memory_id": memory_id,
            "total_found": similar.len(),
            "results": similar
                .iter()
                .map(|hit| {
                    json!({
                        "memory_id": hit.unit.id,
                        "similarity": hit.score,
                        "file_path": hit.unit.metadata.get("file_path"),
                        "unit_name": hit.unit.metadata.get("unit_name"),
                    })
                })
                .collect::<Vec<_>>(),
        }))
    }
}

// ============================================================================
// FILTERING & SORTING
// ============================================================================

fn chunk_source(source: &str) -> Vec<(usize, &str)> {
    let lines: Vec<&str> = source.lines().collect();
    if lines.len() <= WHOLE_FILE_LINES {
        if source.trim().is_empty() {
            return Vec::new();
        }
        return vec![(1, source)];
    }
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < lines.len() {
        let end = (start + CHUNK_LINES).min(lines.len());
        let first_byte = line_offset(source, start);
        let last_byte = line_offset(source, end);
        let chunk = &source[first_byte..last_byte];
        if !chunk.trim().is_empty() {
            chunks.push((start + 1, chunk));
        }
        if end == lines.len() {
            break;
        }
        start += CHUNK_STEP;
    }
    chunks
}

fn line_offset(source: &str, line: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let mut remaining = line;
    for (index, byte) in source.bytes().enumerate() {
        if byte == b'\n' {
            remaining -= 1;
            if remaining == 0 {
                return index + 1;
            }
        }
    }
    source.len()
}

fn metadata_u64(unit: &MemoryUnit, key: &str) -> u64 {
    unit.metadata.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
}

fn passes_code_filters(unit: &MemoryUnit, filters: &CodeSearchFilters) -> bool {
    let file_path = unit
        .metadata
        .get("file_path")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if let Some(ref pattern) = filters.file_pattern {
        match Pattern::new(pattern) {
            Ok(pattern) if pattern.matches(file_path) => {}
            _ => return false,
        }
    }
    for excluded in filters.exclude_patterns.iter().flatten() {
        if Pattern::new(excluded)
            .map(|p| p.matches(file_path))
            .unwrap_or(false)
        {
            return false;
        }
    }

    let complexity = metadata_u64(unit, "cyclomatic_complexity");
    if let Some(min) = filters.complexity_min {
        if complexity < min as u64 {
            return false;
        }
    }
    if let Some(max) = filters.complexity_max {
        if complexity > max as u64 {
            return false;
        }
    }
    let lines = metadata_u64(unit, "line_count");
    if let Some(min) = filters.line_count_min {
        if lines < min as u64 {
            return false;
        }
    }
    if let Some(max) = filters.line_count_max {
        if lines > max as u64 {
            return false;
        }
    }

    if filters.modified_after.is_some() || filters.modified_before.is_some() {
        let modified = unit
            .metadata
            .get("modified_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let Some(modified) = modified else {
            return false;
        };
        if filters.modified_after.is_some_and(|after| modified < after) {
            return false;
        }
        if filters.modified_before.is_some_and(|before| modified > before) {
            return false;
        }
    }
    true
}

fn sort_code_hits(hits: &mut [ScoredUnit], sort_by: CodeSortBy, order: SortOrder) {
    hits.sort_by(|a, b| {
        let ordering = match sort_by {
            CodeSortBy::Relevance => a
                .score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal),
            CodeSortBy::Complexity => metadata_u64(&a.unit, "cyclomatic_complexity")
                .cmp(&metadata_u64(&b.unit, "cyclomatic_complexity")),
            CodeSortBy::Size => {
                metadata_u64(&a.unit, "line_count").cmp(&metadata_u64(&b.unit, "line_count"))
            }
            CodeSortBy::Recency => a.unit.updated_at.cmp(&b.unit.updated_at),
            CodeSortBy::Importance => a
                .unit
                .importance
                .partial_cmp(&b.unit.importance)
                .unwrap_or(std::cmp::Ordering::Equal),
        };
        let ordering = ordering.then_with(|| a.unit.id.cmp(&b.unit.id));
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

// ============================================================================
// TESTS
// ============================================================================
