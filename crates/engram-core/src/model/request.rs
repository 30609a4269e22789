//! Request contracts and search filters.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};
use crate::model::unit::{
    normalize_tags, validate_content, ContextLevel, LifecycleState, MemoryCategory, MemoryScope,
    ProvenanceSource,
};

/// Maximum query length in characters.
pub const MAX_QUERY_LEN: usize = 1000;

// ============================================================================
// STORE / UPDATE REQUESTS
// ============================================================================

/// Request to store a new memory.
///
/// `deny_unknown_fields` prevents field injection through the tool surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreMemoryRequest {
    pub content: String,
    pub category: MemoryCategory,
    #[serde(default = "StoreMemoryRequest::default_scope")]
    pub scope: MemoryScope,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default = "StoreMemoryRequest::default_importance")]
    pub importance: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Auto-classified if not provided.
    #[serde(default)]
    pub context_level: Option<ContextLevel>,
}

impl StoreMemoryRequest {
    fn default_scope() -> MemoryScope {
        MemoryScope::Global
    }

    fn default_importance() -> f64 {
        0.5
    }

    /// Validate and normalize in place; total or error.
    pub fn validate(&mut self) -> Result<()> {
        self.content = validate_content(&self.content)?;
        if !(0.0..=1.0).contains(&self.importance) {
            return Err(EngramError::validation(
                "importance",
                "importance must be between 0.0 and 1.0",
            ));
        }
        if self.scope == MemoryScope::Project
            && self.project_name.as_deref().unwrap_or("").is_empty()
        {
            return Err(EngramError::validation(
                "project_name",
                "project_name is required when scope is project",
            ));
        }
        self.tags = normalize_tags(&self.tags)?;
        Ok(())
    }
}

/// Request to update an existing memory. Only provided fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMemoryRequest {
    pub memory_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub category: Option<MemoryCategory>,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub context_level: Option<ContextLevel>,
    /// Keep created_at, update updated_at.
    #[serde(default = "UpdateMemoryRequest::default_flag")]
    pub preserve_timestamps: bool,
    /// Regenerate the embedding when content changes.
    #[serde(default = "UpdateMemoryRequest::default_flag")]
    pub regenerate_embedding: bool,
}

impl UpdateMemoryRequest {
    fn default_flag() -> bool {
        true
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.memory_id.is_empty() {
            return Err(EngramError::validation("memory_id", "memory_id is required"));
        }
        if self.content.is_none()
            && self.category.is_none()
            && self.importance.is_none()
            && self.tags.is_none()
            && self.metadata.is_none()
            && self.context_level.is_none()
        {
            return Err(EngramError::validation(
                "update",
                "at least one field must be provided for update",
            ));
        }
        if let Some(ref content) = self.content {
            self.content = Some(validate_content(content)?);
        }
        if let Some(importance) = self.importance {
            if !(0.0..=1.0).contains(&importance) {
                return Err(EngramError::validation(
                    "importance",
                    "importance must be between 0.0 and 1.0",
                ));
            }
        }
        if let Some(ref tags) = self.tags {
            self.tags = Some(normalize_tags(tags)?);
        }
        Ok(())
    }
}

// ============================================================================
// QUERY REQUEST & FILTERS
// ============================================================================

/// Request to retrieve memories by semantic query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "QueryRequest::default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub context_level: Option<ContextLevel>,
    #[serde(default)]
    pub scope: Option<MemoryScope>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub category: Option<MemoryCategory>,
    #[serde(default)]
    pub min_importance: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub advanced_filters: Option<AdvancedSearchFilters>,
}

impl QueryRequest {
    fn default_limit() -> usize {
        5
    }

    pub fn validate(&mut self) -> Result<()> {
        self.query = self.query.trim().to_string();
        if self.query.is_empty() {
            return Err(EngramError::validation("query", "query cannot be empty"));
        }
        if self.query.chars().count() > MAX_QUERY_LEN {
            return Err(EngramError::validation(
                "query",
                format!("query exceeds maximum length of {MAX_QUERY_LEN} characters"),
            ));
        }
        if !(1..=100).contains(&self.limit) {
            return Err(EngramError::validation("limit", "limit must be 1-100"));
        }
        if !(0.0..=1.0).contains(&self.min_importance) {
            return Err(EngramError::validation(
                "min_importance",
                "min_importance must be between 0.0 and 1.0",
            ));
        }
        self.tags = normalize_tags(&self.tags)?;
        if let Some(ref mut advanced) = self.advanced_filters {
            advanced.validate()?;
        }
        Ok(())
    }

    /// Project the request's filter fields into a `SearchFilters`.
    pub fn filters(&self) -> SearchFilters {
        SearchFilters {
            context_level: self.context_level,
            scope: self.scope,
            project_name: self.project_name.clone(),
            category: self.category,
            min_importance: self.min_importance,
            max_importance: 1.0,
            tags: self.tags.clone(),
            created_after: None,
            created_before: None,
            advanced: self.advanced_filters.clone(),
        }
    }
}

/// Combined metadata filters applied alongside the vector query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub context_level: Option<ContextLevel>,
    #[serde(default)]
    pub scope: Option<MemoryScope>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub category: Option<MemoryCategory>,
    #[serde(default)]
    pub min_importance: f64,
    #[serde(default = "SearchFilters::default_max_importance")]
    pub max_importance: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub advanced: Option<AdvancedSearchFilters>,
}

impl SearchFilters {
    fn default_max_importance() -> f64 {
        1.0
    }

    /// True when no predicate is set at all.
    pub fn is_empty(&self) -> bool {
        self.context_level.is_none()
            && self.scope.is_none()
            && self.project_name.is_none()
            && self.category.is_none()
            && self.min_importance <= 0.0
            && self.max_importance >= 1.0
            && self.tags.is_empty()
            && self.created_after.is_none()
            && self.created_before.is_none()
            && self.advanced.is_none()
    }

    pub fn for_project(project_name: &str) -> Self {
        Self {
            project_name: Some(project_name.to_string()),
            ..Default::default()
        }
    }
}

/// Advanced filtering options: date ranges, tag logic, lifecycle subsets,
/// exclusions, provenance constraints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdvancedSearchFilters {
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub accessed_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub accessed_before: Option<DateTime<Utc>>,

    /// Match ANY of these tags (OR).
    #[serde(default)]
    pub tags_any: Option<Vec<String>>,
    /// Match ALL of these tags (AND).
    #[serde(default)]
    pub tags_all: Option<Vec<String>>,
    /// Exclude these tags (NOT).
    #[serde(default)]
    pub tags_none: Option<Vec<String>>,

    #[serde(default)]
    pub lifecycle_states: Option<Vec<LifecycleState>>,

    #[serde(default)]
    pub exclude_categories: Option<Vec<MemoryCategory>>,
    #[serde(default)]
    pub exclude_projects: Option<Vec<String>>,

    #[serde(default)]
    pub min_trust_score: Option<f64>,
    #[serde(default)]
    pub source: Option<ProvenanceSource>,
}

impl AdvancedSearchFilters {
    pub fn validate(&mut self) -> Result<()> {
        for tags in [&mut self.tags_any, &mut self.tags_all, &mut self.tags_none]
            .into_iter()
            .flatten()
        {
            *tags = normalize_tags(tags)?;
        }
        if let Some(score) = self.min_trust_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(EngramError::validation(
                    "min_trust_score",
                    "min_trust_score must be between 0.0 and 1.0",
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// CODE SEARCH FILTERS
// ============================================================================

/// Sort criteria for code search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeSortBy {
    #[default]
    Relevance,
    Complexity,
    Size,
    Recency,
    Importance,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(EngramError::validation(
                "sort_order",
                format!("sort_order must be 'asc' or 'desc', got: {other}"),
            )),
        }
    }
}

/// Filtering options specific to code search: glob patterns, complexity and
/// line-count ranges, modification dates, multi-criteria sorting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodeSearchFilters {
    /// Glob pattern for file paths (e.g. `src/**/auth*.rs`), not substring.
    #[serde(default)]
    pub file_pattern: Option<String>,
    /// Glob patterns to exclude (e.g. `["**/tests/**"]`).
    #[serde(default)]
    pub exclude_patterns: Option<Vec<String>>,

    #[serde(default)]
    pub complexity_min: Option<u32>,
    #[serde(default)]
    pub complexity_max: Option<u32>,

    #[serde(default)]
    pub line_count_min: Option<u32>,
    #[serde(default)]
    pub line_count_max: Option<u32>,

    /// File modification time window.
    #[serde(default)]
    pub modified_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_before: Option<DateTime<Utc>>,

    #[serde(default)]
    pub sort_by: CodeSortBy,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl CodeSearchFilters {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref pattern) = self.file_pattern {
            glob::Pattern::new(pattern).map_err(|e| {
                EngramError::validation("file_pattern", format!("invalid glob: {e}"))
            })?;
        }
        for pattern in self.exclude_patterns.iter().flatten() {
            glob::Pattern::new(pattern).map_err(|e| {
                EngramError::validation("exclude_patterns", format!("invalid glob: {e}"))
            })?;
        }
        if let (Some(min), Some(max)) = (self.complexity_min, self.complexity_max) {
            if min > max {
                return Err(EngramError::validation(
                    "complexity_min",
                    "complexity_min cannot exceed complexity_max",
                ));
            }
        }
        if let (Some(min), Some(max)) = (self.line_count_min, self.line_count_max) {
            if min > max {
                return Err(EngramError::validation(
                    "line_count_min",
                    "line_count_min cannot exceed line_count_max",
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// LIST REQUEST
// ============================================================================

/// Sortable fields for listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Importance,
}

impl SortField {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "created_at" => Ok(SortField::CreatedAt),
            "updated_at" => Ok(SortField::UpdatedAt),
            "importance" => Ok(SortField::Importance),
            other => Err(EngramError::validation(
                "sort_by",
                format!("sort_by must be created_at, updated_at or importance, got: {other}"),
            )),
        }
    }
}

/// Paginated listing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListRequest {
    #[serde(default)]
    pub category: Option<MemoryCategory>,
    #[serde(default)]
    pub context_level: Option<ContextLevel>,
    #[serde(default)]
    pub scope: Option<MemoryScope>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub min_importance: f64,
    #[serde(default = "SearchFilters::default_max_importance")]
    pub max_importance: f64,
    /// Accepts ISO dates or relative phrases ("last week", "3 days ago").
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default = "ListRequest::default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl Default for ListRequest {
    fn default() -> Self {
        Self {
            category: None,
            context_level: None,
            scope: None,
            project_name: None,
            tags: Vec::new(),
            min_importance: 0.0,
            max_importance: 1.0,
            date_from: None,
            date_to: None,
            sort_by: SortField::CreatedAt,
            sort_order: SortOrder::Desc,
            limit: Self::default_limit(),
            offset: 0,
        }
    }
}

impl ListRequest {
    fn default_limit() -> usize {
        20
    }

    /// Validate and resolve date strings into concrete filters.
    pub fn validate(&mut self) -> Result<SearchFilters> {
        if !(1..=100).contains(&self.limit) {
            return Err(EngramError::validation("limit", "limit must be 1-100"));
        }
        self.tags = normalize_tags(&self.tags)?;
        let created_after = self.date_from.as_deref().map(parse_date_filter).transpose()?;
        let created_before = self.date_to.as_deref().map(parse_date_filter).transpose()?;
        Ok(SearchFilters {
            context_level: self.context_level,
            scope: self.scope,
            project_name: self.project_name.clone(),
            category: self.category,
            min_importance: self.min_importance,
            max_importance: self.max_importance,
            tags: self.tags.clone(),
            created_after,
            created_before,
            advanced: None,
        })
    }
}

// ============================================================================
// DATE FILTER PARSING
// ============================================================================

/// Parse a date filter string.
///
/// Accepts ISO dates/datetimes plus relative phrases: "today", "yesterday",
/// "last week|month|year", and "N days|weeks|months|years ago".
pub fn parse_date_filter(input: &str) -> Result<DateTime<Utc>> {
    let s = input.trim().to_lowercase();
    let now = Utc::now();

    match s.as_str() {
        "today" | "now" => return Ok(now),
        "yesterday" => return Ok(now - Duration::days(1)),
        "last week" | "1 week ago" => return Ok(now - Duration::weeks(1)),
        "last month" | "1 month ago" => return Ok(now - Duration::days(30)),
        "last year" | "1 year ago" => return Ok(now - Duration::days(365)),
        _ => {}
    }

    // "N days/weeks/months/years ago"
    let mut parts = s.split_whitespace();
    if let (Some(num), Some(unit), Some("ago"), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    {
        if let Ok(n) = num.parse::<i64>() {
            let delta = match unit.trim_end_matches('s') {
                "day" => Some(Duration::days(n)),
                "week" => Some(Duration::weeks(n)),
                "month" => Some(Duration::days(n * 30)),
                "year" => Some(Duration::days(n * 365)),
                _ => None,
            };
            if let Some(delta) = delta {
                return Ok(now - delta);
            }
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input.trim()) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }

    Err(EngramError::validation(
        "date",
        format!("invalid date format: {input}"),
    ))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_request_bounds() {
        let mut req = QueryRequest {
            query: "  auth flow  ".to_string(),
            limit: 5,
            context_level: None,
            scope: None,
            project_name: None,
            category: None,
            min_importance: 0.0,
            tags: vec![],
            advanced_filters: None,
        };
        req.validate().unwrap();
        assert_eq!(req.query, "auth flow");

        req.limit = 0;
        assert!(req.validate().is_err());
        req.limit = 101;
        assert!(req.validate().is_err());

        req.limit = 5;
        req.query = "q".repeat(MAX_QUERY_LEN + 1);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_update_requires_a_field() {
        let mut req = UpdateMemoryRequest {
            memory_id: "abc".to_string(),
            preserve_timestamps: true,
            regenerate_embedding: true,
            ..Default::default()
        };
        let err = req.validate().unwrap_err();
        assert_eq!(err.error_code(), "E002");

        req.importance = Some(0.7);
        req.validate().unwrap();
    }

    #[test]
    fn test_unknown_request_fields_rejected() {
        let json = r#"{"query": "x", "limit": 5, "surprise": true}"#;
        assert!(serde_json::from_str::<QueryRequest>(json).is_err());
    }

    #[test]
    fn test_filters_is_empty() {
        assert!(SearchFilters::default().is_empty());
        assert!(!SearchFilters::for_project("engram").is_empty());
    }

    #[test]
    fn test_code_filters_validate_globs() {
        let filters = CodeSearchFilters {
            file_pattern: Some("src/**/*.rs".to_string()),
            ..Default::default()
        };
        filters.validate().unwrap();

        let bad = CodeSearchFilters {
            file_pattern: Some("src/[".to_string()),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_parse_relative_dates() {
        let now = Utc::now();
        let week = parse_date_filter("last week").unwrap();
        assert!((now - week).num_days() >= 6);

        let three = parse_date_filter("3 days ago").unwrap();
        assert_eq!((now - three).num_days(), 3);

        let iso = parse_date_filter("2024-01-01").unwrap();
        assert_eq!(iso.date_naive().to_string(), "2024-01-01");

        assert!(parse_date_filter("sometime soon").is_err());
    }

    #[test]
    fn test_advanced_filters_normalize_tags() {
        let mut advanced = AdvancedSearchFilters {
            tags_any: Some(vec!["  Rust  ".to_string(), "".to_string()]),
            ..Default::default()
        };
        advanced.validate().unwrap();
        assert_eq!(advanced.tags_any.unwrap(), vec!["rust"]);
    }

    #[test]
    fn test_tag_length_cap() {
        let long = "t".repeat(crate::model::unit::MAX_TAG_LEN + 1);
        let mut advanced = AdvancedSearchFilters {
            tags_all: Some(vec![long]),
            ..Default::default()
        };
        assert!(advanced.validate().is_err());
    }
}
