//! The memory unit and its closed value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngramError, Result};

// ============================================================================
// LIMITS
// ============================================================================

/// Maximum content length in characters.
pub const MAX_CONTENT_LEN: usize = 50_000;

/// Maximum content size in UTF-8 bytes (50 KB).
pub const MAX_CONTENT_BYTES: usize = 51_200;

/// Maximum number of tags per memory.
pub const MAX_TAGS: usize = 20;

/// Maximum tag length after normalization.
pub const MAX_TAG_LEN: usize = 50;

/// SQL-style fragments that are never legitimate memory content.
const INJECTION_PATTERNS: [&str; 4] = ["DROP TABLE", "DELETE FROM", "'; --", "UNION SELECT"];

// ============================================================================
// VALUE OBJECTS
// ============================================================================

/// Context stratification level for memory prioritization.
///
/// The declared order doubles as the classifier tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContextLevel {
    /// User style, preferences, coding patterns
    #[serde(rename = "USER_PREFERENCE")]
    UserPreference,
    /// Project-specific facts, architecture
    #[serde(rename = "PROJECT_CONTEXT")]
    ProjectContext,
    /// Temporary session information
    #[serde(rename = "SESSION_STATE")]
    SessionState,
}

impl ContextLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextLevel::UserPreference => "USER_PREFERENCE",
            ContextLevel::ProjectContext => "PROJECT_CONTEXT",
            ContextLevel::SessionState => "SESSION_STATE",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "USER_PREFERENCE" => Ok(ContextLevel::UserPreference),
            "PROJECT_CONTEXT" => Ok(ContextLevel::ProjectContext),
            "SESSION_STATE" => Ok(ContextLevel::SessionState),
            other => Err(EngramError::validation(
                "context_level",
                format!("unknown context level: {other}"),
            )),
        }
    }
}

/// Memory category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Preference,
    Fact,
    Event,
    Workflow,
    Context,
    Code,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Preference => "preference",
            MemoryCategory::Fact => "fact",
            MemoryCategory::Event => "event",
            MemoryCategory::Workflow => "workflow",
            MemoryCategory::Context => "context",
            MemoryCategory::Code => "code",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "preference" => Ok(MemoryCategory::Preference),
            "fact" => Ok(MemoryCategory::Fact),
            "event" => Ok(MemoryCategory::Event),
            "workflow" => Ok(MemoryCategory::Workflow),
            "context" => Ok(MemoryCategory::Context),
            "code" => Ok(MemoryCategory::Code),
            other => Err(EngramError::validation(
                "category",
                format!("unknown category: {other}"),
            )),
        }
    }
}

/// Memory scope (global vs project-bound).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    Global,
    Project,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScope::Global => "global",
            MemoryScope::Project => "project",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "global" => Ok(MemoryScope::Global),
            "project" => Ok(MemoryScope::Project),
            other => Err(EngramError::validation(
                "scope",
                format!("unknown scope: {other}"),
            )),
        }
    }
}

/// Age-derived lifecycle tier, applied as a decay weight during composite
/// scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// 0-7 days since last access, full weight
    #[serde(rename = "ACTIVE")]
    Active,
    /// 7-30 days, reduced weight
    #[serde(rename = "RECENT")]
    Recent,
    /// 30-180 days, heavy penalty
    #[serde(rename = "ARCHIVED")]
    Archived,
    /// 180+ days, candidate for deletion
    #[serde(rename = "STALE")]
    Stale,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Recent => "RECENT",
            LifecycleState::Archived => "ARCHIVED",
            LifecycleState::Stale => "STALE",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(LifecycleState::Active),
            "RECENT" => Ok(LifecycleState::Recent),
            "ARCHIVED" => Ok(LifecycleState::Archived),
            "STALE" => Ok(LifecycleState::Stale),
            other => Err(EngramError::validation(
                "lifecycle_state",
                format!("unknown lifecycle state: {other}"),
            )),
        }
    }

    /// Pure function of the interval since last access.
    ///
    /// Thresholds: 7 / 30 / 180 days.
    pub fn from_age(last_accessed: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let days = (now - last_accessed).num_days();
        if days < 7 {
            LifecycleState::Active
        } else if days < 30 {
            LifecycleState::Recent
        } else if days < 180 {
            LifecycleState::Archived
        } else {
            LifecycleState::Stale
        }
    }

    /// Decay weight used by composite scoring.
    pub fn weight(&self) -> f64 {
        match self {
            LifecycleState::Active => 1.0,
            LifecycleState::Recent => 0.7,
            LifecycleState::Archived => 0.3,
            LifecycleState::Stale => 0.1,
        }
    }
}

/// Source of memory creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceSource {
    UserExplicit,
    ClaudeInferred,
    Documentation,
    AutoClassified,
    Imported,
    CodeIndexed,
    Legacy,
}

impl ProvenanceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvenanceSource::UserExplicit => "user_explicit",
            ProvenanceSource::ClaudeInferred => "claude_inferred",
            ProvenanceSource::Documentation => "documentation",
            ProvenanceSource::AutoClassified => "auto_classified",
            ProvenanceSource::Imported => "imported",
            ProvenanceSource::CodeIndexed => "code_indexed",
            ProvenanceSource::Legacy => "legacy",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "user_explicit" => Ok(ProvenanceSource::UserExplicit),
            "claude_inferred" => Ok(ProvenanceSource::ClaudeInferred),
            "documentation" => Ok(ProvenanceSource::Documentation),
            "auto_classified" => Ok(ProvenanceSource::AutoClassified),
            "imported" => Ok(ProvenanceSource::Imported),
            "code_indexed" => Ok(ProvenanceSource::CodeIndexed),
            "legacy" => Ok(ProvenanceSource::Legacy),
            other => Err(EngramError::validation(
                "provenance.source",
                format!("unknown provenance source: {other}"),
            )),
        }
    }
}

/// Strategy for collapsing duplicate memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    KeepMostRecent,
    KeepHighestImportance,
    KeepMostAccessed,
    MergeContent,
    UserSelected,
}

impl MergeStrategy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "keep_most_recent" => Ok(MergeStrategy::KeepMostRecent),
            "keep_highest_importance" => Ok(MergeStrategy::KeepHighestImportance),
            "keep_most_accessed" => Ok(MergeStrategy::KeepMostAccessed),
            "merge_content" => Ok(MergeStrategy::MergeContent),
            "user_selected" => Ok(MergeStrategy::UserSelected),
            other => Err(EngramError::validation(
                "strategy",
                format!("unknown merge strategy: {other}"),
            )),
        }
    }
}

/// User feedback rating for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackRating {
    Helpful,
    NotHelpful,
}

impl FeedbackRating {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "helpful" => Ok(FeedbackRating::Helpful),
            "not_helpful" => Ok(FeedbackRating::NotHelpful),
            other => Err(EngramError::validation(
                "rating",
                format!("rating must be 'helpful' or 'not_helpful', got: {other}"),
            )),
        }
    }
}

// ============================================================================
// PROVENANCE
// ============================================================================

/// Provenance metadata for a memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryProvenance {
    #[serde(default = "MemoryProvenance::default_source")]
    pub source: ProvenanceSource,
    /// Description of the creation method.
    #[serde(default = "MemoryProvenance::default_created_by")]
    pub created_by: String,
    /// When the user last verified the memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_confirmed: Option<DateTime<Utc>>,
    /// System confidence in [0, 1].
    #[serde(default = "MemoryProvenance::default_confidence")]
    pub confidence: f64,
    /// User explicitly verified.
    #[serde(default)]
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Files being worked on at creation time.
    #[serde(default)]
    pub file_context: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl MemoryProvenance {
    fn default_source() -> ProvenanceSource {
        ProvenanceSource::UserExplicit
    }

    fn default_created_by() -> String {
        "user_statement".to_string()
    }

    fn default_confidence() -> f64 {
        0.8
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(EngramError::validation(
                "provenance.confidence",
                "confidence must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }
}

impl Default for MemoryProvenance {
    fn default() -> Self {
        Self {
            source: Self::default_source(),
            created_by: Self::default_created_by(),
            last_confirmed: None,
            confidence: Self::default_confidence(),
            verified: false,
            conversation_id: None,
            file_context: Vec::new(),
            notes: None,
        }
    }
}

// ============================================================================
// VALIDATION HELPERS
// ============================================================================

/// Validate and trim memory content.
///
/// Applied on every create, update, and import.
pub fn validate_content(content: &str) -> Result<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(EngramError::validation("content", "content cannot be empty"));
    }
    if trimmed.chars().count() > MAX_CONTENT_LEN {
        return Err(EngramError::validation(
            "content",
            format!("content exceeds maximum length of {MAX_CONTENT_LEN} characters"),
        ));
    }
    if trimmed.len() > MAX_CONTENT_BYTES {
        return Err(EngramError::validation(
            "content",
            "content exceeds maximum size of 50KB",
        ));
    }
    let upper = trimmed.to_uppercase();
    for pattern in INJECTION_PATTERNS {
        if upper.contains(pattern) {
            return Err(EngramError::validation(
                "content",
                format!("content contains suspicious pattern: {pattern}"),
            ));
        }
    }
    Ok(trimmed.to_string())
}

/// Normalize a tag list: trim, lower-case, drop empties, dedupe preserving
/// order. Tags are always normalized before comparison anywhere in the
/// system.
pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>> {
    if tags.len() > MAX_TAGS {
        return Err(EngramError::validation(
            "tags",
            format!("maximum {MAX_TAGS} tags allowed"),
        ));
    }
    let mut normalized = Vec::with_capacity(tags.len());
    for tag in tags {
        let clean = tag.trim().to_lowercase();
        if clean.is_empty() {
            continue;
        }
        if clean.chars().count() > MAX_TAG_LEN {
            return Err(EngramError::validation(
                "tags",
                format!("tags must be at most {MAX_TAG_LEN} characters"),
            ));
        }
        if !normalized.contains(&clean) {
            normalized.push(clean);
        }
    }
    Ok(normalized)
}

// ============================================================================
// MEMORY UNIT
// ============================================================================

/// The core memory record: content plus metadata plus embedding provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryUnit {
    pub id: String,
    pub content: String,
    pub category: MemoryCategory,
    pub context_level: ContextLevel,
    pub scope: MemoryScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    pub importance: f64,
    /// Model that produced the stored embedding.
    pub embedding_model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub lifecycle_state: LifecycleState,
    #[serde(default)]
    pub provenance: MemoryProvenance,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Opaque to the engine except for known code-indexing keys.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl MemoryUnit {
    /// Create a validated memory unit with a fresh id and current
    /// timestamps. The lifecycle starts out ACTIVE.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        content: &str,
        category: MemoryCategory,
        context_level: ContextLevel,
        scope: MemoryScope,
        project_name: Option<String>,
        importance: f64,
        embedding_model: &str,
        tags: &[String],
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self> {
        let now = Utc::now();
        let unit = Self {
            id: Uuid::new_v4().to_string(),
            content: validate_content(content)?,
            category,
            context_level,
            scope,
            project_name,
            importance,
            embedding_model: embedding_model.to_string(),
            created_at: now,
            updated_at: now,
            last_accessed: now,
            lifecycle_state: LifecycleState::Active,
            provenance: MemoryProvenance::default(),
            tags: normalize_tags(tags)?,
            metadata,
        };
        unit.validate()?;
        Ok(unit)
    }

    /// Check every invariant. Called after any mutation path that bypasses
    /// `create` (imports, payload deserialization).
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(EngramError::validation("id", "id cannot be empty"));
        }
        validate_content(&self.content)?;
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
        if self.tags.len() > MAX_TAGS {
            return Err(EngramError::validation(
                "tags",
                format!("maximum {MAX_TAGS} tags allowed"),
            ));
        }
        self.provenance.validate()?;
        Ok(())
    }

    /// Recompute the lifecycle state from the age of `last_accessed`.
    pub fn refresh_lifecycle(&mut self, now: DateTime<Utc>) {
        self.lifecycle_state = LifecycleState::from_age(self.last_accessed, now);
    }

    /// Mark the record as accessed now; may advance the lifecycle back to
    /// ACTIVE.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.refresh_lifecycle(now);
    }
}

// ============================================================================
// TESTS
// ============================================================================
