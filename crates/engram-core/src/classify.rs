//! Context-level classification.
//!
//! A deterministic, case-insensitive heuristic mapping of
//! `(content, category)` to a [`ContextLevel`]. Pattern tables are compiled
//! once for the process.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{ContextLevel, MemoryCategory};

// ============================================================================
// PATTERN TABLES
// ============================================================================

const USER_PREFERENCE_PATTERNS: [&str; 15] = [
    r"\bprefer(s|red|ence)?\b",
    r"\blike(s)?\b",
    r"\bdislike(s)?\b",
    r"\bfavorite\b",
    r"\balways\b",
    r"\bnever\b",
    r"\busually\b",
    r"\bmy style\b",
    r"\bmy way\b",
    r"\bhow I (do|work|code|write)\b",
    r"\bI (prefer|like|love|hate|want)\b",
    r"\bshould (always|never)\b",
    r"\bdefault to\b",
    r"\bguideline(s)?\b",
    r"\bconvention(s)?\b",
];

const PROJECT_CONTEXT_PATTERNS: [&str; 17] = [
    r"\bthis project\b",
    r"\bour project\b",
    r"\bthis codebase\b",
    r"\bour codebase\b",
    r"\barchitecture\b",
    r"\bframework\b",
    r"\blibrary\b",
    r"\bdependenc(y|ies)\b",
    r"\bfile structure\b",
    r"\bproject (uses|has|contains)\b",
    r"\bwe (use|have|are using)\b",
    r"\bconfigured (to|with)\b",
    r"\bsetup\b",
    r"\benvironment\b",
    r"\bdeployment\b",
    r"\bCI/CD\b",
    r"\bversion\b",
];

const SESSION_STATE_PATTERNS: [&str; 12] = [
    r"\bcurrently\b",
    r"\bworking on\b",
    r"\btoday\b",
    r"\bright now\b",
    r"\bat the moment\b",
    r"\bin progress\b",
    r"\btemporar(y|ily)\b",
    r"\bnext (step|task)\b",
    r"\bjust (did|finished|completed)\b",
    r"\babout to\b",
    r"\bthis (session|conversation)\b",
    r"\bfor now\b",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("classifier pattern compiles"))
        .collect()
}

static USER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(&USER_PREFERENCE_PATTERNS));
static PROJECT_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&PROJECT_CONTEXT_PATTERNS));
static SESSION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(&SESSION_STATE_PATTERNS));

/// Code constructs favor project context.
static CODE_CONSTRUCT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(class|function|method|variable|import|package|module)\s+\w+")
        .expect("code construct pattern compiles")
});

/// Imperative openers favor session state.
static IMPERATIVE_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(let's|please|can you|could you|would you)")
        .expect("imperative pattern compiles")
});

// ============================================================================
// SCORING
// ============================================================================

/// Capped ratio of matches to a normalization factor of 30% of the set.
fn score_patterns(content: &str, patterns: &[Regex]) -> f64 {
    let matches = patterns.iter().filter(|p| p.is_match(content)).count() as f64;
    let norm = (patterns.len() as f64 * 0.3).max(1.0);
    (matches / norm).min(1.0)
}

fn raw_scores(content: &str, category: MemoryCategory) -> (f64, f64, f64) {
    let mut user = score_patterns(content, &USER_PATTERNS);
    let mut project = score_patterns(content, &PROJECT_PATTERNS);
    let mut session = score_patterns(content, &SESSION_PATTERNS);

    // Category boosts
    match category {
        MemoryCategory::Preference => user += 0.5,
        MemoryCategory::Context => project += 0.3,
        MemoryCategory::Event => session += 0.3,
        MemoryCategory::Workflow => project += 0.2,
        _ => {}
    }

    // Lexical nudges
    let lower = content.to_lowercase();
    if ["prefer", "always", "never", "like", "dislike"]
        .iter()
        .any(|w| lower.contains(w))
    {
        user += 0.2;
    }
    if ["project", "codebase", "architecture", "framework"]
        .iter()
        .any(|w| lower.contains(w))
    {
        project += 0.2;
    }
    if ["currently", "working on", "today", "right now"]
        .iter()
        .any(|w| lower.contains(w))
    {
        session += 0.2;
    }
    if CODE_CONSTRUCT.is_match(&lower) {
        project += 0.3;
    }
    if IMPERATIVE_OPENER.is_match(&lower) {
        session += 0.2;
    }

    (user, project, session)
}

/// Fallback when no score clears the decision threshold.
fn default_for_category(category: MemoryCategory) -> ContextLevel {
    match category {
        MemoryCategory::Preference => ContextLevel::UserPreference,
        MemoryCategory::Event => ContextLevel::SessionState,
        MemoryCategory::Fact
        | MemoryCategory::Workflow
        | MemoryCategory::Context
        | MemoryCategory::Code => ContextLevel::ProjectContext,
    }
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// Classify content into a context level.
///
/// Ties break in the declared enum order: USER_PREFERENCE, PROJECT_CONTEXT,
/// SESSION_STATE.
pub fn classify_content(content: &str, category: MemoryCategory) -> ContextLevel {
    let (user, project, session) = raw_scores(content, category);

    // Enum-order iteration gives the tie-break for free.
    let ranked = [
        (ContextLevel::UserPreference, user),
        (ContextLevel::ProjectContext, project),
        (ContextLevel::SessionState, session),
    ];
    let (best_level, best_score) = ranked
        .iter()
        .fold(ranked[0], |acc, &item| if item.1 > acc.1 { item } else { acc });

    if best_score < 0.3 {
        return default_for_category(category);
    }
    best_level
}

/// Normalized per-level confidence scores (sum to 1.0 when any signal
/// fires).
pub fn classification_confidence(
    content: &str,
    category: MemoryCategory,
) -> BTreeMap<ContextLevel, f64> {
    let (user, project, session) = raw_scores(content, category);
    let total = user + project + session;
    let (user, project, session) = if total > 0.0 {
        (user / total, project / total, session / total)
    } else {
        (user, project, session)
    };
    BTreeMap::from([
        (ContextLevel::UserPreference, user),
        (ContextLevel::ProjectContext, project),
        (ContextLevel::SessionState, session),
    ])
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_content() {
        let level = classify_content(
            "I prefer tabs over spaces and always use trailing commas",
            MemoryCategory::Preference,
        );
        assert_eq!(level, ContextLevel::UserPreference);
    }

    #[test]
    fn test_session_state_content() {
        let level = classify_content(
            "Currently working on refactoring the database layer",
            MemoryCategory::Event,
        );
        assert_eq!(level, ContextLevel::SessionState);
    }

    #[test]
    fn test_project_context_content() {
        let level = classify_content(
            "This project uses the axum framework with a postgres database",
            MemoryCategory::Context,
        );
        assert_eq!(level, ContextLevel::ProjectContext);
    }

    #[test]
    fn test_code_construct_favors_project() {
        let level = classify_content(
            "function handleAuth validates the token before dispatch",
            MemoryCategory::Fact,
        );
        assert_eq!(level, ContextLevel::ProjectContext);
    }

    #[test]
    fn test_low_signal_falls_back_to_category_default() {
        assert_eq!(
            classify_content("water boils at 100C", MemoryCategory::Event),
            ContextLevel::SessionState
        );
        assert_eq!(
            classify_content("water boils at 100C", MemoryCategory::Fact),
            ContextLevel::ProjectContext
        );
    }

    #[test]
    fn test_case_insensitive_and_deterministic() {
        let a = classify_content("I PREFER PYTHON", MemoryCategory::Fact);
        let b = classify_content("i prefer python", MemoryCategory::Fact);
        assert_eq!(a, b);
        for _ in 0..10 {
            assert_eq!(classify_content("i prefer python", MemoryCategory::Fact), a);
        }
    }

    #[test]
    fn test_confidence_normalizes() {
        let confidence = classification_confidence(
            "I always prefer vim and this project uses make",
            MemoryCategory::Preference,
        );
        let total: f64 = confidence.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(confidence[&ContextLevel::UserPreference] > confidence[&ContextLevel::SessionState]);
    }
}
