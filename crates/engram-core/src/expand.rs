//! Session-aware query expansion.
//!
//! A pure function: short or ambiguous queries are augmented with salient
//! tokens from the session's recent queries; longer queries pass through
//! unchanged. Expansion never introduces injection patterns and stays
//! within the query length bound.

use std::collections::HashSet;

use crate::model::{validate_content, MAX_QUERY_LEN};
use crate::session::RecentQuery;

/// Queries with at least this many content tokens are left alone.
const SHORT_QUERY_TOKENS: usize = 4;

/// Maximum tokens borrowed from session history.
const MAX_BORROWED_TOKENS: usize = 3;

const STOPWORDS: [&str; 26] = [
    "the", "and", "for", "with", "that", "this", "what", "how", "where", "when", "who", "why",
    "are", "was", "were", "has", "have", "had", "does", "did", "can", "could", "should", "would",
    "about", "from",
];

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Expand `query` with salient tokens from `recent` (most recent last).
pub fn expand_query(query: &str, recent: &[RecentQuery]) -> String {
    let own_tokens = tokenize(query);
    if own_tokens.len() >= SHORT_QUERY_TOKENS || recent.is_empty() {
        return query.to_string();
    }

    let seen: HashSet<String> = own_tokens.into_iter().collect();
    let mut borrowed: Vec<String> = Vec::new();
    // Walk history newest-first so the freshest context wins the budget.
    for entry in recent.iter().rev() {
        for token in tokenize(&entry.text) {
            if seen.contains(&token) || borrowed.contains(&token) {
                continue;
            }
            borrowed.push(token);
            if borrowed.len() >= MAX_BORROWED_TOKENS {
                break;
            }
        }
        if borrowed.len() >= MAX_BORROWED_TOKENS {
            break;
        }
    }

    if borrowed.is_empty() {
        return query.to_string();
    }

    let expanded = format!("{} {}", query, borrowed.join(" "));
    if expanded.chars().count() > MAX_QUERY_LEN {
        return query.to_string();
    }
    // The borrowed tokens are alphanumeric, but re-check the combined text
    // against the injection patterns all content goes through.
    if validate_content(&expanded).is_err() {
        return query.to_string();
    }
    expanded
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn history(texts: &[&str]) -> Vec<RecentQuery> {
        texts
            .iter()
            .map(|t| RecentQuery {
                text: t.to_string(),
                vector: None,
                at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn test_long_queries_pass_through() {
        let recent = history(&["database connection pooling settings"]);
        let query = "configure the retry backoff policy for queue workers";
        assert_eq!(expand_query(query, &recent), query);
    }

    #[test]
    fn test_short_query_borrows_recent_tokens() {
        let recent = history(&["postgres connection pooling"]);
        let expanded = expand_query("timeout", &recent);
        assert!(expanded.starts_with("timeout"));
        assert!(expanded.contains("pooling"));
        assert_ne!(expanded, "timeout");
    }

    #[test]
    fn test_no_history_means_no_change() {
        assert_eq!(expand_query("auth", &[]), "auth");
    }

    #[test]
    fn test_newest_history_wins() {
        let recent = history(&["ancient topic", "fresh websocket handshake details"]);
        let expanded = expand_query("errors", &recent);
        assert!(expanded.contains("websocket"));
    }

    #[test]
    fn test_duplicate_tokens_not_borrowed() {
        let recent = history(&["auth token auth token"]);
        let expanded = expand_query("auth", &recent);
        // "auth" is already in the query; only "token" is new.
        assert_eq!(expanded, "auth token");
    }

    #[test]
    fn test_length_bound_respected() {
        let long_query = "q".repeat(MAX_QUERY_LEN - 2);
        let recent = history(&["supplementary context words"]);
        let expanded = expand_query(&long_query, &recent);
        assert!(expanded.chars().count() <= MAX_QUERY_LEN);
    }

    #[test]
    fn test_deterministic() {
        let recent = history(&["vector index compaction"]);
        let a = expand_query("rebuild", &recent);
        let b = expand_query("rebuild", &recent);
        assert_eq!(a, b);
    }
}
