//! Derived relationships between memories.
//!
//! Relationships are edges referencing ids, never owning records. They are
//! always recomputable and advisory: detection never mutates the memories.

use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};

/// Kind of a directed relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// Conflicting preferences or facts
    Contradicts,
    /// Near-identical content
    Duplicate,
    /// Reinforcing information
    Supports,
    /// Newer record replaces an older one
    Supersedes,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Contradicts => "contradicts",
            RelationshipType::Duplicate => "duplicate",
            RelationshipType::Supports => "supports",
            RelationshipType::Supersedes => "supersedes",
        }
    }
}

/// A directed, typed edge between two memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRelationship {
    pub source_memory_id: String,
    pub target_memory_id: String,
    pub relationship_type: RelationshipType,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    /// "auto" for detector output.
    pub detected_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl MemoryRelationship {
    pub fn auto(
        source: &str,
        target: &str,
        relationship_type: RelationshipType,
        confidence: f64,
        notes: impl Into<String>,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(EngramError::validation(
                "confidence",
                "confidence must be between 0.0 and 1.0",
            ));
        }
        Ok(Self {
            source_memory_id: source.to_string(),
            target_memory_id: target.to_string(),
            relationship_type,
            confidence,
            detected_by: "auto".to_string(),
            notes: Some(notes.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_edge() {
        let edge = MemoryRelationship::auto(
            "a",
            "b",
            RelationshipType::Duplicate,
            0.93,
            "semantic similarity: 0.930",
        )
        .unwrap();
        assert_eq!(edge.detected_by, "auto");
        assert_eq!(
            serde_json::to_value(&edge).unwrap()["relationship_type"],
            "duplicate"
        );
    }

    #[test]
    fn test_confidence_bounds() {
        assert!(MemoryRelationship::auto("a", "b", RelationshipType::Supports, 1.2, "x").is_err());
    }
}
