//! Error taxonomy for the memory engine.
//!
//! Every failure surfaced to a caller is one of these kinds, each with a
//! stable machine-readable code. Internal error types (rusqlite, qdrant,
//! serde) are mapped at the boundary where they occur and never leak.

use serde_json::json;

// ============================================================================
// ERROR KIND
// ============================================================================

/// Engine error with a closed set of kinds and stable codes.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngramError {
    /// Backend transport failure, pool exhaustion, connect refused (E001)
    #[error("Storage unavailable: {message}")]
    StorageUnavailable {
        message: String,
        url: Option<String>,
    },

    /// Model or request-shape violation (E002)
    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    /// Mutating operation while the engine is read-only (E003)
    #[error("Operation '{operation}' rejected: server is in read-only mode")]
    ReadOnly { operation: String },

    /// Embedding backend failure (E006)
    #[error("Embedding generation failed: {message}")]
    Embedding { message: String },

    /// Non-retriable failure during a query (E007)
    #[error("Retrieval failed: {message}")]
    Retrieval { message: String },

    /// Backend unreachable (E010)
    #[error("Cannot connect to vector store at {url}: {message}")]
    Connection { url: String, message: String },

    /// Target id does not exist (E012)
    #[error("Memory not found: {memory_id}")]
    NotFound { memory_id: String },

    /// Per-operation ceiling breached (E020)
    #[error("Operation '{operation}' timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// Caller cancelled the operation (E021)
    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: String },
}

impl EngramError {
    /// Symbolic kind name, stable across releases.
    pub fn error_type(&self) -> &'static str {
        match self {
            EngramError::StorageUnavailable { .. } => "STORAGE_UNAVAILABLE",
            EngramError::Validation { .. } => "VALIDATION",
            EngramError::ReadOnly { .. } => "READ_ONLY",
            EngramError::Embedding { .. } => "EMBEDDING",
            EngramError::Retrieval { .. } => "RETRIEVAL",
            EngramError::Connection { .. } => "CONNECTION",
            EngramError::NotFound { .. } => "NOT_FOUND",
            EngramError::Timeout { .. } => "TIMEOUT",
            EngramError::Cancelled { .. } => "CANCELLED",
        }
    }

    /// Machine-readable error code, stable across releases.
    pub fn error_code(&self) -> &'static str {
        match self {
            EngramError::StorageUnavailable { .. } => "E001",
            EngramError::Validation { .. } => "E002",
            EngramError::ReadOnly { .. } => "E003",
            EngramError::Embedding { .. } => "E006",
            EngramError::Retrieval { .. } => "E007",
            EngramError::Connection { .. } => "E010",
            EngramError::NotFound { .. } => "E012",
            EngramError::Timeout { .. } => "E020",
            EngramError::Cancelled { .. } => "E021",
        }
    }

    /// Actionable hint for the operator, when one exists.
    pub fn solution(&self) -> Option<&'static str> {
        match self {
            EngramError::StorageUnavailable { .. } | EngramError::Connection { .. } => Some(
                "Check that the vector store is running and reachable at the configured URL",
            ),
            EngramError::ReadOnly { .. } => {
                Some("Disable read_only_mode in the configuration to allow writes")
            }
            EngramError::Embedding { .. } => {
                Some("Verify the embedding model is downloaded and the backend is initialized")
            }
            EngramError::Timeout { .. } => {
                Some("Retry the operation, or raise operation_timeout_secs if the store is slow")
            }
            _ => None,
        }
    }

    /// Structured wire representation for tool responses.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = json!({
            "status": "error",
            "error_type": self.error_type(),
            "error_code": self.error_code(),
            "message": self.to_string(),
        });
        let obj = value.as_object_mut().expect("json! object");
        if let Some(solution) = self.solution() {
            obj.insert("solution".into(), json!(solution));
        }
        match self {
            EngramError::Validation { field, .. } => {
                obj.insert("field".into(), json!(field));
            }
            EngramError::NotFound { memory_id } => {
                obj.insert("memory_id".into(), json!(memory_id));
            }
            EngramError::Connection { url, .. } => {
                obj.insert("url".into(), json!(url));
            }
            EngramError::StorageUnavailable { url: Some(url), .. } => {
                obj.insert("url".into(), json!(url));
            }
            EngramError::Timeout { operation, .. }
            | EngramError::Cancelled { operation }
            | EngramError::ReadOnly { operation } => {
                obj.insert("operation".into(), json!(operation));
            }
            _ => {}
        }
        value
    }

    // Constructors used throughout the engine. Keeping them here keeps call
    // sites short and the field names consistent.

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngramError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        EngramError::StorageUnavailable {
            message: message.into(),
            url: None,
        }
    }

    pub fn read_only(operation: impl Into<String>) -> Self {
        EngramError::ReadOnly {
            operation: operation.into(),
        }
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        EngramError::Embedding {
            message: message.into(),
        }
    }

    pub fn retrieval(message: impl Into<String>) -> Self {
        EngramError::Retrieval {
            message: message.into(),
        }
    }

    pub fn not_found(memory_id: impl Into<String>) -> Self {
        EngramError::NotFound {
            memory_id: memory_id.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        EngramError::Timeout {
            operation: operation.into(),
            seconds,
        }
    }
}

/// Engine result type.
pub type Result<T> = std::result::Result<T, EngramError>;

// ============================================================================
// TESTS
// ============================================================================
