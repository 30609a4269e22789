//! # Engram Core
//!
//! Persistent semantic memory engine for AI assistants:
//!
//! - **Typed memory units**: scope, context level, lifecycle, provenance,
//!   with total validation at every boundary
//! - **Embedding pipeline**: cache-fronted generation with de-duplicated
//!   concurrent fills (at most one model call per key)
//! - **Vector store adapters**: Qdrant (reference backend, pooled, typed
//!   error mapping) and an in-process store behind one trait
//! - **Retrieval pipeline**: session-aware query expansion, shown-id
//!   deduplication, composite re-ranking of similarity, recency, usage, and
//!   lifecycle decay
//! - **Corpus hygiene**: duplicate clustering, relationship detection,
//!   consented cross-project search, export/import
//! - **Operations**: operation-id tracing, per-operation deadlines, health
//!   scoring, usage analytics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::prelude::*;
//!
//! let store = Arc::new(MemoryStore::new());
//! let embedder = Arc::new(Embedder::new(backend, cache));
//! let service = MemoryService::new(store, embedder, config, None, None, None, None);
//!
//! let outcome = service.store_memory(request).await?;
//! let hits = service.retrieve_memories(query, Some("session-1")).await?;
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod analytics;
pub mod backup;
pub mod classify;
pub mod code;
pub mod config;
pub mod crossproject;
pub mod dedup;
pub mod embeddings;
pub mod error;
pub mod expand;
pub mod health;
pub mod model;
pub mod ops;
pub mod relate;
pub mod service;
pub mod session;
pub mod store;
pub mod usage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use analytics::{AnalyticsService, SearchFeedback};
pub use backup::{ConflictMode, Exporter, Importer};
pub use classify::{classification_confidence, classify_content};
pub use code::CodeService;
pub use config::EngramConfig;
pub use crossproject::{ConsentRegistry, ConsentState, CrossProjectService};
pub use dedup::{DuplicateCluster, DuplicateDetector, SimilarityBand};
pub use embeddings::{
    cosine_similarity, CacheStats, Embedder, EmbeddingBackend, EmbeddingCache,
    DEFAULT_DIMENSIONS,
};
#[cfg(feature = "embeddings")]
pub use embeddings::FastembedBackend;
pub use error::{EngramError, Result};
pub use health::{Alert, AlertEngine, AlertSeverity, CurrentMetrics, HealthService, MetricsCollector};
pub use model::{
    parse_date_filter, AdvancedSearchFilters, CodeSearchFilters, CodeSortBy, ContextLevel,
    FeedbackRating, LifecycleState,
    ListPage, ListRequest, MemoryCategory, MemoryProvenance, MemoryRelationship, MemoryResult,
    MemoryScope, MemoryUnit, MergeStrategy, ProvenanceSource, QueryRequest, RelationshipType,
    RetrievalResponse, ScoredUnit, SearchFilters, SortField, SortOrder, StoreMemoryRequest,
    UpdateMemoryRequest,
};
pub use ops::{new_op_id, OperationDriver};
pub use relate::RelationshipDetector;
pub use service::MemoryService;
pub use session::ConversationTracker;
pub use store::{DeleteByFilterReport, MemoryPatch, MemoryStore, VectorStore, MAX_DELETE_BATCH};
#[cfg(feature = "qdrant")]
pub use store::QdrantStore;
pub use usage::UsageTracker;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model for the reference configuration.
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        ConversationTracker, Embedder, EngramConfig, EngramError, MemoryCategory, MemoryScope,
        MemoryService, MemoryStore, MemoryUnit, QueryRequest, Result, SearchFilters,
        StoreMemoryRequest, UsageTracker, VectorStore,
    };
}

// ============================================================================
// TEST SUPPORT
// ============================================================================
