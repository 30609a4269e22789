//! Embedding pipeline: generator backends, the persistent cache, and the
//! cache-fronted service with de-duplicated concurrent fills.

mod backend;
mod cache;
mod service;

pub use backend::{cosine_similarity, vector_from_bytes, vector_to_bytes, EmbeddingBackend};
#[cfg(feature = "embeddings")]
pub use backend::FastembedBackend;
pub use cache::{CacheStats, EmbeddingCache};
pub use service::Embedder;

/// Default embedding dimension for the reference configuration
/// (all-MiniLM-L6-v2).
pub const DEFAULT_DIMENSIONS: usize = 384;
