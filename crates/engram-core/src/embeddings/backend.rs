//! Embedding generator backends.
//!
//! A backend is an opaque function `text -> vector<f32, D>`, deterministic
//! for a fixed (model, text) pair. Generation may block; callers dispatch it
//! to a blocking worker.

use crate::error::Result;

// ============================================================================
// BACKEND TRAIT
// ============================================================================

/// An embedding model adapter.
///
/// Implementations must be thread-safe and return unit-normalized vectors of
/// a constant dimension.
pub trait EmbeddingBackend: Send + Sync {
    /// Model identifier; becomes part of the cache key and the stored
    /// `embedding_model` attribute.
    fn model_name(&self) -> &str;

    /// Constant output dimension `D`.
    fn dimensions(&self) -> usize;

    /// Generate an embedding. Inputs are passed as-is, no normalization of
    /// the text. May block on model inference.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ============================================================================
// VECTOR HELPERS
// ============================================================================

/// Cosine similarity between two vectors. Returns 0.0 on dimension mismatch
/// or zero norms.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Serialize a vector to little-endian f32 bytes for storage.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a vector from little-endian f32 bytes.
pub fn vector_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

fn normalize_in_place(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

// ============================================================================
// FASTEMBED BACKEND
// ============================================================================

#[cfg(feature = "embeddings")]
mod fastembed_backend {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    use super::{normalize_in_place, EmbeddingBackend};
    use crate::error::{EngramError, Result};

    /// Local ONNX inference via fastembed.
    ///
    /// The default model is all-MiniLM-L6-v2 (384 dimensions), matching the
    /// reference configuration.
    pub struct FastembedBackend {
        model: Mutex<TextEmbedding>,
        model_name: String,
        dimensions: usize,
    }

    impl FastembedBackend {
        /// Initialize the default model, downloading it into `cache_dir` on
        /// first use.
        pub fn new(cache_dir: Option<PathBuf>) -> Result<Self> {
            let cache_dir = cache_dir.unwrap_or_else(default_model_dir);
            if let Err(e) = std::fs::create_dir_all(&cache_dir) {
                tracing::warn!("failed to create model cache dir {:?}: {e}", cache_dir);
            }
            let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                .with_show_download_progress(false)
                .with_cache_dir(cache_dir);
            let model = TextEmbedding::try_new(options).map_err(|e| {
                EngramError::embedding(format!(
                    "failed to initialize all-MiniLM-L6-v2: {e}. \
                     Ensure the ONNX runtime is available and model files can be downloaded"
                ))
            })?;
            Ok(Self {
                model: Mutex::new(model),
                model_name: "all-MiniLM-L6-v2".to_string(),
                dimensions: crate::embeddings::DEFAULT_DIMENSIONS,
            })
        }
    }

    fn default_model_dir() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("ai", "engram", "engram") {
            return dirs.cache_dir().join("models");
        }
        PathBuf::from(".engram_cache/models")
    }

    impl EmbeddingBackend for FastembedBackend {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut model = self
                .model
                .lock()
                .map_err(|e| EngramError::embedding(format!("model lock poisoned: {e}")))?;
            let mut vectors = model
                .embed(vec![text], None)
                .map_err(|e| EngramError::embedding(e.to_string()))?;
            let mut vector = vectors
                .pop()
                .ok_or_else(|| EngramError::embedding("backend returned no vector"))?;
            normalize_in_place(&mut vector);
            Ok(vector)
        }
    }
}

#[cfg(feature = "embeddings")]
pub use fastembed_backend::FastembedBackend;

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_basics() {
        let a = [1.0f32, 0.0, 0.0];
        let b = [0.0f32, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &a), 1.0);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0); // mismatch
    }

    #[test]
    fn test_vector_bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.75, 0.0];
        let bytes = vector_to_bytes(&v);
        assert_eq!(bytes.len(), 16);
        assert_eq!(vector_from_bytes(&bytes).unwrap(), v);
        assert!(vector_from_bytes(&bytes[..3]).is_none());
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0f32, 4.0];
        normalize_in_place(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
