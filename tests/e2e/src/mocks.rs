//! Deterministic embedding backend for tests.
//!
//! Bag-of-stems hashing: texts sharing vocabulary get high cosine
//! similarity, unrelated texts are near-orthogonal. No model download, no
//! network, fully deterministic.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use engram_core::{EmbeddingBackend, Result};

pub const MOCK_DIMENSIONS: usize = 64;

fn stem(token: &str) -> &str {
    for suffix in ["ences", "ence", "ings", "ing", "ers", "es", "ed", "s"] {
        if token.len() > suffix.len() + 2 {
            if let Some(stripped) = token.strip_suffix(suffix) {
                return stripped;
            }
        }
    }
    token
}

/// Counting, deterministic backend.
#[derive(Default)]
pub struct BagOfStemsBackend {
    calls: AtomicUsize,
}

impl BagOfStemsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of generate calls observed (for coalescing assertions).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingBackend for BagOfStemsBackend {
    fn model_name(&self) -> &str {
        "bag-of-stems"
    }

    fn dimensions(&self) -> usize {
        MOCK_DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector = vec![0.0f32; MOCK_DIMENSIONS];
        let lower = text.to_lowercase();
        let mut any = false;
        for token in lower.split(|c: char| !c.is_alphanumeric()) {
            if token.len() < 3 {
                continue;
            }
            any = true;
            let mut hasher = DefaultHasher::new();
            stem(token).hash(&mut hasher);
            let h = hasher.finish();
            vector[(h % MOCK_DIMENSIONS as u64) as usize] += 1.0;
            vector[((h >> 32) % MOCK_DIMENSIONS as u64) as usize] += 1.0;
        }
        if !any {
            vector[0] = 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        Ok(vector.into_iter().map(|x| x / norm).collect())
    }
}
