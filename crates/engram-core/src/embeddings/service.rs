//! Cache-fronted embedding service with de-duplicated concurrent fills.
//!
//! Concurrent requests for the same `(text, model)` key result in at most
//! one backend call: the first request becomes the leader and broadcasts its
//! result; followers subscribe and wait. Backend inference runs on the
//! blocking worker pool so the task runtime is never stalled.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::embeddings::backend::EmbeddingBackend;
use crate::embeddings::cache::{CacheStats, EmbeddingCache};
use crate::error::{EngramError, Result};

type Inflight = HashMap<String, broadcast::Sender<Result<Vec<f32>>>>;

/// The embedding front door used by every service.
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    cache: Option<Arc<EmbeddingCache>>,
    inflight: Mutex<Inflight>,
}

impl Embedder {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, cache: Option<Arc<EmbeddingCache>>) -> Self {
        Self {
            backend,
            cache,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn dimensions(&self) -> usize {
        self.backend.dimensions()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache
            .as_ref()
            .map(|cache| cache.stats())
            .unwrap_or_default()
    }

    /// Get the embedding for `text`, via cache or generation.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_with_origin(text).await?.0)
    }

    /// Like [`Self::embed`], also reporting whether the vector came from
    /// the cache.
    pub async fn embed_with_origin(&self, text: &str) -> Result<(Vec<f32>, bool)> {
        let model = self.backend.model_name().to_string();
        let key = EmbeddingCache::cache_key(&model, text);

        if let Some(vector) = self.cache_get(text).await? {
            return Ok((vector, true));
        }

        // Coalesce concurrent fills for the same key.
        let mut receiver = {
            let mut inflight = self.inflight.lock().await;
            if let Some(sender) = inflight.get(&key) {
                Some(sender.subscribe())
            } else {
                let (sender, _) = broadcast::channel(1);
                inflight.insert(key.clone(), sender);
                None
            }
        };

        if let Some(rx) = receiver.as_mut() {
            return match rx.recv().await {
                Ok(result) => result.map(|v| (v, false)),
                // Leader dropped without broadcasting (panic or cancel):
                // fall back to generating directly.
                Err(_) => self.generate(text).await.map(|v| (v, false)),
            };
        }

        // A previous leader may have filled the cache between our miss and
        // taking leadership; its put lands before its in-flight entry goes
        // away, so this re-check keeps one generate per burst.
        if let Some(vector) = self.cache_get(text).await? {
            let mut inflight = self.inflight.lock().await;
            if let Some(sender) = inflight.remove(&key) {
                let _ = sender.send(Ok(vector.clone()));
            }
            return Ok((vector, true));
        }

        let result = self.generate_and_cache(text).await;

        let sender = {
            let mut inflight = self.inflight.lock().await;
            inflight.remove(&key)
        };
        if let Some(sender) = sender {
            let _ = sender.send(result.clone());
        }
        result.map(|v| (v, false))
    }

    async fn cache_get(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let Some(cache) = self.cache.clone() else {
            return Ok(None);
        };
        let model = self.backend.model_name().to_string();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || cache.get(&text, &model))
            .await
            .map_err(|e| EngramError::embedding(format!("cache task failed: {e}")))?
    }

    async fn generate_and_cache(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.generate(text).await?;
        if let Some(cache) = self.cache.clone() {
            let model = self.backend.model_name().to_string();
            let text = text.to_string();
            let stored = vector.clone();
            let put = tokio::task::spawn_blocking(move || cache.put(&text, &model, &stored)).await;
            match put {
                Ok(Err(e)) => tracing::warn!("embedding cache put failed: {e}"),
                Err(e) => tracing::warn!("embedding cache task failed: {e}"),
                Ok(Ok(())) => {}
            }
        }
        Ok(vector)
    }

    async fn generate(&self, text: &str) -> Result<Vec<f32>> {
        let backend = self.backend.clone();
        let text = text.to_string();
        let vector = tokio::task::spawn_blocking(move || backend.embed(&text))
            .await
            .map_err(|e| EngramError::embedding(format!("embedding task failed: {e}")))??;

        if vector.len() != self.backend.dimensions() {
            return Err(EngramError::embedding(format!(
                "backend returned {} dimensions, expected {}",
                vector.len(),
                self.backend.dimensions()
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(EngramError::embedding("backend returned non-finite components"));
        }
        Ok(vector)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counting backend that sleeps to widen the coalescing window.
    struct SlowBackend {
        calls: AtomicUsize,
    }

    impl EmbeddingBackend for SlowBackend {
        fn model_name(&self) -> &str {
            "slow-test-model"
        }

        fn dimensions(&self) -> usize {
            4
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            let seed = text.len() as f32;
            Ok(vec![seed, 1.0, 0.0, 0.0])
        }
    }

    fn embedder(cache: bool) -> (Arc<Embedder>, Arc<SlowBackend>) {
        let backend = Arc::new(SlowBackend {
            calls: AtomicUsize::new(0),
        });
        let cache = cache.then(|| {
            Arc::new(EmbeddingCache::in_memory(Duration::from_secs(3600)).unwrap())
        });
        (
            Arc::new(Embedder::new(backend.clone(), cache)),
            backend,
        )
    }

    #[tokio::test]
    async fn test_concurrent_fills_coalesce_to_one_generate() {
        let (embedder, backend) = embedder(true);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let embedder = embedder.clone();
            handles.push(tokio::spawn(async move {
                embedder.embed("same text").await.unwrap()
            }));
        }
        let mut vectors = Vec::new();
        for handle in handles {
            vectors.push(handle.await.unwrap());
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(vectors.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_generation() {
        let (embedder, backend) = embedder(true);
        embedder.embed("abc").await.unwrap();
        embedder.embed("abc").await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        let stats = embedder.cache_stats();
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_distinct_texts_generate_separately() {
        let (embedder, backend) = embedder(true);
        embedder.embed("one").await.unwrap();
        embedder.embed("two longer").await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_works_without_cache() {
        let (embedder, backend) = embedder(false);
        embedder.embed("abc").await.unwrap();
        embedder.embed("abc").await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_an_embedding_error() {
        struct BadBackend;
        impl EmbeddingBackend for BadBackend {
            fn model_name(&self) -> &str {
                "bad"
            }
            fn dimensions(&self) -> usize {
                8
            }
            fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(vec![1.0, 2.0])
            }
        }
        let embedder = Embedder::new(Arc::new(BadBackend), None);
        let err = embedder.embed("x").await.unwrap_err();
        assert_eq!(err.error_code(), "E006");
    }
}
