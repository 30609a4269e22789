//! Persistent embedding cache.
//!
//! Content-addressed store of `(text, model) -> vector`, keyed by
//! `SHA-256(model || 0x1F || text)` with an absolute expiration of
//! `inserted_at + TTL`. Concurrent puts for the same key are idempotent;
//! last writer wins. Hit/miss counters are informational and do not gate
//! correctness.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::embeddings::backend::{vector_from_bytes, vector_to_bytes};
use crate::error::{EngramError, Result};

// ============================================================================
// STATS
// ============================================================================

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

// ============================================================================
// CACHE
// ============================================================================

/// SQLite-backed embedding cache.
pub struct EmbeddingCache {
    conn: Mutex<Connection>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Open (or create) the cache at `path`.
    pub fn open(path: &Path, ttl: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngramError::storage(format!("cannot create cache dir: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| EngramError::storage(format!("cannot open embedding cache: {e}")))?;
        Self::with_connection(conn, ttl)
    }

    /// In-memory cache, used by tests and cache-disabled configurations that
    /// still want coalescing.
    pub fn in_memory(ttl: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngramError::storage(format!("cannot open embedding cache: {e}")))?;
        Self::with_connection(conn, ttl)
    }

    fn with_connection(conn: Connection, ttl: Duration) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS embedding_cache (
                 key          TEXT PRIMARY KEY,
                 model        TEXT NOT NULL,
                 vector       BLOB NOT NULL,
                 inserted_at  INTEGER NOT NULL,
                 expires_at   INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_embedding_cache_expiry
                 ON embedding_cache(expires_at);",
        )
        .map_err(|e| EngramError::storage(format!("cache schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Content-addressed cache key: SHA-256 over model, a 0x1F separator,
    /// and the text.
    pub fn cache_key(model: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0x1f]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a cached vector. Expired entries count as misses.
    pub fn get(&self, text: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let key = Self::cache_key(model, text);
        let now = Utc::now().timestamp();
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngramError::storage(format!("cache lock poisoned: {e}")))?;
        let row: Option<Vec<u8>> = conn
            .query_row(
                "SELECT vector FROM embedding_cache WHERE key = ?1 AND expires_at > ?2",
                params![key, now],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| EngramError::storage(format!("cache read: {e}")))?;

        match row {
            Some(bytes) => match vector_from_bytes(&bytes) {
                Some(vector) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Ok(Some(vector))
                }
                None => {
                    // A truncated blob is treated as a miss, not an error.
                    tracing::warn!("discarding corrupt cache entry for key {key}");
                    let _ = conn.execute("DELETE FROM embedding_cache WHERE key = ?1", params![key]);
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    Ok(None)
                }
            },
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Insert a vector. Failure to persist is non-fatal for callers; they
    /// log and continue.
    pub fn put(&self, text: &str, model: &str, vector: &[f32]) -> Result<()> {
        let key = Self::cache_key(model, text);
        let now = Utc::now().timestamp();
        let expires = now + self.ttl.as_secs() as i64;
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngramError::storage(format!("cache lock poisoned: {e}")))?;
        conn.execute(
            "INSERT OR REPLACE INTO embedding_cache (key, model, vector, inserted_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, model, vector_to_bytes(vector), now, expires],
        )
        .map_err(|e| EngramError::storage(format!("cache write: {e}")))?;
        Ok(())
    }

    /// Drop all expired entries; returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngramError::storage(format!("cache lock poisoned: {e}")))?;
        let removed = conn
            .execute(
                "DELETE FROM embedding_cache WHERE expires_at <= ?1",
                params![now],
            )
            .map_err(|e| EngramError::storage(format!("cache purge: {e}")))?;
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> EmbeddingCache {
        EmbeddingCache::in_memory(Duration::from_secs(3600)).unwrap()
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = cache();
        assert!(cache.get("hello", "m1").unwrap().is_none());
        cache.put("hello", "m1", &[0.1, 0.2, 0.3]).unwrap();
        let vector = cache.get("hello", "m1").unwrap().unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_key_distinguishes_model() {
        let cache = cache();
        cache.put("hello", "m1", &[1.0]).unwrap();
        assert!(cache.get("hello", "m2").unwrap().is_none());
        assert_ne!(
            EmbeddingCache::cache_key("m1", "hello"),
            EmbeddingCache::cache_key("m2", "hello"),
        );
        // The separator prevents boundary ambiguity between model and text.
        assert_ne!(
            EmbeddingCache::cache_key("ab", "c"),
            EmbeddingCache::cache_key("a", "bc"),
        );
    }

    #[test]
    fn test_last_writer_wins() {
        let cache = cache();
        cache.put("hello", "m1", &[1.0]).unwrap();
        cache.put("hello", "m1", &[2.0]).unwrap();
        assert_eq!(cache.get("hello", "m1").unwrap().unwrap(), vec![2.0]);
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let cache = EmbeddingCache::in_memory(Duration::from_secs(0)).unwrap();
        cache.put("hello", "m1", &[1.0]).unwrap();
        assert!(cache.get("hello", "m1").unwrap().is_none());
        assert_eq!(cache.purge_expired().unwrap(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let cache = EmbeddingCache::open(&path, Duration::from_secs(3600)).unwrap();
            cache.put("hello", "m1", &[0.5, 0.5]).unwrap();
        }
        let cache = EmbeddingCache::open(&path, Duration::from_secs(3600)).unwrap();
        assert_eq!(cache.get("hello", "m1").unwrap().unwrap(), vec![0.5, 0.5]);
    }
}
