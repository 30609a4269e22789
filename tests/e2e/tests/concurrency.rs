//! Concurrent operation behavior: coalesced embedding fills, parallel
//! stores and retrieves, and resilience after individual failures.

use std::sync::Arc;

use engram_core::MemoryCategory;
use engram_e2e::harness::{engine, query, store_request};

#[tokio::test]
async fn concurrent_embeds_for_one_key_generate_once() {
    let engine = engine(false);
    let embedder = engine.embedder.clone();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let embedder = embedder.clone();
        handles.push(tokio::spawn(async move {
            embedder.embed("the exact same text").await.unwrap()
        }));
    }
    let mut vectors = Vec::new();
    for handle in handles {
        vectors.push(handle.await.unwrap());
    }

    assert_eq!(
        engine.backend.calls(),
        1,
        "coalescing must collapse concurrent fills into one generate call"
    );
    assert!(vectors.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn parallel_stores_all_land() {
    let engine = Arc::new(engine(false));
    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .service
                .store_memory(store_request(
                    &format!("parallel record number {i}"),
                    MemoryCategory::Fact,
                ))
                .await
                .unwrap()
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().memory_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20, "every store got a distinct id");

    use engram_core::VectorStore;
    assert_eq!(engine.store.count(None).await.unwrap(), 20);
}

#[tokio::test]
async fn mixed_readers_and_writers_do_not_corrupt_state() {
    let engine = Arc::new(engine(false));
    for i in 0..5 {
        engine
            .service
            .store_memory(store_request(
                &format!("seed document {i}"),
                MemoryCategory::Fact,
            ))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                engine
                    .service
                    .store_memory(store_request(
                        &format!("interleaved write {i}"),
                        MemoryCategory::Fact,
                    ))
                    .await
                    .map(|_| ())
            } else {
                engine
                    .service
                    .retrieve_memories(query("seed document", 3), None)
                    .await
                    .map(|_| ())
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    use engram_core::VectorStore;
    assert_eq!(engine.store.count(None).await.unwrap(), 9);
}

#[tokio::test]
async fn a_failing_operation_leaves_the_engine_serving() {
    let engine = engine(false);
    engine
        .service
        .store_memory(store_request("healthy record", MemoryCategory::Fact))
        .await
        .unwrap();

    // Validation failures in one operation...
    for _ in 0..3 {
        let err = engine
            .service
            .store_memory(store_request("", MemoryCategory::Fact))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "E002");
    }

    // ...never corrupt shared state for the next one.
    let response = engine
        .service
        .retrieve_memories(query("healthy record", 3), None)
        .await
        .unwrap();
    assert_eq!(response.total_found, 1);

    let health = engine.health.get_health_score().await.unwrap();
    assert_eq!(health["store_available"], true);
}

#[tokio::test]
async fn distinct_sessions_track_concurrently() {
    let engine = Arc::new(engine(false));
    for i in 0..4 {
        engine
            .service
            .store_memory(store_request(
                &format!("session fodder {i}"),
                MemoryCategory::Fact,
            ))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for session in ["s1", "s2", "s3", "s4"] {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .service
                .retrieve_memories(query("session fodder", 2), Some(session))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.results.len(), 2, "each fresh session sees results");
    }
}
