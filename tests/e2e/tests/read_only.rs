//! Read-only mode: every mutating operation is rejected before any side
//! effect; reads keep working.

use engram_core::{MemoryCategory, SearchFilters, UpdateMemoryRequest, VectorStore};
use engram_e2e::harness::{engine, query, store_request};

#[tokio::test]
async fn store_is_rejected_with_e003_and_corpus_unchanged() {
    let engine = engine(true);
    let err = engine
        .service
        .store_memory(store_request("should not land", MemoryCategory::Fact))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "E003");
    assert_eq!(err.error_type(), "READ_ONLY");
    assert_eq!(engine.store.count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn all_mutating_operations_are_rejected() {
    let engine = engine(true);

    let err = engine
        .service
        .update_memory(UpdateMemoryRequest {
            memory_id: "x".to_string(),
            importance: Some(0.2),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "E003");

    let err = engine.service.delete_memory("x").await.unwrap_err();
    assert_eq!(err.error_code(), "E003");

    let err = engine
        .service
        .delete_memories_by_query(
            SearchFilters {
                project_name: Some("p".to_string()),
                ..Default::default()
            },
            10,
            false,
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "E003");

    let err = engine
        .service
        .migrate_memory_scope("x", Some("p".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "E003");

    let err = engine
        .service
        .merge_memories(&["a".to_string(), "b".to_string()], None, None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "E003");
}

#[tokio::test]
async fn reads_still_work_in_read_only_mode() {
    let engine = engine(true);
    // Retrieval against an empty corpus is fine; the mode gates writes only.
    let response = engine
        .service
        .retrieve_memories(query("anything", 5), None)
        .await
        .unwrap();
    assert_eq!(response.total_found, 0);

    let health = engine.health.get_health_score().await.unwrap();
    assert_eq!(health["store_available"], true);
}

#[tokio::test]
async fn server_remains_operational_after_rejections() {
    let engine = engine(true);
    for _ in 0..5 {
        let _ = engine
            .service
            .store_memory(store_request("nope", MemoryCategory::Fact))
            .await;
    }
    // Still serving reads after repeated failures.
    let response = engine
        .service
        .retrieve_memories(query("still alive", 3), None)
        .await
        .unwrap();
    assert_eq!(response.total_found, 0);
}
