//! Query-based bulk deletion: dry runs, the hard cap, and breakdowns.

use engram_core::{MemoryCategory, SearchFilters, VectorStore, MAX_DELETE_BATCH};
use engram_e2e::harness::{engine, project_request};

#[tokio::test]
async fn dry_run_previews_without_mutating_then_real_run_deletes() {
    let engine = engine(false);
    for i in 0..5 {
        engine
            .service
            .store_memory(project_request(
                &format!("project record {i}"),
                MemoryCategory::Fact,
                "P",
            ))
            .await
            .unwrap();
    }
    let filters = SearchFilters::for_project("P");

    let preview = engine
        .service
        .delete_memories_by_query(filters.clone(), MAX_DELETE_BATCH, true)
        .await
        .unwrap();
    assert!(preview.preview);
    assert_eq!(preview.deleted_count, 0);
    assert_eq!(preview.total_matches, 5);
    assert_eq!(preview.would_delete_count, 5);
    assert_eq!(engine.store.count(Some(&filters)).await.unwrap(), 5);

    let real = engine
        .service
        .delete_memories_by_query(filters.clone(), MAX_DELETE_BATCH, false)
        .await
        .unwrap();
    assert!(!real.preview);
    assert_eq!(real.deleted_count, 5);
    assert_eq!(real.breakdown.by_project["P"], 5);
    assert_eq!(engine.store.count(Some(&filters)).await.unwrap(), 0);
}

#[tokio::test]
async fn max_count_caps_the_deletion() {
    let engine = engine(false);
    for i in 0..8 {
        engine
            .service
            .store_memory(project_request(
                &format!("capped record {i}"),
                MemoryCategory::Fact,
                "caps",
            ))
            .await
            .unwrap();
    }
    let filters = SearchFilters::for_project("caps");

    let report = engine
        .service
        .delete_memories_by_query(filters.clone(), 3, false)
        .await
        .unwrap();
    assert_eq!(report.deleted_count, 3);
    assert_eq!(report.total_matches, 8);
    assert_eq!(engine.store.count(Some(&filters)).await.unwrap(), 5);
}

#[tokio::test]
async fn warnings_cover_importance_and_project_spread() {
    let engine = engine(false);
    for project in ["p1", "p2"] {
        let mut request = project_request("shared tag record", MemoryCategory::Fact, project);
        request.tags = vec!["sweep".to_string()];
        request.importance = 0.9;
        engine.service.store_memory(request).await.unwrap();
    }
    let filters = SearchFilters {
        tags: vec!["sweep".to_string()],
        ..Default::default()
    };

    let preview = engine
        .service
        .delete_memories_by_query(filters, 100, true)
        .await
        .unwrap();
    assert!(preview.warnings.iter().any(|w| w.contains("high-importance")));
    assert!(preview.warnings.iter().any(|w| w.contains("2 projects")));
}

#[tokio::test]
async fn unfiltered_bulk_delete_is_a_validation_error() {
    let engine = engine(false);
    let err = engine
        .service
        .delete_memories_by_query(SearchFilters::default(), 10, false)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "E002");
}
