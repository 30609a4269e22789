//! Full store/retrieve/update/delete journeys over the wired engine.

use engram_core::{
    ContextLevel, ListRequest, MemoryCategory, SortField, SortOrder, UpdateMemoryRequest,
    VectorStore,
};
use engram_e2e::harness::{engine, query, store_request};

#[tokio::test]
async fn stored_memory_is_immediately_retrievable() {
    let engine = engine(false);
    let mut request = store_request(
        "User prefers Python over JavaScript for backend",
        MemoryCategory::Preference,
    );
    request.importance = 0.9;
    request.tags = vec!["language".to_string(), "preference".to_string()];
    let stored = engine.service.store_memory(request).await.unwrap();

    let response = engine
        .service
        .retrieve_memories(query("language preference", 5), None)
        .await
        .unwrap();
    let hit = response
        .results
        .iter()
        .find(|r| r.memory.id == stored.memory_id)
        .expect("freshly stored memory is retrievable");
    assert!(hit.score >= 0.5, "expected score >= 0.5, got {}", hit.score);
    assert!(response.query_time_ms >= 0.0);
}

#[tokio::test]
async fn event_about_current_work_classifies_as_session_state() {
    let engine = engine(false);
    let stored = engine
        .service
        .store_memory(store_request(
            "Currently working on refactoring the database layer",
            MemoryCategory::Event,
        ))
        .await
        .unwrap();
    assert_eq!(stored.context_level, ContextLevel::SessionState);
}

#[tokio::test]
async fn results_are_sorted_and_scores_bounded() {
    let engine = engine(false);
    for content in [
        "postgres connection pool sizing",
        "postgres index maintenance runbook",
        "team lunch is on thursdays",
        "rotate the pagerduty schedule monthly",
    ] {
        engine
            .service
            .store_memory(store_request(content, MemoryCategory::Fact))
            .await
            .unwrap();
    }

    let response = engine
        .service
        .retrieve_memories(query("postgres maintenance", 10), None)
        .await
        .unwrap();
    assert!(!response.results.is_empty());
    for pair in response.results.windows(2) {
        assert!(pair[0].score >= pair[1].score, "descending score order");
    }
    for result in &response.results {
        assert!((0.0..=1.0).contains(&result.score));
    }
}

#[tokio::test]
async fn update_preserves_created_at_and_regenerates_embedding() {
    let engine = engine(false);
    let stored = engine
        .service
        .store_memory(store_request(
            "the staging cluster lives in us-east-1",
            MemoryCategory::Fact,
        ))
        .await
        .unwrap();
    let before = engine
        .service
        .get_memory_by_id(&stored.memory_id)
        .await
        .unwrap()
        .unwrap();

    let outcome = engine
        .service
        .update_memory(UpdateMemoryRequest {
            memory_id: stored.memory_id.clone(),
            content: Some("the staging cluster moved to eu-west-2".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(outcome.status, "updated");
    assert!(outcome.embedding_regenerated);

    let after = engine
        .service
        .get_memory_by_id(&stored.memory_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.created_at, before.created_at);
    assert!(after.content.contains("eu-west-2"));

    // The new content wins retrieval for the new terms.
    let response = engine
        .service
        .retrieve_memories(query("eu-west-2 cluster", 5), None)
        .await
        .unwrap();
    assert_eq!(response.results[0].memory.id, stored.memory_id);
}

#[tokio::test]
async fn delete_then_get_reports_not_found() {
    let engine = engine(false);
    let stored = engine
        .service
        .store_memory(store_request("ephemeral note", MemoryCategory::Fact))
        .await
        .unwrap();

    let outcome = engine.service.delete_memory(&stored.memory_id).await.unwrap();
    assert_eq!(outcome.status, "success");
    assert!(engine
        .service
        .get_memory_by_id(&stored.memory_id)
        .await
        .unwrap()
        .is_none());

    let outcome = engine.service.delete_memory(&stored.memory_id).await.unwrap();
    assert_eq!(outcome.status, "not_found");
}

#[tokio::test]
async fn listing_pages_are_consistent_with_totals() {
    let engine = engine(false);
    for i in 0..9 {
        let mut request = store_request(&format!("numbered entry {i}"), MemoryCategory::Fact);
        request.importance = i as f64 / 10.0;
        engine.service.store_memory(request).await.unwrap();
    }

    let mut seen = Vec::new();
    let mut offset = 0;
    loop {
        let page = engine
            .service
            .list_memories(ListRequest {
                sort_by: SortField::Importance,
                sort_order: SortOrder::Desc,
                limit: 4,
                offset,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total_count, 9);
        seen.extend(page.memories.iter().map(|m| m.id.clone()));
        if !page.has_more {
            break;
        }
        offset += page.returned_count;
    }
    assert_eq!(seen.len(), 9);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 9, "pagination never repeats a record");
}

#[tokio::test]
async fn every_persisted_project_memory_has_a_project_name() {
    let engine = engine(false);
    engine
        .service
        .store_memory(engram_e2e::harness::project_request(
            "scoped fact",
            MemoryCategory::Fact,
            "alpha",
        ))
        .await
        .unwrap();
    engine
        .service
        .store_memory(store_request("global fact", MemoryCategory::Fact))
        .await
        .unwrap();

    let (all, _) = engine
        .store
        .list(
            &Default::default(),
            SortField::CreatedAt,
            SortOrder::Asc,
            100,
            0,
        )
        .await
        .unwrap();
    for memory in all {
        if memory.scope == engram_core::MemoryScope::Project {
            assert!(memory.project_name.as_deref().is_some_and(|p| !p.is_empty()));
        }
    }
}
