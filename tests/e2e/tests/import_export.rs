//! Export/import round trips and archive integrity.

use engram_core::{
    ConflictMode, Exporter, Importer, MemoryCategory, MemoryUnit, SearchFilters, VectorStore,
};
use engram_e2e::harness::{engine, project_request, store_request, Engine};

fn exporter(engine: &Engine) -> Exporter {
    Exporter::new(engine.store.clone(), engine.embedder.clone())
}

fn importer(engine: &Engine) -> Importer {
    Importer::new(
        engine.store.clone(),
        engine.embedder.clone(),
        engine.config.clone(),
    )
}

#[tokio::test]
async fn filtered_export_then_overwrite_import_restores_the_selection() {
    let source = engine(false);
    for i in 0..3 {
        source
            .service
            .store_memory(project_request(
                &format!("keep this record {i}"),
                MemoryCategory::Fact,
                "wanted",
            ))
            .await
            .unwrap();
    }
    source
        .service
        .store_memory(store_request("outside the filter", MemoryCategory::Fact))
        .await
        .unwrap();

    let filters = SearchFilters::for_project("wanted");
    let document = exporter(&source).export_json(&filters).await.unwrap();
    assert_eq!(document["export_type"], "filtered");
    assert_eq!(document["memory_count"], 3);

    let target = engine(false);
    let report = importer(&target)
        .import_json(
            &serde_json::to_string(&document).unwrap(),
            ConflictMode::Overwrite,
            false,
        )
        .await
        .unwrap();
    assert_eq!(report["status"], "success");
    assert_eq!(report["created"], 3);

    // Semantically equal corpus: same ids, content, category, tags.
    let exported: Vec<MemoryUnit> =
        serde_json::from_value(document["memories"].clone()).unwrap();
    for memory in exported {
        let restored = target
            .service
            .get_memory_by_id(&memory.id)
            .await
            .unwrap()
            .expect("record restored under its original id");
        assert_eq!(restored.content, memory.content);
        assert_eq!(restored.category, memory.category);
        assert_eq!(restored.scope, memory.scope);
        assert_eq!(restored.project_name, memory.project_name);
        assert_eq!(restored.tags, memory.tags);
    }
    assert_eq!(target.store.count(None).await.unwrap(), 3);
}

#[tokio::test]
async fn import_errors_are_collected_not_fatal() {
    let target = engine(false);
    let raw = serde_json::json!({
        "memories": [
            {"memory_id": "good", "content": "fine record", "category": "fact"},
            {"memory_id": "bad", "content": "DROP TABLE users", "category": "fact"},
        ]
    })
    .to_string();

    let report = importer(&target)
        .import_json(&raw, ConflictMode::Skip, false)
        .await
        .unwrap();
    assert_eq!(report["status"], "partial");
    assert_eq!(report["created"], 1);
    assert_eq!(report["errors"].as_array().unwrap().len(), 1);
    assert!(target
        .service
        .get_memory_by_id("good")
        .await
        .unwrap()
        .is_some());
    assert!(target
        .service
        .get_memory_by_id("bad")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn merge_mode_folds_fields_onto_existing_records() {
    let engine = engine(false);
    let stored = engine
        .service
        .store_memory(store_request("original wording", MemoryCategory::Fact))
        .await
        .unwrap();

    let raw = serde_json::json!({
        "memories": [{
            "memory_id": stored.memory_id,
            "content": "merged wording",
            "category": "fact",
            "importance": 0.8,
        }]
    })
    .to_string();
    let report = importer(&engine)
        .import_json(&raw, ConflictMode::Merge, false)
        .await
        .unwrap();
    assert_eq!(report["updated"], 1);

    let merged = engine
        .service
        .get_memory_by_id(&stored.memory_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(merged.content, "merged wording");
    assert_eq!(merged.importance, 0.8);
}

#[tokio::test]
async fn portable_archive_checksums_are_valid() {
    let engine = engine(false);
    for i in 0..2 {
        engine
            .service
            .store_memory(store_request(
                &format!("archived record {i}"),
                MemoryCategory::Fact,
            ))
            .await
            .unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    exporter(&engine)
        .write_portable_archive(dir.path(), &SearchFilters::default(), false)
        .await
        .unwrap();

    for name in ["memories.json", "manifest.json", "checksums.sha256"] {
        assert!(dir.path().join(name).exists(), "{name} missing from archive");
    }
    let manifest: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest["memory_count"], 2);
    assert_eq!(manifest["includes_embeddings"], false);
}
