//! Cross-project consent and fan-out search.

use engram_core::MemoryCategory;
use engram_e2e::harness::{engine, project_request};

#[tokio::test]
async fn no_opt_ins_returns_informational_empty_response() {
    let engine = engine(false);
    let response = engine.cross.search_all_projects("x", 10, None).await.unwrap();
    assert_eq!(response["results"].as_array().unwrap().len(), 0);
    assert_eq!(response["projects_searched"].as_array().unwrap().len(), 0);
    assert!(response["message"]
        .as_str()
        .unwrap()
        .contains("No projects have opted in"));
}

#[tokio::test]
async fn consented_projects_are_searched_and_merged_by_score() {
    let engine = engine(false);
    engine.cross.opt_in("P1").await.unwrap();
    engine.cross.opt_in("P2").await.unwrap();
    engine.cross.opt_in("quiet").await.unwrap();
    engine.cross.opt_out("excluded").await.unwrap();

    for project in ["P1", "P2", "excluded"] {
        engine
            .service
            .store_memory(project_request(
                &format!("x marks the treasure location in {project}"),
                MemoryCategory::Fact,
                project,
            ))
            .await
            .unwrap();
    }

    let response = engine
        .cross
        .search_all_projects("x treasure location", 10, None)
        .await
        .unwrap();
    let results = response["results"].as_array().unwrap();
    assert_eq!(results.len(), 2, "only consented projects contribute");

    let searched: Vec<&str> = response["projects_searched"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap())
        .collect();
    assert!(searched.contains(&"P1") && searched.contains(&"P2"));

    let scores: Vec<f64> = results.iter().map(|r| r["score"].as_f64().unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    for result in results {
        let project = result["project_name"].as_str().unwrap();
        assert_ne!(project, "excluded");
    }
}

#[tokio::test]
async fn opt_in_and_opt_out_are_idempotent() {
    let engine = engine(false);
    for _ in 0..4 {
        engine.cross.opt_in("repeat").await.unwrap();
    }
    let listing = engine.cross.list_opted_in().await.unwrap();
    assert_eq!(
        listing["opted_in_projects"],
        serde_json::json!(["repeat"]),
        "N opt-ins leave the same state as one"
    );

    for _ in 0..4 {
        engine.cross.opt_out("repeat").await.unwrap();
    }
    let listing = engine.cross.list_opted_in().await.unwrap();
    assert_eq!(listing["opted_in_projects"], serde_json::json!([]));
    assert_eq!(listing["opted_out_projects"], serde_json::json!(["repeat"]));
}

#[tokio::test]
async fn aggregate_limit_truncates_across_projects() {
    let engine = engine(false);
    for project in ["a", "b", "c"] {
        engine.cross.opt_in(project).await.unwrap();
        for i in 0..3 {
            engine
                .service
                .store_memory(project_request(
                    &format!("shared fleet telemetry record {i}"),
                    MemoryCategory::Fact,
                    project,
                ))
                .await
                .unwrap();
        }
    }
    let response = engine
        .cross
        .search_all_projects("fleet telemetry", 4, None)
        .await
        .unwrap();
    assert_eq!(response["results"].as_array().unwrap().len(), 4);
    assert_eq!(response["projects_searched"].as_array().unwrap().len(), 3);
}
