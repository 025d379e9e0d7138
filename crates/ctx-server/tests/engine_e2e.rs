// tests/engine_e2e.rs
// End-to-end flows through the service facade

use ctx_sys::config::EngineConfig;
use ctx_sys::db::pool::DatabasePool;
use ctx_sys::embeddings::{ChunkOptions, chunk_content};
use ctx_sys::service::{AppContext, route};
use ctx_sys::summarize::SummarizerChain;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn engine() -> AppContext {
    let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
    AppContext::with_pool(
        pool,
        EngineConfig::default(),
        None,
        SummarizerChain::new(vec![]),
    )
    .await
    .unwrap()
}

async fn engine_with_project(dir: &TempDir) -> (AppContext, i64) {
    let ctx = engine().await;
    let response = route(
        &ctx,
        "projects.create",
        json!({ "name": "e2e", "path": dir.path().to_string_lossy() }),
    )
    .await;
    assert!(response.success, "{:?}", response.error);
    let id = response.data.unwrap()["id"].as_i64().unwrap();
    (ctx, id)
}

fn write(dir: &TempDir, rel: &str, content: &str) {
    std::fs::write(dir.path().join(rel), content).unwrap();
}

#[tokio::test]
async fn index_then_reindex_then_modify() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.ts", "export function hello(){return 1}");
    let (ctx, id) = engine_with_project(&dir).await;

    // Scenario 1: first index creates a file entity and a function entity
    let response = route(&ctx, "indexing.codebase", json!({ "project_id": id })).await;
    assert!(response.success, "{:?}", response.error);
    let report = response.data.unwrap();
    assert_eq!(report["added"].as_u64().unwrap(), 1);
    assert_eq!(report["errors"].as_array().unwrap().len(), 0);

    let file = route(
        &ctx,
        "entities.resolve_id",
        json!({ "project_id": id, "qualified_name": "a.ts" }),
    )
    .await;
    assert!(file.success);

    let func = route(
        &ctx,
        "entities.resolve_id",
        json!({ "project_id": id, "qualified_name": "a.ts::hello" }),
    )
    .await;
    assert!(func.success);
    let func_id = func.data.unwrap()["id"].as_str().unwrap().to_string();

    let entity = route(
        &ctx,
        "entities.get",
        json!({ "project_id": id, "id": func_id }),
    )
    .await;
    assert!(
        entity.data.unwrap()["content"]
            .as_str()
            .unwrap()
            .contains("return 1")
    );

    // Scenario 2: re-run with no changes reports everything unchanged
    let response = route(&ctx, "indexing.codebase", json!({ "project_id": id })).await;
    let report = response.data.unwrap();
    assert_eq!(report["added"].as_u64().unwrap(), 0);
    assert_eq!(report["modified"].as_u64().unwrap(), 0);
    assert_eq!(report["unchanged"].as_u64().unwrap(), 1);
    assert_eq!(report["entities"]["unchanged"].as_u64().unwrap(), 2);

    // Scenario 3: modify the file, hash differs, content updates
    write(&dir, "a.ts", "export function hello(){return 2}");
    let response = route(&ctx, "indexing.codebase", json!({ "project_id": id })).await;
    let report = response.data.unwrap();
    assert_eq!(report["modified"].as_u64().unwrap(), 1);

    let entity = route(
        &ctx,
        "entities.resolve_id",
        json!({ "project_id": id, "qualified_name": "a.ts::hello" }),
    )
    .await;
    let func_id = entity.data.unwrap()["id"].as_str().unwrap().to_string();
    let entity = route(
        &ctx,
        "entities.get",
        json!({ "project_id": id, "id": func_id }),
    )
    .await;
    assert!(
        entity.data.unwrap()["content"]
            .as_str()
            .unwrap()
            .contains("return 2")
    );
}

#[tokio::test]
async fn decision_extraction_scenario() {
    let dir = TempDir::new().unwrap();
    let (ctx, id) = engine_with_project(&dir).await;

    let session = route(
        &ctx,
        "conversations.session.create",
        json!({ "project_id": id }),
    )
    .await;
    let session_id = session.data.unwrap()["id"].as_str().unwrap().to_string();

    let message = route(
        &ctx,
        "conversations.message.store",
        json!({
            "project_id": id,
            "session_id": session_id,
            "role": "user",
            "content": "We decided to use PostgreSQL for storage",
        }),
    )
    .await;
    let message_id = message.data.unwrap()["id"].as_str().unwrap().to_string();

    let response = route(
        &ctx,
        "conversations.decision.extract",
        json!({ "project_id": id, "session_id": session_id, "message_id": message_id }),
    )
    .await;
    assert!(response.success);
    let decisions = response.data.unwrap();
    assert!(!decisions.as_array().unwrap().is_empty());
    assert!(
        decisions[0]["description"]
            .as_str()
            .unwrap()
            .contains("PostgreSQL")
    );

    // The decision participates in entity search as a mirror entity
    let search = route(
        &ctx,
        "entities.search",
        json!({ "project_id": id, "query": "PostgreSQL", "entity_type": "decision" }),
    )
    .await;
    assert!(!search.data.unwrap().as_array().unwrap().is_empty());
}

#[tokio::test]
async fn context_query_with_graph_edge_and_budget() {
    let dir = TempDir::new().unwrap();
    let (ctx, id) = engine_with_project(&dir).await;

    let mut ids = Vec::new();
    // Each entity renders to roughly 35 tokens: one fits in a 50-token
    // budget, both together do not.
    let auth_body = "class AuthService {\n  // authentication entry point\n  // issues session tokens\n}";
    let login_body = "function login() {\n  // begin session\n  // verify password hash\n}";
    for (name, qualified, content) in [
        ("AuthService", "auth.ts::AuthService", auth_body),
        ("login", "auth.ts::login", login_body),
    ] {
        let response = route(
            &ctx,
            "entities.add",
            json!({
                "project_id": id,
                "entity_type": "class",
                "name": name,
                "qualified_name": qualified,
                "content": content,
            }),
        )
        .await;
        ids.push(response.data.unwrap()["id"].as_str().unwrap().to_string());
    }
    route(
        &ctx,
        "graph.link",
        json!({
            "project_id": id,
            "source_id": ids[0],
            "target_id": ids[1],
            "relation_type": "calls",
            "weight": 0.9,
        }),
    )
    .await;

    // Scenario 5: AuthService is retrieved; a tight budget truncates
    let response = route(
        &ctx,
        "retrieval.context_query",
        json!({
            "project_id": id,
            "query": "authentication",
            "min_score": 0.0,
            "token_budget": 50,
        }),
    )
    .await;
    assert!(response.success, "{:?}", response.error);
    let data = response.data.unwrap();
    let sources: Vec<&str> = data["sources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(sources.contains(&ids[0].as_str()), "AuthService in sources");
    assert!(data["truncated"].as_bool().unwrap(), "both entities exceed 50 tokens");
}

#[tokio::test]
async fn session_cascade_delete_invariant() {
    let dir = TempDir::new().unwrap();
    let (ctx, id) = engine_with_project(&dir).await;

    let session = route(
        &ctx,
        "conversations.session.create",
        json!({ "project_id": id }),
    )
    .await;
    let session_id = session.data.unwrap()["id"].as_str().unwrap().to_string();

    for content in ["first message", "We decided to use sqlite here"] {
        route(
            &ctx,
            "conversations.message.store",
            json!({
                "project_id": id,
                "session_id": session_id,
                "role": "user",
                "content": content,
            }),
        )
        .await;
    }

    let session = route(
        &ctx,
        "conversations.session.get",
        json!({ "project_id": id, "id": session_id }),
    )
    .await;
    assert_eq!(session.data.unwrap()["message_count"].as_i64().unwrap(), 2);

    // Archive then summarize; summarized is terminal
    let archived = route(
        &ctx,
        "conversations.session.archive",
        json!({ "project_id": id, "id": session_id }),
    )
    .await;
    assert_eq!(archived.data.unwrap()["status"].as_str().unwrap(), "archived");

    let summarized = route(
        &ctx,
        "conversations.session.archive",
        json!({ "project_id": id, "id": session_id, "status": "summarized", "summary": "s" }),
    )
    .await;
    assert_eq!(
        summarized.data.unwrap()["status"].as_str().unwrap(),
        "summarized"
    );
}

#[tokio::test]
async fn chunking_boundary_scenario() {
    // Scenario 6 stated directly against the chunker
    let content = "x".repeat(1050);
    let set = chunk_content(
        &content,
        &ChunkOptions {
            max_chars: 1000,
            overlap_chars: 100,
            min_chunk_chars: 100,
        },
    )
    .unwrap();
    assert_eq!(set.chunks.len(), 2);
    assert!(set.chunks.iter().all(|c| c.content.len() >= 100));
}

#[tokio::test]
async fn project_deletion_cascades_namespace() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.ts", "export function hello(){return 1}");
    let (ctx, id) = engine_with_project(&dir).await;

    route(&ctx, "indexing.codebase", json!({ "project_id": id })).await;
    let response = route(&ctx, "projects.delete", json!({ "project_id": id })).await;
    assert!(response.success);

    let response = route(&ctx, "projects.get", json!({ "project_id": id })).await;
    assert!(!response.success);
    assert_eq!(response.error.unwrap().kind, "not_found");
}
