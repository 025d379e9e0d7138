// service/actions.rs
// Action router: validate parameters, delegate, wrap in the envelope

use super::AppContext;
use crate::db::{
    self, Direction, EntityInput, MessageMetadata, SessionStatus, StatsPeriod,
};
use crate::error::{CtxError, Result};
use crate::identity::{Clock, SystemClock, new_id};
use crate::indexer::IndexOptions;
use crate::search::{
    AssembleOptions, RenderFormat, SearchOptions, Strategy, default_estimator,
};
use crate::utils::truncate;
use crate::watcher::{Git2Diff, VcsDiff, sync_changed_files};
use ctx_types::ActionResponse;
use serde_json::{Value, json};
use std::path::Path;

/// Route an action by name.
///
/// Validates required parameters, rejects unknown actions with a
/// descriptive error, and never mutates state beyond delegation.
pub async fn route(ctx: &AppContext, action: &str, params: Value) -> ActionResponse {
    match dispatch(ctx, action, params).await {
        Ok(data) => ActionResponse::ok(data),
        Err(e) => ActionResponse::err(e.kind(), e.to_string(), e.hint()),
    }
}

async fn dispatch(ctx: &AppContext, action: &str, params: Value) -> Result<Value> {
    match action {
        "projects.create" => projects_create(ctx, &params).await,
        "projects.list" => projects_list(ctx).await,
        "projects.get" => projects_get(ctx, &params).await,
        "projects.set_active" => projects_set_active(ctx, &params).await,
        "projects.delete" => projects_delete(ctx, &params).await,
        "entities.add" => entities_add(ctx, &params).await,
        "entities.get" => entities_get(ctx, &params).await,
        "entities.search" => entities_search(ctx, &params).await,
        "entities.delete" => entities_delete(ctx, &params).await,
        "entities.resolve_id" => entities_resolve_id(ctx, &params).await,
        "indexing.codebase" => indexing_codebase(ctx, &params).await,
        "indexing.document" => indexing_document(ctx, &params).await,
        "indexing.sync" => indexing_sync(ctx, &params).await,
        "indexing.status" => indexing_status(ctx, &params).await,
        "conversations.session.create" => session_create(ctx, &params).await,
        "conversations.session.get" => session_get(ctx, &params).await,
        "conversations.session.archive" => session_archive(ctx, &params).await,
        "conversations.message.store" => message_store(ctx, &params).await,
        "conversations.message.search" => message_search(ctx, &params).await,
        "conversations.decision.extract" => decision_extract(ctx, &params).await,
        "conversations.decision.list" => decision_list(ctx, &params).await,
        "conversations.decision.supersede" => decision_supersede(ctx, &params).await,
        "graph.link" => graph_link(ctx, &params).await,
        "graph.query" => graph_query(ctx, &params).await,
        "graph.stats" => graph_stats(ctx, &params).await,
        "retrieval.context_query" => retrieval_context_query(ctx, &params).await,
        "agent.checkpoint.save" => checkpoint_save(ctx, &params).await,
        "agent.checkpoint.list" => checkpoint_list(ctx, &params).await,
        "agent.reflection.store" => reflection_store(ctx, &params).await,
        "hooks.install" => hooks_install(ctx, &params).await,
        "hooks.impact_report" => hooks_impact_report(ctx, &params).await,
        "analytics.stats" => analytics_stats(ctx, &params).await,
        "analytics.feedback" => analytics_feedback(ctx, &params).await,
        other => Err(CtxError::InvalidInput(format!(
            "unknown action '{}'; see the action surface documentation for the supported set",
            other
        ))),
    }
}

// ============================================================================
// Parameter helpers
// ============================================================================

fn require_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| CtxError::InvalidInput(format!("missing required parameter '{}'", key)))
}

fn require_i64(params: &Value, key: &str) -> Result<i64> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| CtxError::InvalidInput(format!("missing required parameter '{}'", key)))
}

fn optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn optional_usize(params: &Value, key: &str) -> Option<usize> {
    params.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

fn optional_bool(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

fn optional_str_list(params: &Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn project_id(params: &Value) -> Result<i64> {
    require_i64(params, "project_id")
}

// ============================================================================
// Projects
// ============================================================================

async fn projects_create(ctx: &AppContext, params: &Value) -> Result<Value> {
    let name = require_str(params, "name")?;
    let path = require_str(params, "path")?;
    let project = ctx.create_project(&name, &path).await?;
    Ok(json!({
        "id": project.id,
        "slug": project.slug,
        "name": project.name,
        "path": project.path,
    }))
}

async fn projects_list(ctx: &AppContext) -> Result<Value> {
    let projects = ctx.list_projects().await?;
    Ok(json!(
        projects
            .iter()
            .map(|p| {
                json!({
                    "id": p.id,
                    "slug": p.slug,
                    "name": p.name,
                    "path": p.path,
                    "active": p.active,
                    "last_indexed_at": p.last_indexed_at,
                })
            })
            .collect::<Vec<_>>()
    ))
}

async fn projects_get(ctx: &AppContext, params: &Value) -> Result<Value> {
    let project = ctx.get_project(project_id(params)?).await?;
    Ok(json!({
        "id": project.id,
        "slug": project.slug,
        "name": project.name,
        "path": project.path,
        "active": project.active,
        "config": project.config,
        "last_indexed_at": project.last_indexed_at,
    }))
}

async fn projects_set_active(ctx: &AppContext, params: &Value) -> Result<Value> {
    let id = project_id(params)?;
    ctx.set_active_project(id).await?;
    Ok(json!({ "active_project_id": id }))
}

async fn projects_delete(ctx: &AppContext, params: &Value) -> Result<Value> {
    let id = project_id(params)?;
    ctx.delete_project(id).await?;
    Ok(json!({ "deleted": id }))
}

// ============================================================================
// Entities
// ============================================================================

async fn entities_add(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let input = EntityInput {
        entity_type: require_str(params, "entity_type")?,
        name: require_str(params, "name")?,
        qualified_name: require_str(params, "qualified_name")?,
        content: optional_str(params, "content"),
        summary: optional_str(params, "summary"),
        file_path: optional_str(params, "file_path"),
        metadata: params.get("metadata").cloned().unwrap_or(json!({})),
        ..Default::default()
    };
    let caps = ctx.capabilities();
    let tables = handle.tables.clone();
    let (entity, _) = ctx
        .pool()
        .run(move |conn| db::upsert_entity_sync(conn, &tables, caps, &input))
        .await?;
    Ok(serde_json::to_value(entity)?)
}

async fn entities_get(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let id = require_str(params, "id")?;
    let tables = handle.tables.clone();
    let entity = ctx
        .pool()
        .run(move |conn| {
            db::get_entity_sync(conn, &tables, &id)?
                .ok_or_else(|| CtxError::NotFound(format!("entity {}", id)))
        })
        .await?;
    Ok(serde_json::to_value(entity)?)
}

async fn entities_search(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let query = require_str(params, "query")?;
    let entity_type = optional_str(params, "entity_type");
    let limit = optional_usize(params, "limit").unwrap_or(10);
    let caps = ctx.capabilities();
    let tables = handle.tables.clone();
    let results = ctx
        .pool()
        .run(move |conn| {
            db::search_entities_sync(conn, &tables, caps, &query, entity_type.as_deref(), limit)
        })
        .await?;
    Ok(json!(
        results
            .into_iter()
            .map(|(entity, score)| json!({ "entity": entity, "score": score }))
            .collect::<Vec<_>>()
    ))
}

async fn entities_delete(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let id = require_str(params, "id")?;
    let caps = ctx.capabilities();
    let tables = handle.tables.clone();
    let deleted = ctx
        .pool()
        .run(move |conn| db::delete_entity_sync(conn, &tables, caps, &id))
        .await?;
    Ok(json!({ "deleted": deleted }))
}

async fn entities_resolve_id(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let qualified_name = require_str(params, "qualified_name")?;
    let tables = handle.tables.clone();
    let entity = ctx
        .pool()
        .run(move |conn| {
            db::get_entity_by_qualified_name_sync(conn, &tables, &qualified_name)?
                .ok_or_else(|| CtxError::NotFound(format!("entity '{}'", qualified_name)))
        })
        .await?;
    Ok(json!({ "id": entity.id, "qualified_name": entity.qualified_name }))
}

// ============================================================================
// Indexing
// ============================================================================

async fn indexing_codebase(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let mut opts = IndexOptions::from_config(ctx.config());
    opts.force = optional_bool(params, "force").unwrap_or(false);
    opts.includes = optional_str_list(params, "includes");
    opts.excludes = optional_str_list(params, "excludes");

    let report = handle.indexer.index_project(&opts, None, None).await?;

    // Downstream pipelines over the entities this run touched.
    let changed: Vec<String> = report
        .entities
        .added
        .iter()
        .chain(report.entities.modified.iter())
        .cloned()
        .collect();
    let (chunks_embedded, summaries_written) =
        run_enrichment_pipelines(ctx, &handle, &changed).await?;

    Ok(json!({
        "chunks_embedded": chunks_embedded,
        "summaries_written": summaries_written,
        "completed": report.completed,
        "added": report.files_added.len(),
        "modified": report.files_modified.len(),
        "unchanged": report.files_unchanged.len(),
        "deleted": report.files_deleted.len(),
        "skipped": report.skipped_files,
        "failed": report.failed_files,
        "errors": report.errors,
        "entities": {
            "added": report.entities.added.len(),
            "modified": report.entities.modified.len(),
            "unchanged": report.entities.unchanged.len(),
        },
    }))
}

/// Feed freshly indexed entities into the embedding and summarization
/// pipelines. Both are best-effort: provider failures are logged per entity
/// and never fail the index run.
async fn run_enrichment_pipelines(
    ctx: &AppContext,
    handle: &super::ProjectHandle,
    qualified_names: &[String],
) -> Result<(usize, usize)> {
    if qualified_names.is_empty() {
        return Ok((0, 0));
    }

    // Load the touched entities' stored content.
    let tables = handle.tables.clone();
    let names = qualified_names.to_vec();
    let entities = ctx
        .pool()
        .run(move |conn| {
            let mut out = Vec::new();
            for name in &names {
                if let Some(entity) = db::get_entity_by_qualified_name_sync(conn, &tables, name)? {
                    if entity.content.as_deref().is_some_and(|c| !c.trim().is_empty()) {
                        out.push(entity);
                    }
                }
            }
            Ok::<_, CtxError>(out)
        })
        .await?;

    let mut chunks_embedded = 0usize;
    if let Some(provider) = ctx.embeddings() {
        let items: Vec<crate::embeddings::EmbedItem> = entities
            .iter()
            .map(|e| crate::embeddings::EmbedItem {
                entity_id: e.id.clone(),
                content: e.content.clone().unwrap_or_default(),
            })
            .collect();
        let chunk_opts = crate::embeddings::ChunkOptions {
            max_chars: ctx.config().chunk_max_chars,
            overlap_chars: ctx.config().chunk_overlap_chars,
            min_chunk_chars: ctx.config().chunk_min_chars,
        };
        let report = crate::embeddings::embed_entities(
            ctx.pool(),
            &handle.tables,
            ctx.capabilities(),
            provider.clone(),
            items,
            &chunk_opts,
            std::time::Duration::from_secs(ctx.config().embed_timeout_secs),
        )
        .await?;
        for (entity_id, error) in &report.failures {
            tracing::warn!(entity_id = entity_id.as_str(), "embedding failed: {}", error);
        }
        chunks_embedded = report.chunks_written;
    }

    let mut summaries_written = 0usize;
    if ctx.summarizer().has_providers() {
        let (summaries, report) = ctx.summarizer().summarize_entities(&entities).await;
        for (entity_id, error) in &report.failures {
            tracing::debug!(entity_id = entity_id.as_str(), "summarization skipped: {}", error);
        }
        let caps = ctx.capabilities();
        let tables = handle.tables.clone();
        summaries_written = ctx
            .pool()
            .run(move |conn| {
                let mut written = 0usize;
                for (entity_id, summary) in &summaries {
                    db::update_entity_summary_sync(conn, &tables, caps, entity_id, summary)?;
                    written += 1;
                }
                Ok::<_, CtxError>(written)
            })
            .await?;
    }

    Ok((chunks_embedded, summaries_written))
}

async fn indexing_document(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let rel_path = require_str(params, "path")?;

    let full_path = Path::new(&handle.project.path).join(&rel_path);
    let content = tokio::fs::read_to_string(&full_path).await?;

    let caps = ctx.capabilities();
    let tables = handle.tables.clone();
    let created = ctx
        .pool()
        .run(move |conn| {
            db::with_tx(conn, |tx| {
                let mut created: Vec<String> = Vec::new();
                let (doc, _) = db::upsert_entity_sync(
                    tx,
                    &tables,
                    caps,
                    &EntityInput {
                        entity_type: "document".to_string(),
                        name: rel_path.rsplit('/').next().unwrap_or(&rel_path).to_string(),
                        qualified_name: rel_path.clone(),
                        content: Some(content.clone()),
                        file_path: Some(rel_path.clone()),
                        metadata: json!({}),
                        ..Default::default()
                    },
                )?;
                created.push(doc.qualified_name.clone());

                for (title, body, start_line) in split_markdown_sections(&content) {
                    let qualified = format!("{}#{}", rel_path, title);
                    let (section, _) = db::upsert_entity_sync(
                        tx,
                        &tables,
                        caps,
                        &EntityInput {
                            entity_type: "section".to_string(),
                            name: title.clone(),
                            qualified_name: qualified,
                            content: Some(body),
                            file_path: Some(rel_path.clone()),
                            start_line: Some(start_line),
                            metadata: json!({}),
                            ..Default::default()
                        },
                    )?;
                    db::ensure_relationship_sync(tx, &tables, &doc.id, &section.id, "relates_to", 0.9)?;
                    created.push(section.qualified_name);
                }
                Ok::<_, CtxError>(created)
            })
        })
        .await?;

    Ok(json!({ "entities": created }))
}

async fn indexing_sync(ctx: &AppContext, params: &Value) -> Result<Value> {
    let id = project_id(params)?;
    let handle = ctx.project(id).await?;
    let since = require_str(params, "since")?;

    let since_ref = if since == "last_sync" {
        ctx.pool()
            .run(move |conn| db::get_project_config_sync(conn, id, "last_sync"))
            .await?
            .ok_or_else(|| {
                CtxError::InvalidInput(
                    "no last_sync recorded for this project; pass a commit SHA".to_string(),
                )
            })?
    } else {
        since
    };

    let root = handle.project.path.clone();
    let since_for_diff = since_ref.clone();
    let (changed, head) = tokio::task::spawn_blocking(move || {
        let vcs = Git2Diff::new(Path::new(&root));
        let changed = vcs.changed_files(&since_for_diff)?;
        let head = vcs.head_commit()?;
        Ok::<_, CtxError>((changed, head))
    })
    .await??;

    let opts = IndexOptions::from_config(ctx.config());
    let report = sync_changed_files(&handle.indexer, &changed, &opts).await;

    ctx.pool()
        .run(move |conn| db::set_project_config_sync(conn, id, "last_sync", &head))
        .await?;

    Ok(json!({
        "since": since_ref,
        "indexed": report.indexed,
        "removed": report.removed,
        "failed": report.failed,
    }))
}

async fn indexing_status(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let tables = handle.tables.clone();
    let (entities, chunks, relationships, checkpoint) = ctx
        .pool()
        .run(move |conn| {
            Ok::<_, CtxError>((
                db::count_entities_sync(conn, &tables)?,
                db::count_chunks_sync(conn, &tables)?,
                db::count_relationships_sync(conn, &tables)?,
                crate::indexer::checkpoint::load_index_checkpoint_sync(conn, &tables)?.is_some(),
            ))
        })
        .await?;
    Ok(json!({
        "last_indexed_at": handle.project.last_indexed_at,
        "entities": entities,
        "chunks": chunks,
        "relationships": relationships,
        "resume_checkpoint": checkpoint,
    }))
}

// ============================================================================
// Conversations
// ============================================================================

async fn session_create(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let session = handle
        .conversations
        .create_session(optional_str(params, "name"))
        .await?;
    Ok(serde_json::to_value(session)?)
}

async fn session_get(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let session = handle
        .conversations
        .get_session(&require_str(params, "id")?)
        .await?;
    Ok(serde_json::to_value(session)?)
}

async fn session_archive(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let status = match optional_str(params, "status").as_deref() {
        None | Some("archived") => SessionStatus::Archived,
        Some("summarized") => SessionStatus::Summarized,
        Some(other) => {
            return Err(CtxError::InvalidInput(format!(
                "invalid target status '{}'",
                other
            )));
        }
    };
    let session = handle
        .conversations
        .set_session_status(
            &require_str(params, "id")?,
            status,
            optional_str(params, "summary"),
        )
        .await?;
    Ok(serde_json::to_value(session)?)
}

async fn message_store(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let metadata: MessageMetadata = match params.get("metadata") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| CtxError::InvalidInput(format!("invalid message metadata: {e}")))?,
        None => MessageMetadata::default(),
    };
    let message = handle
        .conversations
        .store_message(
            &require_str(params, "session_id")?,
            &require_str(params, "role")?,
            &require_str(params, "content")?,
            metadata,
        )
        .await?;
    Ok(serde_json::to_value(message)?)
}

async fn message_search(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let results = handle
        .conversations
        .search_messages(
            &require_str(params, "query")?,
            optional_str(params, "session_id").as_deref(),
            optional_usize(params, "limit").unwrap_or(20),
        )
        .await?;
    Ok(json!(
        results
            .into_iter()
            .map(|(message, score)| json!({ "message": message, "score": score }))
            .collect::<Vec<_>>()
    ))
}

async fn decision_extract(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let session_id = require_str(params, "session_id")?;
    let message_id = require_str(params, "message_id")?;

    let messages = handle.conversations.get_messages(&session_id, None).await?;
    let message = messages
        .into_iter()
        .find(|m| m.id == message_id)
        .ok_or_else(|| CtxError::NotFound(format!("message {}", message_id)))?;

    let decisions = handle
        .conversations
        .extract_and_store_decisions(ctx.summarizer(), &message)
        .await?;
    Ok(serde_json::to_value(decisions)?)
}

async fn decision_list(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let decisions = handle
        .conversations
        .list_decisions(
            optional_str(params, "session_id").as_deref(),
            optional_usize(params, "limit").unwrap_or(50),
        )
        .await?;
    Ok(serde_json::to_value(decisions)?)
}

async fn decision_supersede(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let id = require_str(params, "id")?;
    let superseded_by = require_str(params, "superseded_by")?;
    handle
        .conversations
        .supersede_decision(&id, &superseded_by)
        .await?;
    Ok(json!({ "id": id, "superseded_by": superseded_by }))
}

// ============================================================================
// Graph
// ============================================================================

async fn graph_link(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let source_id = require_str(params, "source_id")?;
    let target_id = require_str(params, "target_id")?;
    let relation_type = require_str(params, "relation_type")?;
    let weight = params
        .get("weight")
        .and_then(|v| v.as_f64())
        .unwrap_or(1.0);
    let metadata = params.get("metadata").cloned().unwrap_or(json!({}));

    let tables = handle.tables.clone();
    let relationship = ctx
        .pool()
        .run(move |conn| {
            db::create_relationship_sync(
                conn,
                &tables,
                &source_id,
                &target_id,
                &relation_type,
                weight,
                metadata,
            )
        })
        .await?;
    Ok(serde_json::to_value(relationship)?)
}

async fn graph_query(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let entity_id = require_str(params, "entity_id")?;
    let depth = optional_usize(params, "depth").unwrap_or(2);
    let direction = match optional_str(params, "direction").as_deref() {
        None => Direction::Both,
        Some(s) => Direction::parse(s)
            .ok_or_else(|| CtxError::InvalidInput(format!("invalid direction '{}'", s)))?,
    };
    let types = optional_str_list(params, "types");

    let tables = handle.tables.clone();
    let hood = ctx
        .pool()
        .run(move |conn| {
            db::get_neighborhood_sync(conn, &tables, &entity_id, depth, direction, &types)
        })
        .await?;
    Ok(json!({
        "entities": hood
            .nodes
            .iter()
            .map(|n| json!({ "entity": n.entity, "depth": n.depth }))
            .collect::<Vec<_>>(),
        "relationships": hood.relationships,
    }))
}

async fn graph_stats(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let tables = handle.tables.clone();
    let (count, by_type, avg_degree) = ctx
        .pool()
        .run(move |conn| {
            Ok::<_, CtxError>((
                db::count_relationships_sync(conn, &tables)?,
                db::stats_by_type_sync(conn, &tables)?,
                db::get_average_degree_sync(conn, &tables)?,
            ))
        })
        .await?;
    Ok(json!({
        "relationships": count,
        "by_type": by_type.into_iter().collect::<std::collections::BTreeMap<_, _>>(),
        "average_degree": avg_degree,
    }))
}

// ============================================================================
// Retrieval
// ============================================================================

async fn retrieval_context_query(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let query = require_str(params, "query")?;

    let strategies = {
        let requested = optional_str_list(params, "strategies");
        if requested.is_empty() {
            vec![Strategy::Keyword, Strategy::Semantic, Strategy::Graph]
        } else {
            requested
                .iter()
                .map(|s| {
                    Strategy::parse(s)
                        .ok_or_else(|| CtxError::InvalidInput(format!("unknown strategy '{}'", s)))
                })
                .collect::<Result<Vec<_>>>()?
        }
    };
    let search_opts = SearchOptions {
        strategies,
        limit: optional_usize(params, "limit").unwrap_or(10),
        entity_types: optional_str_list(params, "entity_types"),
        min_score: params
            .get("min_score")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
            .unwrap_or(0.3),
        decompose: optional_bool(params, "decompose").unwrap_or(false),
    };
    let assemble_opts = AssembleOptions {
        token_budget: optional_usize(params, "token_budget")
            .unwrap_or(ctx.config().default_token_budget),
        format: match optional_str(params, "format").as_deref() {
            None => RenderFormat::Markdown,
            Some(s) => RenderFormat::parse(s)
                .ok_or_else(|| CtxError::InvalidInput(format!("unknown format '{}'", s)))?,
        },
        estimator: default_estimator,
    };

    let started = std::time::Instant::now();
    let outcome = handle.search.search(&query, &search_opts).await?;
    let bundle = crate::search::assemble_context(&outcome.results, &assemble_opts);
    let latency_ms = started.elapsed().as_millis() as i64;

    // Tokens the caller avoided reading: everything ranked minus what was
    // packed into the bundle.
    let candidate_tokens: usize = outcome
        .results
        .iter()
        .map(|r| default_estimator(r.entity.content.as_deref().unwrap_or("")))
        .sum();
    let tokens_saved = candidate_tokens.saturating_sub(bundle.tokens_used) as i64;

    let query_id = new_id();
    handle.analytics.log(db::QueryLogEntry {
        id: query_id.clone(),
        query: query.clone(),
        tokens_retrieved: bundle.tokens_used as i64,
        tokens_saved,
        average_relevance: bundle.confidence as f64,
        strategies_used: outcome
            .strategies_used
            .iter()
            .map(|s| s.as_str().to_string())
            .collect(),
        latency_ms,
        was_useful: None,
        created_at: SystemClock.now_rfc3339(),
    });

    Ok(json!({
        "query_id": query_id,
        "content": bundle.content,
        "sources": bundle.sources,
        "confidence": bundle.confidence,
        "tokens_used": bundle.tokens_used,
        "truncated": bundle.truncated,
        "strategies_used": outcome
            .strategies_used
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>(),
        "latency_ms": latency_ms,
    }))
}

// ============================================================================
// Agent
// ============================================================================

async fn checkpoint_save(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let session_id = require_str(params, "session_id")?;
    let state = params
        .get("state")
        .cloned()
        .ok_or_else(|| CtxError::InvalidInput("missing required parameter 'state'".into()))?;
    let description = optional_str(params, "description");
    let trigger_type = optional_str(params, "trigger_type");

    let tables = handle.tables.clone();
    let now = SystemClock.now_rfc3339();
    let checkpoint = ctx
        .pool()
        .run(move |conn| {
            db::save_checkpoint_sync(
                conn,
                &tables,
                &session_id,
                &state,
                description.as_deref(),
                trigger_type.as_deref(),
                &now,
            )
        })
        .await?;
    Ok(serde_json::to_value(checkpoint)?)
}

async fn checkpoint_list(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let session_id = require_str(params, "session_id")?;
    let tables = handle.tables.clone();
    let checkpoints = ctx
        .pool()
        .run(move |conn| db::list_checkpoints_sync(conn, &tables, &session_id))
        .await?;
    Ok(serde_json::to_value(checkpoints)?)
}

async fn reflection_store(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let session_id = require_str(params, "session_id")?;
    let content = require_str(params, "content")?;

    let metadata = MessageMetadata {
        kind: Some("reflection".to_string()),
        ..Default::default()
    };
    let message = handle
        .conversations
        .store_message(&session_id, "assistant", &content, metadata)
        .await?;

    // Mirror as an entity so reflections participate in retrieval
    let caps = ctx.capabilities();
    let tables = handle.tables.clone();
    let mirror = EntityInput {
        entity_type: "reflection".to_string(),
        name: truncate(&content, 50),
        qualified_name: format!("reflection::{}", message.id),
        content: Some(content),
        metadata: json!({ "session_id": session_id, "message_id": message.id }),
        ..Default::default()
    };
    ctx.pool()
        .run(move |conn| db::create_entity_sync(conn, &tables, caps, &mirror))
        .await?;

    Ok(serde_json::to_value(message)?)
}

// ============================================================================
// Hooks
// ============================================================================

async fn hooks_install(ctx: &AppContext, params: &Value) -> Result<Value> {
    let id = project_id(params)?;
    ctx.project(id).await?;
    let hook_types = {
        let requested = optional_str_list(params, "hook_types");
        if requested.is_empty() {
            vec!["post_commit".to_string(), "post_merge".to_string()]
        } else {
            requested
        }
    };
    let serialized = hook_types.join(",");
    ctx.pool()
        .run(move |conn| db::set_project_config_sync(conn, id, "hooks", &serialized))
        .await?;
    Ok(json!({ "installed": hook_types }))
}

async fn hooks_impact_report(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let since = require_str(params, "since")?;

    let root = handle.project.path.clone();
    let changed = tokio::task::spawn_blocking(move || {
        Git2Diff::new(Path::new(&root)).changed_files(&since)
    })
    .await??;

    let mut impacted: Vec<Value> = Vec::new();
    for path in changed
        .added
        .iter()
        .chain(changed.modified.iter())
        .chain(changed.deleted.iter())
    {
        let tables = handle.tables.clone();
        let path_owned = path.clone();
        let neighbors = ctx
            .pool()
            .run(move |conn| {
                let Some(file) =
                    db::get_entity_by_qualified_name_sync(conn, &tables, &path_owned)?
                else {
                    return Ok::<_, CtxError>(Vec::new());
                };
                let hood =
                    db::get_neighborhood_sync(conn, &tables, &file.id, 1, Direction::Both, &[])?;
                Ok(hood
                    .nodes
                    .into_iter()
                    .filter(|n| n.depth > 0)
                    .map(|n| n.entity.qualified_name)
                    .collect())
            })
            .await?;
        impacted.push(json!({ "path": path, "impacts": neighbors }));
    }

    Ok(json!({
        "changed": {
            "added": changed.added,
            "modified": changed.modified,
            "deleted": changed.deleted,
        },
        "impact": impacted,
    }))
}

// ============================================================================
// Analytics
// ============================================================================

async fn analytics_stats(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let period = match optional_str(params, "period").as_deref() {
        None => StatsPeriod::All,
        Some(s) => StatsPeriod::parse(s)
            .ok_or_else(|| CtxError::InvalidInput(format!("invalid period '{}'", s)))?,
    };
    let tables = handle.tables.clone();
    let stats = ctx
        .pool()
        .run(move |conn| db::get_stats_sync(conn, &tables, period))
        .await?;
    Ok(serde_json::to_value(stats)?)
}

async fn analytics_feedback(ctx: &AppContext, params: &Value) -> Result<Value> {
    let handle = ctx.project(project_id(params)?).await?;
    let query_id = require_str(params, "query_id")?;
    let useful = params
        .get("useful")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| CtxError::InvalidInput("missing required parameter 'useful'".into()))?;
    let tables = handle.tables.clone();
    let query_id_owned = query_id.clone();
    ctx.pool()
        .run(move |conn| db::record_feedback_sync(conn, &tables, &query_id_owned, useful))
        .await?;
    Ok(json!({ "query_id": query_id, "useful": useful }))
}

/// Split markdown content into (title, body, start_line) sections at
/// heading boundaries.
fn split_markdown_sections(content: &str) -> Vec<(String, String, u32)> {
    let mut sections: Vec<(String, String, u32)> = Vec::new();
    let mut current: Option<(String, Vec<String>, u32)> = None;

    for (line_number, line) in content.lines().enumerate() {
        if let Some(stripped) = line.strip_prefix('#') {
            if let Some((title, body, start)) = current.take() {
                sections.push((title, body.join("\n"), start));
            }
            let title = stripped.trim_start_matches('#').trim().to_string();
            if !title.is_empty() {
                current = Some((title, Vec::new(), line_number as u32 + 1));
            }
        } else if let Some((_, body, _)) = current.as_mut() {
            body.push(line.to_string());
        }
    }
    if let Some((title, body, start)) = current.take() {
        sections.push((title, body.join("\n"), start));
    }
    sections
}
