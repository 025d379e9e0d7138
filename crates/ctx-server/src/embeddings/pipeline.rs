// embeddings/pipeline.rs
// Chunk entity content, embed in batches, store chunk vectors

use super::EmbeddingProvider;
use super::chunking::{ChunkOptions, chunk_content};
use crate::db::pool::DatabasePool;
use crate::db::{ChunkInsert, ProjectTables, StoreCapabilities};
use crate::error::{CtxError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of an embedding run.
#[derive(Debug, Default, Clone)]
pub struct EmbedReport {
    pub entities_embedded: usize,
    pub chunks_written: usize,
    /// (entity_id, error) for per-entity failures; the run continues.
    pub failures: Vec<(String, String)>,
}

/// One entity's content queued for embedding.
#[derive(Debug, Clone)]
pub struct EmbedItem {
    pub entity_id: String,
    pub content: String,
}

struct PendingChunk {
    entity_id: String,
    chunk_index: i64,
    start_offset: i64,
    end_offset: i64,
    content: String,
}

/// Embed a query string with the provider timeout applied.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    query: &str,
    timeout: Duration,
) -> Result<Vec<f32>> {
    tokio::time::timeout(timeout, provider.embed(query))
        .await
        .map_err(|_| CtxError::Timeout("embedding query".to_string()))?
        .map_err(|e| CtxError::ProviderUnavailable(e.to_string()))
}

/// Chunk, embed, and store vectors for a set of entities.
///
/// Entities are processed in provider-native sub-batches. A provider failure
/// marks every entity of that sub-batch failed and the run continues; chunk
/// rows for one entity are replaced atomically (delete + insert in one
/// transaction), so no entity is ever half-written.
pub async fn embed_entities(
    pool: &DatabasePool,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    provider: Arc<dyn EmbeddingProvider>,
    items: Vec<EmbedItem>,
    opts: &ChunkOptions,
    timeout: Duration,
) -> Result<EmbedReport> {
    let mut report = EmbedReport::default();
    if items.is_empty() {
        return Ok(report);
    }

    // Chunk everything up front; chunking failures are per-entity. Batches
    // never split one entity's chunk set, so a failed batch leaves no entity
    // half-written and a later batch never clears an earlier one's rows.
    let mut chunked_entities: Vec<String> = Vec::new();
    let batch_size = provider.batch_size();
    let mut batches: Vec<Vec<PendingChunk>> = vec![Vec::new()];
    for item in items {
        match chunk_content(&item.content, opts) {
            Ok(set) => {
                chunked_entities.push(item.entity_id.clone());
                let current_len = batches.last().map(|b| b.len()).unwrap_or(0);
                if current_len > 0 && current_len + set.chunks.len() > batch_size {
                    batches.push(Vec::new());
                }
                if let Some(current) = batches.last_mut() {
                    for chunk in set.chunks {
                        current.push(PendingChunk {
                            entity_id: item.entity_id.clone(),
                            chunk_index: chunk.index as i64,
                            start_offset: chunk.start_offset as i64,
                            end_offset: chunk.end_offset as i64,
                            content: chunk.content,
                        });
                    }
                }
            }
            Err(e) => report.failures.push((item.entity_id, e.to_string())),
        }
    }

    let model_id = provider.model_id();

    for batch in batches.iter().filter(|b| !b.is_empty()) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let vectors = match tokio::time::timeout(timeout, provider.embed_batch(&texts)).await {
            Ok(Ok(vectors)) if vectors.len() == texts.len() => vectors,
            Ok(Ok(vectors)) => {
                tracing::error!(
                    "Embedding batch size mismatch: sent {}, got {}",
                    texts.len(),
                    vectors.len()
                );
                mark_batch_failed(batch, "batch size mismatch", &mut report);
                continue;
            }
            Ok(Err(e)) => {
                tracing::error!("Batch embedding failed: {}", e);
                mark_batch_failed(batch, &e.to_string(), &mut report);
                continue;
            }
            Err(_) => {
                tracing::warn!("Batch embedding timed out after {:?}", timeout);
                mark_batch_failed(batch, "timeout", &mut report);
                continue;
            }
        };

        // Group rows per entity so each entity's chunk set is replaced
        // atomically.
        let inserts: Vec<ChunkInsert> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, embedding)| ChunkInsert {
                entity_id: chunk.entity_id.clone(),
                chunk_index: chunk.chunk_index,
                start_offset: chunk.start_offset,
                end_offset: chunk.end_offset,
                model_id: model_id.clone(),
                embedding,
            })
            .collect();

        let tables = tables.clone();
        let written = pool
            .run(move |conn| {
                crate::db::with_tx(conn, |tx| {
                    let mut cleared: std::collections::HashSet<String> =
                        std::collections::HashSet::new();
                    let mut written = 0usize;
                    for insert in &inserts {
                        if cleared.insert(insert.entity_id.clone()) {
                            crate::db::delete_chunks_for_entity_sync(tx, &tables, &insert.entity_id)?;
                        }
                        crate::db::insert_chunk_sync(tx, &tables, caps, insert)?;
                        written += 1;
                    }
                    Ok::<_, CtxError>(written)
                })
            })
            .await?;
        report.chunks_written += written;
    }

    // Entities that never hit a failure are counted as embedded.
    let failed: std::collections::HashSet<&str> =
        report.failures.iter().map(|(id, _)| id.as_str()).collect();
    report.entities_embedded = chunked_entities
        .iter()
        .filter(|id| !failed.contains(id.as_str()))
        .count();

    Ok(report)
}

fn mark_batch_failed(batch: &[PendingChunk], error: &str, report: &mut EmbedReport) {
    let mut seen = std::collections::HashSet::new();
    for chunk in batch {
        if seen.insert(chunk.entity_id.clone()) {
            report.failures.push((chunk.entity_id.clone(), error.to_string()));
        }
    }
}
