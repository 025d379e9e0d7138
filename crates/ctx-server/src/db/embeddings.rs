// db/embeddings.rs
// Chunk vector storage: vec0 when available, blob scan fallback otherwise

use super::schema::{ProjectTables, StoreCapabilities};
use crate::error::CtxError;
use rusqlite::{Connection, params};

/// Convert embedding vector to little-endian bytes for sqlite-vec queries.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a blob back into an f32 vector.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// One chunk row ready for insertion.
#[derive(Debug, Clone)]
pub struct ChunkInsert {
    pub entity_id: String,
    pub chunk_index: i64,
    pub start_offset: i64,
    pub end_offset: i64,
    pub model_id: String,
    pub embedding: Vec<f32>,
}

/// A semantic match: entity id plus cosine similarity score in [0, 1].
#[derive(Debug, Clone)]
pub struct ChunkMatch {
    pub entity_id: String,
    pub chunk_index: i64,
    pub score: f32,
}

/// Insert a chunk row.
pub fn insert_chunk_sync(
    conn: &Connection,
    tables: &ProjectTables,
    _caps: StoreCapabilities,
    chunk: &ChunkInsert,
) -> Result<(), CtxError> {
    conn.execute(
        &format!(
            "INSERT INTO {} (embedding, entity_id, chunk_index, start_offset, end_offset, model_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            tables.embeddings()
        ),
        params![
            embedding_to_bytes(&chunk.embedding),
            chunk.entity_id,
            chunk.chunk_index,
            chunk.start_offset,
            chunk.end_offset,
            chunk.model_id,
        ],
    )?;
    Ok(())
}

/// Remove all chunks for an entity (before re-embedding or on delete).
pub fn delete_chunks_for_entity_sync(
    conn: &Connection,
    tables: &ProjectTables,
    entity_id: &str,
) -> Result<usize, CtxError> {
    let deleted = conn.execute(
        &format!("DELETE FROM {} WHERE entity_id = ?1", tables.embeddings()),
        [entity_id],
    )?;
    Ok(deleted)
}

pub fn count_chunks_sync(conn: &Connection, tables: &ProjectTables) -> Result<i64, CtxError> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", tables.embeddings()),
        [],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Chunk indices stored for an entity, ordered.
pub fn chunk_indices_for_entity_sync(
    conn: &Connection,
    tables: &ProjectTables,
    entity_id: &str,
) -> Result<Vec<i64>, CtxError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT chunk_index FROM {} WHERE entity_id = ?1 ORDER BY chunk_index",
        tables.embeddings()
    ))?;
    let rows = stmt.query_map([entity_id], |row| row.get(0))?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// K nearest chunks by cosine distance.
///
/// With vec0 the distance runs inside SQLite; without it every blob is
/// scanned and scored in process. Cosine similarity in [-1, 1] is remapped
/// to [0, 1] as `1 - distance / 2`.
pub fn knn_chunks_sync(
    conn: &Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    query_embedding: &[f32],
    k: usize,
) -> Result<Vec<ChunkMatch>, CtxError> {
    if caps.vectors {
        let mut stmt = conn.prepare(&format!(
            "SELECT entity_id, chunk_index, vec_distance_cosine(embedding, ?1) AS distance
             FROM {}
             ORDER BY distance
             LIMIT ?2",
            tables.embeddings()
        ))?;
        let rows = stmt.query_map(
            params![embedding_to_bytes(query_embedding), k as i64],
            |row| {
                let distance: f64 = row.get(2)?;
                Ok(ChunkMatch {
                    entity_id: row.get(0)?,
                    chunk_index: row.get(1)?,
                    score: (1.0 - distance / 2.0).clamp(0.0, 1.0) as f32,
                })
            },
        )?;
        return rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into);
    }

    // Blob fallback: full scan with in-process cosine.
    let mut stmt = conn.prepare(&format!(
        "SELECT entity_id, chunk_index, embedding FROM {}",
        tables.embeddings()
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, Vec<u8>>(2)?,
        ))
    })?;

    let mut matches: Vec<ChunkMatch> = Vec::new();
    for row in rows {
        let (entity_id, chunk_index, blob) = row?;
        let stored = bytes_to_embedding(&blob);
        let similarity = cosine_similarity(query_embedding, &stored);
        matches.push(ChunkMatch {
            entity_id,
            chunk_index,
            score: ((similarity + 1.0) / 2.0).clamp(0.0, 1.0),
        });
    }
    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    matches.truncate(k);
    Ok(matches)
}

/// Cosine similarity in [-1, 1]; 0 for mismatched or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{setup_project_tables, setup_test_connection};

    fn chunk(entity_id: &str, index: i64, embedding: Vec<f32>) -> ChunkInsert {
        ChunkInsert {
            entity_id: entity_id.to_string(),
            chunk_index: index,
            start_offset: index * 100,
            end_offset: (index + 1) * 100,
            model_id: "test-model".to_string(),
            embedding,
        }
    }

    #[test]
    fn test_embedding_bytes_roundtrip() {
        let v = vec![0.5f32, -1.25, 3.0];
        let bytes = embedding_to_bytes(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes_to_embedding(&bytes), v);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];
        let c = vec![-1.0, 0.0];
        let d = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&a, &c) + 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &d).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }

    #[test]
    fn test_insert_and_knn_vec0() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "vec");

        let mut e1 = vec![0.0f32; 8];
        e1[0] = 1.0;
        let mut e2 = vec![0.0f32; 8];
        e2[1] = 1.0;

        insert_chunk_sync(&conn, &tables, caps, &chunk("ent1", 0, e1.clone())).unwrap();
        insert_chunk_sync(&conn, &tables, caps, &chunk("ent2", 0, e2)).unwrap();

        let matches = knn_chunks_sync(&conn, &tables, caps, &e1, 2).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].entity_id, "ent1");
        assert!(matches[0].score > matches[1].score);
        assert!((matches[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_knn_blob_fallback() {
        let conn = setup_test_connection();
        let tables = ProjectTables::new("blob");
        let caps = StoreCapabilities {
            fts: true,
            vectors: false,
        };
        crate::db::schema::create_project_tables(&conn, &tables, 8, caps).unwrap();

        let mut e1 = vec![0.0f32; 8];
        e1[0] = 1.0;
        let mut e2 = vec![0.0f32; 8];
        e2[0] = -1.0;

        insert_chunk_sync(&conn, &tables, caps, &chunk("near", 0, e1.clone())).unwrap();
        insert_chunk_sync(&conn, &tables, caps, &chunk("far", 0, e2)).unwrap();

        let matches = knn_chunks_sync(&conn, &tables, caps, &e1, 1).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].entity_id, "near");
    }

    #[test]
    fn test_delete_chunks_for_entity() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "delc");

        insert_chunk_sync(&conn, &tables, caps, &chunk("e", 0, vec![0.1; 8])).unwrap();
        insert_chunk_sync(&conn, &tables, caps, &chunk("e", 1, vec![0.2; 8])).unwrap();
        insert_chunk_sync(&conn, &tables, caps, &chunk("other", 0, vec![0.3; 8])).unwrap();

        assert_eq!(delete_chunks_for_entity_sync(&conn, &tables, "e").unwrap(), 2);
        assert_eq!(count_chunks_sync(&conn, &tables).unwrap(), 1);
    }

    #[test]
    fn test_chunk_indices_ordered() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "ord");

        for i in [2, 0, 1] {
            insert_chunk_sync(&conn, &tables, caps, &chunk("e", i, vec![0.1; 8])).unwrap();
        }
        assert_eq!(
            chunk_indices_for_entity_sync(&conn, &tables, "e").unwrap(),
            vec![0, 1, 2]
        );
    }
}
