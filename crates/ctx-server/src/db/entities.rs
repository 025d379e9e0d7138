// db/entities.rs
// Entity CRUD, upsert-with-hash-skip, and FTS-backed search

use super::fts::{bm25_to_score, build_fts_query, like_patterns};
use super::schema::{ProjectTables, StoreCapabilities};
use super::types::{Entity, EntityInput, UpsertOutcome};
use crate::error::CtxError;
use crate::identity::{Clock, SystemClock, new_id};
use crate::utils::{content_hash, truncate_lines};
use rusqlite::{Connection, OptionalExtension, params};

/// Entity content is truncated at this many lines with a trailing marker.
pub const MAX_CONTENT_LINES: usize = 500;

const ENTITY_COLS: &str = "id, entity_type, name, qualified_name, content, summary, \
                           file_path, start_line, end_line, content_hash, metadata, \
                           created_at, updated_at";

fn entity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    let metadata: String = row.get(10)?;
    Ok(Entity {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        name: row.get(2)?,
        qualified_name: row.get(3)?,
        content: row.get(4)?,
        summary: row.get(5)?,
        file_path: row.get(6)?,
        start_line: row.get(7)?,
        end_line: row.get(8)?,
        content_hash: row.get(9)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Normalize input content: truncate at the line budget and hash the stored
/// form (unless the input carries an explicit hash).
fn prepare_content(input: &EntityInput) -> (Option<String>, Option<String>) {
    match input.content.as_deref() {
        Some(content) => {
            let stored = truncate_lines(content, MAX_CONTENT_LINES);
            let hash = input
                .content_hash
                .clone()
                .unwrap_or_else(|| content_hash(&stored));
            (Some(stored), Some(hash))
        }
        None => (None, input.content_hash.clone()),
    }
}

fn insert_fts_row(
    conn: &Connection,
    tables: &ProjectTables,
    entity: &Entity,
) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} (name, summary, content, entity_id) VALUES (?1, ?2, ?3, ?4)",
            tables.entities_fts()
        ),
        params![
            entity.name,
            entity.summary.as_deref().unwrap_or(""),
            entity.content.as_deref().unwrap_or(""),
            entity.id
        ],
    )?;
    Ok(())
}

fn delete_fts_row(
    conn: &Connection,
    tables: &ProjectTables,
    entity_id: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        &format!("DELETE FROM {} WHERE entity_id = ?1", tables.entities_fts()),
        [entity_id],
    )?;
    Ok(())
}

/// Create a new entity. Fails with `Conflict` if the qualified name exists.
pub fn create_entity_sync(
    conn: &Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    input: &EntityInput,
) -> Result<Entity, CtxError> {
    if input.name.is_empty() || input.qualified_name.is_empty() {
        return Err(CtxError::InvalidInput(
            "entity name and qualified_name are required".into(),
        ));
    }
    let (content, hash) = prepare_content(input);
    let now = SystemClock.now_rfc3339();
    let entity = Entity {
        id: new_id(),
        entity_type: input.entity_type.clone(),
        name: input.name.clone(),
        qualified_name: input.qualified_name.clone(),
        content,
        summary: input.summary.clone(),
        file_path: input.file_path.clone(),
        start_line: input.start_line,
        end_line: input.end_line,
        content_hash: hash,
        metadata: input.metadata.clone(),
        created_at: now.clone(),
        updated_at: now,
    };

    let inserted = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {} ({ENTITY_COLS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            tables.entities()
        ),
        params![
            entity.id,
            entity.entity_type,
            entity.name,
            entity.qualified_name,
            entity.content,
            entity.summary,
            entity.file_path,
            entity.start_line,
            entity.end_line,
            entity.content_hash,
            entity.metadata.to_string(),
            entity.created_at,
            entity.updated_at,
        ],
    )?;
    if inserted == 0 {
        return Err(CtxError::Conflict(format!(
            "entity '{}' already exists",
            entity.qualified_name
        )));
    }
    if caps.fts {
        insert_fts_row(conn, tables, &entity)?;
    }
    Ok(entity)
}

/// Upsert by `(project, qualified_name)`.
///
/// When the stored `content_hash` matches the incoming content the row is
/// returned unchanged and no write happens.
pub fn upsert_entity_sync(
    conn: &Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    input: &EntityInput,
) -> Result<(Entity, UpsertOutcome), CtxError> {
    let existing = get_entity_by_qualified_name_sync(conn, tables, &input.qualified_name)?;

    let Some(existing) = existing else {
        let entity = create_entity_sync(conn, tables, caps, input)?;
        return Ok((entity, UpsertOutcome::Added));
    };

    let (content, hash) = prepare_content(input);
    if hash.is_some() && hash == existing.content_hash {
        return Ok((existing, UpsertOutcome::Unchanged));
    }

    let now = SystemClock.now_rfc3339();
    conn.execute(
        &format!(
            "UPDATE {} SET entity_type = ?2, name = ?3, content = ?4, summary = ?5,
                    file_path = ?6, start_line = ?7, end_line = ?8, content_hash = ?9,
                    metadata = ?10, updated_at = ?11
             WHERE id = ?1",
            tables.entities()
        ),
        params![
            existing.id,
            input.entity_type,
            input.name,
            content,
            input.summary.as_deref().or(existing.summary.as_deref()),
            input.file_path,
            input.start_line,
            input.end_line,
            hash,
            input.metadata.to_string(),
            now,
        ],
    )?;

    let updated = get_entity_sync(conn, tables, &existing.id)?
        .ok_or_else(|| CtxError::Internal("entity vanished during upsert".into()))?;

    if caps.fts {
        delete_fts_row(conn, tables, &updated.id)?;
        insert_fts_row(conn, tables, &updated)?;
    }

    Ok((updated, UpsertOutcome::Modified))
}

pub fn get_entity_sync(
    conn: &Connection,
    tables: &ProjectTables,
    id: &str,
) -> Result<Option<Entity>, CtxError> {
    conn.query_row(
        &format!(
            "SELECT {ENTITY_COLS} FROM {} WHERE id = ?1",
            tables.entities()
        ),
        [id],
        entity_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_entity_by_qualified_name_sync(
    conn: &Connection,
    tables: &ProjectTables,
    qualified_name: &str,
) -> Result<Option<Entity>, CtxError> {
    conn.query_row(
        &format!(
            "SELECT {ENTITY_COLS} FROM {} WHERE qualified_name = ?1",
            tables.entities()
        ),
        [qualified_name],
        entity_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Stored content hash for a qualified name, used by the indexer's
/// incremental skip without loading the full row.
pub fn get_content_hash_sync(
    conn: &Connection,
    tables: &ProjectTables,
    qualified_name: &str,
) -> Result<Option<String>, CtxError> {
    conn.query_row(
        &format!(
            "SELECT content_hash FROM {} WHERE qualified_name = ?1",
            tables.entities()
        ),
        [qualified_name],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
    .map(|r: Option<Option<String>>| r.flatten())
}

pub fn get_entities_by_file_sync(
    conn: &Connection,
    tables: &ProjectTables,
    file_path: &str,
) -> Result<Vec<Entity>, CtxError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTITY_COLS} FROM {} WHERE file_path = ?1 ORDER BY start_line",
        tables.entities()
    ))?;
    let rows = stmt.query_map([file_path], entity_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Search over name/summary/content. FTS when available, LIKE otherwise.
///
/// Returns `(entity, score)` ordered best-first.
pub fn search_entities_sync(
    conn: &Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    query: &str,
    entity_type: Option<&str>,
    limit: usize,
) -> Result<Vec<(Entity, f32)>, CtxError> {
    if caps.fts {
        let fts_query = build_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT e.id, bm25({fts}) AS rank
             FROM {fts} JOIN {entities} e ON e.id = {fts}.entity_id
             WHERE {fts} MATCH ?1 AND (?2 IS NULL OR e.entity_type = ?2)
             ORDER BY rank LIMIT ?3",
            fts = tables.entities_fts(),
            entities = tables.entities(),
        );
        let mut stmt = conn.prepare(&sql)?;
        let hits: Vec<(String, f64)> = stmt
            .query_map(params![fts_query, entity_type, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut results = Vec::with_capacity(hits.len());
        for (id, rank) in hits {
            if let Some(entity) = get_entity_sync(conn, tables, &id)? {
                results.push((entity, bm25_to_score(rank)));
            }
        }
        if !results.is_empty() {
            return Ok(results);
        }
    }

    // LIKE fallback: every term must match somewhere in name/summary/content.
    let patterns = like_patterns(query);
    if patterns.is_empty() {
        return Ok(Vec::new());
    }
    let mut clauses = Vec::new();
    for i in 0..patterns.len() {
        clauses.push(format!(
            "(lower(name) LIKE ?{n} OR lower(COALESCE(summary,'')) LIKE ?{n} OR lower(COALESCE(content,'')) LIKE ?{n})",
            n = i + 1
        ));
    }
    let sql = format!(
        "SELECT {ENTITY_COLS} FROM {} WHERE {} AND (?{t} IS NULL OR entity_type = ?{t})
         ORDER BY updated_at DESC LIMIT ?{l}",
        tables.entities(),
        clauses.join(" AND "),
        t = patterns.len() + 1,
        l = patterns.len() + 2,
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(patterns.len() + 2);
    for p in &patterns {
        bind.push(Box::new(p.clone()));
    }
    bind.push(Box::new(entity_type.map(|s| s.to_string())));
    bind.push(Box::new(limit as i64));

    let rows = stmt.query_map(rusqlite::params_from_iter(bind), entity_from_row)?;
    let entities = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entities.into_iter().map(|e| (e, 0.5)).collect())
}

/// Store a generated summary, refreshing the FTS row.
pub fn update_entity_summary_sync(
    conn: &Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    id: &str,
    summary: &str,
) -> Result<(), CtxError> {
    let updated = conn.execute(
        &format!(
            "UPDATE {} SET summary = ?2, updated_at = ?3 WHERE id = ?1",
            tables.entities()
        ),
        params![id, summary, SystemClock.now_rfc3339()],
    )?;
    if updated == 0 {
        return Err(CtxError::NotFound(format!("entity {}", id)));
    }
    if caps.fts {
        delete_fts_row(conn, tables, id)?;
        if let Some(entity) = get_entity_sync(conn, tables, id)? {
            insert_fts_row(conn, tables, &entity)?;
        }
    }
    Ok(())
}

pub fn count_entities_sync(conn: &Connection, tables: &ProjectTables) -> Result<i64, CtxError> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", tables.entities()),
        [],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Delete an entity with its FTS row and embedding chunks.
///
/// Relationships cascade through the schema's foreign keys. Returns false if
/// the entity did not exist.
pub fn delete_entity_sync(
    conn: &Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    id: &str,
) -> Result<bool, CtxError> {
    if caps.fts {
        delete_fts_row(conn, tables, id)?;
    }
    conn.execute(
        &format!("DELETE FROM {} WHERE entity_id = ?1", tables.embeddings()),
        [id],
    )?;
    let deleted = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", tables.entities()),
        [id],
    )?;
    Ok(deleted > 0)
}

/// Delete every entity rooted at a file path. Returns the deleted ids.
pub fn delete_entities_by_file_sync(
    conn: &Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    file_path: &str,
) -> Result<Vec<String>, CtxError> {
    let entities = get_entities_by_file_sync(conn, tables, file_path)?;
    let mut deleted = Vec::with_capacity(entities.len());
    for entity in entities {
        if delete_entity_sync(conn, tables, caps, &entity.id)? {
            deleted.push(entity.id);
        }
    }
    Ok(deleted)
}

/// Qualified names of all entities of a type (e.g. every indexed file path).
pub fn list_qualified_names_by_type_sync(
    conn: &Connection,
    tables: &ProjectTables,
    entity_type: &str,
) -> Result<Vec<String>, CtxError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT qualified_name FROM {} WHERE entity_type = ?1 ORDER BY qualified_name",
        tables.entities()
    ))?;
    let rows = stmt.query_map([entity_type], |row| row.get(0))?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Keyset-paginated listing ordered by id. Pass the last id of the previous
/// page to continue.
pub fn list_entities_page_sync(
    conn: &Connection,
    tables: &ProjectTables,
    after_id: Option<&str>,
    page_size: usize,
) -> Result<Vec<Entity>, CtxError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTITY_COLS} FROM {} WHERE (?1 IS NULL OR id > ?1) ORDER BY id LIMIT ?2",
        tables.entities()
    ))?;
    let rows = stmt.query_map(params![after_id, page_size as i64], entity_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{setup_project_tables, setup_test_connection};

    fn input(qualified_name: &str, content: &str) -> EntityInput {
        EntityInput {
            entity_type: "function".to_string(),
            name: qualified_name.split("::").last().unwrap_or(qualified_name).to_string(),
            qualified_name: qualified_name.to_string(),
            content: Some(content.to_string()),
            metadata: serde_json::json!({}),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "ent");

        let entity =
            create_entity_sync(&conn, &tables, caps, &input("a.ts::hello", "return 1")).unwrap();
        assert_eq!(entity.name, "hello");
        assert!(entity.content_hash.is_some());

        let fetched = get_entity_sync(&conn, &tables, &entity.id).unwrap().unwrap();
        assert_eq!(fetched.qualified_name, "a.ts::hello");
    }

    #[test]
    fn test_create_duplicate_is_conflict() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "dup");

        create_entity_sync(&conn, &tables, caps, &input("x::f", "body")).unwrap();
        let err = create_entity_sync(&conn, &tables, caps, &input("x::f", "body")).unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn test_upsert_idempotent_on_same_content() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "ups");

        let (first, o1) = upsert_entity_sync(&conn, &tables, caps, &input("m::f", "v1")).unwrap();
        assert_eq!(o1, UpsertOutcome::Added);

        let (second, o2) = upsert_entity_sync(&conn, &tables, caps, &input("m::f", "v1")).unwrap();
        assert_eq!(o2, UpsertOutcome::Unchanged);
        assert_eq!(first.id, second.id);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.updated_at, second.updated_at);

        assert_eq!(count_entities_sync(&conn, &tables).unwrap(), 1);
    }

    #[test]
    fn test_upsert_modifies_on_changed_content() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "mod");

        let (first, _) = upsert_entity_sync(&conn, &tables, caps, &input("m::f", "v1")).unwrap();
        let (second, outcome) =
            upsert_entity_sync(&conn, &tables, caps, &input("m::f", "v2")).unwrap();

        assert_eq!(outcome, UpsertOutcome::Modified);
        assert_eq!(first.id, second.id);
        assert_ne!(first.content_hash, second.content_hash);
        assert_eq!(second.content.as_deref(), Some("v2"));
    }

    #[test]
    fn test_content_truncated_at_line_budget() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "trunc");

        let long_content = (0..600).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let entity =
            create_entity_sync(&conn, &tables, caps, &input("big::f", &long_content)).unwrap();

        let content = entity.content.unwrap();
        assert!(content.ends_with("// ... (truncated)"));
        assert_eq!(content.lines().count(), MAX_CONTENT_LINES + 1);
    }

    #[test]
    fn test_search_fts_finds_by_content() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "srch");

        create_entity_sync(
            &conn,
            &tables,
            caps,
            &input("auth.ts::AuthService", "class AuthService { login() {} }"),
        )
        .unwrap();
        create_entity_sync(&conn, &tables, caps, &input("db.ts::connect", "open database"))
            .unwrap();

        let results =
            search_entities_sync(&conn, &tables, caps, "AuthService", None, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.qualified_name, "auth.ts::AuthService");
        assert!(results[0].1 > 0.0);
    }

    #[test]
    fn test_search_type_filter() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "tf");

        let mut file_input = input("a.ts", "handles auth");
        file_input.entity_type = "file".to_string();
        create_entity_sync(&conn, &tables, caps, &file_input).unwrap();
        create_entity_sync(&conn, &tables, caps, &input("a.ts::auth", "fn auth()")).unwrap();

        let results =
            search_entities_sync(&conn, &tables, caps, "auth", Some("function"), 10).unwrap();
        assert!(results.iter().all(|(e, _)| e.entity_type == "function"));
    }

    #[test]
    fn test_search_like_fallback_without_fts() {
        let conn = setup_test_connection();
        let (tables, _) = setup_project_tables(&conn, "nofts");
        let caps = StoreCapabilities {
            fts: false,
            vectors: true,
        };

        create_entity_sync(&conn, &tables, caps, &input("a::login", "fn login()")).unwrap();
        let results = search_entities_sync(&conn, &tables, caps, "login", None, 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_delete_entity_removes_chunks() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "del");

        let entity = create_entity_sync(&conn, &tables, caps, &input("d::f", "body")).unwrap();
        crate::db::embeddings::insert_chunk_sync(
            &conn,
            &tables,
            caps,
            &crate::db::embeddings::ChunkInsert {
                entity_id: entity.id.clone(),
                chunk_index: 0,
                start_offset: 0,
                end_offset: 4,
                model_id: "test".to_string(),
                embedding: vec![0.0; 8],
            },
        )
        .unwrap();

        assert!(delete_entity_sync(&conn, &tables, caps, &entity.id).unwrap());
        assert!(!delete_entity_sync(&conn, &tables, caps, &entity.id).unwrap());

        let chunk_count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", tables.embeddings()),
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(chunk_count, 0);
    }

    #[test]
    fn test_delete_entities_by_file() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "byfile");

        let mut a = input("f.ts::a", "a");
        a.file_path = Some("f.ts".to_string());
        let mut b = input("f.ts::b", "b");
        b.file_path = Some("f.ts".to_string());
        let mut other = input("g.ts::c", "c");
        other.file_path = Some("g.ts".to_string());

        create_entity_sync(&conn, &tables, caps, &a).unwrap();
        create_entity_sync(&conn, &tables, caps, &b).unwrap();
        create_entity_sync(&conn, &tables, caps, &other).unwrap();

        let deleted = delete_entities_by_file_sync(&conn, &tables, caps, "f.ts").unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(count_entities_sync(&conn, &tables).unwrap(), 1);
    }

    #[test]
    fn test_list_entities_paginated() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "page");

        for i in 0..5 {
            create_entity_sync(&conn, &tables, caps, &input(&format!("m::f{i}"), "x")).unwrap();
        }

        let mut seen = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = list_entities_page_sync(&conn, &tables, after.as_deref(), 2).unwrap();
            if page.is_empty() {
                break;
            }
            after = page.last().map(|e| e.id.clone());
            seen.extend(page);
        }
        assert_eq!(seen.len(), 5);
        let ids: Vec<_> = seen.iter().map(|e| e.id.as_str()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "pages must be in id order");
    }
}
