// db/sessions.rs
// Session, message, decision, and checkpoint storage

use super::fts::{bm25_to_score, build_fts_query, like_patterns};
use super::schema::{ProjectTables, StoreCapabilities};
use super::types::{Checkpoint, Decision, Message, MessageMetadata, Session, SessionStatus};
use crate::error::CtxError;
use crate::identity::new_id;
use rusqlite::{Connection, OptionalExtension, params};

const SESSION_COLS: &str =
    "id, name, status, summary, message_count, created_at, updated_at, archived_at";
const MESSAGE_COLS: &str = "id, session_id, role, content, metadata, created_at";
const DECISION_COLS: &str = "id, session_id, message_id, description, context, alternatives, \
                             related_entity_ids, status, superseded_by, created_at";
const CHECKPOINT_COLS: &str =
    "id, session_id, step_number, state, description, trigger_type, created_at";

/// Reserved session id under which the indexer stores its checkpoints.
pub const INDEXER_SESSION_ID: &str = "indexer";

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let status: String = row.get(2)?;
    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Active),
        summary: row.get(3)?,
        message_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        archived_at: row.get(7)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let metadata: String = row.get(4)?;
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: row.get(5)?,
    })
}

fn decision_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Decision> {
    let alternatives: String = row.get(5)?;
    let related: String = row.get(6)?;
    Ok(Decision {
        id: row.get(0)?,
        session_id: row.get(1)?,
        message_id: row.get(2)?,
        description: row.get(3)?,
        context: row.get(4)?,
        alternatives: serde_json::from_str(&alternatives).unwrap_or_default(),
        related_entity_ids: serde_json::from_str(&related).unwrap_or_default(),
        status: row.get(7)?,
        superseded_by: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn checkpoint_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    let state: String = row.get(3)?;
    Ok(Checkpoint {
        id: row.get(0)?,
        session_id: row.get(1)?,
        step_number: row.get(2)?,
        state: serde_json::from_str(&state).unwrap_or(serde_json::Value::Null),
        description: row.get(4)?,
        trigger_type: row.get(5)?,
        created_at: row.get(6)?,
    })
}

// ============================================================================
// Sessions
// ============================================================================

pub fn create_session_sync(
    conn: &Connection,
    tables: &ProjectTables,
    name: Option<&str>,
    now: &str,
) -> Result<Session, CtxError> {
    let session = Session {
        id: new_id(),
        name: name.map(|s| s.to_string()),
        status: SessionStatus::Active,
        summary: None,
        message_count: 0,
        created_at: now.to_string(),
        updated_at: now.to_string(),
        archived_at: None,
    };
    conn.execute(
        &format!(
            "INSERT INTO {} ({SESSION_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            tables.sessions()
        ),
        params![
            session.id,
            session.name,
            session.status.as_str(),
            session.summary,
            session.message_count,
            session.created_at,
            session.updated_at,
            session.archived_at,
        ],
    )?;
    Ok(session)
}

pub fn get_session_sync(
    conn: &Connection,
    tables: &ProjectTables,
    id: &str,
) -> Result<Option<Session>, CtxError> {
    conn.query_row(
        &format!("SELECT {SESSION_COLS} FROM {} WHERE id = ?1", tables.sessions()),
        [id],
        session_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_sessions_sync(
    conn: &Connection,
    tables: &ProjectTables,
    limit: usize,
) -> Result<Vec<Session>, CtxError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLS} FROM {} ORDER BY updated_at DESC LIMIT ?1",
        tables.sessions()
    ))?;
    let rows = stmt.query_map([limit as i64], session_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Transition a session's lifecycle state.
///
/// `archived_at` is set exactly when the status leaves `active`; `summarized`
/// is terminal and any transition away from it is `InvalidInput`.
pub fn update_session_status_sync(
    conn: &Connection,
    tables: &ProjectTables,
    id: &str,
    status: SessionStatus,
    summary: Option<&str>,
    now: &str,
) -> Result<Session, CtxError> {
    let session = get_session_sync(conn, tables, id)?
        .ok_or_else(|| CtxError::NotFound(format!("session {}", id)))?;

    if session.status == SessionStatus::Summarized && status != SessionStatus::Summarized {
        return Err(CtxError::InvalidInput(
            "summarized sessions cannot change status".into(),
        ));
    }

    let archived_at: Option<String> = match status {
        SessionStatus::Active => None,
        _ => session
            .archived_at
            .clone()
            .or_else(|| Some(now.to_string())),
    };

    conn.execute(
        &format!(
            "UPDATE {} SET status = ?2, summary = COALESCE(?3, summary),
                    archived_at = ?4, updated_at = ?5
             WHERE id = ?1",
            tables.sessions()
        ),
        params![id, status.as_str(), summary, archived_at, now],
    )?;

    get_session_sync(conn, tables, id)?
        .ok_or_else(|| CtxError::Internal("session vanished during update".into()))
}

/// Delete a session with its messages, decisions, and checkpoints.
pub fn delete_session_sync(
    conn: &Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    id: &str,
) -> Result<bool, CtxError> {
    if caps.fts {
        conn.execute(
            &format!("DELETE FROM {} WHERE session_id = ?1", tables.messages_fts()),
            [id],
        )?;
        let decision_ids: Vec<String> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT id FROM {} WHERE session_id = ?1",
                tables.decisions()
            ))?;
            let rows = stmt.query_map([id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for decision_id in decision_ids {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE decision_id = ?1",
                    tables.decisions_fts()
                ),
                [decision_id],
            )?;
        }
    }
    // Checkpoints have no FK (the indexer writes under a reserved id)
    conn.execute(
        &format!("DELETE FROM {} WHERE session_id = ?1", tables.checkpoints()),
        [id],
    )?;
    let deleted = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", tables.sessions()),
        [id],
    )?;
    Ok(deleted > 0)
}

// ============================================================================
// Messages
// ============================================================================

const VALID_ROLES: &[&str] = &["user", "assistant", "system"];

/// Insert a message and apply the session side effects in one transaction
/// scope: `message_count` increments and `updated_at` refreshes.
///
/// Returns the message and the session's new message count.
pub fn create_message_sync(
    conn: &Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    session_id: &str,
    role: &str,
    content: &str,
    metadata: &MessageMetadata,
    created_at: &str,
) -> Result<(Message, i64), CtxError> {
    if !VALID_ROLES.contains(&role) {
        return Err(CtxError::InvalidInput(format!(
            "invalid role '{}' (expected user, assistant, or system)",
            role
        )));
    }
    let session = get_session_sync(conn, tables, session_id)?
        .ok_or_else(|| CtxError::NotFound(format!("session {}", session_id)))?;

    let message = Message {
        id: new_id(),
        session_id: session.id.clone(),
        role: role.to_string(),
        content: content.to_string(),
        metadata: metadata.clone(),
        created_at: created_at.to_string(),
    };

    conn.execute(
        &format!(
            "INSERT INTO {} ({MESSAGE_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            tables.messages()
        ),
        params![
            message.id,
            message.session_id,
            message.role,
            message.content,
            serde_json::to_string(&message.metadata)?,
            message.created_at,
        ],
    )?;
    conn.execute(
        &format!(
            "UPDATE {} SET message_count = message_count + 1, updated_at = ?2 WHERE id = ?1",
            tables.sessions()
        ),
        params![session_id, created_at],
    )?;
    if caps.fts {
        conn.execute(
            &format!(
                "INSERT INTO {} (content, message_id, session_id) VALUES (?1, ?2, ?3)",
                tables.messages_fts()
            ),
            params![message.content, message.id, message.session_id],
        )?;
    }

    Ok((message, session.message_count + 1))
}

/// Delete a message, decrementing the owning session's count.
pub fn delete_message_sync(
    conn: &Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    id: &str,
    now: &str,
) -> Result<bool, CtxError> {
    let session_id: Option<String> = conn
        .query_row(
            &format!("SELECT session_id FROM {} WHERE id = ?1", tables.messages()),
            [id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(session_id) = session_id else {
        return Ok(false);
    };

    if caps.fts {
        conn.execute(
            &format!("DELETE FROM {} WHERE message_id = ?1", tables.messages_fts()),
            [id],
        )?;
    }
    conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", tables.messages()),
        [id],
    )?;
    conn.execute(
        &format!(
            "UPDATE {} SET message_count = MAX(message_count - 1, 0), updated_at = ?2
             WHERE id = ?1",
            tables.sessions()
        ),
        params![session_id, now],
    )?;
    Ok(true)
}

/// Messages for a session in `created_at` order.
pub fn get_messages_by_session_sync(
    conn: &Connection,
    tables: &ProjectTables,
    session_id: &str,
    limit: Option<usize>,
) -> Result<Vec<Message>, CtxError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLS} FROM {} WHERE session_id = ?1
         ORDER BY created_at ASC LIMIT ?2",
        tables.messages()
    ))?;
    let rows = stmt.query_map(
        params![session_id, limit.map(|l| l as i64).unwrap_or(-1)],
        message_from_row,
    )?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// FTS search over message content with an optional session filter.
pub fn search_messages_sync(
    conn: &Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    query: &str,
    session_id: Option<&str>,
    limit: usize,
) -> Result<Vec<(Message, f32)>, CtxError> {
    if caps.fts {
        let fts_query = build_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT message_id, bm25({fts}) AS rank
             FROM {fts}
             WHERE {fts} MATCH ?1 AND (?2 IS NULL OR session_id = ?2)
             ORDER BY rank LIMIT ?3",
            fts = tables.messages_fts(),
        );
        let mut stmt = conn.prepare(&sql)?;
        let hits: Vec<(String, f64)> = stmt
            .query_map(params![fts_query, session_id, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut results = Vec::with_capacity(hits.len());
        for (id, rank) in hits {
            let message = conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLS} FROM {} WHERE id = ?1", tables.messages()),
                    [&id],
                    message_from_row,
                )
                .optional()?;
            if let Some(message) = message {
                results.push((message, bm25_to_score(rank)));
            }
        }
        return Ok(results);
    }

    // LIKE fallback
    let patterns = like_patterns(query);
    if patterns.is_empty() {
        return Ok(Vec::new());
    }
    let clauses: Vec<String> = (0..patterns.len())
        .map(|i| format!("lower(content) LIKE ?{}", i + 1))
        .collect();
    let sql = format!(
        "SELECT {MESSAGE_COLS} FROM {} WHERE {} AND (?{s} IS NULL OR session_id = ?{s})
         ORDER BY created_at DESC LIMIT ?{l}",
        tables.messages(),
        clauses.join(" AND "),
        s = patterns.len() + 1,
        l = patterns.len() + 2,
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    for p in &patterns {
        bind.push(Box::new(p.clone()));
    }
    bind.push(Box::new(session_id.map(|s| s.to_string())));
    bind.push(Box::new(limit as i64));
    let rows = stmt.query_map(rusqlite::params_from_iter(bind), message_from_row)?;
    let messages = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(messages.into_iter().map(|m| (m, 0.5)).collect())
}

// ============================================================================
// Decisions
// ============================================================================

/// Insert a decision row (already carrying an id and timestamps).
pub fn insert_decision_sync(
    conn: &Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    decision: &Decision,
) -> Result<(), CtxError> {
    conn.execute(
        &format!(
            "INSERT INTO {} ({DECISION_COLS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            tables.decisions()
        ),
        params![
            decision.id,
            decision.session_id,
            decision.message_id,
            decision.description,
            decision.context,
            serde_json::to_string(&decision.alternatives)?,
            serde_json::to_string(&decision.related_entity_ids)?,
            decision.status,
            decision.superseded_by,
            decision.created_at,
        ],
    )?;
    if caps.fts {
        conn.execute(
            &format!(
                "INSERT INTO {} (description, context, decision_id) VALUES (?1, ?2, ?3)",
                tables.decisions_fts()
            ),
            params![
                decision.description,
                decision.context.as_deref().unwrap_or(""),
                decision.id
            ],
        )?;
    }
    Ok(())
}

pub fn get_decision_sync(
    conn: &Connection,
    tables: &ProjectTables,
    id: &str,
) -> Result<Option<Decision>, CtxError> {
    conn.query_row(
        &format!("SELECT {DECISION_COLS} FROM {} WHERE id = ?1", tables.decisions()),
        [id],
        decision_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_decisions_sync(
    conn: &Connection,
    tables: &ProjectTables,
    session_id: Option<&str>,
    limit: usize,
) -> Result<Vec<Decision>, CtxError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DECISION_COLS} FROM {}
         WHERE (?1 IS NULL OR session_id = ?1)
         ORDER BY created_at DESC LIMIT ?2",
        tables.decisions()
    ))?;
    let rows = stmt.query_map(params![session_id, limit as i64], decision_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// FTS search over decisions, LIKE scan when FTS is unavailable.
pub fn search_decisions_sync(
    conn: &Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    query: &str,
    limit: usize,
) -> Result<Vec<Decision>, CtxError> {
    if caps.fts {
        let fts_query = build_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT decision_id FROM {fts} WHERE {fts} MATCH ?1 ORDER BY bm25({fts}) LIMIT ?2",
            fts = tables.decisions_fts(),
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids: Vec<String> = stmt
            .query_map(params![fts_query, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(decision) = get_decision_sync(conn, tables, &id)? {
                results.push(decision);
            }
        }
        return Ok(results);
    }

    let patterns = like_patterns(query);
    if patterns.is_empty() {
        return Ok(Vec::new());
    }
    let clauses: Vec<String> = (0..patterns.len())
        .map(|i| {
            format!(
                "(lower(description) LIKE ?{n} OR lower(COALESCE(context,'')) LIKE ?{n})",
                n = i + 1
            )
        })
        .collect();
    let sql = format!(
        "SELECT {DECISION_COLS} FROM {} WHERE {} ORDER BY created_at DESC LIMIT ?{l}",
        tables.decisions(),
        clauses.join(" AND "),
        l = patterns.len() + 1,
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    for p in &patterns {
        bind.push(Box::new(p.clone()));
    }
    bind.push(Box::new(limit as i64));
    let rows = stmt.query_map(rusqlite::params_from_iter(bind), decision_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Mark a decision superseded by another.
pub fn supersede_decision_sync(
    conn: &Connection,
    tables: &ProjectTables,
    id: &str,
    superseded_by: &str,
) -> Result<(), CtxError> {
    if get_decision_sync(conn, tables, superseded_by)?.is_none() {
        return Err(CtxError::NotFound(format!("decision {}", superseded_by)));
    }
    let updated = conn.execute(
        &format!(
            "UPDATE {} SET status = 'superseded', superseded_by = ?2 WHERE id = ?1",
            tables.decisions()
        ),
        params![id, superseded_by],
    )?;
    if updated == 0 {
        return Err(CtxError::NotFound(format!("decision {}", id)));
    }
    Ok(())
}

// ============================================================================
// Checkpoints
// ============================================================================

/// Save a checkpoint with the next monotonic step number for the session.
pub fn save_checkpoint_sync(
    conn: &Connection,
    tables: &ProjectTables,
    session_id: &str,
    state: &serde_json::Value,
    description: Option<&str>,
    trigger_type: Option<&str>,
    now: &str,
) -> Result<Checkpoint, CtxError> {
    let next_step: i64 = conn.query_row(
        &format!(
            "SELECT COALESCE(MAX(step_number), 0) + 1 FROM {} WHERE session_id = ?1",
            tables.checkpoints()
        ),
        [session_id],
        |row| row.get(0),
    )?;

    let checkpoint = Checkpoint {
        id: new_id(),
        session_id: session_id.to_string(),
        step_number: next_step,
        state: state.clone(),
        description: description.map(|s| s.to_string()),
        trigger_type: trigger_type.map(|s| s.to_string()),
        created_at: now.to_string(),
    };
    conn.execute(
        &format!(
            "INSERT INTO {} ({CHECKPOINT_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            tables.checkpoints()
        ),
        params![
            checkpoint.id,
            checkpoint.session_id,
            checkpoint.step_number,
            checkpoint.state.to_string(),
            checkpoint.description,
            checkpoint.trigger_type,
            checkpoint.created_at,
        ],
    )?;
    Ok(checkpoint)
}

pub fn list_checkpoints_sync(
    conn: &Connection,
    tables: &ProjectTables,
    session_id: &str,
) -> Result<Vec<Checkpoint>, CtxError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHECKPOINT_COLS} FROM {} WHERE session_id = ?1 ORDER BY step_number",
        tables.checkpoints()
    ))?;
    let rows = stmt.query_map([session_id], checkpoint_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

pub fn get_latest_checkpoint_sync(
    conn: &Connection,
    tables: &ProjectTables,
    session_id: &str,
) -> Result<Option<Checkpoint>, CtxError> {
    conn.query_row(
        &format!(
            "SELECT {CHECKPOINT_COLS} FROM {} WHERE session_id = ?1
             ORDER BY step_number DESC LIMIT 1",
            tables.checkpoints()
        ),
        [session_id],
        checkpoint_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Remove all checkpoints for a session id (also used to clear the
/// indexer's resume state after a successful run).
pub fn clear_checkpoints_sync(
    conn: &Connection,
    tables: &ProjectTables,
    session_id: &str,
) -> Result<usize, CtxError> {
    let deleted = conn.execute(
        &format!("DELETE FROM {} WHERE session_id = ?1", tables.checkpoints()),
        [session_id],
    )?;
    Ok(deleted)
}
