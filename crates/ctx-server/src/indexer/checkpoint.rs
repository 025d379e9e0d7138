// indexer/checkpoint.rs
// Resumable indexer state persisted between batches

use crate::db::{self, INDEXER_SESSION_ID, ProjectTables};
use crate::error::{CtxError, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-file record inside a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedFile {
    pub content_hash: String,
    /// Filesystem mtime in milliseconds, for cheap staleness checks on resume.
    pub mtime_ms: i64,
}

/// Opaque-ish resumable state for a streaming index run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexCheckpoint {
    /// Relative path -> record for every file already processed this run.
    pub processed: BTreeMap<String, ProcessedFile>,
    pub skipped_files: Vec<String>,
    pub failed_files: Vec<(String, String)>,
    pub started_at: String,
    pub updated_at: String,
}

/// Persist a checkpoint under the reserved indexer session id.
pub fn save_index_checkpoint_sync(
    conn: &Connection,
    tables: &ProjectTables,
    checkpoint: &IndexCheckpoint,
    now: &str,
) -> Result<()> {
    let state = serde_json::to_value(checkpoint)?;
    db::save_checkpoint_sync(
        conn,
        tables,
        INDEXER_SESSION_ID,
        &state,
        Some("index run in progress"),
        Some("index_batch"),
        now,
    )?;
    Ok(())
}

/// Load the most recent indexer checkpoint, if any.
pub fn load_index_checkpoint_sync(
    conn: &Connection,
    tables: &ProjectTables,
) -> Result<Option<IndexCheckpoint>> {
    let Some(checkpoint) = db::get_latest_checkpoint_sync(conn, tables, INDEXER_SESSION_ID)? else {
        return Ok(None);
    };
    let parsed: IndexCheckpoint = serde_json::from_value(checkpoint.state)
        .map_err(|e| CtxError::Corruption(format!("indexer checkpoint unreadable: {e}")))?;
    Ok(Some(parsed))
}

/// Remove all indexer checkpoints after a successful full run.
pub fn clear_index_checkpoint_sync(conn: &Connection, tables: &ProjectTables) -> Result<()> {
    db::clear_checkpoints_sync(conn, tables, INDEXER_SESSION_ID)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{setup_project_tables, setup_test_connection};
    use crate::identity::{Clock, SystemClock};

    fn sample() -> IndexCheckpoint {
        let mut processed = BTreeMap::new();
        processed.insert(
            "src/a.ts".to_string(),
            ProcessedFile {
                content_hash: "abc".to_string(),
                mtime_ms: 1_700_000_000_000,
            },
        );
        IndexCheckpoint {
            processed,
            skipped_files: vec!["big.bin".to_string()],
            failed_files: vec![("bad.ts".to_string(), "syntax".to_string())],
            started_at: "2026-01-01T00:00:00.000Z".to_string(),
            updated_at: "2026-01-01T00:05:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let conn = setup_test_connection();
        let (tables, _) = setup_project_tables(&conn, "ckidx");

        let checkpoint = sample();
        save_index_checkpoint_sync(&conn, &tables, &checkpoint, &SystemClock.now_rfc3339())
            .unwrap();

        let loaded = load_index_checkpoint_sync(&conn, &tables).unwrap().unwrap();
        assert_eq!(loaded.processed, checkpoint.processed);
        assert_eq!(loaded.skipped_files, checkpoint.skipped_files);
        assert_eq!(loaded.failed_files, checkpoint.failed_files);
    }

    #[test]
    fn test_latest_checkpoint_wins() {
        let conn = setup_test_connection();
        let (tables, _) = setup_project_tables(&conn, "cklatest");

        let mut first = sample();
        save_index_checkpoint_sync(&conn, &tables, &first, &SystemClock.now_rfc3339()).unwrap();

        first.processed.insert(
            "src/b.ts".to_string(),
            ProcessedFile {
                content_hash: "def".to_string(),
                mtime_ms: 1,
            },
        );
        save_index_checkpoint_sync(&conn, &tables, &first, &SystemClock.now_rfc3339()).unwrap();

        let loaded = load_index_checkpoint_sync(&conn, &tables).unwrap().unwrap();
        assert_eq!(loaded.processed.len(), 2);
    }

    #[test]
    fn test_clear_checkpoint() {
        let conn = setup_test_connection();
        let (tables, _) = setup_project_tables(&conn, "ckclear");

        save_index_checkpoint_sync(&conn, &tables, &sample(), &SystemClock.now_rfc3339()).unwrap();
        clear_index_checkpoint_sync(&conn, &tables).unwrap();
        assert!(load_index_checkpoint_sync(&conn, &tables).unwrap().is_none());
    }

    #[test]
    fn test_none_when_absent() {
        let conn = setup_test_connection();
        let (tables, _) = setup_project_tables(&conn, "cknone");
        assert!(load_index_checkpoint_sync(&conn, &tables).unwrap().is_none());
    }
}
