// db/schema.rs
// Global schema, per-project table namespace, and capability probing

use anyhow::Result;
use rusqlite::Connection;

/// Global schema SQL. Per-project tables are created on project creation.
pub const GLOBAL_SCHEMA: &str = r#"
-- =======================================
-- CORE: Projects
-- =======================================
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY,
    slug TEXT UNIQUE NOT NULL,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    config TEXT NOT NULL DEFAULT '{}',
    embedding_dims INTEGER,
    last_indexed_at TEXT,
    active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_projects_active ON projects(active);
"#;

/// Current schema version, stamped into `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Run global schema setup. Idempotent; fatal on failure.
///
/// Future migrations gate on the recorded version so re-running against an
/// existing database is always safe.
pub fn run_global_migrations(conn: &Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    conn.execute_batch(GLOBAL_SCHEMA)?;
    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
    }
    Ok(())
}

/// Optional storage capabilities detected at runtime.
///
/// FTS5 and vec0 are probed once per pool; components degrade (LIKE scans,
/// keyword-only search) instead of failing when a capability is missing.
#[derive(Debug, Clone, Copy)]
pub struct StoreCapabilities {
    pub fts: bool,
    pub vectors: bool,
}

impl StoreCapabilities {
    pub fn all() -> Self {
        Self {
            fts: true,
            vectors: true,
        }
    }
}

/// Probe FTS5 and vec0 support by creating throwaway temp tables.
pub fn probe_capabilities(conn: &Connection) -> StoreCapabilities {
    let fts = conn
        .execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS temp.fts_probe USING fts5(x);
             DROP TABLE temp.fts_probe;",
        )
        .is_ok();
    let vectors = conn
        .execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS temp.vec_probe USING vec0(embedding float[4]);
             DROP TABLE temp.vec_probe;",
        )
        .is_ok();
    if !fts {
        tracing::warn!("FTS5 unavailable - falling back to LIKE scans");
    }
    if !vectors {
        tracing::warn!("sqlite-vec unavailable - semantic search uses blob scan");
    }
    StoreCapabilities { fts, vectors }
}

/// Map an arbitrary project name to a table-prefix slug (`[a-z0-9_]+`).
///
/// Runs of characters outside the set collapse to a single underscore;
/// leading and trailing underscores are trimmed. Empty results are rejected.
pub fn sanitize_project_slug(name: &str) -> Result<String, crate::error::CtxError> {
    let mut slug = String::with_capacity(name.len());
    let mut last_underscore = false;
    for c in name.chars().flat_map(|c| c.to_lowercase()) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
            last_underscore = false;
        } else if !last_underscore {
            slug.push('_');
            last_underscore = true;
        }
    }
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() {
        return Err(crate::error::CtxError::InvalidInput(format!(
            "project name '{}' has no usable characters for a table prefix",
            name
        )));
    }
    Ok(slug)
}

/// Formats the per-project table names for a slug.
#[derive(Debug, Clone)]
pub struct ProjectTables {
    prefix: String,
}

impl ProjectTables {
    pub fn new(slug: &str) -> Self {
        Self {
            prefix: format!("p_{}_", slug),
        }
    }

    pub fn entities(&self) -> String {
        format!("{}entities", self.prefix)
    }
    pub fn entities_fts(&self) -> String {
        format!("{}entities_fts", self.prefix)
    }
    pub fn relationships(&self) -> String {
        format!("{}relationships", self.prefix)
    }
    pub fn sessions(&self) -> String {
        format!("{}sessions", self.prefix)
    }
    pub fn messages(&self) -> String {
        format!("{}messages", self.prefix)
    }
    pub fn messages_fts(&self) -> String {
        format!("{}messages_fts", self.prefix)
    }
    pub fn decisions(&self) -> String {
        format!("{}decisions", self.prefix)
    }
    pub fn decisions_fts(&self) -> String {
        format!("{}decisions_fts", self.prefix)
    }
    pub fn embeddings(&self) -> String {
        format!("{}embeddings", self.prefix)
    }
    pub fn checkpoints(&self) -> String {
        format!("{}checkpoints", self.prefix)
    }
    pub fn query_log(&self) -> String {
        format!("{}query_log", self.prefix)
    }

    fn all_names(&self) -> Vec<String> {
        vec![
            self.entities_fts(),
            self.messages_fts(),
            self.decisions_fts(),
            self.embeddings(),
            self.relationships(),
            self.messages(),
            self.decisions(),
            self.checkpoints(),
            self.query_log(),
            self.sessions(),
            self.entities(),
        ]
    }
}

/// Create the per-project tables. Idempotent.
///
/// `embedding_dims` fixes the vec0 column width; when the vectors capability
/// is absent a plain BLOB table is created instead so the embedding pipeline
/// still has a home and search degrades to an in-process scan.
pub fn create_project_tables(
    conn: &Connection,
    tables: &ProjectTables,
    embedding_dims: usize,
    caps: StoreCapabilities,
) -> Result<()> {
    let ddl = format!(
        r#"
CREATE TABLE IF NOT EXISTS {entities} (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    name TEXT NOT NULL,
    qualified_name TEXT NOT NULL UNIQUE,
    content TEXT,
    summary TEXT,
    file_path TEXT,
    start_line INTEGER,
    end_line INTEGER,
    content_hash TEXT,
    metadata TEXT NOT NULL DEFAULT '{{}}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_{entities}_file ON {entities}(file_path);
CREATE INDEX IF NOT EXISTS idx_{entities}_type ON {entities}(entity_type);

CREATE TABLE IF NOT EXISTS {relationships} (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES {entities}(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES {entities}(id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    metadata TEXT NOT NULL DEFAULT '{{}}',
    created_at TEXT NOT NULL,
    UNIQUE(source_id, target_id, relation_type)
);
CREATE INDEX IF NOT EXISTS idx_{relationships}_source ON {relationships}(source_id);
CREATE INDEX IF NOT EXISTS idx_{relationships}_target ON {relationships}(target_id);

CREATE TABLE IF NOT EXISTS {sessions} (
    id TEXT PRIMARY KEY,
    name TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    summary TEXT,
    message_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    archived_at TEXT
);

CREATE TABLE IF NOT EXISTS {messages} (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES {sessions}(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{{}}',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_{messages}_session ON {messages}(session_id, created_at);

CREATE TABLE IF NOT EXISTS {decisions} (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES {sessions}(id) ON DELETE CASCADE,
    message_id TEXT,
    description TEXT NOT NULL,
    context TEXT,
    alternatives TEXT NOT NULL DEFAULT '[]',
    related_entity_ids TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'open',
    superseded_by TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_{decisions}_session ON {decisions}(session_id);

CREATE TABLE IF NOT EXISTS {checkpoints} (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    step_number INTEGER NOT NULL,
    state TEXT NOT NULL,
    description TEXT,
    trigger_type TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(session_id, step_number)
);

CREATE TABLE IF NOT EXISTS {query_log} (
    id TEXT PRIMARY KEY,
    query TEXT NOT NULL,
    tokens_retrieved INTEGER NOT NULL DEFAULT 0,
    tokens_saved INTEGER NOT NULL DEFAULT 0,
    average_relevance REAL NOT NULL DEFAULT 0,
    strategies_used TEXT NOT NULL DEFAULT '[]',
    latency_ms INTEGER NOT NULL DEFAULT 0,
    was_useful INTEGER,
    created_at TEXT NOT NULL
);
"#,
        entities = tables.entities(),
        relationships = tables.relationships(),
        sessions = tables.sessions(),
        messages = tables.messages(),
        decisions = tables.decisions(),
        checkpoints = tables.checkpoints(),
        query_log = tables.query_log(),
    );
    conn.execute_batch(&ddl)?;

    if caps.fts {
        let fts_ddl = format!(
            r#"
CREATE VIRTUAL TABLE IF NOT EXISTS {entities_fts} USING fts5(
    name,
    summary,
    content,
    entity_id UNINDEXED,
    tokenize='porter unicode61 remove_diacritics 1'
);
CREATE VIRTUAL TABLE IF NOT EXISTS {messages_fts} USING fts5(
    content,
    message_id UNINDEXED,
    session_id UNINDEXED,
    tokenize='porter unicode61 remove_diacritics 1'
);
CREATE VIRTUAL TABLE IF NOT EXISTS {decisions_fts} USING fts5(
    description,
    context,
    decision_id UNINDEXED,
    tokenize='porter unicode61 remove_diacritics 1'
);
"#,
            entities_fts = tables.entities_fts(),
            messages_fts = tables.messages_fts(),
            decisions_fts = tables.decisions_fts(),
        );
        conn.execute_batch(&fts_ddl)?;
    }

    if caps.vectors {
        let vec_ddl = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {embeddings} USING vec0(
                embedding float[{dims}],
                +entity_id TEXT,
                +chunk_index INTEGER,
                +start_offset INTEGER,
                +end_offset INTEGER,
                +model_id TEXT
            );",
            embeddings = tables.embeddings(),
            dims = embedding_dims,
        );
        conn.execute_batch(&vec_ddl)?;
    } else {
        let blob_ddl = format!(
            "CREATE TABLE IF NOT EXISTS {embeddings} (
                entity_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                model_id TEXT NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (entity_id, chunk_index)
            );",
            embeddings = tables.embeddings(),
        );
        conn.execute_batch(&blob_ddl)?;
    }

    Ok(())
}

/// Drop every per-project table. Used by project deletion.
pub fn drop_project_tables(conn: &Connection, tables: &ProjectTables) -> Result<()> {
    for name in tables.all_names() {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", name))?;
    }
    Ok(())
}

/// Rebuild the entity FTS index from the entities table.
pub fn rebuild_entity_fts(conn: &Connection, tables: &ProjectTables) -> Result<()> {
    let sql = format!(
        "DELETE FROM {fts};
         INSERT INTO {fts} (name, summary, content, entity_id)
         SELECT name, COALESCE(summary, ''), COALESCE(content, ''), id FROM {entities};",
        fts = tables.entities_fts(),
        entities = tables.entities(),
    );
    conn.execute_batch(&sql)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    #[test]
    fn test_sanitize_slug_basic() {
        assert_eq!(sanitize_project_slug("my-project").unwrap(), "my_project");
        assert_eq!(sanitize_project_slug("MyProject").unwrap(), "myproject");
        assert_eq!(sanitize_project_slug("api_v2").unwrap(), "api_v2");
    }

    #[test]
    fn test_sanitize_slug_collapses_runs() {
        assert_eq!(
            sanitize_project_slug("my -- weird  name").unwrap(),
            "my_weird_name"
        );
        assert_eq!(sanitize_project_slug("--edge--").unwrap(), "edge");
    }

    #[test]
    fn test_sanitize_slug_rejects_empty() {
        assert!(sanitize_project_slug("").is_err());
        assert!(sanitize_project_slug("---").is_err());
        assert!(sanitize_project_slug("日本語").is_err());
    }

    #[test]
    fn test_project_tables_names() {
        let t = ProjectTables::new("demo");
        assert_eq!(t.entities(), "p_demo_entities");
        assert_eq!(t.embeddings(), "p_demo_embeddings");
        assert_eq!(t.query_log(), "p_demo_query_log");
    }

    #[test]
    fn test_create_project_tables_idempotent() {
        let conn = setup_test_connection();
        let tables = ProjectTables::new("demo");
        let caps = probe_capabilities(&conn);
        create_project_tables(&conn, &tables, 8, caps).unwrap();
        create_project_tables(&conn, &tables, 8, caps).unwrap();

        conn.execute(
            &format!(
                "INSERT INTO {} (id, entity_type, name, qualified_name, created_at, updated_at)
                 VALUES ('e1', 'file', 'a.ts', 'a.ts', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')",
                tables.entities()
            ),
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_drop_project_tables_removes_everything() {
        let conn = setup_test_connection();
        let tables = ProjectTables::new("gone");
        let caps = probe_capabilities(&conn);
        create_project_tables(&conn, &tables, 8, caps).unwrap();
        drop_project_tables(&conn, &tables).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE 'p_gone_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_probe_capabilities_with_bundled_sqlite() {
        let conn = setup_test_connection();
        let caps = probe_capabilities(&conn);
        assert!(caps.fts);
        assert!(caps.vectors);
    }

    #[test]
    fn test_relationship_cascade_on_entity_delete() {
        let conn = setup_test_connection();
        let tables = ProjectTables::new("casc");
        create_project_tables(&conn, &tables, 8, StoreCapabilities::all()).unwrap();

        let now = "2026-01-01T00:00:00.000Z";
        for id in ["a", "b"] {
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, entity_type, name, qualified_name, created_at, updated_at)
                     VALUES (?1, 'function', ?1, ?1, ?2, ?2)",
                    tables.entities()
                ),
                rusqlite::params![id, now],
            )
            .unwrap();
        }
        conn.execute(
            &format!(
                "INSERT INTO {} (id, source_id, target_id, relation_type, weight, created_at)
                 VALUES ('r1', 'a', 'b', 'calls', 1.0, ?1)",
                tables.relationships()
            ),
            [now],
        )
        .unwrap();

        conn.execute(
            &format!("DELETE FROM {} WHERE id = 'a'", tables.entities()),
            [],
        )
        .unwrap();

        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", tables.relationships()),
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }
}
