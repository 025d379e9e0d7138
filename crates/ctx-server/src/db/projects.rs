// db/projects.rs
// Project CRUD and per-project table lifecycle

use super::schema::{
    self, ProjectTables, StoreCapabilities, create_project_tables, drop_project_tables,
    sanitize_project_slug,
};
use crate::error::CtxError;
use rusqlite::{Connection, OptionalExtension, params};

/// A registered project row.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub path: String,
    pub config: serde_json::Value,
    pub embedding_dims: Option<usize>,
    pub last_indexed_at: Option<String>,
    pub active: bool,
}

impl Project {
    pub fn tables(&self) -> ProjectTables {
        ProjectTables::new(&self.slug)
    }
}

fn project_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    let config: String = row.get(4)?;
    Ok(Project {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        path: row.get(3)?,
        config: serde_json::from_str(&config).unwrap_or(serde_json::Value::Null),
        embedding_dims: row.get::<_, Option<i64>>(5)?.map(|d| d as usize),
        last_indexed_at: row.get(6)?,
        active: row.get::<_, i64>(7)? != 0,
    })
}

const PROJECT_COLS: &str =
    "id, slug, name, path, config, embedding_dims, last_indexed_at, active";

/// Create a project and its table namespace.
///
/// Rejects a slug collision where an existing project has the same sanitized
/// name but a different path.
pub fn create_project_sync(
    conn: &Connection,
    name: &str,
    path: &str,
    embedding_dims: usize,
    caps: StoreCapabilities,
) -> Result<Project, CtxError> {
    let slug = sanitize_project_slug(name)?;

    if let Some(existing) = get_project_by_slug_sync(conn, &slug)? {
        if existing.path == path {
            return Ok(existing);
        }
        return Err(CtxError::Conflict(format!(
            "project slug '{}' already maps to {}",
            slug, existing.path
        )));
    }

    conn.execute(
        "INSERT INTO projects (slug, name, path, embedding_dims) VALUES (?1, ?2, ?3, ?4)",
        params![slug, name, path, embedding_dims as i64],
    )?;
    let tables = ProjectTables::new(&slug);
    create_project_tables(conn, &tables, embedding_dims, caps)
        .map_err(|e| CtxError::Internal(format!("failed to create project tables: {e}")))?;

    get_project_by_slug_sync(conn, &slug)?
        .ok_or_else(|| CtxError::Internal("project vanished after insert".into()))
}

pub fn get_project_sync(conn: &Connection, id: i64) -> Result<Option<Project>, CtxError> {
    conn.query_row(
        &format!("SELECT {PROJECT_COLS} FROM projects WHERE id = ?1"),
        [id],
        project_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_project_by_slug_sync(
    conn: &Connection,
    slug: &str,
) -> Result<Option<Project>, CtxError> {
    conn.query_row(
        &format!("SELECT {PROJECT_COLS} FROM projects WHERE slug = ?1"),
        [slug],
        project_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn get_project_by_name_sync(
    conn: &Connection,
    name: &str,
) -> Result<Option<Project>, CtxError> {
    let slug = sanitize_project_slug(name)?;
    get_project_by_slug_sync(conn, &slug)
}

pub fn list_projects_sync(conn: &Connection) -> Result<Vec<Project>, CtxError> {
    let mut stmt =
        conn.prepare(&format!("SELECT {PROJECT_COLS} FROM projects ORDER BY id"))?;
    let rows = stmt.query_map([], project_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Mark one project active; at most one project is active at a time.
pub fn set_active_project_sync(conn: &Connection, id: i64) -> Result<(), CtxError> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE id = ?1",
        [id],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Err(CtxError::NotFound(format!("project {}", id)));
    }
    conn.execute("UPDATE projects SET active = (id = ?1)", [id])?;
    Ok(())
}

pub fn get_active_project_sync(conn: &Connection) -> Result<Option<Project>, CtxError> {
    conn.query_row(
        &format!("SELECT {PROJECT_COLS} FROM projects WHERE active = 1 LIMIT 1"),
        [],
        project_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Delete a project. Drops every per-project table, then the registry row.
pub fn delete_project_sync(conn: &Connection, id: i64) -> Result<(), CtxError> {
    let project =
        get_project_sync(conn, id)?.ok_or_else(|| CtxError::NotFound(format!("project {}", id)))?;
    drop_project_tables(conn, &project.tables())
        .map_err(|e| CtxError::Internal(format!("failed to drop project tables: {e}")))?;
    conn.execute("DELETE FROM projects WHERE id = ?1", [id])?;
    Ok(())
}

pub fn touch_last_indexed_sync(
    conn: &Connection,
    id: i64,
    timestamp: &str,
) -> Result<(), CtxError> {
    conn.execute(
        "UPDATE projects SET last_indexed_at = ?2 WHERE id = ?1",
        params![id, timestamp],
    )?;
    Ok(())
}

/// Read a single key out of the project's opaque config map.
pub fn get_project_config_sync(
    conn: &Connection,
    id: i64,
    key: &str,
) -> Result<Option<String>, CtxError> {
    let project =
        get_project_sync(conn, id)?.ok_or_else(|| CtxError::NotFound(format!("project {}", id)))?;
    Ok(project
        .config
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string()))
}

/// Write a single key into the project's opaque config map.
pub fn set_project_config_sync(
    conn: &Connection,
    id: i64,
    key: &str,
    value: &str,
) -> Result<(), CtxError> {
    let project =
        get_project_sync(conn, id)?.ok_or_else(|| CtxError::NotFound(format!("project {}", id)))?;
    let mut config = match project.config {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    config.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    conn.execute(
        "UPDATE projects SET config = ?2 WHERE id = ?1",
        params![id, serde_json::Value::Object(config).to_string()],
    )?;
    Ok(())
}

/// Rebuild the entity FTS index for a project.
pub fn rebuild_project_fts_sync(conn: &Connection, project: &Project) -> Result<(), CtxError> {
    schema::rebuild_entity_fts(conn, &project.tables())
        .map_err(|e| CtxError::Internal(format!("FTS rebuild failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    fn caps() -> StoreCapabilities {
        StoreCapabilities::all()
    }

    #[test]
    fn test_create_and_get_project() {
        let conn = setup_test_connection();
        let p = create_project_sync(&conn, "My App", "/home/dev/my-app", 8, caps()).unwrap();
        assert_eq!(p.slug, "my_app");
        assert_eq!(p.name, "My App");

        let fetched = get_project_sync(&conn, p.id).unwrap().unwrap();
        assert_eq!(fetched.path, "/home/dev/my-app");
        assert_eq!(fetched.embedding_dims, Some(8));
    }

    #[test]
    fn test_create_project_idempotent_same_path() {
        let conn = setup_test_connection();
        let a = create_project_sync(&conn, "app", "/p", 8, caps()).unwrap();
        let b = create_project_sync(&conn, "app", "/p", 8, caps()).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_create_project_slug_collision() {
        let conn = setup_test_connection();
        create_project_sync(&conn, "my-app", "/p1", 8, caps()).unwrap();
        let err = create_project_sync(&conn, "my app", "/p2", 8, caps()).unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn test_at_most_one_active_project() {
        let conn = setup_test_connection();
        let a = create_project_sync(&conn, "a", "/a", 8, caps()).unwrap();
        let b = create_project_sync(&conn, "b", "/b", 8, caps()).unwrap();

        set_active_project_sync(&conn, a.id).unwrap();
        set_active_project_sync(&conn, b.id).unwrap();

        let active = get_active_project_sync(&conn).unwrap().unwrap();
        assert_eq!(active.id, b.id);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM projects WHERE active = 1", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_set_active_missing_project() {
        let conn = setup_test_connection();
        let err = set_active_project_sync(&conn, 999).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_delete_project_drops_tables() {
        let conn = setup_test_connection();
        let p = create_project_sync(&conn, "doomed", "/d", 8, caps()).unwrap();
        delete_project_sync(&conn, p.id).unwrap();

        assert!(get_project_sync(&conn, p.id).unwrap().is_none());
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE 'p_doomed_%'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_project_config_roundtrip() {
        let conn = setup_test_connection();
        let p = create_project_sync(&conn, "cfg", "/c", 8, caps()).unwrap();

        assert!(get_project_config_sync(&conn, p.id, "last_sync").unwrap().is_none());
        set_project_config_sync(&conn, p.id, "last_sync", "abc123").unwrap();
        assert_eq!(
            get_project_config_sync(&conn, p.id, "last_sync").unwrap(),
            Some("abc123".to_string())
        );
    }
}
