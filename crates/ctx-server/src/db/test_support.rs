// db/test_support.rs
// Shared test helpers for database tests

use super::pool::{DatabasePool, ensure_sqlite_vec_registered};
use super::schema::{
    ProjectTables, StoreCapabilities, create_project_tables, run_global_migrations,
};
use rusqlite::Connection;
use std::sync::Arc;

/// Embedding dimensions used by test fixtures.
pub const TEST_DIMS: usize = 8;

/// Create a sync in-memory connection with global migrations applied.
/// Loads sqlite-vec so vec0 tables work.
pub fn setup_test_connection() -> Connection {
    ensure_sqlite_vec_registered();
    #[allow(clippy::unwrap_used)]
    let conn = Connection::open_in_memory().unwrap();
    #[allow(clippy::unwrap_used)]
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    #[allow(clippy::unwrap_used)]
    run_global_migrations(&conn).unwrap();
    conn
}

/// Create a per-project table namespace on a test connection.
pub fn setup_project_tables(conn: &Connection, slug: &str) -> (ProjectTables, StoreCapabilities) {
    let tables = ProjectTables::new(slug);
    let caps = StoreCapabilities::all();
    #[allow(clippy::unwrap_used)]
    create_project_tables(conn, &tables, TEST_DIMS, caps).unwrap();
    (tables, caps)
}

/// Create a test pool (in-memory DB, global schema only).
pub async fn setup_test_pool() -> Arc<DatabasePool> {
    #[allow(clippy::expect_used)]
    Arc::new(
        DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory pool"),
    )
}

/// Create a test pool with a registered project and its tables.
pub async fn setup_test_pool_with_project() -> (Arc<DatabasePool>, super::projects::Project) {
    let pool = setup_test_pool().await;
    #[allow(clippy::unwrap_used)]
    let project = pool
        .run(|conn| {
            super::projects::create_project_sync(
                conn,
                "test",
                "/test/path",
                TEST_DIMS,
                StoreCapabilities::all(),
            )
        })
        .await
        .unwrap();
    (pool, project)
}
