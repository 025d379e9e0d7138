// analytics.rs
// Fire-and-forget query logging through a bounded in-process queue

use crate::db::pool::DatabasePool;
use crate::db::{self, ProjectTables, QueryLogEntry};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Queue depth before log entries are dropped rather than blocking queries.
const QUEUE_CAPACITY: usize = 256;

/// Asynchronous query-log writer for one project.
///
/// `log` never blocks and never fails the caller; entries are written by a
/// background task and silently dropped when the queue is full.
#[derive(Clone)]
pub struct AnalyticsSink {
    tx: mpsc::Sender<QueryLogEntry>,
}

impl AnalyticsSink {
    /// Spawn the writer task and return the sink handle.
    pub fn spawn(pool: Arc<DatabasePool>, tables: ProjectTables) -> Self {
        let (tx, mut rx) = mpsc::channel::<QueryLogEntry>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                let tables = tables.clone();
                let result = pool
                    .run(move |conn| db::insert_query_log_sync(conn, &tables, &entry))
                    .await;
                if let Err(e) = result {
                    tracing::debug!("query log write failed: {}", e);
                }
            }
        });

        Self { tx }
    }

    /// Enqueue a log entry. Drops on a full queue.
    pub fn log(&self, entry: QueryLogEntry) {
        if let Err(e) = self.tx.try_send(entry) {
            tracing::debug!("query log entry dropped: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StatsPeriod;
    use crate::db::test_support::setup_test_pool_with_project;
    use crate::identity::{Clock, SystemClock, new_id};

    fn entry(query: &str) -> QueryLogEntry {
        QueryLogEntry {
            id: new_id(),
            query: query.to_string(),
            tokens_retrieved: 100,
            tokens_saved: 50,
            average_relevance: 0.9,
            strategies_used: vec!["keyword".to_string()],
            latency_ms: 10,
            was_useful: None,
            created_at: SystemClock.now_rfc3339(),
        }
    }

    #[tokio::test]
    async fn test_sink_writes_entries() {
        let (pool, project) = setup_test_pool_with_project().await;
        let tables = project.tables();
        let sink = AnalyticsSink::spawn(pool.clone(), tables.clone());

        sink.log(entry("q1"));
        sink.log(entry("q2"));

        // The writer is asynchronous; poll briefly for the rows to land.
        let mut total = 0;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let t = tables.clone();
            total = pool
                .run(move |conn| db::get_stats_sync(conn, &t, StatsPeriod::All))
                .await
                .unwrap()
                .total_queries;
            if total == 2 {
                break;
            }
        }
        assert_eq!(total, 2);
    }
}
