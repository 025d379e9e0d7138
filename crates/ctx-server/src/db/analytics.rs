// db/analytics.rs
// Query log storage and aggregate stats

use super::schema::ProjectTables;
use super::types::QueryLogEntry;
use crate::error::CtxError;
use rusqlite::{Connection, OptionalExtension, params};

const LOG_COLS: &str = "id, query, tokens_retrieved, tokens_saved, average_relevance, \
                        strategies_used, latency_ms, was_useful, created_at";

fn log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueryLogEntry> {
    let strategies: String = row.get(5)?;
    Ok(QueryLogEntry {
        id: row.get(0)?,
        query: row.get(1)?,
        tokens_retrieved: row.get(2)?,
        tokens_saved: row.get(3)?,
        average_relevance: row.get(4)?,
        strategies_used: serde_json::from_str(&strategies).unwrap_or_default(),
        latency_ms: row.get(6)?,
        was_useful: row.get::<_, Option<i64>>(7)?.map(|v| v != 0),
        created_at: row.get(8)?,
    })
}

pub fn insert_query_log_sync(
    conn: &Connection,
    tables: &ProjectTables,
    entry: &QueryLogEntry,
) -> Result<(), CtxError> {
    conn.execute(
        &format!(
            "INSERT INTO {} ({LOG_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            tables.query_log()
        ),
        params![
            entry.id,
            entry.query,
            entry.tokens_retrieved,
            entry.tokens_saved,
            entry.average_relevance,
            serde_json::to_string(&entry.strategies_used)?,
            entry.latency_ms,
            entry.was_useful.map(|v| v as i64),
            entry.created_at,
        ],
    )?;
    Ok(())
}

/// Back-annotate a logged query with user feedback.
pub fn record_feedback_sync(
    conn: &Connection,
    tables: &ProjectTables,
    query_id: &str,
    useful: bool,
) -> Result<(), CtxError> {
    let updated = conn.execute(
        &format!(
            "UPDATE {} SET was_useful = ?2 WHERE id = ?1",
            tables.query_log()
        ),
        params![query_id, useful as i64],
    )?;
    if updated == 0 {
        return Err(CtxError::NotFound(format!("query log entry {}", query_id)));
    }
    Ok(())
}

pub fn get_query_log_sync(
    conn: &Connection,
    tables: &ProjectTables,
    id: &str,
) -> Result<Option<QueryLogEntry>, CtxError> {
    conn.query_row(
        &format!("SELECT {LOG_COLS} FROM {} WHERE id = ?1", tables.query_log()),
        [id],
        log_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Aggregation window for query stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsPeriod {
    Day,
    Week,
    Month,
    All,
}

impl StatsPeriod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn cutoff_modifier(&self) -> Option<&'static str> {
        match self {
            Self::Day => Some("-1 day"),
            Self::Week => Some("-7 days"),
            Self::Month => Some("-30 days"),
            Self::All => None,
        }
    }
}

/// Aggregated analytics over a period.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueryStats {
    pub total_queries: i64,
    pub total_tokens_retrieved: i64,
    pub total_tokens_saved: i64,
    pub avg_relevance: f64,
    pub avg_latency_ms: f64,
    pub feedback_positive: i64,
    pub feedback_negative: i64,
}

pub fn get_stats_sync(
    conn: &Connection,
    tables: &ProjectTables,
    period: StatsPeriod,
) -> Result<QueryStats, CtxError> {
    let where_clause = match period.cutoff_modifier() {
        Some(modifier) => format!("WHERE created_at >= datetime('now', '{}')", modifier),
        None => String::new(),
    };
    let sql = format!(
        "SELECT COUNT(*),
                COALESCE(SUM(tokens_retrieved), 0),
                COALESCE(SUM(tokens_saved), 0),
                COALESCE(AVG(average_relevance), 0),
                COALESCE(AVG(latency_ms), 0),
                COALESCE(SUM(CASE WHEN was_useful = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN was_useful = 0 THEN 1 ELSE 0 END), 0)
         FROM {} {}",
        tables.query_log(),
        where_clause
    );
    conn.query_row(&sql, [], |row| {
        Ok(QueryStats {
            total_queries: row.get(0)?,
            total_tokens_retrieved: row.get(1)?,
            total_tokens_saved: row.get(2)?,
            avg_relevance: row.get(3)?,
            avg_latency_ms: row.get(4)?,
            feedback_positive: row.get(5)?,
            feedback_negative: row.get(6)?,
        })
    })
    .map_err(Into::into)
}
