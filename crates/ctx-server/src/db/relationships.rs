// db/relationships.rs
// Directed weighted edges and bounded graph traversal

use super::entities::get_entity_sync;
use super::schema::ProjectTables;
use super::types::{Direction, Entity, Relationship};
use crate::error::CtxError;
use crate::identity::{Clock, SystemClock, new_id};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{HashMap, HashSet, VecDeque};

const REL_COLS: &str = "id, source_id, target_id, relation_type, weight, metadata, created_at";

fn relationship_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relationship> {
    let metadata: String = row.get(5)?;
    Ok(Relationship {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        relation_type: row.get(3)?,
        weight: row.get(4)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: row.get(6)?,
    })
}

/// Filters for relationship queries.
#[derive(Debug, Clone, Default)]
pub struct RelationshipFilter {
    pub types: Vec<String>,
    pub min_weight: Option<f64>,
    pub limit: Option<usize>,
}

/// Create an edge. Both endpoints must exist; duplicate
/// `(source, target, type)` is a `Conflict`; weight is clamped to [0, 1].
pub fn create_relationship_sync(
    conn: &Connection,
    tables: &ProjectTables,
    source_id: &str,
    target_id: &str,
    relation_type: &str,
    weight: f64,
    metadata: serde_json::Value,
) -> Result<Relationship, CtxError> {
    for endpoint in [source_id, target_id] {
        if get_entity_sync(conn, tables, endpoint)?.is_none() {
            return Err(CtxError::NotFound(format!("entity {}", endpoint)));
        }
    }

    let rel = Relationship {
        id: new_id(),
        source_id: source_id.to_string(),
        target_id: target_id.to_string(),
        relation_type: relation_type.to_string(),
        weight: weight.clamp(0.0, 1.0),
        metadata,
        created_at: SystemClock.now_rfc3339(),
    };

    let inserted = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {} ({REL_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            tables.relationships()
        ),
        params![
            rel.id,
            rel.source_id,
            rel.target_id,
            rel.relation_type,
            rel.weight,
            rel.metadata.to_string(),
            rel.created_at,
        ],
    )?;
    if inserted == 0 {
        return Err(CtxError::Conflict(format!(
            "relationship {} -[{}]-> {} already exists",
            source_id, relation_type, target_id
        )));
    }
    Ok(rel)
}

/// Create-or-ignore variant used by the indexer, where re-deriving an
/// existing edge is expected.
pub fn ensure_relationship_sync(
    conn: &Connection,
    tables: &ProjectTables,
    source_id: &str,
    target_id: &str,
    relation_type: &str,
    weight: f64,
) -> Result<(), CtxError> {
    match create_relationship_sync(
        conn,
        tables,
        source_id,
        target_id,
        relation_type,
        weight,
        serde_json::json!({}),
    ) {
        Ok(_) => Ok(()),
        Err(CtxError::Conflict(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

pub fn get_relationship_sync(
    conn: &Connection,
    tables: &ProjectTables,
    id: &str,
) -> Result<Option<Relationship>, CtxError> {
    conn.query_row(
        &format!(
            "SELECT {REL_COLS} FROM {} WHERE id = ?1",
            tables.relationships()
        ),
        [id],
        relationship_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Edges touching an entity, filtered by direction, type set, and weight.
pub fn get_relationships_for_entity_sync(
    conn: &Connection,
    tables: &ProjectTables,
    entity_id: &str,
    direction: Direction,
    filter: &RelationshipFilter,
) -> Result<Vec<Relationship>, CtxError> {
    let direction_clause = match direction {
        Direction::Out => "source_id = ?1",
        Direction::In => "target_id = ?1",
        Direction::Both => "(source_id = ?1 OR target_id = ?1)",
    };
    let mut sql = format!(
        "SELECT {REL_COLS} FROM {} WHERE {}",
        tables.relationships(),
        direction_clause
    );
    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(entity_id.to_string())];

    if !filter.types.is_empty() {
        let placeholders: Vec<String> = (0..filter.types.len())
            .map(|i| format!("?{}", i + 2))
            .collect();
        sql.push_str(&format!(" AND relation_type IN ({})", placeholders.join(", ")));
        for t in &filter.types {
            bind.push(Box::new(t.clone()));
        }
    }
    if let Some(min_weight) = filter.min_weight {
        sql.push_str(&format!(" AND weight >= ?{}", bind.len() + 1));
        bind.push(Box::new(min_weight));
    }
    sql.push_str(" ORDER BY weight DESC, id ASC");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(bind), relationship_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

pub fn count_relationships_sync(
    conn: &Connection,
    tables: &ProjectTables,
) -> Result<i64, CtxError> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", tables.relationships()),
        [],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Edge counts grouped by relation type.
pub fn stats_by_type_sync(
    conn: &Connection,
    tables: &ProjectTables,
) -> Result<Vec<(String, i64)>, CtxError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT relation_type, COUNT(*) FROM {} GROUP BY relation_type ORDER BY COUNT(*) DESC",
        tables.relationships()
    ))?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Average degree: 2 * |edges| / |entities| (0 when there are no entities).
pub fn get_average_degree_sync(
    conn: &Connection,
    tables: &ProjectTables,
) -> Result<f64, CtxError> {
    let edges = count_relationships_sync(conn, tables)? as f64;
    let nodes = super::entities::count_entities_sync(conn, tables)? as f64;
    if nodes == 0.0 {
        return Ok(0.0);
    }
    Ok(2.0 * edges / nodes)
}

/// A node discovered during traversal, with the depth it was first seen at.
#[derive(Debug, Clone)]
pub struct NeighborhoodNode {
    pub entity: Entity,
    pub depth: usize,
}

/// Result of a bounded BFS expansion.
#[derive(Debug, Clone, Default)]
pub struct Neighborhood {
    pub nodes: Vec<NeighborhoodNode>,
    pub relationships: Vec<Relationship>,
}

/// Bounded BFS from an entity.
///
/// Returns only nodes whose shortest path from the root is <= `max_depth`;
/// no node appears twice (a global visited set makes cycles safe). Edge type
/// filters apply per hop. Nodes at equal depth are expanded in order of edge
/// weight descending, then id ascending.
pub fn get_neighborhood_sync(
    conn: &Connection,
    tables: &ProjectTables,
    entity_id: &str,
    max_depth: usize,
    direction: Direction,
    types: &[String],
) -> Result<Neighborhood, CtxError> {
    let root = get_entity_sync(conn, tables, entity_id)?
        .ok_or_else(|| CtxError::NotFound(format!("entity {}", entity_id)))?;

    let filter = RelationshipFilter {
        types: types.to_vec(),
        ..Default::default()
    };

    let mut visited: HashSet<String> = HashSet::new();
    let mut seen_edges: HashSet<String> = HashSet::new();
    let mut result = Neighborhood::default();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();

    visited.insert(root.id.clone());
    result.nodes.push(NeighborhoodNode {
        entity: root,
        depth: 0,
    });
    queue.push_back((entity_id.to_string(), 0));

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let edges = get_relationships_for_entity_sync(conn, tables, &current, direction, &filter)?;

        // Collect frontier candidates so equal-depth ordering is stable:
        // weight descending, then id ascending.
        let mut frontier: Vec<(f64, String)> = Vec::new();
        let mut frontier_seen: HashMap<String, f64> = HashMap::new();

        for edge in edges {
            let neighbor = if edge.source_id == current {
                edge.target_id.clone()
            } else {
                edge.source_id.clone()
            };
            if seen_edges.insert(edge.id.clone()) {
                result.relationships.push(edge.clone());
            }
            if visited.contains(&neighbor) {
                continue;
            }
            let best = frontier_seen.entry(neighbor.clone()).or_insert(f64::MIN);
            if edge.weight > *best {
                *best = edge.weight;
            }
        }
        for (id, weight) in frontier_seen {
            frontier.push((weight, id));
        }
        frontier.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        for (_, neighbor_id) in frontier {
            if !visited.insert(neighbor_id.clone()) {
                continue;
            }
            if let Some(entity) = get_entity_sync(conn, tables, &neighbor_id)? {
                result.nodes.push(NeighborhoodNode {
                    entity,
                    depth: depth + 1,
                });
                queue.push_back((neighbor_id, depth + 1));
            }
        }
    }

    Ok(result)
}
