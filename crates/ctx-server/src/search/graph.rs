// search/graph.rs
// Graph expansion strategy: seed entities fan out through the neighborhood

use crate::db::{self, Direction, Entity, ProjectTables};
use crate::error::Result;
use rusqlite::Connection;
use std::collections::HashMap;

/// Depth cap for graph expansion.
pub const GRAPH_EXPANSION_DEPTH: usize = 2;

/// How many keyword hits seed the expansion.
pub const GRAPH_SEED_COUNT: usize = 5;

/// Expand the neighborhoods of seed entities.
///
/// A neighbor's score is `seed_score * weight^depth` along its best path;
/// when several seeds reach the same neighbor the best score wins. Seeds
/// themselves are not re-scored here (keyword already covers them).
pub fn expand_seeds_sync(
    conn: &Connection,
    tables: &ProjectTables,
    seeds: &[(Entity, f32)],
    types: &[String],
) -> Result<Vec<(Entity, f32)>> {
    let mut best: HashMap<String, (Entity, f32)> = HashMap::new();

    for (seed, seed_score) in seeds.iter().take(GRAPH_SEED_COUNT) {
        let hood = db::get_neighborhood_sync(
            conn,
            tables,
            &seed.id,
            GRAPH_EXPANSION_DEPTH,
            Direction::Both,
            types,
        )?;

        // Best path weight product from the seed through the returned
        // subgraph, relaxed once per depth level.
        let mut path_weight: HashMap<&str, f64> = HashMap::new();
        path_weight.insert(seed.id.as_str(), 1.0);
        for _ in 0..GRAPH_EXPANSION_DEPTH {
            for rel in &hood.relationships {
                for (from, to) in [
                    (rel.source_id.as_str(), rel.target_id.as_str()),
                    (rel.target_id.as_str(), rel.source_id.as_str()),
                ] {
                    if let Some(from_weight) = path_weight.get(from).copied() {
                        let candidate = from_weight * rel.weight;
                        let slot = path_weight.entry(to).or_insert(0.0);
                        if candidate > *slot {
                            *slot = candidate;
                        }
                    }
                }
            }
        }

        for node in &hood.nodes {
            if node.depth == 0 {
                continue;
            }
            let weight = path_weight
                .get(node.entity.id.as_str())
                .copied()
                .unwrap_or(0.0);
            let score = (*seed_score as f64 * weight) as f32;
            if score <= 0.0 {
                continue;
            }
            match best.get_mut(&node.entity.id) {
                Some((_, existing)) if *existing >= score => {}
                Some((_, existing)) => *existing = score,
                None => {
                    best.insert(node.entity.id.clone(), (node.entity.clone(), score));
                }
            }
        }
    }

    Ok(best.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::StoreCapabilities;
    use crate::db::test_support::{setup_project_tables, setup_test_connection};
    use crate::db::{EntityInput, create_entity_sync, create_relationship_sync};

    fn seed_entity(
        conn: &Connection,
        tables: &ProjectTables,
        caps: StoreCapabilities,
        name: &str,
    ) -> Entity {
        create_entity_sync(
            conn,
            tables,
            caps,
            &EntityInput {
                entity_type: "function".to_string(),
                name: name.to_string(),
                qualified_name: format!("m::{name}"),
                content: Some(format!("fn {name}()")),
                metadata: serde_json::json!({}),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_expand_scores_by_weight_and_depth() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "gex");

        let a = seed_entity(&conn, &tables, caps, "a");
        let b = seed_entity(&conn, &tables, caps, "b");
        let c = seed_entity(&conn, &tables, caps, "c");

        create_relationship_sync(&conn, &tables, &a.id, &b.id, "calls", 0.5, serde_json::json!({}))
            .unwrap();
        create_relationship_sync(&conn, &tables, &b.id, &c.id, "calls", 0.5, serde_json::json!({}))
            .unwrap();

        let results = expand_seeds_sync(&conn, &tables, &[(a.clone(), 1.0)], &[]).unwrap();
        let score_of = |id: &str| {
            results
                .iter()
                .find(|(e, _)| e.id == id)
                .map(|(_, s)| *s)
                .unwrap_or(0.0)
        };

        assert!((score_of(&b.id) - 0.5).abs() < 1e-6, "depth 1: 1.0 * 0.5");
        assert!((score_of(&c.id) - 0.25).abs() < 1e-6, "depth 2: 1.0 * 0.5^2");
        assert_eq!(score_of(&a.id), 0.0, "seed itself is not re-scored");
    }

    #[test]
    fn test_expand_respects_depth_cap() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "gdep");

        let ids: Vec<Entity> = ["a", "b", "c", "d"]
            .iter()
            .map(|n| seed_entity(&conn, &tables, caps, n))
            .collect();
        for pair in ids.windows(2) {
            create_relationship_sync(
                &conn,
                &tables,
                &pair[0].id,
                &pair[1].id,
                "calls",
                1.0,
                serde_json::json!({}),
            )
            .unwrap();
        }

        let results = expand_seeds_sync(&conn, &tables, &[(ids[0].clone(), 1.0)], &[]).unwrap();
        assert!(results.iter().any(|(e, _)| e.id == ids[1].id));
        assert!(results.iter().any(|(e, _)| e.id == ids[2].id));
        assert!(
            !results.iter().any(|(e, _)| e.id == ids[3].id),
            "beyond depth 2"
        );
    }

    #[test]
    fn test_best_seed_wins_for_shared_neighbor() {
        let conn = setup_test_connection();
        let (tables, caps) = setup_project_tables(&conn, "gbest");

        let s1 = seed_entity(&conn, &tables, caps, "s1");
        let s2 = seed_entity(&conn, &tables, caps, "s2");
        let shared = seed_entity(&conn, &tables, caps, "shared");

        create_relationship_sync(
            &conn, &tables, &s1.id, &shared.id, "calls", 0.9, serde_json::json!({}),
        )
        .unwrap();
        create_relationship_sync(
            &conn, &tables, &s2.id, &shared.id, "calls", 0.4, serde_json::json!({}),
        )
        .unwrap();

        let results = expand_seeds_sync(
            &conn,
            &tables,
            &[(s1.clone(), 1.0), (s2.clone(), 1.0)],
            &[],
        )
        .unwrap();

        let (_, score) = results.iter().find(|(e, _)| e.id == shared.id).unwrap();
        assert!((score - 0.9).abs() < 1e-6);
    }
}
