// search/mod.rs
// Multi-strategy retrieval and context assembly

mod assemble;
mod decompose;
mod fusion;
mod graph;

pub use assemble::{
    AssembleOptions, ContextBundle, RenderFormat, TokenEstimator, assemble_context,
    default_estimator,
};
pub use decompose::{SubQuery, decompose_query};
pub use fusion::{ScoredEntity, Strategy, StrategyResults, equal_weights};
pub use graph::{GRAPH_EXPANSION_DEPTH, GRAPH_SEED_COUNT, expand_seeds_sync};

use crate::db::pool::DatabasePool;
use crate::db::{self, Entity, ProjectTables, StoreCapabilities};
use crate::embeddings::{EmbeddingProvider, embed_query};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Search parameters.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub strategies: Vec<Strategy>,
    pub limit: usize,
    pub entity_types: Vec<String>,
    pub min_score: f32,
    /// Split the query into weighted sub-queries before searching.
    pub decompose: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            strategies: vec![Strategy::Keyword, Strategy::Semantic, Strategy::Graph],
            limit: 10,
            entity_types: Vec::new(),
            min_score: 0.3,
            decompose: false,
        }
    }
}

/// Ranked search output plus the strategies that actually ran.
#[derive(Debug)]
pub struct SearchOutcome {
    pub results: Vec<ScoredEntity>,
    pub strategies_used: Vec<Strategy>,
}

/// Retrieval engine for one project.
pub struct ContextSearch {
    pool: Arc<DatabasePool>,
    tables: ProjectTables,
    caps: StoreCapabilities,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    embed_timeout: Duration,
}

impl ContextSearch {
    pub fn new(
        pool: Arc<DatabasePool>,
        tables: ProjectTables,
        caps: StoreCapabilities,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            tables,
            caps,
            embeddings,
            embed_timeout,
        }
    }

    /// Run the requested strategies and fuse their scores.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<SearchOutcome> {
        let sub_queries = if opts.decompose {
            decompose_query(query)
        } else {
            vec![SubQuery {
                text: query.to_string(),
                weight: 1.0,
            }]
        };

        let mut merged = StrategyResults::new();
        let mut strategies_used: Vec<Strategy> = Vec::new();

        for sub in &sub_queries {
            let (results, used) = self.run_strategies(&sub.text, opts).await?;
            for strategy in used {
                if !strategies_used.contains(&strategy) {
                    strategies_used.push(strategy);
                }
            }
            merged.merge_weighted(results, sub.weight);
        }

        let weights = equal_weights(&opts.strategies);
        let mut results = merged.fuse(&weights, opts.min_score);
        if !opts.entity_types.is_empty() {
            results.retain(|r| opts.entity_types.contains(&r.entity.entity_type));
        }
        results.truncate(opts.limit);

        Ok(SearchOutcome {
            results,
            strategies_used,
        })
    }

    /// Search, then pack the ranked entities under a token budget.
    pub async fn query_context(
        &self,
        query: &str,
        opts: &SearchOptions,
        assemble_opts: &AssembleOptions,
    ) -> Result<(ContextBundle, Vec<Strategy>)> {
        let outcome = self.search(query, opts).await?;
        let bundle = assemble_context(&outcome.results, assemble_opts);
        Ok((bundle, outcome.strategies_used))
    }

    async fn run_strategies(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<(StrategyResults, Vec<Strategy>)> {
        let mut results = StrategyResults::new();
        let mut used = Vec::new();

        let want = |s: Strategy| opts.strategies.contains(&s);
        let need_keyword = want(Strategy::Keyword) || want(Strategy::Graph);

        // Keyword: FTS rank, also the seed source for graph expansion.
        let keyword_hits: Vec<(Entity, f32)> = if need_keyword {
            let tables = self.tables.clone();
            let caps = self.caps;
            let q = query.to_string();
            let limit = opts.limit.max(GRAPH_SEED_COUNT);
            self.pool
                .run(move |conn| db::search_entities_sync(conn, &tables, caps, &q, None, limit))
                .await?
        } else {
            Vec::new()
        };

        if want(Strategy::Keyword) {
            used.push(Strategy::Keyword);
            for (entity, score) in &keyword_hits {
                results.add(Strategy::Keyword, entity.clone(), *score);
            }
        }

        // Semantic: query embedding against chunk vectors, max per entity.
        if want(Strategy::Semantic) {
            if let Some(provider) = self.embeddings.as_ref() {
                match embed_query(provider.as_ref(), query, self.embed_timeout).await {
                    Ok(vector) => {
                        used.push(Strategy::Semantic);
                        let tables = self.tables.clone();
                        let caps = self.caps;
                        let k = opts.limit * 4;
                        let matches = self
                            .pool
                            .run(move |conn| db::knn_chunks_sync(conn, &tables, caps, &vector, k))
                            .await?;

                        let mut per_entity: HashMap<String, f32> = HashMap::new();
                        for m in matches {
                            let slot = per_entity.entry(m.entity_id).or_insert(0.0);
                            if m.score > *slot {
                                *slot = m.score;
                            }
                        }
                        let lookups = per_entity.into_iter().map(|(entity_id, score)| {
                            let tables = self.tables.clone();
                            async move {
                                let entity = self
                                    .pool
                                    .run(move |conn| db::get_entity_sync(conn, &tables, &entity_id))
                                    .await?;
                                Ok::<_, crate::error::CtxError>(entity.map(|e| (e, score)))
                            }
                        });
                        for fetched in futures::future::join_all(lookups).await {
                            if let Some((entity, score)) = fetched? {
                                results.add(Strategy::Semantic, entity, score);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("semantic strategy skipped: {}", e);
                    }
                }
            } else {
                tracing::debug!("semantic strategy skipped: no embedding provider");
            }
        }

        // Graph: expand neighborhoods of the keyword seeds.
        if want(Strategy::Graph) && !keyword_hits.is_empty() {
            used.push(Strategy::Graph);
            let tables = self.tables.clone();
            let seeds: Vec<(Entity, f32)> = keyword_hits
                .iter()
                .take(GRAPH_SEED_COUNT)
                .cloned()
                .collect();
            let expanded = self
                .pool
                .run(move |conn| expand_seeds_sync(conn, &tables, &seeds, &[]))
                .await?;
            for (entity, score) in expanded {
                results.add(Strategy::Graph, entity, score);
            }
        }

        Ok((results, used))
    }
}
