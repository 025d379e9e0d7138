// db/mod.rs
// Unified database layer with rusqlite + sqlite-vec

mod analytics;
mod embeddings;
mod entities;
mod fts;
pub mod pool;
mod projects;
mod relationships;
pub mod schema;
mod sessions;
#[cfg(test)]
pub mod test_support;
mod types;

pub use analytics::{
    QueryStats, StatsPeriod, get_query_log_sync, get_stats_sync, insert_query_log_sync,
    record_feedback_sync,
};
pub use embeddings::{
    ChunkInsert, ChunkMatch, bytes_to_embedding, chunk_indices_for_entity_sync, cosine_similarity,
    count_chunks_sync, delete_chunks_for_entity_sync, embedding_to_bytes, insert_chunk_sync,
    knn_chunks_sync,
};
pub use entities::{
    MAX_CONTENT_LINES, count_entities_sync, create_entity_sync, delete_entities_by_file_sync,
    delete_entity_sync, get_content_hash_sync, get_entities_by_file_sync,
    get_entity_by_qualified_name_sync, get_entity_sync, list_entities_page_sync,
    list_qualified_names_by_type_sync, search_entities_sync, update_entity_summary_sync,
    upsert_entity_sync,
};
pub use fts::{bm25_to_score, build_fts_query, escape_fts_term, like_patterns};
pub use pool::{DatabasePool, PoolStatus, with_tx};
pub use projects::{
    Project, create_project_sync, delete_project_sync, get_active_project_sync,
    get_project_by_name_sync, get_project_by_slug_sync, get_project_config_sync, get_project_sync,
    list_projects_sync, rebuild_project_fts_sync, set_active_project_sync, set_project_config_sync,
    touch_last_indexed_sync,
};
pub use relationships::{
    Neighborhood, NeighborhoodNode, RelationshipFilter, count_relationships_sync,
    create_relationship_sync, ensure_relationship_sync, get_average_degree_sync,
    get_neighborhood_sync, get_relationship_sync, get_relationships_for_entity_sync,
    stats_by_type_sync,
};
pub use schema::{ProjectTables, StoreCapabilities, probe_capabilities, sanitize_project_slug};
pub use sessions::{
    INDEXER_SESSION_ID, clear_checkpoints_sync, create_message_sync, create_session_sync,
    delete_message_sync, delete_session_sync, get_decision_sync, get_latest_checkpoint_sync,
    get_messages_by_session_sync, get_session_sync, insert_decision_sync, list_checkpoints_sync,
    list_decisions_sync, list_sessions_sync, save_checkpoint_sync, search_decisions_sync,
    search_messages_sync, supersede_decision_sync, update_session_status_sync,
};
pub use types::*;
