// conversations/mod.rs
// Conversation store: sessions, messages, decisions

pub mod extraction;

pub use extraction::{extract_decisions, heuristic_decisions, matches_decision_pattern};

use crate::db::pool::DatabasePool;
use crate::db::{
    self, Decision, EntityInput, Message, MessageMetadata, ProjectTables, Session, SessionStatus,
    StoreCapabilities,
};
use crate::error::{CtxError, Result};
use crate::identity::{Clock, MonotonicClock, new_id};
use crate::summarize::{ExtractedDecision, SummarizerChain};
use crate::utils::truncate;
use std::sync::Arc;

/// Conversation operations for one project.
///
/// Message timestamps come from a monotonic clock so ordering within a
/// session is total even under same-millisecond bursts.
pub struct ConversationStore {
    pool: Arc<DatabasePool>,
    tables: ProjectTables,
    caps: StoreCapabilities,
    clock: Arc<MonotonicClock>,
    max_active_messages: usize,
    auto_summarize: bool,
}

impl ConversationStore {
    pub fn new(
        pool: Arc<DatabasePool>,
        tables: ProjectTables,
        caps: StoreCapabilities,
        clock: Arc<MonotonicClock>,
        max_active_messages: usize,
        auto_summarize: bool,
    ) -> Self {
        Self {
            pool,
            tables,
            caps,
            clock,
            max_active_messages,
            auto_summarize,
        }
    }

    pub async fn create_session(&self, name: Option<String>) -> Result<Session> {
        let tables = self.tables.clone();
        let now = self.clock.now_rfc3339();
        self.pool
            .run(move |conn| db::create_session_sync(conn, &tables, name.as_deref(), &now))
            .await
    }

    pub async fn get_session(&self, id: &str) -> Result<Session> {
        let tables = self.tables.clone();
        let id = id.to_string();
        self.pool
            .run(move |conn| {
                db::get_session_sync(conn, &tables, &id)?
                    .ok_or_else(|| CtxError::NotFound(format!("session {}", id)))
            })
            .await
    }

    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let tables = self.tables.clone();
        self.pool
            .run(move |conn| db::list_sessions_sync(conn, &tables, limit))
            .await
    }

    pub async fn set_session_status(
        &self,
        id: &str,
        status: SessionStatus,
        summary: Option<String>,
    ) -> Result<Session> {
        let tables = self.tables.clone();
        let id = id.to_string();
        let now = self.clock.now_rfc3339();
        self.pool
            .run(move |conn| {
                db::update_session_status_sync(conn, &tables, &id, status, summary.as_deref(), &now)
            })
            .await
    }

    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let tables = self.tables.clone();
        let caps = self.caps;
        let id = id.to_string();
        self.pool
            .run(move |conn| db::delete_session_sync(conn, &tables, caps, &id))
            .await
    }

    /// Store a message. When the session reaches `max_active_messages` and
    /// auto-summarize is enabled, the session is archived.
    pub async fn store_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        metadata: MessageMetadata,
    ) -> Result<Message> {
        let tables = self.tables.clone();
        let caps = self.caps;
        let session_id_owned = session_id.to_string();
        let role = role.to_string();
        let content = content.to_string();
        let created_at = self.clock.now_rfc3339();

        let (message, new_count) = self
            .pool
            .run_with_retry(move |conn| {
                db::with_tx(conn, |tx| {
                    db::create_message_sync(
                        tx,
                        &tables,
                        caps,
                        &session_id_owned,
                        &role,
                        &content,
                        &metadata,
                        &created_at,
                    )
                })
            })
            .await?;

        if self.auto_summarize && new_count as usize >= self.max_active_messages {
            let session = self.get_session(session_id).await?;
            if session.status == SessionStatus::Active {
                tracing::info!(
                    session_id,
                    count = new_count,
                    "session reached message cap, archiving"
                );
                self.set_session_status(session_id, SessionStatus::Archived, None)
                    .await?;
            }
        }

        Ok(message)
    }

    pub async fn delete_message(&self, id: &str) -> Result<bool> {
        let tables = self.tables.clone();
        let caps = self.caps;
        let id = id.to_string();
        let now = self.clock.now_rfc3339();
        self.pool
            .run(move |conn| {
                db::with_tx(conn, |tx| db::delete_message_sync(tx, &tables, caps, &id, &now))
            })
            .await
    }

    pub async fn get_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        let tables = self.tables.clone();
        let session_id = session_id.to_string();
        self.pool
            .run(move |conn| db::get_messages_by_session_sync(conn, &tables, &session_id, limit))
            .await
    }

    pub async fn search_messages(
        &self,
        query: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(Message, f32)>> {
        let tables = self.tables.clone();
        let caps = self.caps;
        let query = query.to_string();
        let session_id = session_id.map(|s| s.to_string());
        self.pool
            .run(move |conn| {
                db::search_messages_sync(conn, &tables, caps, &query, session_id.as_deref(), limit)
            })
            .await
    }

    /// Run decision extraction over a message and persist the results.
    ///
    /// Each decision is stored in the decisions table and mirrored as an
    /// entity of type `decision` (qualified name `decision::<id>`, name
    /// truncated to 50 chars) so it participates in graph retrieval.
    pub async fn extract_and_store_decisions(
        &self,
        chain: &SummarizerChain,
        message: &Message,
    ) -> Result<Vec<Decision>> {
        let extracted = extract_decisions(chain, &message.content).await;
        if extracted.is_empty() {
            return Ok(Vec::new());
        }
        self.store_decisions(&message.session_id, Some(&message.id), extracted)
            .await
    }

    /// Persist already-extracted decisions with their mirror entities.
    pub async fn store_decisions(
        &self,
        session_id: &str,
        message_id: Option<&str>,
        extracted: Vec<ExtractedDecision>,
    ) -> Result<Vec<Decision>> {
        let tables = self.tables.clone();
        let caps = self.caps;
        let session_id = session_id.to_string();
        let message_id = message_id.map(|s| s.to_string());
        let now = self.clock.now_rfc3339();

        self.pool
            .run(move |conn| {
                db::with_tx(conn, |tx| {
                    let mut stored = Vec::with_capacity(extracted.len());
                    for item in &extracted {
                        let decision = Decision {
                            id: new_id(),
                            session_id: session_id.clone(),
                            message_id: message_id.clone(),
                            description: item.description.clone(),
                            context: item.context.clone(),
                            alternatives: item.alternatives.clone(),
                            related_entity_ids: Vec::new(),
                            status: "open".to_string(),
                            superseded_by: None,
                            created_at: now.clone(),
                        };
                        db::insert_decision_sync(tx, &tables, caps, &decision)?;

                        let mirror = EntityInput {
                            entity_type: "decision".to_string(),
                            name: truncate(&decision.description, 50),
                            qualified_name: format!("decision::{}", decision.id),
                            content: Some(match &decision.context {
                                Some(ctx) => format!("{}\n\n{}", decision.description, ctx),
                                None => decision.description.clone(),
                            }),
                            summary: None,
                            metadata: serde_json::json!({
                                "decision_id": decision.id,
                                "session_id": decision.session_id,
                            }),
                            ..Default::default()
                        };
                        db::create_entity_sync(tx, &tables, caps, &mirror)?;
                        stored.push(decision);
                    }
                    Ok::<_, CtxError>(stored)
                })
            })
            .await
    }

    pub async fn list_decisions(
        &self,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Decision>> {
        let tables = self.tables.clone();
        let session_id = session_id.map(|s| s.to_string());
        self.pool
            .run(move |conn| db::list_decisions_sync(conn, &tables, session_id.as_deref(), limit))
            .await
    }

    pub async fn supersede_decision(&self, id: &str, superseded_by: &str) -> Result<()> {
        let tables = self.tables.clone();
        let id = id.to_string();
        let superseded_by = superseded_by.to_string();
        self.pool
            .run(move |conn| db::supersede_decision_sync(conn, &tables, &id, &superseded_by))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_pool_with_project;

    async fn store() -> (ConversationStore, Arc<DatabasePool>, ProjectTables) {
        let (pool, project) = setup_test_pool_with_project().await;
        let tables = project.tables();
        let store = ConversationStore::new(
            pool.clone(),
            tables.clone(),
            StoreCapabilities::all(),
            Arc::new(MonotonicClock::system()),
            5,
            true,
        );
        (store, pool, tables)
    }

    #[tokio::test]
    async fn test_store_message_and_ordering() {
        let (store, _pool, _tables) = store().await;
        let session = store.create_session(Some("demo".to_string())).await.unwrap();

        for i in 0..3 {
            store
                .store_message(
                    &session.id,
                    "user",
                    &format!("msg {i}"),
                    MessageMetadata::default(),
                )
                .await
                .unwrap();
        }

        let messages = store.get_messages(&session.id, None).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "msg 0");
        assert_eq!(messages[2].content, "msg 2");

        let session = store.get_session(&session.id).await.unwrap();
        assert_eq!(session.message_count, 3);
    }

    #[tokio::test]
    async fn test_auto_archive_at_cap() {
        let (store, _pool, _tables) = store().await;
        let session = store.create_session(None).await.unwrap();

        for i in 0..5 {
            store
                .store_message(
                    &session.id,
                    "user",
                    &format!("msg {i}"),
                    MessageMetadata::default(),
                )
                .await
                .unwrap();
        }

        let session = store.get_session(&session.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Archived);
        assert!(session.archived_at.is_some());
    }

    #[tokio::test]
    async fn test_decision_extraction_end_to_end() {
        let (store, _pool, _tables) = store().await;
        let session = store.create_session(None).await.unwrap();
        let message = store
            .store_message(
                &session.id,
                "user",
                "We decided to use PostgreSQL for storage",
                MessageMetadata::default(),
            )
            .await
            .unwrap();

        let chain = SummarizerChain::new(vec![]);
        let decisions = store
            .extract_and_store_decisions(&chain, &message)
            .await
            .unwrap();

        assert!(!decisions.is_empty());
        assert!(decisions[0].description.contains("PostgreSQL"));
        assert_eq!(decisions[0].message_id.as_deref(), Some(message.id.as_str()));
    }

    #[tokio::test]
    async fn test_decision_mirrored_as_entity() {
        let (store, pool, tables) = store().await;
        let session = store.create_session(None).await.unwrap();
        let decisions = store
            .store_decisions(
                &session.id,
                None,
                vec![ExtractedDecision {
                    description: "a".repeat(80),
                    context: Some("because reasons".to_string()),
                    alternatives: vec!["other".to_string()],
                }],
            )
            .await
            .unwrap();

        let id = decisions[0].id.clone();
        let t = tables.clone();
        let entity = pool
            .run(move |conn| {
                db::get_entity_by_qualified_name_sync(conn, &t, &format!("decision::{id}"))
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(entity.entity_type, "decision");
        assert_eq!(entity.name.len(), 53, "50 chars plus ellipsis");
        assert!(entity.content.unwrap().contains("because reasons"));
    }

    #[tokio::test]
    async fn test_non_candidate_message_yields_no_decisions() {
        let (store, _pool, _tables) = store().await;
        let session = store.create_session(None).await.unwrap();
        let message = store
            .store_message(
                &session.id,
                "user",
                "how does the indexer work?",
                MessageMetadata::default(),
            )
            .await
            .unwrap();

        let chain = SummarizerChain::new(vec![]);
        let decisions = store
            .extract_and_store_decisions(&chain, &message)
            .await
            .unwrap();
        assert!(decisions.is_empty());
    }
}
