// service/mod.rs
// Service facade: per-project component bundles behind one AppContext

pub mod actions;

pub use actions::route;

use crate::analytics::AnalyticsSink;
use crate::config::EngineConfig;
use crate::conversations::ConversationStore;
use crate::db::pool::DatabasePool;
use crate::db::{self, Project, ProjectTables, StoreCapabilities};
use crate::embeddings::EmbeddingProvider;
use crate::error::{CtxError, Result};
use crate::identity::MonotonicClock;
use crate::indexer::Indexer;
use crate::parser::{Parser, TreeSitterParser};
use crate::search::ContextSearch;
use crate::summarize::SummarizerChain;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Fallback vec-table width when no embedding provider is configured at
/// project-creation time.
const DEFAULT_EMBEDDING_DIMS: usize = 1536;

/// Lazily built component bundle for one project.
pub struct ProjectHandle {
    pub project: Project,
    pub tables: ProjectTables,
    pub conversations: ConversationStore,
    pub search: ContextSearch,
    pub indexer: Arc<Indexer>,
    pub analytics: AnalyticsSink,
}

impl std::fmt::Debug for ProjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectHandle")
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

/// Explicit application context passed to every service operation. Owns the
/// pool, providers, and the per-project component cache; there are no
/// hidden singletons.
pub struct AppContext {
    pool: Arc<DatabasePool>,
    config: EngineConfig,
    caps: StoreCapabilities,
    parser: Arc<dyn Parser>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    summarizer: Arc<SummarizerChain>,
    clock: Arc<MonotonicClock>,
    projects: RwLock<HashMap<i64, Arc<ProjectHandle>>>,
}

impl AppContext {
    /// Open the engine: pool, capability probe, provider selection.
    pub async fn initialize(
        config: EngineConfig,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
        summarizer: SummarizerChain,
    ) -> Result<Self> {
        let pool = Arc::new(
            DatabasePool::open(&config.db_path)
                .await
                .map_err(|e| CtxError::Internal(format!("failed to open database: {e}")))?,
        );
        Self::with_pool(pool, config, embeddings, summarizer).await
    }

    /// Build a context over an existing pool (tests use an in-memory one).
    pub async fn with_pool(
        pool: Arc<DatabasePool>,
        config: EngineConfig,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
        summarizer: SummarizerChain,
    ) -> Result<Self> {
        let caps = pool
            .run(|conn| Ok::<_, CtxError>(db::probe_capabilities(conn)))
            .await?;

        Ok(Self {
            pool,
            config,
            caps,
            parser: Arc::new(TreeSitterParser),
            embeddings,
            summarizer: Arc::new(summarizer),
            clock: Arc::new(MonotonicClock::system()),
            projects: RwLock::new(HashMap::new()),
        })
    }

    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn capabilities(&self) -> StoreCapabilities {
        self.caps
    }

    pub fn summarizer(&self) -> &Arc<SummarizerChain> {
        &self.summarizer
    }

    pub fn embeddings(&self) -> Option<&Arc<dyn EmbeddingProvider>> {
        self.embeddings.as_ref()
    }

    fn embedding_dims(&self) -> usize {
        self.embeddings
            .as_ref()
            .map(|e| e.dimensions())
            .unwrap_or(DEFAULT_EMBEDDING_DIMS)
    }

    /// Create a project and its table namespace.
    pub async fn create_project(&self, name: &str, path: &str) -> Result<Project> {
        let caps = self.caps;
        let dims = self.embedding_dims();
        let name = name.to_string();
        let path = path.to_string();
        self.pool
            .run(move |conn| db::create_project_sync(conn, &name, &path, dims, caps))
            .await
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.pool.run(db::list_projects_sync).await
    }

    pub async fn get_project(&self, id: i64) -> Result<Project> {
        self.pool
            .run(move |conn| {
                db::get_project_sync(conn, id)?
                    .ok_or_else(|| CtxError::NotFound(format!("project {}", id)))
            })
            .await
    }

    pub async fn set_active_project(&self, id: i64) -> Result<()> {
        self.pool
            .run(move |conn| db::set_active_project_sync(conn, id))
            .await
    }

    pub async fn active_project(&self) -> Result<Option<Project>> {
        self.pool.run(db::get_active_project_sync).await
    }

    /// Delete a project, dropping its tables and evicting its cached
    /// component bundle.
    pub async fn delete_project(&self, id: i64) -> Result<()> {
        self.pool
            .run(move |conn| db::delete_project_sync(conn, id))
            .await?;
        self.projects.write().await.remove(&id);
        Ok(())
    }

    /// Evict every cached component bundle.
    pub async fn clear_cache(&self) {
        self.projects.write().await.clear();
    }

    /// Cached (or lazily built) component bundle for a project.
    pub async fn project(&self, id: i64) -> Result<Arc<ProjectHandle>> {
        if let Some(handle) = self.projects.read().await.get(&id) {
            return Ok(handle.clone());
        }

        let project = self.get_project(id).await?;
        let tables = project.tables();

        let conversations = ConversationStore::new(
            self.pool.clone(),
            tables.clone(),
            self.caps,
            self.clock.clone(),
            self.config.max_active_messages,
            self.config.auto_summarize,
        );
        let search = ContextSearch::new(
            self.pool.clone(),
            tables.clone(),
            self.caps,
            self.embeddings.clone(),
            Duration::from_secs(self.config.embed_timeout_secs),
        );
        let indexer = Arc::new(Indexer::new(
            self.pool.clone(),
            tables.clone(),
            self.caps,
            self.parser.clone(),
            project.id,
            PathBuf::from(&project.path),
        ));
        let analytics = AnalyticsSink::spawn(self.pool.clone(), tables.clone());

        let handle = Arc::new(ProjectHandle {
            project,
            tables,
            conversations,
            search,
            indexer,
            analytics,
        });

        let mut projects = self.projects.write().await;
        let entry = projects.entry(id).or_insert_with(|| handle.clone());
        Ok(entry.clone())
    }
}
