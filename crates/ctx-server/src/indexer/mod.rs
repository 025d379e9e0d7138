// indexer/mod.rs
// Streaming codebase indexer: walk, filter, parse in batches, upsert

pub mod checkpoint;

use crate::config::EngineConfig;
use crate::config::ignore::{PathFilter, should_skip_dir};
use crate::db::pool::DatabasePool;
use crate::db::{
    self, EntityInput, ProjectTables, StoreCapabilities, UpsertOutcome, with_tx,
};
use crate::error::{CtxError, Result};
use crate::identity::{Clock, SystemClock};
use crate::parser::{ParseResult, Parser};
use crate::utils::content_hash;
use checkpoint::{IndexCheckpoint, ProcessedFile};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use walkdir::WalkDir;

/// Indexing parameters with the documented defaults.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub max_file_size: u64,
    pub max_entities_per_file: usize,
    pub batch_size: usize,
    pub checkpoint_interval: usize,
    /// Re-ingest files even when their content hash is unchanged.
    pub force: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl IndexOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            max_file_size: config.max_file_size,
            max_entities_per_file: config.max_entities_per_file,
            batch_size: config.file_batch_size,
            checkpoint_interval: config.checkpoint_interval,
            force: false,
        }
    }
}

/// Entity-level events from one ingest.
#[derive(Debug, Clone, Default)]
pub struct EntityEvents {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: Vec<String>,
}

impl EntityEvents {
    fn record(&mut self, qualified_name: String, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Added => self.added.push(qualified_name),
            UpsertOutcome::Modified => self.modified.push(qualified_name),
            UpsertOutcome::Unchanged => self.unchanged.push(qualified_name),
        }
    }

    fn extend(&mut self, other: EntityEvents) {
        self.added.extend(other.added);
        self.modified.extend(other.modified);
        self.unchanged.extend(other.unchanged);
    }
}

/// Result of one full or partial index run.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub files_added: Vec<String>,
    pub files_modified: Vec<String>,
    pub files_unchanged: Vec<String>,
    pub files_deleted: Vec<String>,
    pub entities: EntityEvents,
    /// Files over the size limit or otherwise not ingested.
    pub skipped_files: Vec<String>,
    /// (path, error) for per-file parse and I/O failures.
    pub failed_files: Vec<(String, String)>,
    pub errors: Vec<String>,
    /// False when the run was cancelled at a batch boundary.
    pub completed: bool,
}

/// Per-batch progress handed to the completion callback.
#[derive(Debug, Clone)]
pub struct BatchStats {
    pub batch_index: usize,
    pub files_processed: usize,
    pub files_total: usize,
}

pub type BatchCallback = Box<dyn Fn(&BatchStats) + Send + Sync>;

/// Outcome of ingesting one file.
#[derive(Debug)]
pub enum FileOutcome {
    Added(EntityEvents),
    Modified(EntityEvents),
    Unchanged(EntityEvents),
    Skipped(String),
    Failed(String),
}

/// Streaming indexer for one project.
pub struct Indexer {
    pool: Arc<DatabasePool>,
    tables: ProjectTables,
    caps: StoreCapabilities,
    parser: Arc<dyn Parser>,
    project_id: i64,
    project_root: PathBuf,
}

impl Indexer {
    pub fn new(
        pool: Arc<DatabasePool>,
        tables: ProjectTables,
        caps: StoreCapabilities,
        parser: Arc<dyn Parser>,
        project_id: i64,
        project_root: PathBuf,
    ) -> Self {
        Self {
            pool,
            tables,
            caps,
            parser,
            project_id,
            project_root,
        }
    }

    /// Index the whole project root.
    ///
    /// Files stream in batches; a checkpoint persists every
    /// `checkpoint_interval` batches and clears on successful completion.
    /// Cancellation is honored at batch boundaries and keeps the last good
    /// checkpoint. Files indexed in a prior run but gone from disk are
    /// reconciled as deletes.
    pub async fn index_project(
        &self,
        opts: &IndexOptions,
        cancel: Option<watch::Receiver<bool>>,
        on_batch_complete: Option<BatchCallback>,
    ) -> Result<IndexReport> {
        let filter = PathFilter::new(&opts.includes, &opts.excludes)
            .map_err(|e| CtxError::InvalidInput(format!("bad glob pattern: {e}")))?;

        let root = self.project_root.clone();
        let parser = self.parser.clone();
        let files = tokio::task::spawn_blocking(move || {
            enumerate_files(&root, &filter, parser.as_ref())
        })
        .await??;
        tracing::info!(count = files.len(), "enumerated files for indexing");

        let mut report = IndexReport::default();
        let mut checkpoint = if opts.force {
            None
        } else {
            let tables = self.tables.clone();
            self.pool
                .run(move |conn| checkpoint::load_index_checkpoint_sync(conn, &tables))
                .await?
        }
        .unwrap_or_else(|| IndexCheckpoint {
            started_at: SystemClock.now_rfc3339(),
            ..Default::default()
        });

        // Files known from previous runs, for delete reconciliation.
        let prior_files: Vec<String> = {
            let tables = self.tables.clone();
            self.pool
                .run(move |conn| db::list_qualified_names_by_type_sync(conn, &tables, "file"))
                .await?
        };

        let enumerated: HashSet<&str> = files.iter().map(|s| s.as_str()).collect();
        let mut cancelled = false;

        for (batch_index, batch) in files.chunks(opts.batch_size.max(1)).enumerate() {
            if cancel.as_ref().is_some_and(|c| *c.borrow()) {
                tracing::info!(batch_index, "index run cancelled at batch boundary");
                cancelled = true;
                break;
            }

            for rel_path in batch {
                // Resumption: a file recorded by a prior interrupted run is
                // skipped when its mtime is still what we saw.
                if !opts.force
                    && let Some(record) = checkpoint.processed.get(rel_path)
                    && file_mtime_ms(&self.project_root.join(rel_path)) == Some(record.mtime_ms)
                {
                    report.files_unchanged.push(rel_path.clone());
                    let unchanged = self.stored_entity_names(rel_path).await?;
                    report.entities.unchanged.extend(unchanged);
                    continue;
                }

                match self.ingest_path(rel_path, opts).await {
                    FileOutcome::Added(events) => {
                        report.files_added.push(rel_path.clone());
                        report.entities.extend(events);
                        self.record_processed(&mut checkpoint, rel_path).await;
                    }
                    FileOutcome::Modified(events) => {
                        report.files_modified.push(rel_path.clone());
                        report.entities.extend(events);
                        self.record_processed(&mut checkpoint, rel_path).await;
                    }
                    FileOutcome::Unchanged(events) => {
                        report.files_unchanged.push(rel_path.clone());
                        report.entities.extend(events);
                        self.record_processed(&mut checkpoint, rel_path).await;
                    }
                    FileOutcome::Skipped(reason) => {
                        tracing::debug!(path = rel_path.as_str(), reason = reason.as_str(), "file skipped");
                        report.skipped_files.push(rel_path.clone());
                        checkpoint.skipped_files.push(rel_path.clone());
                    }
                    FileOutcome::Failed(error) => {
                        tracing::warn!(path = rel_path.as_str(), "ingest failed: {}", error);
                        report.errors.push(format!("{rel_path}: {error}"));
                        report.failed_files.push((rel_path.clone(), error.clone()));
                        checkpoint.failed_files.push((rel_path.clone(), error));
                    }
                }
            }

            if let Some(callback) = on_batch_complete.as_ref() {
                callback(&BatchStats {
                    batch_index,
                    files_processed: (batch_index * opts.batch_size + batch.len())
                        .min(files.len()),
                    files_total: files.len(),
                });
            }

            if (batch_index + 1) % opts.checkpoint_interval.max(1) == 0 {
                self.persist_checkpoint(&mut checkpoint).await?;
            }
        }

        if cancelled {
            self.persist_checkpoint(&mut checkpoint).await?;
            report.completed = false;
            return Ok(report);
        }

        // Reconcile deletes: previously indexed files missing this run.
        for prior in prior_files {
            if !enumerated.contains(prior.as_str()) {
                let deleted = self.remove_file(&prior).await?;
                if !deleted.is_empty() {
                    report.files_deleted.push(prior);
                }
            }
        }

        // Successful completion clears the checkpoint.
        let tables = self.tables.clone();
        let project_id = self.project_id;
        let now = SystemClock.now_rfc3339();
        self.pool
            .run(move |conn| {
                checkpoint::clear_index_checkpoint_sync(conn, &tables)?;
                db::touch_last_indexed_sync(conn, project_id, &now)?;
                Ok::<_, CtxError>(())
            })
            .await?;

        report.completed = true;
        tracing::info!(
            added = report.files_added.len(),
            modified = report.files_modified.len(),
            unchanged = report.files_unchanged.len(),
            deleted = report.files_deleted.len(),
            failed = report.failed_files.len(),
            "index run complete"
        );
        Ok(report)
    }

    /// Ingest a single file (watcher and git-sync entry point).
    pub async fn index_file(&self, rel_path: &str, opts: &IndexOptions) -> FileOutcome {
        self.ingest_path(rel_path, opts).await
    }

    /// Delete every entity rooted at a path. Returns the removed entity ids.
    pub async fn remove_file(&self, rel_path: &str) -> Result<Vec<String>> {
        let tables = self.tables.clone();
        let caps = self.caps;
        let rel_path = rel_path.to_string();
        self.pool
            .run(move |conn| {
                with_tx(conn, |tx| {
                    db::delete_entities_by_file_sync(tx, &tables, caps, &rel_path)
                })
            })
            .await
    }

    async fn record_processed(&self, checkpoint: &mut IndexCheckpoint, rel_path: &str) {
        let mtime = file_mtime_ms(&self.project_root.join(rel_path)).unwrap_or(0);
        let hash = self
            .stored_hash(rel_path)
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        checkpoint.processed.insert(
            rel_path.to_string(),
            ProcessedFile {
                content_hash: hash,
                mtime_ms: mtime,
            },
        );
    }

    async fn persist_checkpoint(&self, checkpoint: &mut IndexCheckpoint) -> Result<()> {
        checkpoint.updated_at = SystemClock.now_rfc3339();
        let tables = self.tables.clone();
        let snapshot = checkpoint.clone();
        let now = checkpoint.updated_at.clone();
        self.pool
            .run_with_retry(move |conn| {
                checkpoint::save_index_checkpoint_sync(conn, &tables, &snapshot, &now)
            })
            .await
    }

    async fn stored_hash(&self, rel_path: &str) -> Result<Option<String>> {
        let tables = self.tables.clone();
        let rel_path = rel_path.to_string();
        self.pool
            .run(move |conn| db::get_content_hash_sync(conn, &tables, &rel_path))
            .await
    }

    async fn stored_entity_names(&self, rel_path: &str) -> Result<Vec<String>> {
        let tables = self.tables.clone();
        let rel_path = rel_path.to_string();
        self.pool
            .run(move |conn| {
                Ok::<_, CtxError>(
                    db::get_entities_by_file_sync(conn, &tables, &rel_path)?
                        .into_iter()
                        .map(|e| e.qualified_name)
                        .collect(),
                )
            })
            .await
    }

    async fn ingest_path(&self, rel_path: &str, opts: &IndexOptions) -> FileOutcome {
        let full_path = self.project_root.join(rel_path);

        let metadata = match tokio::fs::metadata(&full_path).await {
            Ok(m) => m,
            Err(e) => return FileOutcome::Failed(format!("stat failed: {e}")),
        };
        if metadata.len() > opts.max_file_size {
            return FileOutcome::Skipped(format!(
                "file size {} exceeds limit {}",
                metadata.len(),
                opts.max_file_size
            ));
        }

        let content = match tokio::fs::read_to_string(&full_path).await {
            Ok(c) => c,
            Err(e) => return FileOutcome::Failed(format!("read failed: {e}")),
        };
        let source_hash = content_hash(&content);

        if !opts.force {
            match self.stored_hash(rel_path).await {
                Ok(Some(stored)) if stored == source_hash => {
                    let unchanged = self
                        .stored_entity_names(rel_path)
                        .await
                        .unwrap_or_default();
                    return FileOutcome::Unchanged(EntityEvents {
                        unchanged,
                        ..Default::default()
                    });
                }
                Ok(_) => {}
                Err(e) => return FileOutcome::Failed(e.to_string()),
            }
        }

        // Parse is CPU-bound; move it off the async runtime.
        let parser = self.parser.clone();
        let rel_owned = rel_path.to_string();
        let content_for_parse = content.clone();
        let parse_result = match tokio::task::spawn_blocking(move || {
            parser.parse(&rel_owned, &content_for_parse)
        })
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return FileOutcome::Failed(e.to_string()),
            Err(e) => return FileOutcome::Failed(format!("parse task failed: {e}")),
        };

        let tables = self.tables.clone();
        let caps = self.caps;
        let rel_owned = rel_path.to_string();
        let max_entities = opts.max_entities_per_file;
        let result = self
            .pool
            .run(move |conn| {
                with_tx(conn, |tx| {
                    ingest_parsed_sync(
                        tx,
                        &tables,
                        caps,
                        &rel_owned,
                        &content,
                        &source_hash,
                        &parse_result,
                        max_entities,
                    )
                })
            })
            .await;

        match result {
            Ok((events, file_outcome)) => match file_outcome {
                UpsertOutcome::Added => FileOutcome::Added(events),
                UpsertOutcome::Modified => FileOutcome::Modified(events),
                UpsertOutcome::Unchanged => FileOutcome::Unchanged(events),
            },
            Err(e) => FileOutcome::Failed(e.to_string()),
        }
    }
}

/// Walk the project, pruning excluded directories, returning sorted
/// project-relative paths the parser recognizes.
fn enumerate_files(root: &Path, filter: &PathFilter, parser: &dyn Parser) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir() && should_skip_dir(&e.file_name().to_string_lossy()))
        })
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("walk error during enumeration: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if filter.matches(&rel) && parser.supports(&rel) {
            files.push(rel);
        }
    }
    files.sort();
    Ok(files)
}

fn file_mtime_ms(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let duration = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(duration.as_millis() as i64)
}

/// Compact file-entity content: what the file exposes and pulls in.
fn file_overview(parse: &ParseResult) -> String {
    let mut overview = format!("Language: {}", parse.language);
    if !parse.exports.is_empty() {
        overview.push_str(&format!("\nExports: {}", parse.exports.join(", ")));
    }
    if !parse.imports.is_empty() {
        let imports: Vec<&str> = parse.imports.iter().map(|i| i.path.as_str()).collect();
        overview.push_str(&format!("\nImports: {}", imports.join(", ")));
    }
    if !parse.symbols.is_empty() {
        let symbols: Vec<&str> = parse
            .symbols
            .iter()
            .filter(|s| s.parent.is_none())
            .map(|s| s.name.as_str())
            .collect();
        overview.push_str(&format!("\nSymbols: {}", symbols.join(", ")));
    }
    overview
}

/// Upsert the file entity, its symbol entities, derived relationships, and
/// drop symbols that disappeared. Runs inside the caller's transaction.
fn ingest_parsed_sync(
    conn: &rusqlite::Connection,
    tables: &ProjectTables,
    caps: StoreCapabilities,
    rel_path: &str,
    content: &str,
    source_hash: &str,
    parse: &ParseResult,
    max_entities: usize,
) -> std::result::Result<(EntityEvents, UpsertOutcome), CtxError> {
    let mut events = EntityEvents::default();
    let lines: Vec<&str> = content.lines().collect();

    let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path).to_string();
    let (file_entity, file_outcome) = db::upsert_entity_sync(
        conn,
        tables,
        caps,
        &EntityInput {
            entity_type: "file".to_string(),
            name: file_name,
            qualified_name: rel_path.to_string(),
            content: Some(file_overview(parse)),
            file_path: Some(rel_path.to_string()),
            content_hash: Some(source_hash.to_string()),
            metadata: serde_json::json!({ "language": parse.language }),
            ..Default::default()
        },
    )?;
    events.record(rel_path.to_string(), file_outcome);

    // Symbol entities, bounded per file, in source order.
    let mut symbols: Vec<_> = parse.symbols.iter().collect();
    symbols.sort_by_key(|s| s.start_line);
    let mut kept_names: HashSet<String> = HashSet::new();
    kept_names.insert(rel_path.to_string());

    for symbol in symbols.into_iter().take(max_entities) {
        let start = symbol.start_line.saturating_sub(1) as usize;
        let end = (symbol.end_line as usize).min(lines.len());
        let snippet = if start < end {
            lines[start..end].join("\n")
        } else {
            String::new()
        };

        let qualified = format!("{}::{}", rel_path, symbol.qualified_name);
        let (_, outcome) = db::upsert_entity_sync(
            conn,
            tables,
            caps,
            &EntityInput {
                entity_type: symbol.symbol_type.clone(),
                name: symbol.name.clone(),
                qualified_name: qualified.clone(),
                content: Some(snippet),
                file_path: Some(rel_path.to_string()),
                start_line: Some(symbol.start_line),
                end_line: Some(symbol.end_line),
                metadata: serde_json::json!({
                    "signature": symbol.signature,
                    "docstring": symbol.docstring,
                    "parent": symbol.parent,
                }),
                ..Default::default()
            },
        )?;
        events.record(qualified.clone(), outcome);
        kept_names.insert(qualified);
    }

    // Symbols that vanished from the file.
    for existing in db::get_entities_by_file_sync(conn, tables, rel_path)? {
        if !kept_names.contains(&existing.qualified_name) {
            db::delete_entity_sync(conn, tables, caps, &existing.id)?;
        }
    }

    // Call edges within the file.
    for call in &parse.calls {
        let caller_qualified = format!("{}::{}", rel_path, call.caller_name);
        let Some(callee) = parse
            .symbols
            .iter()
            .find(|s| s.name == call.callee_name || s.qualified_name == call.callee_name)
        else {
            continue;
        };
        let callee_qualified = format!("{}::{}", rel_path, callee.qualified_name);
        if caller_qualified == callee_qualified {
            continue;
        }
        let caller = db::get_entity_by_qualified_name_sync(conn, tables, &caller_qualified)?;
        let target = db::get_entity_by_qualified_name_sync(conn, tables, &callee_qualified)?;
        if let (Some(caller), Some(target)) = (caller, target) {
            db::ensure_relationship_sync(conn, tables, &caller.id, &target.id, "calls", 0.8)?;
        }
    }

    // Import edges to sibling files already in the index.
    for import in parse.imports.iter().filter(|i| !i.is_external) {
        for candidate in resolve_relative_import(rel_path, &import.path) {
            if let Some(target) = db::get_entity_by_qualified_name_sync(conn, tables, &candidate)? {
                db::ensure_relationship_sync(
                    conn,
                    tables,
                    &file_entity.id,
                    &target.id,
                    "imports",
                    0.6,
                )?;
                break;
            }
        }
    }

    Ok((events, file_outcome))
}

/// Candidate project-relative paths for a relative import specifier.
fn resolve_relative_import(from: &str, import: &str) -> Vec<String> {
    let base = match from.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    };

    let mut components: Vec<&str> = if base.is_empty() {
        Vec::new()
    } else {
        base.split('/').collect()
    };
    for part in import.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            other => components.push(other),
        }
    }
    let joined = components.join("/");
    if joined.is_empty() {
        return Vec::new();
    }

    let mut candidates = vec![joined.clone()];
    for ext in ["ts", "tsx", "js", "jsx", "rs", "py", "go"] {
        candidates.push(format!("{joined}.{ext}"));
    }
    candidates.push(format!("{joined}/index.ts"));
    candidates.push(format!("{joined}/mod.rs"));
    candidates
}
