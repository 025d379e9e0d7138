// watcher/git_sync.rs
// VcsDiff capability and the git2-backed implementation

use crate::error::{CtxError, Result};
use std::path::{Path, PathBuf};

/// Paths changed since a reference point, relative to the repo root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangedFiles {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangedFiles {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// VCS diff capability consumed by the sync loop.
pub trait VcsDiff: Send + Sync {
    /// Files changed between `since` (a commit SHA) and the working tree.
    fn changed_files(&self, since: &str) -> Result<ChangedFiles>;

    /// Current HEAD commit id.
    fn head_commit(&self) -> Result<String>;
}

/// git2-backed implementation.
pub struct Git2Diff {
    repo_path: PathBuf,
}

impl Git2Diff {
    pub fn new(repo_path: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
        }
    }

    fn open(&self) -> Result<git2::Repository> {
        git2::Repository::discover(&self.repo_path).map_err(Into::into)
    }
}

impl VcsDiff for Git2Diff {
    fn changed_files(&self, since: &str) -> Result<ChangedFiles> {
        if since.trim().is_empty() || since.starts_with('-') {
            return Err(CtxError::InvalidInput(format!("invalid git ref: '{since}'")));
        }

        let repo = self.open()?;
        let object = repo
            .revparse_single(since)
            .map_err(|_| CtxError::NotFound(format!("git ref '{since}'")))?;
        let commit = object
            .peel_to_commit()
            .map_err(|_| CtxError::InvalidInput(format!("'{since}' is not a commit")))?;
        let old_tree = commit.tree()?;

        let mut diff_opts = git2::DiffOptions::new();
        diff_opts.include_untracked(true).recurse_untracked_dirs(true);
        let diff =
            repo.diff_tree_to_workdir_with_index(Some(&old_tree), Some(&mut diff_opts))?;

        let mut changed = ChangedFiles::default();
        for delta in diff.deltas() {
            let new_path = delta
                .new_file()
                .path()
                .map(|p| p.to_string_lossy().replace('\\', "/"));
            let old_path = delta
                .old_file()
                .path()
                .map(|p| p.to_string_lossy().replace('\\', "/"));

            match delta.status() {
                git2::Delta::Added | git2::Delta::Untracked | git2::Delta::Copied => {
                    if let Some(p) = new_path {
                        changed.added.push(p);
                    }
                }
                git2::Delta::Modified | git2::Delta::Typechange => {
                    if let Some(p) = new_path {
                        changed.modified.push(p);
                    }
                }
                git2::Delta::Deleted => {
                    if let Some(p) = old_path {
                        changed.deleted.push(p);
                    }
                }
                git2::Delta::Renamed => {
                    if let Some(p) = old_path {
                        changed.deleted.push(p);
                    }
                    if let Some(p) = new_path {
                        changed.added.push(p);
                    }
                }
                _ => {}
            }
        }
        Ok(changed)
    }

    fn head_commit(&self) -> Result<String> {
        let repo = self.open()?;
        let head = repo.head()?.peel_to_commit()?;
        Ok(head.id().to_string())
    }
}
