use std::fs;
use std::path::Path;

use git2::{Oid, Repository as Git2Repository, Signature, StatusOptions};
use serde::{Deserialize, Serialize};

use crate::error::{RepositoryError, Result};

/// One file edit applied by a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileChange {
    Write { path: String, contents: String },
    Delete { path: String },
}

impl FileChange {
    pub fn write(path: impl Into<String>, contents: impl Into<String>) -> Self {
        FileChange::Write {
            path: path.into(),
            contents: contents.into(),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        FileChange::Delete { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            FileChange::Write { path, .. } | FileChange::Delete { path } => path,
        }
    }
}

pub struct Commit<'repo> {
    repo: &'repo Git2Repository,
}

impl<'repo> Commit<'repo> {
    pub fn new(repo: &'repo Git2Repository) -> Self {
        Commit { repo }
    }

    /// Write the changes into the working tree and stage them
    pub fn stage_changes(&self, changes: &[FileChange]) -> Result<()> {
        let workdir = self.repo.workdir().ok_or_else(|| {
            RepositoryError::Git(git2::Error::from_str("bare repository has no working tree"))
        })?;
        let mut index = self.repo.index()?;

        for change in changes {
            let full_path = workdir.join(change.path());
            match change {
                FileChange::Write { path, contents } => {
                    if let Some(parent) = full_path.parent() {
                        fs::create_dir_all(parent).map_err(|source| RepositoryError::Io {
                            path: parent.to_path_buf(),
                            source,
                        })?;
                    }
                    fs::write(&full_path, contents).map_err(|source| RepositoryError::Io {
                        path: full_path.clone(),
                        source,
                    })?;
                    index.add_path(Path::new(path))?;
                }
                FileChange::Delete { path } => {
                    if full_path.exists() {
                        fs::remove_file(&full_path).map_err(|source| RepositoryError::Io {
                            path: full_path.clone(),
                            source,
                        })?;
                    }
                    index.remove_path(Path::new(path))?;
                }
            }
        }

        index.write()?;
        Ok(())
    }

    /// Create a commit from the index on top of HEAD (or as a root commit)
    pub fn create_with_signature(
        &self,
        message: &str,
        author: &Signature,
        committer: &Signature,
    ) -> Result<Oid> {
        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let parent_commit = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };

        let parents = if let Some(ref parent) = parent_commit {
            vec![parent]
        } else {
            vec![]
        };

        let oid = self.repo.commit(
            Some("HEAD"),
            author,
            committer,
            message,
            &tree,
            &parents,
        )?;

        Ok(oid)
    }
}

/// Paths with uncommitted changes, untracked files included
pub struct Status<'repo> {
    repo: &'repo Git2Repository,
}

impl<'repo> Status<'repo> {
    pub fn new(repo: &'repo Git2Repository) -> Self {
        Status { repo }
    }

    pub fn dirty_paths(&self) -> Result<Vec<String>> {
        let mut options = StatusOptions::new();
        options.include_untracked(true);
        options.include_ignored(false);

        let statuses = self.repo.statuses(Some(&mut options))?;
        Ok(statuses
            .iter()
            .filter(|entry| !entry.status().is_ignored())
            .map(|entry| entry.path().unwrap_or("<invalid utf8>").to_string())
            .collect())
    }
}
