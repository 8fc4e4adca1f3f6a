use std::path::PathBuf;

use thiserror::Error;

use crate::release::ChecklistState;
use prwindow::Version;

/// Failure of a single repository operation. Never retried.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("working tree is dirty: {0}")]
    DirtyWorkingTree(String),

    #[error("{operation} left unresolved conflicts in {}", .paths.join(", "))]
    Conflict {
        operation: String,
        paths: Vec<String>,
    },

    #[error("branch not found: {0}")]
    MissingBranch(String),

    #[error("ref not found: {0}")]
    MissingRef(String),

    #[error("tag already exists: {0}")]
    TagExists(String),

    #[error("cannot delete the checked-out branch {0}")]
    BranchCheckedOut(String),

    #[error("no remote is attached to the repository")]
    NoRemote,

    #[error("remote {remote} rejected {refname}: {reason}")]
    PushRejected {
        remote: String,
        refname: String,
        reason: String,
    },

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failure of a release state-machine transition
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("{operation} is not allowed while the checklist is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: ChecklistState,
    },

    #[error("cannot read version file {path}: {reason}")]
    VersionFile { path: String, reason: String },

    #[error("cannot access release state {path}: {reason}")]
    StateFile { path: PathBuf, reason: String },
}

impl ReleaseError {
    pub(crate) fn version_reused(version: Version) -> Self {
        ReleaseError::VersionConflict(format!("{version} is already tagged"))
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;
