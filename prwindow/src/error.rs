use std::fmt;
use thiserror::Error;

/// Why a pair of refs does not describe a deploy window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeProblem {
    /// The refs share no history
    Unrelated,
    /// The upper ref is an ancestor of (or a lower version than) the lower ref
    Reversed,
}

impl fmt::Display for RangeProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeProblem::Unrelated => write!(f, "the refs share no history"),
            RangeProblem::Reversed => write!(f, "the lower ref is not behind the upper ref"),
        }
    }
}

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("invalid range {lower}..{upper}: {problem}")]
    InvalidRange {
        lower: String,
        upper: String,
        problem: RangeProblem,
    },

    #[error("unknown ref: {0}")]
    UnknownRef(String),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

pub type Result<T> = std::result::Result<T, WindowError>;
