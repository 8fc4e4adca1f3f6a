//! Commit-graph queries for deploy windows: which pull requests does a
//! release deliver that the previous release did not.

pub mod core;
pub mod error;
pub mod git_backend;
pub mod pr;
pub mod resolver;
pub mod version;

pub use core::{CommitNode, Dag, DagStats};
pub use error::{RangeProblem, WindowError};
pub use git_backend::GitWalker;
pub use pr::{BranchConvention, MergeSubject, PrId};
pub use resolver::{resolve_merged_between, PrEvent, Resolver, WindowBounds};
pub use version::{ParseVersionError, Version};
