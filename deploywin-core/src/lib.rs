//! Git driver and release state machine for a main/staging/production
//! deploy pipeline.

pub mod cherry_pick;
pub mod commit;
pub mod config;
pub mod error;
pub mod merge;
pub mod release;
pub mod remote;
pub mod repository;
pub mod sandbox;
pub mod scenario;
pub mod tag;

pub use cherry_pick::{CherryPickOps, CommitRange};
pub use commit::{Commit, FileChange, Status};
pub use config::{BranchNames, ConfigError, PipelineConfig};
pub use error::{ReleaseError, RepositoryError};
pub use merge::{ConflictStrategy, MergeOps};
pub use release::{BumpKind, ChecklistState, PullRequest, Release, ReleaseState, ReleaseStatus};
pub use remote::{RemoteOps, TransferProgress};
pub use repository::{Identity, Repository};
pub use sandbox::Sandbox;
pub use scenario::{Scenario, Step};
pub use tag::{TagInfo, TagOps};
