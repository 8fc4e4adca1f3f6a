//! The release state machine: PR merges, version bumps, branch promotions
//! and release tags, driven through [`Repository`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use git2::Oid;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cherry_pick::CommitRange;
use crate::commit::FileChange;
use crate::config::PipelineConfig;
use crate::error::ReleaseError;
use crate::repository::Repository;
use crate::tag::TagInfo;
use prwindow::{BranchConvention, PrId, Version};

type Result<T> = std::result::Result<T, ReleaseError>;

/// Whether main flows into staging on the next recreation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistState {
    #[default]
    Unlocked,
    /// Only cherry-picks reach staging
    Locked,
}

impl fmt::Display for ChecklistState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecklistState::Unlocked => write!(f, "unlocked"),
            ChecklistState::Locked => write!(f, "locked"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BumpKind {
    Patch,
    Minor,
}

impl BumpKind {
    pub fn apply(self, version: Version) -> Version {
        match self {
            BumpKind::Patch => version.next_patch(),
            BumpKind::Minor => version.next_minor(),
        }
    }
}

/// Contents of the version file
#[derive(Debug, Deserialize)]
struct VersionFile {
    version: String,
}

pub(crate) fn version_file_contents(version: Version) -> String {
    format!("{:#}\n", serde_json::json!({ "version": version.to_string() }))
}

/// A pull request: one branch, one commit of file changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub id: PrId,
    pub title: String,
    pub changes: Vec<FileChange>,
}

impl PullRequest {
    pub fn new(id: u64, title: impl Into<String>, changes: Vec<FileChange>) -> Self {
        PullRequest {
            id: PrId(id),
            title: title.into(),
            changes,
        }
    }

    /// A PR that writes a single file
    pub fn single_file(id: u64, path: &str, contents: &str) -> Self {
        PullRequest::new(
            id,
            format!("PR {id}: update {path}"),
            vec![FileChange::write(path, contents)],
        )
    }
}

/// State that survives between CLI invocations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseState {
    pub checklist: ChecklistState,
    /// Branch whose tip the next release tag lands on
    pub current_branch: String,
}

impl ReleaseState {
    pub fn new(current_branch: impl Into<String>) -> Self {
        ReleaseState {
            checklist: ChecklistState::Unlocked,
            current_branch: current_branch.into(),
        }
    }

    /// `<git-dir>/deploywin/state.json`
    pub fn path(git_dir: &Path) -> PathBuf {
        git_dir.join("deploywin").join("state.json")
    }

    /// Stored state, or a fresh one on `default_branch` if none was saved
    pub fn load(git_dir: &Path, default_branch: &str) -> Result<Self> {
        let path = Self::path(git_dir);
        if !path.exists() {
            return Ok(ReleaseState::new(default_branch));
        }

        let content = fs::read_to_string(&path).map_err(|e| ReleaseError::StateFile {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| ReleaseError::StateFile {
            path,
            reason: e.to_string(),
        })
    }

    pub fn save(&self, git_dir: &Path) -> Result<()> {
        let path = Self::path(git_dir);
        let state_error = |reason: String| ReleaseError::StateFile {
            path: path.clone(),
            reason,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| state_error(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| state_error(e.to_string()))?;
        fs::write(&path, json).map_err(|e| state_error(e.to_string()))?;
        Ok(())
    }
}

/// Snapshot for `release status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseStatus {
    pub checklist: ChecklistState,
    pub current_branch: String,
    pub version: String,
    pub tags: Vec<String>,
}

/// Release state machine over a repository
pub struct Release<'r> {
    repo: &'r Repository,
    config: &'r PipelineConfig,
    convention: BranchConvention,
    state: ReleaseState,
}

impl<'r> Release<'r> {
    pub fn new(repo: &'r Repository, config: &'r PipelineConfig) -> Self {
        Release {
            repo,
            config,
            convention: config.convention(),
            state: ReleaseState::new(&config.branches.main),
        }
    }

    pub fn with_state(mut self, state: ReleaseState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &ReleaseState {
        &self.state
    }

    pub fn checklist(&self) -> ChecklistState {
        self.state.checklist
    }

    /// Version recorded in the version file on main
    pub fn current_version(&self) -> Result<Version> {
        let path = &self.config.version_file;
        let version_error = |reason: String| ReleaseError::VersionFile {
            path: path.clone(),
            reason,
        };

        let content = self
            .repo
            .read_file_at(&self.config.branches.main, path)?
            .ok_or_else(|| version_error("missing".to_string()))?;
        let file: VersionFile =
            serde_json::from_str(&content).map_err(|e| version_error(e.to_string()))?;
        file.version
            .parse()
            .map_err(|e: prwindow::ParseVersionError| version_error(e.to_string()))
    }

    /// Versions that already have a tag
    pub fn released_versions(&self) -> Result<Vec<Version>> {
        let mut versions: Vec<Version> = self
            .repo
            .tag_list()?
            .iter()
            .filter_map(|tag| tag.name.parse().ok())
            .collect();
        versions.sort();
        Ok(versions)
    }

    /// Merge a PR into main through its own branch. Returns the merge commit.
    pub fn merge_pr(&mut self, pr: &PullRequest) -> Result<Oid> {
        let config = self.config;
        let main = &config.branches.main;
        let branch = self.convention.pr_branch(pr.id);

        self.repo.create_branch(&branch, self.repo.branch_tip(main)?)?;
        self.repo.switch_branch(&branch)?;
        self.repo.commit(&pr.changes, &pr.title)?;

        let message = self.convention.merge_message(pr.id, &branch);
        let merge = self
            .repo
            .merge(&branch, main, config.conflict_strategy, &message)?;
        self.repo.delete_branch(&branch)?;

        info!(pr = %pr.id, commit = %merge, "merged pull request");
        Ok(merge)
    }

    /// Commit the next version to the version file on main
    pub fn bump_version(&mut self, kind: BumpKind) -> Result<Version> {
        let current = self.current_version()?;
        let next = kind.apply(current);

        if self.repo.tag_exists(&next.to_string()) {
            return Err(ReleaseError::version_reused(next));
        }
        if let Some(latest) = self.released_versions()?.last() {
            if next <= *latest {
                return Err(ReleaseError::VersionConflict(format!(
                    "{next} is not newer than released {latest}"
                )));
            }
        }

        self.repo.switch_branch(&self.config.branches.main)?;
        self.repo.commit(
            &[FileChange::write(&self.config.version_file, version_file_contents(next))],
            &format!("Update version to {next}"),
        )?;

        info!(from = %current, to = %next, "bumped version");
        Ok(next)
    }

    /// staging := main
    pub fn recreate_staging(&mut self) -> Result<()> {
        if self.state.checklist == ChecklistState::Locked {
            return Err(ReleaseError::InvalidTransition {
                operation: "recreate_staging",
                state: self.state.checklist,
            });
        }

        let config = self.config;
        let branches = &config.branches;
        let tip = self.repo.branch_tip(&branches.main)?;
        self.repo.reset_branch(&branches.staging, tip)?;
        self.state.current_branch = branches.staging.clone();

        info!(%tip, "recreated staging from main");
        Ok(())
    }

    /// production := staging, closing the checklist
    pub fn recreate_production(&mut self) -> Result<()> {
        let config = self.config;
        let branches = &config.branches;
        let tip = self.repo.branch_tip(&branches.staging)?;
        self.repo.reset_branch(&branches.production, tip)?;
        self.state.current_branch = branches.production.clone();
        self.state.checklist = ChecklistState::Unlocked;

        info!(%tip, "recreated production from staging");
        Ok(())
    }

    /// Merge a PR into main, bump the patch version, and carry both commits
    /// onto staging. Returns the merge commit on staging.
    pub fn cherry_pick_to_staging(&mut self, pr: &PullRequest) -> Result<Oid> {
        let merge = self.merge_pr(pr)?;
        let version = self.bump_version(BumpKind::Patch)?;

        let config = self.config;
        let branches = &config.branches;
        let strategy = config.conflict_strategy;
        let bump = self.repo.branch_tip(&branches.main)?;
        let merge_parent = self
            .repo
            .git_repo()
            .find_commit(merge)
            .and_then(|commit| commit.parent_id(0))
            .map_err(crate::error::RepositoryError::from)?;

        let scratch = self.convention.cherry_pick_branch(pr.id);
        self.repo.create_branch(&scratch, self.repo.branch_tip(&branches.staging)?)?;
        self.repo.switch_branch(&scratch)?;
        self.repo
            .cherry_pick(CommitRange::new(merge_parent, bump), 1, strategy)?;

        let message = format!("Merge branch '{scratch}' into {}", branches.staging);
        let folded = self.repo.merge(&scratch, &branches.staging, strategy, &message)?;
        self.repo.delete_branch(&scratch)?;
        self.state.current_branch = branches.staging.clone();

        info!(pr = %pr.id, %version, commit = %folded, "cherry-picked to staging");
        Ok(folded)
    }

    /// Tag the current branch tip with the current version
    pub fn tag_release(&mut self) -> Result<TagInfo> {
        let version = self.current_version()?.to_string();
        let target = self.repo.branch_tip(&self.state.current_branch)?;

        if self.repo.tag_exists(&version) {
            let existing = self.repo.tag_info(&version)?;
            if existing.target == target {
                debug!(tag = %version, "release already tagged");
                return Ok(existing);
            }
            return Err(ReleaseError::VersionConflict(format!(
                "{version} already tags {}",
                existing.target
            )));
        }

        let tag = self.repo.tag(&version, target)?;
        info!(tag = %version, branch = %self.state.current_branch, "tagged release");
        Ok(tag)
    }

    pub fn lock_checklist(&mut self) {
        self.set_checklist(ChecklistState::Locked);
    }

    pub fn unlock_checklist(&mut self) {
        self.set_checklist(ChecklistState::Unlocked);
    }

    fn set_checklist(&mut self, checklist: ChecklistState) {
        if self.state.checklist != checklist {
            info!(from = %self.state.checklist, to = %checklist, "checklist");
            self.state.checklist = checklist;
        }
    }

    pub fn status(&self) -> Result<ReleaseStatus> {
        Ok(ReleaseStatus {
            checklist: self.state.checklist,
            current_branch: self.state.current_branch.clone(),
            version: self.current_version()?.to_string(),
            tags: self.repo.tag_list()?.into_iter().map(|tag| tag.name).collect(),
        })
    }
}
