use std::cell::Cell;
use std::path::{Path, PathBuf};

use chrono::Utc;
use git2::build::CheckoutBuilder;
use git2::{
    BranchType, ErrorCode, Oid, Repository as Git2Repository, RepositoryInitOptions, Signature,
    Time,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cherry_pick::{CherryPickOps, CommitRange};
use crate::commit::{Commit, FileChange, Status};
use crate::error::{RepositoryError, Result};
use crate::merge::{ConflictStrategy, MergeOps};
use crate::remote::{RemoteOps, TransferProgress, DEFAULT_TOKEN_ENV};
use crate::tag::{TagInfo, TagOps};

/// Author and committer of every commit the driver creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Default for Identity {
    fn default() -> Self {
        Identity {
            name: "deploywin-bot".to_string(),
            email: "deploywin-bot@users.noreply.local".to_string(),
        }
    }
}

/// Remote that mirrors every ref the driver changes
#[derive(Debug, Clone)]
struct RemoteSettings {
    name: String,
    token_env: String,
}

/// Git driver for the release pipeline.
///
/// All mutating operations act on local refs and, when a remote is
/// attached, push the refs they changed before returning.
pub struct Repository {
    path: PathBuf,
    git_repo: Git2Repository,
    identity: Identity,
    /// Last commit time handed out, in seconds
    clock: Cell<i64>,
    remote: Option<RemoteSettings>,
}

impl Repository {
    /// Open an existing repository
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let git_repo = Git2Repository::open(&path)?;
        let clock = newest_branch_time(&git_repo)?;

        Ok(Repository {
            path,
            git_repo,
            identity: Identity::default(),
            clock: Cell::new(clock),
            remote: None,
        })
    }

    /// Initialize a new repository whose unborn HEAD is `initial_branch`
    pub fn init<P: AsRef<Path>>(path: P, initial_branch: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = RepositoryInitOptions::new();
        options.initial_head(initial_branch);
        let git_repo = Git2Repository::init_opts(&path, &options)?;

        Ok(Repository {
            path,
            git_repo,
            identity: Identity::default(),
            clock: Cell::new(0),
            remote: None,
        })
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Mirror ref changes to `remote_name`, authenticating with the token in `token_env`
    pub fn with_remote(mut self, remote_name: &str, token_env: Option<&str>) -> Result<Self> {
        if !RemoteOps::new(&self.git_repo).has_remote(remote_name) {
            return Err(RepositoryError::MissingRef(format!("remote {remote_name}")));
        }
        self.remote = Some(RemoteSettings {
            name: remote_name.to_string(),
            token_env: token_env.unwrap_or(DEFAULT_TOKEN_ENV).to_string(),
        });
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `.git` directory
    pub fn git_dir(&self) -> &Path {
        self.git_repo.path()
    }

    pub fn git_repo(&self) -> &Git2Repository {
        &self.git_repo
    }

    pub fn remote_name(&self) -> Option<&str> {
        self.remote.as_ref().map(|remote| remote.name.as_str())
    }

    pub fn is_clean(&self) -> Result<bool> {
        Ok(Status::new(&self.git_repo).dirty_paths()?.is_empty())
    }

    pub fn ensure_clean(&self) -> Result<()> {
        let dirty = Status::new(&self.git_repo).dirty_paths()?;
        if dirty.is_empty() {
            Ok(())
        } else {
            Err(RepositoryError::DirtyWorkingTree(dirty.join(", ")))
        }
    }

    /// Name of the checked-out branch, born or not
    pub fn current_branch(&self) -> Result<String> {
        let head = self.git_repo.find_reference("HEAD")?;
        let target = head
            .symbolic_target()
            .ok_or_else(|| RepositoryError::MissingBranch("HEAD is detached".to_string()))?;
        Ok(target.strip_prefix("refs/heads/").unwrap_or(target).to_string())
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.git_repo.find_branch(name, BranchType::Local).is_ok()
    }

    pub fn branch_tip(&self, name: &str) -> Result<Oid> {
        let branch = self
            .git_repo
            .find_branch(name, BranchType::Local)
            .map_err(|_| RepositoryError::MissingBranch(name.to_string()))?;
        Ok(branch.get().peel_to_commit()?.id())
    }

    /// Local branch names
    pub fn list_branches(&self) -> Result<Vec<String>> {
        let mut branches = Vec::new();
        for branch in self.git_repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                branches.push(name.to_string());
            }
        }
        branches.sort();
        Ok(branches)
    }

    /// Resolve a branch, tag, or commit hash
    pub fn resolve_commit(&self, spec: &str) -> Result<Oid> {
        let object = self
            .git_repo
            .revparse_single(spec)
            .map_err(|_| RepositoryError::MissingRef(spec.to_string()))?;
        Ok(object.peel_to_commit()?.id())
    }

    /// Contents of `path` on the tip of `branch`, `None` if absent
    pub fn read_file_at(&self, branch: &str, path: &str) -> Result<Option<String>> {
        let tip = self.git_repo.find_commit(self.branch_tip(branch)?)?;
        let entry = match tip.tree()?.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let blob = self.git_repo.find_blob(entry.id())?;
        Ok(Some(String::from_utf8_lossy(blob.content()).into_owned()))
    }

    /// Create a new branch
    pub fn create_branch(&self, name: &str, target: Oid) -> Result<()> {
        let commit = self.git_repo.find_commit(target)?;
        self.git_repo.branch(name, &commit, false)?;

        info!(branch = name, %target, "created branch");
        self.publish_branch(name)
    }

    /// Check out a branch, discarding nothing: the tree must be clean
    pub fn switch_branch(&self, name: &str) -> Result<()> {
        self.ensure_clean()?;
        let branch = self
            .git_repo
            .find_branch(name, BranchType::Local)
            .map_err(|_| RepositoryError::MissingBranch(name.to_string()))?;
        let reference = branch.get();
        let object = reference.peel(git2::ObjectType::Commit)?;
        let refname = reference
            .name()
            .ok_or_else(|| RepositoryError::MissingBranch(name.to_string()))?;

        self.git_repo.checkout_tree(&object, Some(CheckoutBuilder::new().force()))?;
        self.git_repo.set_head(refname)?;

        debug!(branch = name, "switched branch");
        Ok(())
    }

    /// Commit `changes` on the current branch
    pub fn commit(&self, changes: &[FileChange], message: &str) -> Result<Oid> {
        self.ensure_clean()?;
        let commit = Commit::new(&self.git_repo);
        commit.stage_changes(changes)?;

        let signature = self.signature()?;
        let oid = commit.create_with_signature(message, &signature, &signature)?;

        let branch = self.current_branch()?;
        info!(%branch, commit = %oid, subject = message.lines().next().unwrap_or(""), "committed");
        self.publish_branch(&branch)?;
        Ok(oid)
    }

    /// Merge `source` into `target` with a two-parent merge commit.
    ///
    /// Leaves `target` checked out.
    pub fn merge(
        &self,
        source: &str,
        target: &str,
        strategy: ConflictStrategy,
        message: &str,
    ) -> Result<Oid> {
        self.switch_branch(target)?;
        let ours = self.git_repo.find_commit(self.branch_tip(target)?)?;
        let theirs = self.git_repo.find_commit(self.branch_tip(source)?)?;

        let signature = self.signature()?;
        let oid = MergeOps::new(&self.git_repo).merge_commits(
            &ours,
            &theirs,
            strategy,
            message,
            &signature,
            &format!("refs/heads/{target}"),
        )?;
        self.git_repo.checkout_head(Some(CheckoutBuilder::new().force()))?;

        info!(source, target, commit = %oid, "merged");
        self.publish_branch(target)?;
        Ok(oid)
    }

    /// Replay `range` onto the current branch, returning the new tip.
    ///
    /// `mainline` is the 1-based parent merge commits are replayed against.
    pub fn cherry_pick(
        &self,
        range: CommitRange,
        mainline: u32,
        strategy: ConflictStrategy,
    ) -> Result<Oid> {
        self.ensure_clean()?;
        let branch = self.current_branch()?;
        let update_ref = format!("refs/heads/{branch}");
        let ops = CherryPickOps::new(&self.git_repo);

        let mut tip = self.branch_tip(&branch)?;
        for oid in ops.range_commits(range)? {
            let pick = self.git_repo.find_commit(oid)?;
            let onto = self.git_repo.find_commit(tip)?;
            let committer = self.signature()?;
            tip = ops.pick_commit(&pick, &onto, mainline, strategy, &committer, &update_ref)?;
        }
        self.git_repo.checkout_head(Some(CheckoutBuilder::new().force()))?;

        info!(%branch, base = %range.base, tip = %range.tip, new_tip = %tip, "cherry-picked range");
        self.publish_branch(&branch)?;
        Ok(tip)
    }

    pub fn delete_branch(&self, name: &str) -> Result<()> {
        if self.current_branch()? == name {
            return Err(RepositoryError::BranchCheckedOut(name.to_string()));
        }
        let mut branch = self
            .git_repo
            .find_branch(name, BranchType::Local)
            .map_err(|_| RepositoryError::MissingBranch(name.to_string()))?;
        branch.delete()?;

        info!(branch = name, "deleted branch");
        let refspec = format!(":refs/heads/{name}");
        self.publish(&[refspec.as_str()])
    }

    /// Point `name` at `target`, creating it if needed
    pub fn reset_branch(&self, name: &str, target: Oid) -> Result<()> {
        let commit = self.git_repo.find_commit(target)?;
        if self.current_branch()? == name {
            self.ensure_clean()?;
            self.git_repo.reset(commit.as_object(), git2::ResetType::Hard, None)?;
        } else {
            self.git_repo.branch(name, &commit, true)?;
        }

        info!(branch = name, %target, "reset branch");
        self.publish_branch(name)
    }

    /// Lightweight tag on `target`
    pub fn tag(&self, name: &str, target: Oid) -> Result<TagInfo> {
        let tags = TagOps::new(&self.git_repo);
        tags.create(name, target)?;

        info!(tag = name, %target, "tagged");
        let refspec = format!("refs/tags/{name}:refs/tags/{name}");
        self.publish(&[refspec.as_str()])?;
        tags.info(name)
    }

    pub fn tag_list(&self) -> Result<Vec<TagInfo>> {
        TagOps::new(&self.git_repo).list()
    }

    pub fn tag_exists(&self, name: &str) -> bool {
        TagOps::new(&self.git_repo).exists(name)
    }

    pub fn tag_info(&self, name: &str) -> Result<TagInfo> {
        TagOps::new(&self.git_repo).info(name)
    }

    pub fn delete_tag(&self, name: &str) -> Result<()> {
        TagOps::new(&self.git_repo).delete(name)?;
        info!(tag = name, "deleted tag");
        let refspec = format!(":refs/tags/{name}");
        self.publish(&[refspec.as_str()])
    }

    /// Overwrite the remote branch with the local one
    pub fn force_push(&self, branch: &str) -> Result<()> {
        let remote = self.remote.as_ref().ok_or(RepositoryError::NoRemote)?;
        let refspec = format!("+refs/heads/{branch}:refs/heads/{branch}");
        RemoteOps::new(&self.git_repo)
            .with_token_env(&remote.token_env)
            .push(&remote.name, &[refspec.as_str()])
    }

    /// Refresh remote-tracking branches and tags
    pub fn fetch(&self) -> Result<TransferProgress> {
        let remote = self.remote.as_ref().ok_or(RepositoryError::NoRemote)?;
        RemoteOps::new(&self.git_repo)
            .with_token_env(&remote.token_env)
            .fetch(&remote.name)
    }

    fn publish_branch(&self, name: &str) -> Result<()> {
        if self.remote.is_some() {
            self.force_push(name)?;
        }
        Ok(())
    }

    fn publish(&self, refspecs: &[&str]) -> Result<()> {
        if let Some(remote) = &self.remote {
            RemoteOps::new(&self.git_repo)
                .with_token_env(&remote.token_env)
                .push(&remote.name, refspecs)?;
        }
        Ok(())
    }

    /// Driver signature stamped with the next clock tick
    fn signature(&self) -> Result<Signature<'static>> {
        let seconds = self.tick();
        Ok(Signature::new(
            &self.identity.name,
            &self.identity.email,
            &Time::new(seconds, 0),
        )?)
    }

    /// `max(now, last + 1)`, so every commit is strictly newer than the previous one
    fn tick(&self) -> i64 {
        let next = Utc::now().timestamp().max(self.clock.get() + 1);
        self.clock.set(next);
        next
    }
}

fn newest_branch_time(repo: &Git2Repository) -> Result<i64> {
    let mut newest = 0;
    for branch in repo.branches(None)? {
        let (branch, _) = branch?;
        if let Ok(commit) = branch.get().peel_to_commit() {
            newest = newest.max(commit.committer().when().seconds());
        }
    }
    Ok(newest)
}
