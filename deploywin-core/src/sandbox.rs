use std::path::{Path, PathBuf};

use git2::{Oid, Repository as Git2Repository, ResetType};
use tempfile::TempDir;
use tracing::info;
use uuid::Uuid;

use crate::commit::FileChange;
use crate::config::PipelineConfig;
use crate::error::{RepositoryError, Result};
use crate::release::{version_file_contents, Release};
use crate::remote::RemoteOps;
use crate::repository::Repository;
use prwindow::Version;

pub const INITIAL_VERSION: Version = Version::new(1, 0, 0);

/// Throwaway bare remote plus a working clone wired to it.
///
/// Deleted from disk when dropped.
pub struct Sandbox {
    repo: Repository,
    config: PipelineConfig,
    remote_path: PathBuf,
    seed: Oid,
    run_id: Uuid,
    // Dropped last
    _dir: TempDir,
}

impl Sandbox {
    pub fn create(config: PipelineConfig) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("deploywin-")
            .tempdir()
            .map_err(|source| RepositoryError::Io {
                path: std::env::temp_dir(),
                source,
            })?;

        let remote_path = dir.path().join("remote.git");
        Git2Repository::init_bare(&remote_path)?;

        let repo = Repository::init(dir.path().join("work"), &config.branches.main)?
            .with_identity(config.author.clone());
        RemoteOps::new(repo.git_repo()).add_remote(&config.remote, &remote_path.to_string_lossy())?;
        let repo = repo.with_remote(&config.remote, Some(config.token_env.as_str()))?;

        let seed = repo.commit(
            &[
                FileChange::write(&config.version_file, version_file_contents(INITIAL_VERSION)),
                FileChange::write("README.md", "# Release pipeline sandbox\n"),
            ],
            "Initial commit",
        )?;

        let sandbox = Sandbox {
            repo,
            config,
            remote_path,
            seed,
            run_id: Uuid::new_v4(),
            _dir: dir,
        };
        sandbox.seed_release_refs()?;

        info!(run_id = %sandbox.run_id, path = %sandbox.repo.path().display(), "created sandbox");
        Ok(sandbox)
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn remote_path(&self) -> &Path {
        &self.remote_path
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The root commit every run starts from
    pub fn seed(&self) -> Oid {
        self.seed
    }

    /// A fresh state machine over the sandbox
    pub fn release(&self) -> Release<'_> {
        Release::new(&self.repo, &self.config)
    }

    /// Drop every tag and non-main branch here and on the remote, then
    /// re-seed main, staging, production and the initial tag.
    pub fn reset_repo_to_initial_state(&mut self) -> Result<()> {
        let main = self.config.branches.main.clone();
        let git_repo = self.repo.git_repo();

        // Discard whatever a failed run left behind
        git_repo.set_head(&format!("refs/heads/{main}"))?;
        let seed = git_repo.find_commit(self.seed)?;
        git_repo.reset(seed.as_object(), ResetType::Hard, None)?;
        self.repo.force_push(&main)?;

        for tag in self.repo.tag_list()? {
            self.repo.delete_tag(&tag.name)?;
        }
        for branch in self.repo.list_branches()? {
            if branch != main {
                self.repo.delete_branch(&branch)?;
            }
        }

        self.seed_release_refs()?;
        self.run_id = Uuid::new_v4();

        info!(run_id = %self.run_id, "reset sandbox to initial state");
        Ok(())
    }

    fn seed_release_refs(&self) -> Result<()> {
        let branches = &self.config.branches;
        self.repo.create_branch(&branches.staging, self.seed)?;
        self.repo.create_branch(&branches.production, self.seed)?;
        self.repo.tag(&INITIAL_VERSION.to_string(), self.seed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::PullRequest;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_seeds_remote() {
        let sandbox = Sandbox::create(PipelineConfig::default()).unwrap();
        let remote = Git2Repository::open_bare(sandbox.remote_path()).unwrap();

        for branch in ["main", "staging", "production"] {
            let reference = remote.find_reference(&format!("refs/heads/{branch}")).unwrap();
            assert_eq!(reference.target(), Some(sandbox.seed()));
        }
        assert!(remote.find_reference("refs/tags/1.0.0").is_ok());
        assert_eq!(sandbox.release().current_version().unwrap(), INITIAL_VERSION);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut sandbox = Sandbox::create(PipelineConfig::default()).unwrap();
        let first_run = sandbox.run_id();
        {
            let mut release = sandbox.release();
            release.merge_pr(&PullRequest::single_file(1, "one.txt", "1\n")).unwrap();
            release.bump_version(crate::release::BumpKind::Patch).unwrap();
            release.recreate_staging().unwrap();
            release.tag_release().unwrap();
        }
        sandbox.repo().create_branch("stray", sandbox.seed()).unwrap();

        sandbox.reset_repo_to_initial_state().unwrap();

        let repo = sandbox.repo();
        assert_eq!(repo.list_branches().unwrap(), vec!["main", "production", "staging"]);
        assert_eq!(repo.branch_tip("main").unwrap(), sandbox.seed());
        assert_eq!(repo.branch_tip("staging").unwrap(), sandbox.seed());
        let tags: Vec<_> = repo.tag_list().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(tags, vec!["1.0.0"]);
        assert!(!repo.path().join("one.txt").exists());
        assert_ne!(sandbox.run_id(), first_run);

        let remote = Git2Repository::open_bare(sandbox.remote_path()).unwrap();
        assert!(remote.find_reference("refs/heads/stray").is_err());
        assert!(remote.find_reference("refs/tags/1.0.1").is_err());
        assert_eq!(
            remote.find_reference("refs/heads/main").unwrap().target(),
            Some(sandbox.seed())
        );
    }
}
