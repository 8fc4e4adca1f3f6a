use git2::{Oid, Repository as Git2Repository, Signature, Sort};
use tracing::{debug, warn};

use crate::error::{RepositoryError, Result};
use crate::merge::{conflicted_paths, ConflictStrategy};
use prwindow::pr::with_cherry_pick_trailer;

/// First-parent commit range, `base` exclusive and `tip` inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRange {
    pub base: Oid,
    pub tip: Oid,
}

impl CommitRange {
    pub fn new(base: Oid, tip: Oid) -> Self {
        Self { base, tip }
    }
}

/// Cherry-pick operations for a repository
pub struct CherryPickOps<'repo> {
    repo: &'repo Git2Repository,
}

impl<'repo> CherryPickOps<'repo> {
    pub fn new(repo: &'repo Git2Repository) -> Self {
        CherryPickOps { repo }
    }

    /// Commits of a range, oldest first
    pub fn range_commits(&self, range: CommitRange) -> Result<Vec<Oid>> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push(range.tip)?;
        revwalk.hide(range.base)?;
        revwalk.simplify_first_parent()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;

        let commits = revwalk.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(commits)
    }

    /// Replay one commit on top of `onto`, writing the result to `update_ref`.
    ///
    /// Merge commits are replayed relative to parent number `mainline`. The
    /// original author and message are kept and the trailer links the copy
    /// back to its source.
    pub fn pick_commit(
        &self,
        pick: &git2::Commit,
        onto: &git2::Commit,
        mainline: u32,
        strategy: ConflictStrategy,
        committer: &Signature,
        update_ref: &str,
    ) -> Result<Oid> {
        let mainline = if pick.parent_count() > 1 { mainline } else { 0 };
        let options = strategy.merge_options();
        let mut index = self
            .repo
            .cherrypick_commit(pick, onto, mainline, Some(&options))?;

        if index.has_conflicts() {
            return Err(RepositoryError::Conflict {
                operation: format!("cherry-pick of {}", pick.id()),
                paths: conflicted_paths(&index)?,
            });
        }

        let tree_oid = index.write_tree_to(self.repo)?;
        if tree_oid == onto.tree_id() {
            warn!(commit = %pick.id(), "cherry-pick introduces no changes");
        }
        let tree = self.repo.find_tree(tree_oid)?;

        let message = with_cherry_pick_trailer(
            &String::from_utf8_lossy(pick.message_bytes()),
            &pick.id().to_string(),
        );

        let commit_oid = self.repo.commit(
            Some(update_ref),
            &pick.author(),
            committer,
            &message,
            &tree,
            &[onto],
        )?;

        debug!(%commit_oid, source = %pick.id(), "cherry-picked commit");
        Ok(commit_oid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{Commit, FileChange};
    use crate::merge::MergeOps;
    use tempfile::TempDir;

    fn sig() -> Signature<'static> {
        Signature::now("Tester", "tester@example.com").unwrap()
    }

    fn commit_on(repo: &Git2Repository, path: &str, contents: &str, message: &str) -> Oid {
        let commit = Commit::new(repo);
        commit.stage_changes(&[FileChange::write(path, contents)]).unwrap();
        commit.create_with_signature(message, &sig(), &sig()).unwrap()
    }

    #[test]
    fn test_pick_merge_commit_and_follow_up() {
        let dir = TempDir::new().unwrap();
        let repo = Git2Repository::init(dir.path()).unwrap();
        let base = commit_on(&repo, "version.txt", "1.0.0\n", "base");
        let head_ref = repo.head().unwrap().name().unwrap().to_string();

        // A PR branch merged into master, then a version bump
        let pr = {
            let base_commit = repo.find_commit(base).unwrap();
            let tree = base_commit.tree().unwrap();
            let mut builder = repo.treebuilder(Some(&tree)).unwrap();
            let blob = repo.blob(b"feature\n").unwrap();
            builder.insert("feature.txt", blob, 0o100644).unwrap();
            let tree = repo.find_tree(builder.write().unwrap()).unwrap();
            repo.commit(None, &sig(), &sig(), "feature work", &tree, &[&base_commit]).unwrap()
        };
        let ours = repo.find_commit(base).unwrap();
        let theirs = repo.find_commit(pr).unwrap();
        let merge = MergeOps::new(&repo)
            .merge_commits(
                &ours,
                &theirs,
                ConflictStrategy::Fail,
                "Merge pull request #1 from acme/pr-1",
                &sig(),
                &head_ref,
            )
            .unwrap();
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force())).unwrap();
        let bump = commit_on(&repo, "version.txt", "1.0.1\n", "Update version to 1.0.1");

        let ops = CherryPickOps::new(&repo);
        assert_eq!(ops.range_commits(CommitRange::new(base, bump)).unwrap(), vec![merge, bump]);

        // Replay both onto a scratch branch at base
        repo.branch("scratch", &repo.find_commit(base).unwrap(), false).unwrap();
        let mut tip = base;
        for oid in ops.range_commits(CommitRange::new(base, bump)).unwrap() {
            let pick = repo.find_commit(oid).unwrap();
            let onto = repo.find_commit(tip).unwrap();
            tip = ops
                .pick_commit(
                    &pick,
                    &onto,
                    1,
                    ConflictStrategy::PreferIncoming,
                    &sig(),
                    "refs/heads/scratch",
                )
                .unwrap();
        }

        let picked = repo.find_commit(tip).unwrap();
        assert_eq!(picked.parent_count(), 1);
        assert!(picked
            .message()
            .unwrap()
            .ends_with(&format!("(cherry picked from commit {bump})")));

        let tree = picked.tree().unwrap();
        assert!(tree.get_path(std::path::Path::new("feature.txt")).is_ok());
        let parent = picked.parent(0).unwrap();
        assert!(parent.message().unwrap().starts_with("Merge pull request #1 from acme/pr-1"));
        assert_eq!(parent.parent_count(), 1);
    }
}
