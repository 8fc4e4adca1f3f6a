use git2::{FileFavor, Index, MergeOptions, Oid, Repository as Git2Repository, Signature};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RepositoryError, Result};

/// How conflicting hunks are settled during merges and cherry-picks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Take the side being brought in (`-Xtheirs`)
    #[default]
    PreferIncoming,
    /// Keep the side already on the branch (`-Xours`)
    PreferCurrent,
    /// Any conflict aborts the operation
    Fail,
}

impl ConflictStrategy {
    pub fn merge_options(self) -> MergeOptions {
        let mut options = MergeOptions::new();
        let favor = match self {
            ConflictStrategy::PreferIncoming => FileFavor::Theirs,
            ConflictStrategy::PreferCurrent => FileFavor::Ours,
            ConflictStrategy::Fail => FileFavor::Normal,
        };
        options.file_favor(favor);
        options
    }
}

/// Merge operations for a repository
pub struct MergeOps<'repo> {
    repo: &'repo Git2Repository,
}

impl<'repo> MergeOps<'repo> {
    pub fn new(repo: &'repo Git2Repository) -> Self {
        MergeOps { repo }
    }

    /// Merge `theirs` into `ours` with an explicit two-parent commit.
    ///
    /// The commit is written to `update_ref`, whose tip must be `ours`.
    /// Fast-forwards are never taken.
    pub fn merge_commits(
        &self,
        ours: &git2::Commit,
        theirs: &git2::Commit,
        strategy: ConflictStrategy,
        message: &str,
        signature: &Signature,
        update_ref: &str,
    ) -> Result<Oid> {
        let options = strategy.merge_options();
        let mut index = self.repo.merge_commits(ours, theirs, Some(&options))?;

        if index.has_conflicts() {
            return Err(RepositoryError::Conflict {
                operation: format!("merge of {} into {}", theirs.id(), update_ref),
                paths: conflicted_paths(&index)?,
            });
        }

        let tree_oid = index.write_tree_to(self.repo)?;
        let tree = self.repo.find_tree(tree_oid)?;

        let commit_oid = self.repo.commit(
            Some(update_ref),
            signature,
            signature,
            message,
            &tree,
            &[ours, theirs],
        )?;

        debug!(%commit_oid, ours = %ours.id(), theirs = %theirs.id(), "created merge commit");
        Ok(commit_oid)
    }
}

/// Paths with conflict entries in an in-memory index
pub(crate) fn conflicted_paths(index: &Index) -> Result<Vec<String>> {
    let mut conflicts = Vec::new();

    for conflict in index.conflicts()? {
        let entry = conflict?;
        let side = entry.our.or(entry.their).or(entry.ancestor);
        if let Some(side) = side {
            let path = String::from_utf8_lossy(&side.path).into_owned();
            if !conflicts.contains(&path) {
                conflicts.push(path);
            }
        }
    }

    Ok(conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{Commit, FileChange};
    use tempfile::TempDir;

    fn sig() -> Signature<'static> {
        Signature::now("Tester", "tester@example.com").unwrap()
    }

    /// main and feature both edit the first line of shared.txt
    fn diverged() -> (TempDir, Git2Repository, Oid, Oid) {
        let dir = TempDir::new().unwrap();
        let repo = Git2Repository::init(dir.path()).unwrap();
        let (base, feature) = {
            let commit = Commit::new(&repo);
            commit.stage_changes(&[FileChange::write("shared.txt", "base\nkeep\n")]).unwrap();
            let base = commit.create_with_signature("base", &sig(), &sig()).unwrap();

            commit.stage_changes(&[FileChange::write("shared.txt", "feature\nkeep\n")]).unwrap();
            let feature = commit.create_with_signature("feature", &sig(), &sig()).unwrap();
            (base, feature)
        };

        // Rewind HEAD to base and diverge
        {
            let base_commit = repo.find_commit(base).unwrap();
            repo.reset(base_commit.as_object(), git2::ResetType::Hard, None).unwrap();
        }
        let main = {
            let commit = Commit::new(&repo);
            commit.stage_changes(&[FileChange::write("shared.txt", "main\nkeep\n")]).unwrap();
            commit.create_with_signature("main", &sig(), &sig()).unwrap()
        };
        (dir, repo, main, feature)
    }

    fn head_ref(repo: &Git2Repository) -> String {
        repo.head().unwrap().name().unwrap().to_string()
    }

    #[test]
    fn test_prefer_incoming_resolves_conflict() {
        let (_dir, repo, main, feature) = diverged();
        let ours = repo.find_commit(main).unwrap();
        let theirs = repo.find_commit(feature).unwrap();

        let merged = MergeOps::new(&repo)
            .merge_commits(
                &ours,
                &theirs,
                ConflictStrategy::PreferIncoming,
                "merge",
                &sig(),
                &head_ref(&repo),
            )
            .unwrap();

        let commit = repo.find_commit(merged).unwrap();
        assert_eq!(commit.parent_count(), 2);
        assert_eq!(commit.parent_id(0).unwrap(), main);
        assert_eq!(commit.parent_id(1).unwrap(), feature);

        let entry = commit.tree().unwrap().get_path(std::path::Path::new("shared.txt")).unwrap();
        let blob = repo.find_blob(entry.id()).unwrap();
        assert_eq!(blob.content(), b"feature\nkeep\n");
    }

    #[test]
    fn test_fail_strategy_reports_conflicts() {
        let (_dir, repo, main, feature) = diverged();
        let ours = repo.find_commit(main).unwrap();
        let theirs = repo.find_commit(feature).unwrap();

        let err = MergeOps::new(&repo)
            .merge_commits(
                &ours,
                &theirs,
                ConflictStrategy::Fail,
                "merge",
                &sig(),
                &head_ref(&repo),
            )
            .unwrap_err();

        match err {
            RepositoryError::Conflict { paths, .. } => {
                assert_eq!(paths, vec!["shared.txt".to_string()])
            }
            other => panic!("expected conflict, got {other}"),
        }
        assert_eq!(repo.head().unwrap().target().unwrap(), main);
    }

    #[test]
    fn test_strategy_parses_from_config_names() {
        let strategy: ConflictStrategy = serde_json::from_str("\"prefer-current\"").unwrap();
        assert_eq!(strategy, ConflictStrategy::PreferCurrent);
        assert_eq!(ConflictStrategy::default(), ConflictStrategy::PreferIncoming);
    }
}
