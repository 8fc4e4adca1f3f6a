use chrono::{DateTime, TimeZone, Utc};
use git2::{ObjectType, Oid, Repository as Git2Repository};
use tracing::debug;

use crate::error::{RepositoryError, Result};

/// Tag information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub name: String,
    pub target: Oid,
    /// Commit time of the tagged commit
    pub timestamp: DateTime<Utc>,
    pub is_annotated: bool,
}

/// Tag operations for a repository
pub struct TagOps<'repo> {
    repo: &'repo Git2Repository,
}

impl<'repo> TagOps<'repo> {
    pub fn new(repo: &'repo Git2Repository) -> Self {
        TagOps { repo }
    }

    /// Create a lightweight tag. Existing tags are never moved.
    pub fn create(&self, name: &str, target: Oid) -> Result<()> {
        if self.exists(name) {
            return Err(RepositoryError::TagExists(name.to_string()));
        }

        let target_obj = self.repo.find_object(target, Some(ObjectType::Commit))?;
        self.repo.tag_lightweight(name, &target_obj, false)?;

        debug!(tag = name, %target, "created tag");
        Ok(())
    }

    /// All tags, sorted by name
    pub fn list(&self) -> Result<Vec<TagInfo>> {
        let mut tags = Vec::new();
        let tag_names = self.repo.tag_names(None)?;

        for tag_name in tag_names.iter().flatten() {
            tags.push(self.info(tag_name)?);
        }

        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    pub fn info(&self, name: &str) -> Result<TagInfo> {
        let full_name = format!("refs/tags/{name}");
        let reference = self
            .repo
            .find_reference(&full_name)
            .map_err(|_| RepositoryError::MissingRef(full_name.clone()))?;
        let target_oid = reference
            .target()
            .ok_or_else(|| RepositoryError::MissingRef(full_name.clone()))?;

        let is_annotated = self.repo.find_tag(target_oid).is_ok();
        let commit = reference.peel_to_commit()?;
        let timestamp = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_default();

        Ok(TagInfo {
            name: name.to_string(),
            target: commit.id(),
            timestamp,
            is_annotated,
        })
    }

    pub fn exists(&self, name: &str) -> bool {
        self.repo.find_reference(&format!("refs/tags/{name}")).is_ok()
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        if !self.exists(name) {
            return Err(RepositoryError::MissingRef(format!("refs/tags/{name}")));
        }
        self.repo.tag_delete(name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{Commit, FileChange};
    use git2::Signature;
    use tempfile::TempDir;

    fn repo_with_commit() -> (TempDir, Git2Repository, Oid) {
        let dir = TempDir::new().unwrap();
        let repo = Git2Repository::init(dir.path()).unwrap();
        let oid = {
            let time = git2::Time::new(1_700_000_000, 0);
            let sig = Signature::new("Tester", "tester@example.com", &time).unwrap();
            let commit = Commit::new(&repo);
            commit.stage_changes(&[FileChange::write("a.txt", "a\n")]).unwrap();
            commit.create_with_signature("first", &sig, &sig).unwrap()
        };
        (dir, repo, oid)
    }

    #[test]
    fn test_create_list_and_info() {
        let (_dir, repo, oid) = repo_with_commit();
        let tags = TagOps::new(&repo);

        tags.create("1.0.1", oid).unwrap();
        tags.create("1.0.0", oid).unwrap();

        let names: Vec<_> = tags.list().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["1.0.0", "1.0.1"]);

        let info = tags.info("1.0.0").unwrap();
        assert_eq!(info.target, oid);
        assert!(!info.is_annotated);
        assert_eq!(info.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_existing_tag_is_not_moved() {
        let (_dir, repo, oid) = repo_with_commit();
        let tags = TagOps::new(&repo);

        tags.create("1.0.0", oid).unwrap();
        assert!(matches!(
            tags.create("1.0.0", oid),
            Err(RepositoryError::TagExists(name)) if name == "1.0.0"
        ));

        tags.delete("1.0.0").unwrap();
        assert!(!tags.exists("1.0.0"));
        assert!(matches!(tags.delete("1.0.0"), Err(RepositoryError::MissingRef(_))));
    }
}
