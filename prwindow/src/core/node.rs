use chrono::{DateTime, Utc};
use smallvec::SmallVec;

/// Parent list; almost every commit has one or two parents
pub type Parents = SmallVec<[String; 2]>;

/// A commit node in the DAG
#[derive(Debug, Clone)]
pub struct CommitNode {
    /// Unique commit ID (SHA)
    pub id: String,
    /// Parent commit IDs, first parent first
    pub parents: Parents,
    /// Committer timestamp
    pub timestamp: DateTime<Utc>,
    /// Author name
    pub author: String,
    /// Full commit message, trailers included
    pub message: String,
}

impl CommitNode {
    pub fn new(
        id: String,
        parents: impl IntoIterator<Item = String>,
        timestamp: DateTime<Utc>,
        author: String,
        message: String,
    ) -> Self {
        Self {
            id,
            parents: parents.into_iter().collect(),
            timestamp,
            author,
            message,
        }
    }

    /// First line of the message
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("").trim()
    }

    /// Check if this is a root commit (no parents)
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Check if this is a merge commit (multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_subject_is_first_line() {
        let node = CommitNode::new(
            "a".into(),
            ["b".to_string(), "c".to_string()],
            Utc.timestamp_opt(10, 0).unwrap(),
            "Tester".into(),
            "Merge pull request #4 from acme/pr-4\n\nbody".into(),
        );
        assert_eq!(node.subject(), "Merge pull request #4 from acme/pr-4");
        assert!(node.is_merge());
        assert!(!node.is_root());
    }
}
