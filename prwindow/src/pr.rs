//! Pull request identifiers and the commit-message conventions that carry them.
//!
//! Two merge subject shapes are recognised:
//!
//! - `Merge pull request #12 from acme/pr-12` (hosted merge button)
//! - `Merge branch 'pr-12' into main` (plain `git merge` of a PR branch)
//!
//! A cherry-picked commit links back to its source with the trailer
//! `(cherry picked from commit <sha>)`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

static PULL_REQUEST_SUBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Merge pull request #(\d+) from (\S+)").expect("valid regex"));

static BRANCH_SUBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Merge branch '([^']+)'").expect("valid regex"));

static CHERRY_PICK_TRAILER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(cherry picked from commit ([0-9a-fA-F]{7,64})\)").expect("valid regex")
});

/// Pull request number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrId(pub u64);

impl fmt::Display for PrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PrId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(PrId)
    }
}

impl From<u64> for PrId {
    fn from(id: u64) -> Self {
        PrId(id)
    }
}

/// What a merge commit subject says about the merged branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSubject {
    pub pr: PrId,
    /// Merged branch name without the owner prefix
    pub branch: String,
}

/// Branch and message naming shared by the release tooling and the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchConvention {
    /// Repository owner shown in hosted merge subjects
    pub owner: String,
    /// PR branches are named `<pr_prefix><id>`
    pub pr_prefix: String,
    /// Scratch branches for expedited deploys are `<cherry_pick_prefix><id>`
    pub cherry_pick_prefix: String,
}

impl Default for BranchConvention {
    fn default() -> Self {
        Self {
            owner: "acme".to_string(),
            pr_prefix: "pr-".to_string(),
            cherry_pick_prefix: "cherry-pick-staging-".to_string(),
        }
    }
}

impl BranchConvention {
    pub fn pr_branch(&self, pr: PrId) -> String {
        format!("{}{}", self.pr_prefix, pr)
    }

    pub fn cherry_pick_branch(&self, pr: PrId) -> String {
        format!("{}{}", self.cherry_pick_prefix, pr)
    }

    /// Subject for merging `branch` as pull request `pr`
    pub fn merge_message(&self, pr: PrId, branch: &str) -> String {
        format!("Merge pull request #{} from {}/{}", pr, self.owner, branch)
    }

    /// Parse a merge subject.
    ///
    /// Hosted subjects carry the number directly. Plain merges only count
    /// when the branch follows the PR prefix.
    pub fn parse_merge_subject(&self, subject: &str) -> Option<MergeSubject> {
        if let Some(caps) = PULL_REQUEST_SUBJECT.captures(subject) {
            let pr = caps[1].parse().ok()?;
            let source = &caps[2];
            let branch = source
                .split_once('/')
                .map(|(_, branch)| branch)
                .unwrap_or(source);
            return Some(MergeSubject {
                pr,
                branch: branch.to_string(),
            });
        }

        let caps = BRANCH_SUBJECT.captures(subject)?;
        let branch = &caps[1];
        let pr = branch.strip_prefix(&self.pr_prefix)?.parse().ok()?;
        Some(MergeSubject {
            pr,
            branch: branch.to_string(),
        })
    }

    /// PR delivered by a merge subject, ignoring cherry-pick scratch merges
    pub fn delivered_pr(&self, subject: &str) -> Option<PrId> {
        let merge = self.parse_merge_subject(subject)?;
        if self.is_cherry_pick_branch(&merge.branch) {
            return None;
        }
        Some(merge.pr)
    }

    pub fn is_cherry_pick_branch(&self, branch: &str) -> bool {
        branch.starts_with(&self.cherry_pick_prefix)
    }
}

/// Source commit recorded by a cherry-pick trailer; the last trailer wins
pub fn cherry_pick_source(message: &str) -> Option<&str> {
    CHERRY_PICK_TRAILER
        .captures_iter(message)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Append the cherry-pick trailer to a message
pub fn with_cherry_pick_trailer(message: &str, source: &str) -> String {
    format!(
        "{}\n\n(cherry picked from commit {})",
        message.trim_end(),
        source
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_hosted_subject() {
        let conv = BranchConvention::default();
        let merge = conv
            .parse_merge_subject("Merge pull request #42 from acme/pr-42")
            .unwrap();
        assert_eq!(merge.pr, PrId(42));
        assert_eq!(merge.branch, "pr-42");
    }

    #[test]
    fn test_parse_plain_merge_subject() {
        let conv = BranchConvention::default();
        let merge = conv
            .parse_merge_subject("Merge branch 'pr-7' into main")
            .unwrap();
        assert_eq!(merge.pr, PrId(7));
        assert!(conv.parse_merge_subject("Merge branch 'feature' into main").is_none());
    }

    #[test]
    fn test_scratch_merges_deliver_nothing() {
        let conv = BranchConvention::default();
        let subject = conv.merge_message(PrId(3), &conv.cherry_pick_branch(PrId(3)));
        assert_eq!(subject, "Merge pull request #3 from acme/cherry-pick-staging-3");
        assert!(conv.parse_merge_subject(&subject).is_some());
        assert_eq!(conv.delivered_pr(&subject), None);

        let subject = conv.merge_message(PrId(3), &conv.pr_branch(PrId(3)));
        assert_eq!(conv.delivered_pr(&subject), Some(PrId(3)));
    }

    #[test]
    fn test_non_merge_subjects() {
        let conv = BranchConvention::default();
        assert!(conv.delivered_pr("Update version to 1.0.2").is_none());
        assert!(conv.delivered_pr("Merge pull request from nowhere").is_none());
    }

    #[test]
    fn test_cherry_pick_trailer_round_trip() {
        let sha = "0123456789abcdef0123456789abcdef01234567";
        let message = with_cherry_pick_trailer("Merge pull request #3 from acme/pr-3\n", sha);
        assert_eq!(
            message,
            format!("Merge pull request #3 from acme/pr-3\n\n(cherry picked from commit {sha})")
        );
        assert_eq!(cherry_pick_source(&message), Some(sha));
        assert_eq!(cherry_pick_source("Update version to 1.0.2"), None);
    }

    #[test]
    fn test_pr_id_from_str() {
        assert_eq!("#12".parse::<PrId>().unwrap(), PrId(12));
        assert_eq!(" 3 ".parse::<PrId>().unwrap(), PrId(3));
        assert!("abc".parse::<PrId>().is_err());
    }
}
