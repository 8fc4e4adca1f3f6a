//! Deploy-window PR resolution.
//!
//! Given two points in history, find the pull requests that the upper point
//! delivers and the lower one does not. Both sides of the range are looked
//! at: staging is recreated wholesale from main, so a PR cherry-picked onto
//! an old staging line shows up again on main and must not be reported a
//! second time.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::debug;

use crate::core::{CommitNode, Dag};
use crate::error::{RangeProblem, Result, WindowError};
use crate::pr::{self, BranchConvention, PrId};

/// Cherry-picks of cherry-picks are followed this many links deep
const MAX_LINK_HOPS: usize = 8;

/// Resolved endpoints of a deploy window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBounds {
    /// Ref names as given by the caller, for messages
    pub lower_ref: String,
    pub upper_ref: String,
    /// Commit IDs the refs point at
    pub lower: String,
    pub upper: String,
    /// Best common ancestors of the two commits
    pub merge_bases: Vec<String>,
}

impl WindowBounds {
    /// Bounds for two commits of a graph that holds their shared history
    pub fn from_dag(dag: &Dag, lower: &str, upper: &str) -> Result<Self> {
        for id in [lower, upper] {
            if !dag.contains(id) {
                return Err(WindowError::UnknownRef(id.to_string()));
            }
        }

        Ok(Self {
            lower_ref: lower.to_string(),
            upper_ref: upper.to_string(),
            lower: lower.to_string(),
            upper: upper.to_string(),
            merge_bases: dag.merge_bases(lower, upper),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.lower == self.upper
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let problem = if self.merge_bases.is_empty() {
            Some(RangeProblem::Unrelated)
        } else if self.merge_bases.contains(&self.upper) {
            Some(RangeProblem::Reversed)
        } else {
            None
        };

        match problem {
            Some(problem) => Err(WindowError::InvalidRange {
                lower: self.lower_ref.clone(),
                upper: self.upper_ref.clone(),
                problem,
            }),
            None => Ok(()),
        }
    }
}

/// One PR delivery found in history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrEvent {
    pub pr: PrId,
    /// Commit that carries the delivery in this window
    pub commit: String,
    /// Original merge commit; differs from `commit` for cherry-picked copies
    pub source: String,
}

impl PrEvent {
    pub fn is_cherry_pick(&self) -> bool {
        self.commit != self.source
    }
}

/// Resolves PR windows over a commit graph
pub struct Resolver<'a> {
    dag: &'a Dag,
    convention: &'a BranchConvention,
}

impl<'a> Resolver<'a> {
    pub fn new(dag: &'a Dag, convention: &'a BranchConvention) -> Self {
        Self { dag, convention }
    }

    /// PR IDs newly delivered by `upper`, newest first
    pub fn resolve(&self, bounds: &WindowBounds) -> Result<Vec<PrId>> {
        Ok(self
            .resolve_events(bounds)?
            .into_iter()
            .map(|event| event.pr)
            .collect())
    }

    /// Same as [`Resolver::resolve`], keeping the commits behind each PR
    pub fn resolve_events(&self, bounds: &WindowBounds) -> Result<Vec<PrEvent>> {
        if bounds.is_empty() {
            return Ok(Vec::new());
        }
        bounds.validate()?;

        let from_upper = self.dag.reachable(&bounds.upper);
        let from_lower = self.dag.reachable(&bounds.lower);

        let forward: HashSet<&String> = from_upper.difference(&from_lower).collect();
        let delivered: HashSet<PrId> = from_lower
            .difference(&from_upper)
            .filter_map(|id| self.dag.nodes.get(id))
            .filter_map(|node| self.pr_event(node))
            .map(|event| event.pr)
            .collect();

        debug!(
            forward = forward.len(),
            already_delivered = delivered.len(),
            "resolving window {}..{}",
            bounds.lower_ref,
            bounds.upper_ref
        );

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for node in self.newest_first(&forward) {
            let Some(event) = self.pr_event(node) else {
                continue;
            };
            if delivered.contains(&event.pr) {
                debug!(pr = %event.pr, "already delivered below the window");
                continue;
            }
            if seen.insert(event.pr) {
                events.push(event);
            }
        }

        Ok(events)
    }

    /// The PR a single commit delivers, if any.
    ///
    /// Merge commits deliver the PR named in their subject. Cherry-picked
    /// commits deliver whatever their source delivered; when the source is
    /// not loaded the copied subject is used instead.
    pub fn pr_event(&self, node: &'a CommitNode) -> Option<PrEvent> {
        if node.is_merge() {
            let pr = self.convention.delivered_pr(node.subject())?;
            return Some(PrEvent {
                pr,
                commit: node.id.clone(),
                source: node.id.clone(),
            });
        }

        let mut current = node;
        for _ in 0..MAX_LINK_HOPS {
            let source_id = pr::cherry_pick_source(&current.message)?;
            match self.find(source_id) {
                Some(source) if source.is_merge() => {
                    let pr = self.convention.delivered_pr(source.subject())?;
                    return Some(PrEvent {
                        pr,
                        commit: node.id.clone(),
                        source: source.id.clone(),
                    });
                }
                Some(source) => current = source,
                None => {
                    let pr = self.convention.delivered_pr(current.subject())?;
                    return Some(PrEvent {
                        pr,
                        commit: node.id.clone(),
                        source: source_id.to_string(),
                    });
                }
            }
        }

        None
    }

    /// Exact or abbreviated ID lookup
    fn find(&self, id: &str) -> Option<&'a CommitNode> {
        self.dag.lookup(id).or_else(|| {
            self.dag
                .nodes
                .values()
                .chain(self.dag.external.values())
                .find(|node| node.id.starts_with(id))
        })
    }

    /// Window commits ordered newest first, never a parent before its child
    fn newest_first(&self, window: &HashSet<&String>) -> Vec<&'a CommitNode> {
        let mut pending: HashMap<&str, usize> =
            window.iter().map(|id| (id.as_str(), 0)).collect();
        for id in window {
            for parent in &self.dag.nodes[id.as_str()].parents {
                if let Some(count) = pending.get_mut(parent.as_str()) {
                    *count += 1;
                }
            }
        }

        let mut ready: BinaryHeap<_> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| {
                let node = &self.dag.nodes[*id];
                (node.timestamp, Reverse(node.id.as_str()))
            })
            .collect();

        let mut ordered = Vec::with_capacity(window.len());
        while let Some((_, Reverse(id))) = ready.pop() {
            let node = &self.dag.nodes[id];
            ordered.push(node);
            for parent in &node.parents {
                if let Some(count) = pending.get_mut(parent.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        let parent = &self.dag.nodes[parent.as_str()];
                        ready.push((parent.timestamp, Reverse(parent.id.as_str())));
                    }
                }
            }
        }

        ordered
    }
}

/// Resolve a window over a graph that holds the full history of both commits
pub fn resolve_merged_between(
    dag: &Dag,
    convention: &BranchConvention,
    lower: &str,
    upper: &str,
) -> Result<Vec<PrId>> {
    let bounds = WindowBounds::from_dag(dag, lower, upper)?;
    Resolver::new(dag, convention).resolve(&bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pr::with_cherry_pick_trailer;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    /// Builds graphs the way the release tooling shapes them
    struct Builder {
        dag: Dag,
        clock: i64,
        conv: BranchConvention,
        branches: HashMap<&'static str, String>,
    }

    impl Builder {
        fn seed() -> Self {
            let mut builder = Self {
                dag: Dag::new(),
                clock: 0,
                conv: BranchConvention::default(),
                branches: HashMap::new(),
            };
            let seed = builder.node(&[], "Initial commit");
            for branch in ["main", "staging", "production"] {
                builder.branches.insert(branch, seed.clone());
            }
            builder
        }

        fn node(&mut self, parents: &[&str], message: &str) -> String {
            self.clock += 1;
            let id = format!("{:040x}", self.clock);
            self.dag.add_node(CommitNode::new(
                id.clone(),
                parents.iter().map(|p| p.to_string()),
                Utc.timestamp_opt(1_700_000_000 + self.clock, 0).unwrap(),
                "Tester".to_string(),
                message.to_string(),
            ));
            id
        }

        fn tip(&self, branch: &str) -> String {
            self.branches[branch].clone()
        }

        fn commit(&mut self, branch: &'static str, message: &str) -> String {
            let parent = self.tip(branch);
            let id = self.node(&[&parent], message);
            self.branches.insert(branch, id.clone());
            id
        }

        /// Merge PR `n` into main; returns the merge commit
        fn merge_pr(&mut self, n: u64) -> String {
            let main = self.tip("main");
            let work = self.node(&[&main], &format!("Changes for PR #{n}"));
            let message = self.conv.merge_message(PrId(n), &self.conv.pr_branch(PrId(n)));
            let merge = self.node(&[&main, &work], &message);
            self.branches.insert("main", merge.clone());
            merge
        }

        fn bump(&mut self, version: &str) -> String {
            self.commit("main", &format!("Update version to {version}"))
        }

        fn cherry_pick_to_staging(&mut self, n: u64, version: &str) {
            let merge = self.merge_pr(n);
            let bump = self.bump(version);
            let base = self.tip("staging");
            let merge_message = self.dag.nodes[&merge].message.clone();
            let bump_message = self.dag.nodes[&bump].message.clone();
            let picked = self.node(&[&base], &with_cherry_pick_trailer(&merge_message, &merge));
            let picked_bump =
                self.node(&[&picked], &with_cherry_pick_trailer(&bump_message, &bump));
            let fold = self
                .conv
                .merge_message(PrId(n), &self.conv.cherry_pick_branch(PrId(n)));
            let folded = self.node(&[&base, &picked_bump], &fold);
            self.branches.insert("staging", folded);
        }

        fn promote(&mut self, from: &str, to: &'static str) {
            let tip = self.tip(from);
            self.branches.insert(to, tip);
        }

        fn resolve(&self, lower: &str, upper: &str) -> Vec<u64> {
            resolve_merged_between(&self.dag, &self.conv, lower, upper)
                .unwrap()
                .into_iter()
                .map(|pr| pr.0)
                .collect()
        }
    }

    #[test]
    fn test_release_cycle_windows() {
        let mut repo = Builder::seed();
        let v100 = repo.tip("main");

        // Checklist unlocked: PR 1 flows to staging
        repo.merge_pr(1);
        repo.bump("1.0.1");
        repo.promote("main", "staging");
        let v101 = repo.tip("staging");
        assert_eq!(repo.resolve(&v100, &v101), vec![1]);

        // Checklist locked: PR 2 waits on main, PR 3 is cherry-picked
        repo.merge_pr(2);
        repo.cherry_pick_to_staging(3, "1.0.2");
        let v102 = repo.tip("staging");
        assert_eq!(repo.resolve(&v100, &v102), vec![3, 1]);
        assert_eq!(repo.resolve(&v101, &v102), vec![3]);

        // Production deploy, then a new checklist from main
        repo.promote("staging", "production");
        assert_eq!(repo.resolve(&v100, &repo.tip("production")), vec![3, 1]);

        repo.bump("1.1.0");
        repo.promote("main", "staging");
        let v110 = repo.tip("staging");
        assert_eq!(repo.resolve(&v102, &v110), vec![2]);
        assert_eq!(repo.resolve(&v100, &v110), vec![3, 2, 1]);
    }

    #[test]
    fn test_disjoint_merges_newest_first() {
        let mut repo = Builder::seed();
        let start = repo.tip("main");
        for n in 1..=5 {
            repo.merge_pr(n);
        }
        assert_eq!(repo.resolve(&start, &repo.tip("main")), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_identical_refs_are_empty() {
        let mut repo = Builder::seed();
        repo.merge_pr(1);
        let tip = repo.tip("main");
        assert!(repo.resolve(&tip, &tip).is_empty());
    }

    #[test]
    fn test_revert_and_reapply_stay_distinct() {
        let mut repo = Builder::seed();
        let start = repo.tip("main");
        repo.merge_pr(5); // turns the feature on
        repo.merge_pr(6); // reverts PR 5
        repo.merge_pr(7); // reapplies the same change
        assert_eq!(repo.resolve(&start, &repo.tip("main")), vec![7, 6, 5]);
    }

    #[test]
    fn test_cherry_pick_and_merge_in_window_count_once() {
        let mut repo = Builder::seed();
        let start = repo.tip("main");
        repo.merge_pr(1);
        repo.cherry_pick_to_staging(3, "1.0.1");

        // Bring staging back into main so both copies of PR 3 are in range
        let main = repo.tip("main");
        let staging = repo.tip("staging");
        let joined = repo.node(&[&main, &staging], "Merge branch 'staging'");

        assert_eq!(repo.resolve(&start, &joined), vec![3, 1]);
    }

    #[test]
    fn test_cherry_pick_with_unloaded_source_uses_subject() {
        let mut dag = Dag::new();
        let conv = BranchConvention::default();
        let at = |t| Utc.timestamp_opt(t, 0).unwrap();
        dag.add_node(CommitNode::new(
            "base".into(),
            Vec::<String>::new(),
            at(1),
            "T".into(),
            "seed".into(),
        ));
        dag.add_node(CommitNode::new(
            "pick".into(),
            ["base".to_string()],
            at(2),
            "T".into(),
            with_cherry_pick_trailer("Merge pull request #9 from acme/pr-9", "deadbeef"),
        ));

        let resolver = Resolver::new(&dag, &conv);
        let event = resolver.pr_event(&dag.nodes["pick"]).unwrap();
        assert_eq!(event.pr, PrId(9));
        assert_eq!(event.source, "deadbeef");
        assert!(event.is_cherry_pick());
    }

    #[test]
    fn test_reversed_range_is_invalid() {
        let mut repo = Builder::seed();
        let start = repo.tip("main");
        repo.merge_pr(1);
        let err = resolve_merged_between(&repo.dag, &repo.conv, &repo.tip("main"), &start)
            .unwrap_err();
        assert!(matches!(
            err,
            WindowError::InvalidRange { problem: RangeProblem::Reversed, .. }
        ));
    }

    #[test]
    fn test_missing_commit_is_unknown_ref() {
        let mut repo = Builder::seed();
        repo.merge_pr(1);
        let tip = repo.tip("main");
        let missing = format!("{:040x}", 999);

        let err = resolve_merged_between(&repo.dag, &repo.conv, &missing, &tip).unwrap_err();
        assert!(matches!(err, WindowError::UnknownRef(id) if id == missing));

        let err = resolve_merged_between(&repo.dag, &repo.conv, &tip, &missing).unwrap_err();
        assert!(matches!(err, WindowError::UnknownRef(id) if id == missing));
    }

    #[test]
    fn test_unrelated_range_is_invalid() {
        let mut repo = Builder::seed();
        let start = repo.tip("main");
        let orphan = repo.node(&[], "Unrelated root");
        let err = resolve_merged_between(&repo.dag, &repo.conv, &start, &orphan).unwrap_err();
        assert!(matches!(
            err,
            WindowError::InvalidRange { problem: RangeProblem::Unrelated, .. }
        ));
    }
}
