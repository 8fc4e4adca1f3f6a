use std::path::Path;

use chrono::{TimeZone, Utc};
use git2::{Commit, ErrorCode, Oid, Repository, Sort};
use tracing::{debug, warn};

use crate::core::{CommitNode, Dag};
use crate::error::{RangeProblem, Result, WindowError};
use crate::pr::{self, BranchConvention, PrId};
use crate::resolver::{PrEvent, Resolver, WindowBounds};
use crate::version::Version;

/// Cherry-pick sources are chased this many links deep
const MAX_LINK_DEPTH: usize = 8;

/// Loads deploy windows out of a git repository
pub struct GitWalker {
    repo: Repository,
}

impl GitWalker {
    pub fn new(repo_path: Option<&Path>) -> Result<Self> {
        let repo = match repo_path {
            Some(path) => Repository::open(path)?,
            None => Repository::open_from_env()?,
        };

        Ok(Self { repo })
    }

    pub fn from_repository(repo: Repository) -> Self {
        Self { repo }
    }

    /// Resolve a tag, branch, or commit hash to a commit ID
    pub fn resolve_ref(&self, name: &str) -> Result<Oid> {
        let object = self
            .repo
            .revparse_single(name)
            .map_err(|_| WindowError::UnknownRef(name.to_string()))?;
        let commit = object
            .peel_to_commit()
            .map_err(|_| WindowError::UnknownRef(name.to_string()))?;
        Ok(commit.id())
    }

    /// Endpoints and merge bases of `lower..upper`
    pub fn bounds(&self, lower_ref: &str, upper_ref: &str) -> Result<WindowBounds> {
        // Two version refs must be in release order regardless of topology
        let versions = (lower_ref.parse::<Version>(), upper_ref.parse::<Version>());
        if let (Ok(lower), Ok(upper)) = versions {
            if lower > upper {
                return Err(WindowError::InvalidRange {
                    lower: lower_ref.to_string(),
                    upper: upper_ref.to_string(),
                    problem: RangeProblem::Reversed,
                });
            }
        }

        let lower = self.resolve_ref(lower_ref)?;
        let upper = self.resolve_ref(upper_ref)?;

        let merge_bases = if lower == upper {
            vec![lower.to_string()]
        } else {
            match self.repo.merge_bases(lower, upper) {
                Ok(bases) => bases.iter().map(|oid| oid.to_string()).collect(),
                Err(e) if e.code() == ErrorCode::NotFound => Vec::new(),
                Err(e) => return Err(e.into()),
            }
        };

        Ok(WindowBounds {
            lower_ref: lower_ref.to_string(),
            upper_ref: upper_ref.to_string(),
            lower: lower.to_string(),
            upper: upper.to_string(),
            merge_bases,
        })
    }

    /// Load the commits on either side of the window.
    ///
    /// Everything below the merge bases is shared by both refs and left out.
    /// Commits named by cherry-pick trailers are added as lookup-only nodes.
    pub fn load_window(&self, bounds: &WindowBounds) -> Result<Dag> {
        let mut dag = Dag::new();
        let mut revwalk = self.repo.revwalk()?;

        revwalk.push(Oid::from_str(&bounds.upper)?)?;
        revwalk.push(Oid::from_str(&bounds.lower)?)?;
        for base in &bounds.merge_bases {
            revwalk.hide(Oid::from_str(base)?)?;
        }

        // Sort by topological order and time
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

        for oid in revwalk {
            let commit = self.repo.find_commit(oid?)?;
            dag.add_node(self.commit_to_node(&commit));
        }

        self.load_cherry_pick_sources(&mut dag)?;

        let stats = dag.stats();
        debug!(
            commits = stats.total_commits,
            merges = stats.merge_commits,
            linked = stats.external_commits,
            "loaded window {}..{}",
            bounds.lower_ref,
            bounds.upper_ref
        );

        Ok(dag)
    }

    fn load_cherry_pick_sources(&self, dag: &mut Dag) -> Result<()> {
        let mut frontier: Vec<String> = dag
            .nodes
            .values()
            .filter_map(|node| pr::cherry_pick_source(&node.message))
            .map(str::to_string)
            .collect();

        for _ in 0..MAX_LINK_DEPTH {
            let mut next = Vec::new();
            for source in frontier.drain(..) {
                if dag.lookup(&source).is_some() {
                    continue;
                }
                let commit = match self
                    .repo
                    .revparse_single(&source)
                    .and_then(|object| object.peel_to_commit())
                {
                    Ok(commit) => commit,
                    Err(e) => {
                        // The copied subject still identifies the PR
                        warn!("cherry-pick source {source} not available: {e}");
                        continue;
                    }
                };
                let node = self.commit_to_node(&commit);
                if let Some(further) = pr::cherry_pick_source(&node.message) {
                    next.push(further.to_string());
                }
                dag.add_external(node);
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        Ok(())
    }

    /// PR IDs merged between two refs, newest first
    pub fn resolve_merged_between(
        &self,
        lower_ref: &str,
        upper_ref: &str,
        convention: &BranchConvention,
    ) -> Result<Vec<PrId>> {
        Ok(self
            .resolve_events(lower_ref, upper_ref, convention)?
            .into_iter()
            .map(|event| event.pr)
            .collect())
    }

    /// PR deliveries between two refs, newest first
    pub fn resolve_events(
        &self,
        lower_ref: &str,
        upper_ref: &str,
        convention: &BranchConvention,
    ) -> Result<Vec<PrEvent>> {
        let bounds = self.bounds(lower_ref, upper_ref)?;
        if bounds.is_empty() {
            return Ok(Vec::new());
        }
        bounds.validate()?;

        let dag = self.load_window(&bounds)?;
        Resolver::new(&dag, convention).resolve_events(&bounds)
    }

    /// Convert a git2::Commit to CommitNode
    fn commit_to_node(&self, commit: &Commit) -> CommitNode {
        let id = commit.id().to_string();
        let parents = commit.parent_ids().map(|oid| oid.to_string());

        let timestamp = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_default();

        let author = commit.author().name().unwrap_or("Unknown").to_string();
        let message = String::from_utf8_lossy(commit.message_bytes()).into_owned();

        CommitNode::new(id, parents, timestamp, author, message)
    }
}
