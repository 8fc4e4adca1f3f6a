use super::node::CommitNode;
use std::collections::{HashMap, HashSet};

/// Directed Acyclic Graph representing commit history.
///
/// The graph may be a partial view of a repository: a parent ID with no
/// node is treated as a boundary and traversal stops there. Commits that
/// are only needed for lookup (for example the source of a cherry-pick)
/// live in `external` and never take part in traversal.
#[derive(Debug, Clone)]
pub struct Dag {
    /// All nodes indexed by commit ID
    pub nodes: HashMap<String, CommitNode>,
    /// Quick lookup: commit ID -> children IDs
    pub children: HashMap<String, Vec<String>>,
    /// Commits loaded for lookup only
    pub external: HashMap<String, CommitNode>,
}

impl Dag {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            children: HashMap::new(),
            external: HashMap::new(),
        }
    }

    /// Add a commit node to the DAG
    pub fn add_node(&mut self, node: CommitNode) {
        let id = node.id.clone();

        for parent_id in &node.parents {
            self.children
                .entry(parent_id.clone())
                .or_default()
                .push(id.clone());
        }

        self.external.remove(&id);
        self.nodes.insert(id, node);
    }

    /// Add a commit that is looked up but never traversed
    pub fn add_external(&mut self, node: CommitNode) {
        if !self.nodes.contains_key(&node.id) {
            self.external.insert(node.id.clone(), node);
        }
    }

    /// Find a commit among graph and external nodes
    pub fn lookup(&self, commit_id: &str) -> Option<&CommitNode> {
        self.nodes
            .get(commit_id)
            .or_else(|| self.external.get(commit_id))
    }

    pub fn contains(&self, commit_id: &str) -> bool {
        self.nodes.contains_key(commit_id)
    }

    /// All commits reachable from `tip` (inclusive) through parent links
    pub fn reachable(&self, tip: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![tip.to_string()];

        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            stack.extend(node.parents.iter().cloned());
        }

        seen
    }

    /// Best common ancestors of two commits.
    ///
    /// A common ancestor is a best one when none of its children is also a
    /// common ancestor. Only meaningful when the graph holds the shared
    /// history of both commits.
    pub fn merge_bases(&self, a: &str, b: &str) -> Vec<String> {
        let from_a = self.reachable(a);
        let from_b = self.reachable(b);
        let common: HashSet<&String> = from_a.intersection(&from_b).collect();

        let mut bases: Vec<String> = common
            .iter()
            .filter(|id| {
                self.children
                    .get(id.as_str())
                    .map(|kids| kids.iter().all(|kid| !common.contains(kid)))
                    .unwrap_or(true)
            })
            .map(|id| id.to_string())
            .collect();
        bases.sort();
        bases
    }

    /// Count of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get statistics about the DAG
    pub fn stats(&self) -> DagStats {
        let merge_commits = self.nodes.values().filter(|n| n.is_merge()).count();
        let root_commits = self.nodes.values().filter(|n| n.is_root()).count();

        DagStats {
            total_commits: self.nodes.len(),
            merge_commits,
            root_commits,
            external_commits: self.external.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DagStats {
    pub total_commits: usize,
    pub merge_commits: usize,
    pub root_commits: usize,
    pub external_commits: usize,
}

impl Default for Dag {
    fn default() -> Self {
        Self::new()
    }
}
