//! Documentation topology: contract, node arena and reachability analysis.
//!
//! # For AI Agents
//!
//! - **The contract is the tree**: depth comes from `parent` edges (BFS from the single
//!   root), reachability comes from actual markdown links starting at the root doc.
//! - **Archive is tagged, not removed**: archive-layer nodes and docs under the archive
//!   root stay in the arena but never count against the depth gate.
//! - **Contracts with no root, several roots, dangling parents or cycles are config
//!   errors**, not topology findings.

use crate::core::corpus::DocCorpus;
use crate::core::error::{self, DocsorError};
use crate::core::manifest::{DEFAULT_ARCHIVE_DIR, ROOT_INDEX};
use crate::core::{markdown, output, paths};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Root,
    Section,
    Leaf,
    Archive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopologyNode {
    pub path: String,
    pub layer: Layer,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default = "default_domain")]
    pub domain: String,
}

fn default_domain() -> String {
    "general".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArchiveSpec {
    pub root: String,
    pub excluded_from_depth_gate: bool,
}

impl Default for ArchiveSpec {
    fn default() -> Self {
        Self {
            root: DEFAULT_ARCHIVE_DIR.to_string(),
            excluded_from_depth_gate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TopologyContract {
    pub version: u32,
    pub root: String,
    pub max_depth: usize,
    pub nodes: Vec<TopologyNode>,
    pub archive: ArchiveSpec,
}

impl Default for TopologyContract {
    fn default() -> Self {
        Self::rooted_at(ROOT_INDEX, 3)
    }
}

impl TopologyContract {
    pub fn rooted_at(root: &str, max_depth: usize) -> Self {
        Self {
            version: 1,
            root: root.to_string(),
            max_depth,
            nodes: vec![TopologyNode {
                path: root.to_string(),
                layer: Layer::Root,
                parent: None,
                domain: "index".to_string(),
            }],
            archive: ArchiveSpec::default(),
        }
    }

    pub fn node(&self, path: &str) -> Option<&TopologyNode> {
        self.nodes.iter().find(|n| n.path == path)
    }

    pub fn is_archive_path(&self, path: &str) -> bool {
        let prefix = format!("{}/", self.archive.root.trim_end_matches('/'));
        path.starts_with(&prefix)
    }
}

/// Arena of contract nodes with index-based parent/child adjacency.
#[derive(Debug, Clone)]
pub struct TopologyGraph {
    nodes: Vec<TopologyNode>,
    index: FxHashMap<String, usize>,
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    root: usize,
    depth: Vec<Option<usize>>,
}

impl TopologyGraph {
    pub fn build(contract: &TopologyContract) -> Result<Self, DocsorError> {
        let mut problems = Vec::new();
        let mut index: FxHashMap<String, usize> = FxHashMap::default();
        for (i, node) in contract.nodes.iter().enumerate() {
            if !paths::is_safe_rel(&node.path) {
                problems.push(format!("node path must be repo-relative POSIX, got {:?}", node.path));
            }
            if index.insert(node.path.clone(), i).is_some() {
                problems.push(format!("duplicate node {}", node.path));
            }
        }

        let roots: Vec<usize> = contract
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.layer == Layer::Root)
            .map(|(i, _)| i)
            .collect();
        let root = match roots.as_slice() {
            [only] if contract.nodes[*only].path == contract.root => Some(*only),
            [only] => {
                problems.push(format!(
                    "root node {} does not match contract root {}",
                    contract.nodes[*only].path, contract.root
                ));
                None
            }
            [] => {
                problems.push(format!("contract has no root node for {}", contract.root));
                None
            }
            _ => {
                problems.push(format!("contract has {} root nodes, expected exactly one", roots.len()));
                None
            }
        };

        let mut parent = vec![None; contract.nodes.len()];
        let mut children = vec![Vec::new(); contract.nodes.len()];
        for (i, node) in contract.nodes.iter().enumerate() {
            match (&node.parent, node.layer) {
                (None, Layer::Root) => {}
                (Some(_), Layer::Root) => problems.push(format!("root {} must not have a parent", node.path)),
                (None, Layer::Archive) => {}
                (None, _) => problems.push(format!("node {} has no parent", node.path)),
                (Some(p), _) => match index.get(p) {
                    Some(&pi) => {
                        parent[i] = Some(pi);
                        children[pi].push(i);
                    }
                    None => problems.push(format!("node {} references unknown parent {p}", node.path)),
                },
            }
        }

        let Some(root) = root else {
            return Err(error::config_error("topology contract", problems.join("; ")));
        };

        let mut depth = vec![None; contract.nodes.len()];
        depth[root] = Some(0);
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            let next_depth = depth[current].map(|d| d + 1);
            for &child in &children[current] {
                if depth[child].is_none() {
                    depth[child] = next_depth;
                    queue.push_back(child);
                }
            }
        }
        for (i, node) in contract.nodes.iter().enumerate() {
            if depth[i].is_none() && parent[i].is_some() {
                problems.push(format!("node {} is part of a parent cycle", node.path));
            }
        }

        if !problems.is_empty() {
            return Err(error::config_error("topology contract", problems.join("; ")));
        }

        Ok(Self {
            nodes: contract.nodes.clone(),
            index,
            parent,
            children,
            root,
            depth,
        })
    }

    pub fn root_path(&self) -> &str {
        &self.nodes[self.root].path
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn node(&self, path: &str) -> Option<&TopologyNode> {
        self.index.get(path).map(|&i| &self.nodes[i])
    }

    pub fn depth_of(&self, path: &str) -> Option<usize> {
        self.index.get(path).and_then(|&i| self.depth[i])
    }

    pub fn parent_of(&self, path: &str) -> Option<&str> {
        let i = *self.index.get(path)?;
        self.parent[i].map(|p| self.nodes[p].path.as_str())
    }

    pub fn children_of(&self, path: &str) -> Vec<&str> {
        match self.index.get(path) {
            Some(&i) => self.children[i].iter().map(|&c| self.nodes[c].path.as_str()).collect(),
            None => Vec::new(),
        }
    }

    /// Parent chain from the immediate parent up to the root.
    pub fn ancestors(&self, path: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let Some(&start) = self.index.get(path) else {
            return out;
        };
        let mut current = self.parent[start];
        while let Some(p) = current {
            if out.len() > self.nodes.len() {
                break;
            }
            out.push(self.nodes[p].path.as_str());
            current = self.parent[p];
        }
        out
    }

    /// Ancestor of `path` whose depth is exactly `depth`.
    pub fn ancestor_at_depth(&self, path: &str, depth: usize) -> Option<&str> {
        self.ancestors(path)
            .into_iter()
            .find(|a| self.depth_of(a) == Some(depth))
    }

    pub fn nodes(&self) -> &[TopologyNode] {
        &self.nodes
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TopologyMetrics {
    pub topology_orphan_count: usize,
    pub unreachable_count: usize,
    pub max_depth: usize,
    pub depth_limit: usize,
    pub over_depth_count: usize,
    pub reachable_ratio: f64,
    pub navigation_missing_count: usize,
    pub missing_node_docs: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TopologyAnalysis {
    pub depths: BTreeMap<String, usize>,
    pub orphans: Vec<String>,
    pub unreachable: Vec<String>,
    pub over_depth: Vec<String>,
    pub missing_docs: Vec<String>,
    pub navigation_missing_by_parent: BTreeMap<String, Vec<String>>,
    pub metrics: TopologyMetrics,
}

/// Docs reachable from `root` by following local markdown links within the corpus.
pub fn link_reachable(corpus: &DocCorpus, root: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    if !corpus.contains(root) {
        return seen;
    }
    let mut queue = VecDeque::from([root.to_string()]);
    seen.insert(root.to_string());
    while let Some(doc) = queue.pop_front() {
        let Some(text) = corpus.get(&doc) else {
            continue;
        };
        for target in markdown::local_links(text) {
            if let Some(resolved) = paths::resolve_link(&doc, &target) {
                if corpus.contains(&resolved) && seen.insert(resolved.clone()) {
                    queue.push_back(resolved);
                }
            }
        }
    }
    seen
}

/// True when `parent_doc` contains a link that resolves to `child`.
pub fn links_to(corpus: &DocCorpus, parent_doc: &str, child: &str) -> bool {
    corpus.get(parent_doc).is_some_and(|text| {
        markdown::local_links(text)
            .iter()
            .filter_map(|t| paths::resolve_link(parent_doc, t))
            .any(|p| p == child)
    })
}

fn excluded(contract: &TopologyContract, node: &TopologyNode) -> bool {
    node.layer == Layer::Archive || contract.is_archive_path(&node.path)
}

pub fn analyze(
    contract: &TopologyContract,
    graph: &TopologyGraph,
    corpus: &DocCorpus,
    depth_limit: usize,
) -> TopologyAnalysis {
    let mut analysis = TopologyAnalysis::default();
    let reachable = link_reachable(corpus, graph.root_path());

    let mut counted = 0usize;
    let mut reached = 0usize;
    for node in graph.nodes() {
        let skip_depth = excluded(contract, node) && contract.archive.excluded_from_depth_gate;
        if let Some(depth) = graph.depth_of(&node.path) {
            analysis.depths.insert(node.path.clone(), depth);
            if !skip_depth {
                analysis.metrics.max_depth = analysis.metrics.max_depth.max(depth);
                if depth > depth_limit {
                    analysis.over_depth.push(node.path.clone());
                }
            }
        }
        if excluded(contract, node) {
            continue;
        }
        if !corpus.contains(&node.path) {
            analysis.missing_docs.push(node.path.clone());
            continue;
        }
        counted += 1;
        if reachable.contains(&node.path) {
            reached += 1;
            continue;
        }
        analysis.unreachable.push(node.path.clone());
        if let Some(parent) = graph.parent_of(&node.path) {
            if !links_to(corpus, parent, &node.path) {
                analysis
                    .navigation_missing_by_parent
                    .entry(parent.to_string())
                    .or_default()
                    .push(node.path.clone());
            }
        }
    }

    for doc in corpus.scope_docs(&contract.archive.root) {
        if !graph.contains(&doc) {
            analysis.orphans.push(doc);
        }
    }

    analysis.orphans.sort();
    analysis.unreachable.sort();
    analysis.over_depth.sort();
    analysis.missing_docs.sort();
    for children in analysis.navigation_missing_by_parent.values_mut() {
        children.sort();
    }

    analysis.metrics.topology_orphan_count = analysis.orphans.len();
    analysis.metrics.unreachable_count = analysis.unreachable.len();
    analysis.metrics.depth_limit = depth_limit;
    analysis.metrics.over_depth_count = analysis.over_depth.len();
    analysis.metrics.reachable_ratio = if counted == 0 {
        1.0
    } else {
        reached as f64 / counted as f64
    };
    analysis.metrics.navigation_missing_count = analysis
        .navigation_missing_by_parent
        .values()
        .map(Vec::len)
        .sum();
    analysis.metrics.missing_node_docs = analysis.missing_docs.len();
    analysis
}

/// The stricter of the contract's own limit and the policy limit.
pub fn effective_depth_limit(contract: &TopologyContract, policy_limit: usize) -> usize {
    if contract.max_depth == 0 {
        policy_limit
    } else {
        contract.max_depth.min(policy_limit)
    }
}

pub fn load_contract(path: &Path) -> Result<Option<TopologyContract>, DocsorError> {
    output::read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contract(value: serde_json::Value) -> TopologyContract {
        serde_json::from_value(value).unwrap()
    }

    fn sample() -> TopologyContract {
        contract(json!({
            "version": 1,
            "root": "docs/index.md",
            "max_depth": 2,
            "nodes": [
                {"path": "docs/index.md", "layer": "root", "parent": null, "domain": "index"},
                {"path": "docs/guide/index.md", "layer": "section", "parent": "docs/index.md", "domain": "guide"},
                {"path": "docs/guide/setup.md", "layer": "leaf", "parent": "docs/guide/index.md", "domain": "guide"},
                {"path": "docs/guide/deep/x.md", "layer": "leaf", "parent": "docs/guide/setup.md", "domain": "guide"},
                {"path": "docs/archive/old.md", "layer": "archive", "parent": null, "domain": "archive"}
            ]
        }))
    }

    #[test]
    fn test_build_computes_depth_by_bfs() {
        let graph = TopologyGraph::build(&sample()).unwrap();
        assert_eq!(graph.depth_of("docs/index.md"), Some(0));
        assert_eq!(graph.depth_of("docs/guide/setup.md"), Some(2));
        assert_eq!(graph.depth_of("docs/guide/deep/x.md"), Some(3));
        assert_eq!(
            graph.ancestors("docs/guide/deep/x.md"),
            vec!["docs/guide/setup.md", "docs/guide/index.md", "docs/index.md"]
        );
        assert_eq!(
            graph.ancestor_at_depth("docs/guide/deep/x.md", 1),
            Some("docs/guide/index.md")
        );
    }

    #[test]
    fn test_build_rejects_cycles_and_multiple_roots() {
        let cyclic = contract(json!({
            "root": "docs/index.md",
            "nodes": [
                {"path": "docs/index.md", "layer": "root"},
                {"path": "docs/a.md", "layer": "leaf", "parent": "docs/b.md"},
                {"path": "docs/b.md", "layer": "leaf", "parent": "docs/a.md"}
            ]
        }));
        let err = TopologyGraph::build(&cyclic).unwrap_err();
        assert!(err.to_string().contains("cycle"));

        let two_roots = contract(json!({
            "root": "docs/index.md",
            "nodes": [
                {"path": "docs/index.md", "layer": "root"},
                {"path": "docs/other.md", "layer": "root"}
            ]
        }));
        assert!(TopologyGraph::build(&two_roots).unwrap_err().is_config());
    }

    #[test]
    fn test_analyze_reports_orphans_unreachable_and_depth() {
        let c = sample();
        let graph = TopologyGraph::build(&c).unwrap();
        let corpus = DocCorpus::from_docs([
            ("docs/index.md", "# Index\n\n- [Guide](./guide/index.md)\n"),
            ("docs/guide/index.md", "# Guide\n"),
            ("docs/guide/setup.md", "# Setup\n\n[deep](./deep/x.md)\n"),
            ("docs/guide/deep/x.md", "# X\n"),
            ("docs/stray.md", "# Stray\n"),
            ("docs/archive/old.md", "# Old\n"),
        ]);
        let analysis = analyze(&c, &graph, &corpus, effective_depth_limit(&c, 3));
        assert_eq!(analysis.orphans, vec!["docs/stray.md"]);
        assert_eq!(
            analysis.unreachable,
            vec!["docs/guide/deep/x.md", "docs/guide/setup.md"]
        );
        assert_eq!(
            analysis.navigation_missing_by_parent.get("docs/guide/index.md"),
            Some(&vec!["docs/guide/setup.md".to_string()])
        );
        assert!(!analysis.navigation_missing_by_parent.contains_key("docs/guide/setup.md"));
        assert_eq!(analysis.over_depth, vec!["docs/guide/deep/x.md"]);
        assert_eq!(analysis.metrics.depth_limit, 2);
        assert_eq!(analysis.metrics.max_depth, 3);
        assert!((analysis.metrics.reachable_ratio - 0.5).abs() < 1e-9);
    }
}
