// Dependency compiler: walks the store and builds the aggregate index.
//
// The aggregate is always rebuilt from scratch. Nothing here caches state
// between calls, so compiling an unchanged store twice yields equal output.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, instrument};

use crate::parse::{DependencySpec, SpecKind, parse};
use crate::store::NodeStore;
use crate::types::NodeRecord;

/// One node's use of a base package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyUse {
    pub node_id: String,
    pub version_spec: String,
    /// The comment-stripped line the use came from.
    pub raw_text: String,
}

/// A non-regular dependency record tagged with its node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSpec {
    pub node_id: String,
    pub spec: DependencySpec,
}

/// Corpus-wide dependency index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyAggregate {
    /// Base names of all regular specs, alphabetical.
    pub unique_base_dependencies: BTreeSet<String>,
    /// Base name → uses, each list in store order.
    pub base_to_nodes: BTreeMap<String, Vec<DependencyUse>>,
    pub git_dependencies: Vec<NodeSpec>,
    pub pip_commands: Vec<NodeSpec>,
    pub commented_dependencies: Vec<NodeSpec>,
    /// Nodes with at least one regular or git dependency, store order.
    pub nodes_with_dependencies: Vec<String>,
    pub nodes_without_dependencies: Vec<String>,
}

impl DependencyAggregate {
    /// Number of distinct nodes using `base`.
    pub fn node_count(&self, base: &str) -> usize {
        self.base_to_nodes.get(base).map_or(0, |uses| {
            uses.iter()
                .map(|u| u.node_id.as_str())
                .collect::<HashSet<_>>()
                .len()
        })
    }

    /// Base names by number of distinct using nodes, most used first; ties
    /// alphabetical.
    pub fn sorted_by_frequency(&self) -> Vec<(&str, usize)> {
        let mut counts: Vec<(&str, usize)> = self
            .unique_base_dependencies
            .iter()
            .map(|base| (base.as_str(), self.node_count(base)))
            .collect();
        // BTreeSet iteration is alphabetical and the sort is stable.
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts
    }

    /// Total regular dependency references across all nodes.
    pub fn total_references(&self) -> usize {
        self.base_to_nodes.values().map(Vec::len).sum()
    }

    /// Distinct raw regular specs (`numpy` and `numpy>=1` count separately).
    pub fn unique_raw_specs(&self) -> usize {
        self.base_to_nodes
            .values()
            .flatten()
            .map(|u| u.raw_text.to_lowercase())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Node ids with at least one commented-out dependency, store order.
    pub fn nodes_with_commented(&self) -> Vec<&str> {
        distinct_nodes(&self.commented_dependencies)
    }

    /// Node ids with at least one git reference, store order.
    pub fn nodes_with_git(&self) -> Vec<&str> {
        distinct_nodes(&self.git_dependencies)
    }

    /// Node ids with at least one pip directive, store order.
    pub fn nodes_with_pip_commands(&self) -> Vec<&str> {
        distinct_nodes(&self.pip_commands)
    }
}

fn distinct_nodes(specs: &[NodeSpec]) -> Vec<&str> {
    let mut seen = HashSet::new();
    specs
        .iter()
        .map(|s| s.node_id.as_str())
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Compile the whole store.
#[instrument(skip_all, fields(nodes = store.len()))]
pub fn compile(store: &NodeStore) -> DependencyAggregate {
    compile_nodes(store.iter())
}

/// Compile an already-filtered set of nodes, in the order given.
pub fn compile_nodes<'a>(nodes: impl IntoIterator<Item = &'a NodeRecord>) -> DependencyAggregate {
    let mut agg = DependencyAggregate::default();

    for node in nodes {
        let mut active = false;
        for line in node.raw_dependencies() {
            let spec = parse(line);
            match spec.kind {
                SpecKind::Regular => {
                    let Some(base) = spec.base_name.clone() else {
                        continue;
                    };
                    active = true;
                    agg.unique_base_dependencies.insert(base.clone());
                    agg.base_to_nodes.entry(base).or_default().push(DependencyUse {
                        node_id: node.id().to_string(),
                        version_spec: spec.version_spec,
                        raw_text: spec.raw_text,
                    });
                }
                SpecKind::Git => {
                    active = true;
                    agg.git_dependencies.push(NodeSpec {
                        node_id: node.id().to_string(),
                        spec,
                    });
                }
                SpecKind::PipCommand => agg.pip_commands.push(NodeSpec {
                    node_id: node.id().to_string(),
                    spec,
                }),
                SpecKind::Commented => {
                    if !spec.raw_text.is_empty() {
                        agg.commented_dependencies.push(NodeSpec {
                            node_id: node.id().to_string(),
                            spec,
                        });
                    }
                }
            }
        }
        if active {
            agg.nodes_with_dependencies.push(node.id().to_string());
        } else {
            agg.nodes_without_dependencies.push(node.id().to_string());
        }
    }

    debug!(
        unique = agg.unique_base_dependencies.len(),
        git = agg.git_dependencies.len(),
        pip = agg.pip_commands.len(),
        commented = agg.commented_dependencies.len(),
        "Compiled dependency aggregate"
    );
    agg
}

// ── Ranking ────────────────────────────────────────────────────────

/// Download rank per node: 1 is the most downloaded, ties keep store order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankMap {
    order: Vec<String>,
    ranks: HashMap<String, usize>,
}

impl RankMap {
    pub fn rank(&self, id: &str) -> Option<usize> {
        self.ranks.get(id).copied()
    }

    /// Node ids from rank 1 downwards.
    pub fn ordered_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Nodes sorted by downloads, descending; stable with respect to store order.
pub fn ranked_nodes(store: &NodeStore) -> Vec<&NodeRecord> {
    let mut nodes: Vec<&NodeRecord> = store.iter().collect();
    nodes.sort_by(|a, b| b.downloads.cmp(&a.downloads));
    nodes
}

/// Compute the rank map once per session and share it.
pub fn rank_map(store: &NodeStore) -> RankMap {
    let order: Vec<String> = ranked_nodes(store)
        .into_iter()
        .map(|n| n.id().to_string())
        .collect();
    let ranks = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), i + 1))
        .collect();
    RankMap { order, ranks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LatestVersion;

    fn node(id: &str, downloads: u64, deps: &[&str]) -> NodeRecord {
        let mut record = NodeRecord::new(id);
        record.downloads = downloads;
        record.latest_version = Some(LatestVersion {
            version: "1.0.0".into(),
            created_at: None,
            raw_dependencies: deps.iter().map(ToString::to_string).collect(),
        });
        record
    }

    #[test]
    fn version_grouping() {
        let store = NodeStore::from_records([
            node("a", 10, &["numpy"]),
            node("b", 20, &["numpy>=1.20"]),
            node("c", 30, &["numpy==1.24.0"]),
        ]);
        let agg = compile(&store);

        let uses = &agg.base_to_nodes["numpy"];
        assert_eq!(uses.len(), 3);
        let specs: Vec<&str> = uses.iter().map(|u| u.version_spec.as_str()).collect();
        assert_eq!(specs, vec!["", ">=1.20", "==1.24.0"]);
        let nodes: Vec<&str> = uses.iter().map(|u| u.node_id.as_str()).collect();
        assert_eq!(nodes, vec!["a", "b", "c"]);
        assert_eq!(
            agg.unique_base_dependencies.iter().filter(|b| *b == "numpy").count(),
            1
        );
        assert_eq!(agg.node_count("numpy"), 3);
    }

    #[test]
    fn buckets_non_regular_specs() {
        let store = NodeStore::from_records([node(
            "a",
            0,
            &[
                "torch",
                "pkg @ git+https://github.com/a/b.git",
                "--extra-index-url https://x",
                "# opencv-python",
                "",
            ],
        )]);
        let agg = compile(&store);
        assert_eq!(agg.unique_base_dependencies.len(), 1);
        assert_eq!(agg.git_dependencies.len(), 1);
        assert_eq!(agg.pip_commands.len(), 1);
        assert_eq!(agg.commented_dependencies.len(), 1);
        assert_eq!(agg.commented_dependencies[0].spec.raw_text, "opencv-python");
        assert_eq!(agg.nodes_with_commented(), vec!["a"]);
        assert_eq!(agg.nodes_with_pip_commands(), vec!["a"]);
    }

    #[test]
    fn blank_lines_never_become_dependencies() {
        let store = NodeStore::from_records([node("a", 0, &["   ", "  # only a comment"])]);
        let agg = compile(&store);
        assert!(agg.unique_base_dependencies.is_empty());
        assert!(!agg.base_to_nodes.contains_key(""));
        assert_eq!(agg.nodes_without_dependencies, vec!["a"]);
    }

    #[test]
    fn nodes_with_and_without() {
        let mut bare = NodeRecord::new("bare");
        bare.latest_version = None;
        let store = NodeStore::from_records([
            node("only-git", 0, &["git+https://github.com/x/y"]),
            bare,
            node("only-pip", 0, &["--index-url https://x"]),
        ]);
        let agg = compile(&store);
        assert_eq!(agg.nodes_with_dependencies, vec!["only-git"]);
        assert_eq!(agg.nodes_without_dependencies, vec!["bare", "only-pip"]);
    }

    #[test]
    fn compile_is_idempotent() {
        let store = NodeStore::from_records([
            node("b", 5, &["torch>=2", "numpy", "# x"]),
            node("a", 5, &["Numpy==1.0", "einops", "git+https://github.com/o/r"]),
        ]);
        let first = compile(&store);
        let second = compile(&store);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn frequency_ordering() {
        let store = NodeStore::from_records([
            node("a", 0, &["torch", "numpy", "numpy>=1"]),
            node("b", 0, &["numpy", "einops"]),
            node("c", 0, &["torch"]),
        ]);
        let agg = compile(&store);
        assert_eq!(
            agg.sorted_by_frequency(),
            vec![("numpy", 2), ("torch", 2), ("einops", 1)]
        );
        assert_eq!(agg.total_references(), 6);
        assert_eq!(agg.unique_raw_specs(), 4);
    }

    #[test]
    fn rank_map_orders_by_downloads() {
        let store = NodeStore::from_records([
            node("low", 1, &[]),
            node("high", 100, &[]),
            node("mid", 50, &[]),
        ]);
        let ranks = rank_map(&store);
        assert_eq!(ranks.rank("high"), Some(1));
        assert_eq!(ranks.rank("mid"), Some(2));
        assert_eq!(ranks.rank("low"), Some(3));
        assert_eq!(ranks.rank("ghost"), None);
    }

    #[test]
    fn rank_map_ties_keep_store_order() {
        let store = NodeStore::from_records([
            node("first", 10, &[]),
            node("second", 10, &[]),
            node("top", 20, &[]),
            node("third", 10, &[]),
        ]);
        for _ in 0..5 {
            let ranks = rank_map(&store);
            assert_eq!(ranks.ordered_ids(), ["top", "first", "second", "third"]);
        }
    }
}
