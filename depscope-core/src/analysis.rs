// Read-only queries over a store and its compiled aggregate.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use glob::Pattern;
use serde::Serialize;
use tracing::{debug, warn};

use crate::compile::{DependencyAggregate, RankMap};
use crate::parse::parse;
use crate::store::NodeStore;

/// Version key used for uses without any constraint.
pub const UNPINNED: &str = "*";

// ── Single-dependency report ───────────────────────────────────────

/// One node's use of the analysed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeUsage {
    pub node_id: String,
    pub display_name: String,
    pub repository_url: Option<String>,
    /// The declaration as written, minus any inline comment.
    pub spec: String,
    pub version_spec: String,
    pub downloads: u64,
    pub stars: u64,
    pub latest_date: Option<String>,
    pub rank: Option<usize>,
}

/// A node that mentions the package only in a commented-out line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentedUsage {
    pub node_id: String,
    pub display_name: String,
    pub commented_spec: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyReport {
    pub name: String,
    /// Ordered by download rank, most popular first.
    pub nodes_using: Vec<NodeUsage>,
    /// Version constraint → number of uses, most common first.
    pub version_counts: Vec<(String, usize)>,
    pub commented: Vec<CommentedUsage>,
}

impl DependencyReport {
    pub fn total_nodes(&self) -> usize {
        self.nodes_using
            .iter()
            .map(|u| u.node_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes_using.is_empty() && self.commented.is_empty()
    }
}

/// Everything known about one base package.
pub fn analyze_dependency(
    store: &NodeStore,
    agg: &DependencyAggregate,
    name: &str,
    ranks: &RankMap,
) -> DependencyReport {
    let name = name.trim().to_lowercase();
    let mut nodes_using = Vec::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();

    for dep_use in agg.base_to_nodes.get(&name).into_iter().flatten() {
        let version = if dep_use.version_spec.is_empty() {
            UNPINNED.to_string()
        } else {
            dep_use.version_spec.clone()
        };
        *counts.entry(version).or_default() += 1;

        let node = store.get(&dep_use.node_id);
        nodes_using.push(NodeUsage {
            node_id: dep_use.node_id.clone(),
            display_name: node.map_or_else(|| dep_use.node_id.clone(), |n| n.display_name.clone()),
            repository_url: node.and_then(|n| n.repository_url.clone()),
            spec: dep_use.raw_text.clone(),
            version_spec: dep_use.version_spec.clone(),
            downloads: node.map_or(0, |n| n.downloads),
            stars: node.map_or(0, |n| n.stars),
            latest_date: node.and_then(|n| n.latest_date()),
            rank: ranks.rank(&dep_use.node_id),
        });
    }
    nodes_using.sort_by_key(|u| u.rank.unwrap_or(usize::MAX));

    let mut version_counts: Vec<(String, usize)> = counts.into_iter().collect();
    version_counts.sort_by(|a, b| b.1.cmp(&a.1));

    let commented = agg
        .commented_dependencies
        .iter()
        .filter(|c| c.spec.commented_base_name().as_deref() == Some(name.as_str()))
        .map(|c| CommentedUsage {
            node_id: c.node_id.clone(),
            display_name: store
                .get(&c.node_id)
                .map_or_else(|| c.node_id.clone(), |n| n.display_name.clone()),
            commented_spec: c.spec.raw_text.clone(),
        })
        .collect();

    DependencyReport {
        name,
        nodes_using,
        version_counts,
        commented,
    }
}

// ── Search ─────────────────────────────────────────────────────────

/// How a query resolved against the known base packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "match", content = "names", rename_all = "lowercase")]
pub enum SearchResult {
    Exact(String),
    /// Wildcard query; names matching the pattern.
    Pattern(Vec<String>),
    Prefix(Vec<String>),
    Substring(Vec<String>),
    NotFound,
}

impl SearchResult {
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Exact(name) => vec![name.as_str()],
            Self::Pattern(names) | Self::Prefix(names) | Self::Substring(names) => {
                names.iter().map(String::as_str).collect()
            }
            Self::NotFound => Vec::new(),
        }
    }
}

fn is_pattern(query: &str) -> bool {
    query.contains(['*', '?', '['])
}

/// Resolve a query: a wildcard pattern matches with glob semantics;
/// otherwise exact, then prefix, then substring. Case-insensitive.
/// Multi-name results are ordered by usage, most used first.
pub fn search(agg: &DependencyAggregate, query: &str) -> SearchResult {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return SearchResult::NotFound;
    }

    let by_usage = |names: Vec<&String>| -> Vec<String> {
        let mut ranked: Vec<(&String, usize)> =
            names.into_iter().map(|n| (n, agg.node_count(n))).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.into_iter().map(|(n, _)| n.clone()).collect()
    };
    let non_empty = |names: Vec<String>, wrap: fn(Vec<String>) -> SearchResult| {
        if names.is_empty() {
            SearchResult::NotFound
        } else {
            wrap(names)
        }
    };

    let known = &agg.unique_base_dependencies;

    if is_pattern(&query) {
        let pattern = match Pattern::new(&query) {
            Ok(p) => p,
            Err(e) => {
                warn!(query, error = %e, "Invalid search pattern");
                return SearchResult::NotFound;
            }
        };
        let hits = known.iter().filter(|n| pattern.matches(n)).collect();
        return non_empty(by_usage(hits), SearchResult::Pattern);
    }

    if known.contains(&query) {
        return SearchResult::Exact(query);
    }

    let prefix: Vec<&String> = known.iter().filter(|n| n.starts_with(&query)).collect();
    if !prefix.is_empty() {
        return SearchResult::Prefix(by_usage(prefix));
    }

    let substring = known.iter().filter(|n| n.contains(&query)).collect();
    non_empty(by_usage(substring), SearchResult::Substring)
}

// ── Version conflicts ──────────────────────────────────────────────

/// A package pinned to different exact versions by different nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionConflict {
    pub name: String,
    /// Pinned version → nodes pinning it.
    pub pins: BTreeMap<String, Vec<String>>,
}

impl VersionConflict {
    pub fn node_count(&self) -> usize {
        self.pins
            .values()
            .flatten()
            .collect::<HashSet<_>>()
            .len()
    }
}

/// The version an `==` / `===` constraint pins, if any.
fn pinned_version(version_spec: &str) -> Option<&str> {
    let start = version_spec.find("==")?;
    let rest = version_spec[start..].trim_start_matches('=').trim_start();
    let end = rest
        .find(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .unwrap_or(rest.len());
    let version = &rest[..end];
    (!version.is_empty()).then_some(version)
}

/// Packages whose `==` pins disagree across nodes, alphabetical.
pub fn version_conflicts(agg: &DependencyAggregate) -> Vec<VersionConflict> {
    let mut conflicts = Vec::new();
    for (name, uses) in &agg.base_to_nodes {
        let mut pins: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for dep_use in uses {
            if let Some(version) = pinned_version(&dep_use.version_spec) {
                let nodes = pins.entry(version.to_string()).or_default();
                if !nodes.contains(&dep_use.node_id) {
                    nodes.push(dep_use.node_id.clone());
                }
            }
        }
        if pins.len() > 1 {
            conflicts.push(VersionConflict {
                name: name.clone(),
                pins,
            });
        }
    }
    debug!(conflicts = conflicts.len(), "Version conflicts computed");
    conflicts
}

// ── Cumulative growth ──────────────────────────────────────────────

/// Distinct dependencies needed to install the top `rank` nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CumulativePoint {
    pub rank: usize,
    pub node_id: String,
    pub display_name: String,
    /// Distinct packages this node declares.
    pub node_unique: usize,
    /// Distinct packages across ranks 1..=rank.
    pub cumulative_unique: usize,
}

/// Walk nodes in rank order and count how the set of distinct packages
/// grows. Git references without a name count by URL.
pub fn cumulative_dependencies(store: &NodeStore, ranks: &RankMap) -> Vec<CumulativePoint> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut points = Vec::with_capacity(ranks.len());

    for (i, id) in ranks.ordered_ids().iter().enumerate() {
        let Some(node) = store.get(id) else {
            continue;
        };
        let own: BTreeSet<String> = node
            .raw_dependencies()
            .iter()
            .filter_map(|line| parse(line).identity().map(str::to_string))
            .collect();
        let node_unique = own.len();
        seen.extend(own);
        points.push(CumulativePoint {
            rank: i + 1,
            node_id: id.clone(),
            display_name: node.display_name.clone(),
            node_unique,
            cumulative_unique: seen.len(),
        });
    }
    points
}

/// Cumulative counts at selected rank milestones, skipping milestones past
/// the end. The last point is always included.
pub fn milestones(points: &[CumulativePoint], at: &[usize]) -> Vec<(usize, usize)> {
    let index: HashMap<usize, usize> = points
        .iter()
        .map(|p| (p.rank, p.cumulative_unique))
        .collect();
    let mut out: Vec<(usize, usize)> = at
        .iter()
        .filter_map(|rank| index.get(rank).map(|count| (*rank, *count)))
        .collect();
    if let Some(last) = points.last() {
        if out.last().is_none_or(|(rank, _)| *rank != last.rank) {
            out.push((last.rank, last.cumulative_unique));
        }
    }
    out
}
