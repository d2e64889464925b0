use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Node records ───────────────────────────────────────────────────

/// The newest published version of a node and the dependency lines it declares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestVersion {
    pub version: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Dependency lines in declaration order, unparsed.
    pub raw_dependencies: Vec<String>,
}

/// One package ("node") tracked by the store.
///
/// `id` is fixed at creation; everything else is filled in or refreshed by
/// reconciliation and fetch passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    id: String,
    pub display_name: String,
    pub repository_url: Option<String>,
    pub downloads: u64,
    pub stars: u64,
    pub latest_version: Option<LatestVersion>,
    /// Node-type identifiers attributed to this node by the type map.
    pub node_type_ids: BTreeSet<String>,
    /// The node registers types dynamically, so `node_type_ids` is incomplete.
    pub has_dynamic_node_pattern: bool,
    /// Opaque per-node payloads keyed by stat kind (`web-dirs`, `routes`, ...).
    pub aux_stats: BTreeMap<String, serde_json::Value>,
    /// Dependency lines as they were before the first requirements-file replacement.
    pub backup_raw_dependencies: Option<Vec<String>>,
}

impl NodeRecord {
    /// A blank record with only its identifier set.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            repository_url: None,
            downloads: 0,
            stars: 0,
            latest_version: None,
            node_type_ids: BTreeSet::new(),
            has_dynamic_node_pattern: false,
            aux_stats: BTreeMap::new(),
            backup_raw_dependencies: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current dependency lines, empty when the node has no latest version.
    pub fn raw_dependencies(&self) -> &[String] {
        self.latest_version
            .as_ref()
            .map_or(&[][..], |v| v.raw_dependencies.as_slice())
    }

    /// Replace the dependency lines, snapshotting the originals the first time.
    pub fn replace_dependencies(&mut self, lines: Vec<String>) {
        let latest = self.latest_version.get_or_insert_with(LatestVersion::default);
        if self.backup_raw_dependencies.is_none() {
            self.backup_raw_dependencies = Some(latest.raw_dependencies.clone());
        }
        latest.raw_dependencies = lines;
    }

    /// Lines added and removed relative to the pre-replacement snapshot.
    pub fn dependency_diff(&self) -> Option<DependencyDiff> {
        let backup = self.backup_raw_dependencies.as_ref()?;
        let current = self.raw_dependencies();
        let added = current
            .iter()
            .filter(|line| !backup.contains(*line))
            .cloned()
            .collect();
        let removed = backup
            .iter()
            .filter(|line| !current.contains(*line))
            .cloned()
            .collect();
        Some(DependencyDiff { added, removed })
    }

    /// `YYYY-MM-DD` of the latest version, if known.
    pub fn latest_date(&self) -> Option<String> {
        self.latest_version
            .as_ref()
            .and_then(|v| v.created_at)
            .map(|t| t.format("%Y-%m-%d").to_string())
    }

    /// Apply a partial update. The id is never touched.
    pub fn apply(&mut self, patch: NodePatch) {
        if let Some(name) = patch.display_name {
            self.display_name = name;
        }
        if let Some(url) = patch.repository_url {
            self.repository_url = Some(url);
        }
        if let Some(downloads) = patch.downloads {
            self.downloads = downloads;
        }
        if let Some(stars) = patch.stars {
            self.stars = stars;
        }
        if let Some(latest) = patch.latest_version {
            self.latest_version = Some(latest);
        }
        self.node_type_ids.extend(patch.node_type_ids);
        self.has_dynamic_node_pattern |= patch.dynamic_node_pattern;
        if let Some(lines) = patch.raw_dependencies {
            self.replace_dependencies(lines);
        }
        self.aux_stats.extend(patch.aux_stats);
    }
}

/// Difference between a node's current and backed-up dependency lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl DependencyDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A partial update for an existing node. `None`/empty fields are left alone;
/// `node_type_ids` and `aux_stats` are merged, `raw_dependencies` replaces.
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub display_name: Option<String>,
    pub repository_url: Option<String>,
    pub downloads: Option<u64>,
    pub stars: Option<u64>,
    pub latest_version: Option<LatestVersion>,
    pub node_type_ids: Vec<String>,
    pub dynamic_node_pattern: bool,
    pub raw_dependencies: Option<Vec<String>>,
    pub aux_stats: Vec<(String, serde_json::Value)>,
}

impl NodePatch {
    pub fn node_type(type_id: impl Into<String>, dynamic: bool) -> Self {
        Self {
            node_type_ids: vec![type_id.into()],
            dynamic_node_pattern: dynamic,
            ..Self::default()
        }
    }

    /// Flag a node whose types come from a node-name pattern.
    pub fn dynamic_pattern() -> Self {
        Self {
            dynamic_node_pattern: true,
            ..Self::default()
        }
    }

    pub fn requirements(lines: Vec<String>) -> Self {
        Self {
            raw_dependencies: Some(lines),
            ..Self::default()
        }
    }

    pub fn aux_stat(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            aux_stats: vec![(kind.into(), payload)],
            ..Self::default()
        }
    }
}
