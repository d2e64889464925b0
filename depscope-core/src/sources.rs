// Shapes of the data sources the engine consumes.
//
// Reading these from disk or the network is the caller's job; this module only
// fixes the record shapes and converts them into store records.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{LatestVersion, NodeRecord};

// ── Primary source ─────────────────────────────────────────────────

/// A node as it appears in the registry dump or an API page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNode {
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub downloads: Option<u64>,
    #[serde(default)]
    pub github_stars: Option<u64>,
    #[serde(default)]
    pub latest_version: Option<RawLatestVersion>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLatestVersion {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<String>,
    /// Usually a list of strings, but the registry is not strict about it.
    #[serde(default)]
    pub dependencies: serde_json::Value,
}

impl RawNode {
    /// Convert into a store record. Nodes without an id cannot be keyed and
    /// yield `None`.
    pub fn into_record(self) -> Option<NodeRecord> {
        let id = self.id.filter(|id| !id.is_empty())?;
        let mut record = NodeRecord::new(id);
        if let Some(name) = self.name {
            record.display_name = name;
        }
        record.repository_url = self.repository.filter(|url| !url.trim().is_empty());
        record.downloads = self.downloads.unwrap_or(0);
        record.stars = self.github_stars.unwrap_or(0);
        record.latest_version = self.latest_version.map(RawLatestVersion::into_latest);
        Some(record)
    }
}

impl RawLatestVersion {
    fn into_latest(self) -> LatestVersion {
        let created_at = self.created_at.as_deref().and_then(parse_timestamp);
        let raw_dependencies = match self.dependencies {
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            serde_json::Value::Null => Vec::new(),
            other => {
                debug!(dependencies = %other, "Ignoring non-list dependencies field");
                Vec::new()
            }
        };
        LatestVersion {
            version: self.version.unwrap_or_default(),
            created_at,
            raw_dependencies,
        }
    }
}

/// Accepts RFC 3339 and the registry's zone-less `2024-05-01T12:30:00.123456` form.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|t| t.and_utc())
}

/// The `{"nodes": [...]}` registry dump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodesFile {
    #[serde(default)]
    pub nodes: Vec<RawNode>,
}

/// One page of the registry listing API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryPage {
    #[serde(default)]
    pub nodes: Vec<RawNode>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub total: u64,
    #[serde(default, rename = "totalNumberOfPages")]
    pub total_pages: u32,
}

// ── Node-type map ──────────────────────────────────────────────────

/// Where a node-type identifier comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTypeTarget {
    pub repository_url: String,
    #[serde(default)]
    pub dynamic_pattern: bool,
}

/// Node-type id → originating repository, plus repositories that declare
/// only a node-name pattern and no fixed type ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTypeMap {
    pub entries: BTreeMap<String, NodeTypeTarget>,
    #[serde(default)]
    pub pattern_repositories: BTreeSet<String>,
}

impl NodeTypeMap {
    pub fn insert(&mut self, type_id: impl Into<String>, repository_url: impl Into<String>, dynamic_pattern: bool) {
        self.entries.insert(
            type_id.into(),
            NodeTypeTarget {
                repository_url: repository_url.into(),
                dynamic_pattern,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.pattern_repositories.is_empty()
    }

    /// Invert the manager's `extension-node-map.json`, which is keyed by
    /// repository: `{ url: [[type, ...], {"nodename_pattern": ...}] }`.
    /// A type claimed by several repositories keeps the first claim.
    pub fn from_extension_map(value: &serde_json::Value) -> Self {
        let mut map = Self::default();
        let Some(repos) = value.as_object() else {
            return map;
        };
        for (url, entry) in repos {
            let Some(parts) = entry.as_array() else {
                continue;
            };
            let types = parts.first().and_then(serde_json::Value::as_array);
            let dynamic = parts
                .get(1)
                .and_then(|meta| meta.get("nodename_pattern"))
                .is_some_and(|p| !p.is_null());
            for type_id in types.into_iter().flatten().filter_map(serde_json::Value::as_str) {
                map.entries
                    .entry(type_id.to_string())
                    .or_insert_with(|| NodeTypeTarget {
                        repository_url: url.clone(),
                        dynamic_pattern: dynamic,
                    });
            }
            if dynamic && types.is_none_or(Vec::is_empty) {
                map.pattern_repositories.insert(url.clone());
            }
        }
        map
    }
}

// ── Requirements cache ─────────────────────────────────────────────

/// Node id → raw `requirements.txt` text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequirementsCache {
    pub files: BTreeMap<String, String>,
}

impl RequirementsCache {
    pub fn insert(&mut self, node_id: impl Into<String>, text: impl Into<String>) {
        self.files.insert(node_id.into(), text.into());
    }

    pub fn remove(&mut self, node_id: &str) -> Option<String> {
        self.files.remove(node_id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

// ── Auxiliary stats ────────────────────────────────────────────────

/// How an auxiliary stat table's keys identify nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuxKey {
    #[default]
    NodeId,
    RepositoryUrl,
    NodeTypeId,
}

/// A per-node stat table such as discovered web directories or HTTP routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxStatSource {
    pub kind: String,
    pub key: AuxKey,
    pub entries: BTreeMap<String, serde_json::Value>,
}

impl AuxStatSource {
    pub fn new(kind: impl Into<String>, key: AuxKey) -> Self {
        Self {
            kind: kind.into(),
            key,
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, payload: serde_json::Value) -> Self {
        self.entries.insert(key.into(), payload);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_node_conversion() {
        let json = r#"{
            "id": "comfyui-kjnodes",
            "name": "KJNodes",
            "repository": "https://github.com/kijai/ComfyUI-KJNodes",
            "downloads": 120000,
            "github_stars": 900,
            "latest_version": {
                "version": "1.0.5",
                "createdAt": "2024-11-02T09:15:00.123456",
                "dependencies": ["numpy", "pillow>=10.3.0", 7]
            }
        }"#;
        let raw: RawNode = serde_json::from_str(json).unwrap();
        let record = raw.into_record().unwrap();
        assert_eq!(record.id(), "comfyui-kjnodes");
        assert_eq!(record.display_name, "KJNodes");
        assert_eq!(record.downloads, 120_000);
        assert_eq!(record.stars, 900);
        assert_eq!(record.raw_dependencies(), ["numpy", "pillow>=10.3.0", "7"]);
        assert_eq!(record.latest_date().as_deref(), Some("2024-11-02"));
    }

    #[test]
    fn node_without_id_is_rejected() {
        let raw: RawNode = serde_json::from_str(r#"{"name": "orphan"}"#).unwrap();
        assert!(raw.into_record().is_none());
    }

    #[test]
    fn odd_dependency_fields() {
        let raw: RawNode = serde_json::from_str(
            r#"{"id": "a", "latest_version": {"dependencies": "numpy"}}"#,
        )
        .unwrap();
        assert!(raw.into_record().unwrap().raw_dependencies().is_empty());

        let raw: RawNode =
            serde_json::from_str(r#"{"id": "b", "latest_version": {"dependencies": null}}"#)
                .unwrap();
        assert!(raw.into_record().unwrap().raw_dependencies().is_empty());
    }

    #[test]
    fn registry_page_shape() {
        let page: RegistryPage = serde_json::from_str(
            r#"{"nodes": [{"id": "a"}], "page": 1, "limit": 30, "total": 61, "totalNumberOfPages": 3}"#,
        )
        .unwrap();
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.nodes.len(), 1);
    }

    #[test]
    fn extension_map_inversion() {
        let value = serde_json::json!({
            "https://github.com/ltdrdata/ComfyUI-Impact-Pack": [
                ["DetailerForEach", "SAMLoader"],
                {"title_aux": "Impact Pack"}
            ],
            "https://github.com/other/Dynamic": [
                [],
                {"nodename_pattern": "^Dyn"}
            ],
            "https://github.com/z/dup": [["SAMLoader"], {}]
        });
        let map = NodeTypeMap::from_extension_map(&value);
        assert_eq!(
            map.entries["DetailerForEach"].repository_url,
            "https://github.com/ltdrdata/ComfyUI-Impact-Pack"
        );
        assert_eq!(
            map.entries["SAMLoader"].repository_url,
            "https://github.com/ltdrdata/ComfyUI-Impact-Pack"
        );
        assert_eq!(map.len(), 2);
        assert!(map.entries.keys().all(|id| !id.contains("Dynamic")));
        assert_eq!(
            map.pattern_repositories.iter().collect::<Vec<_>>(),
            vec!["https://github.com/other/Dynamic"]
        );
    }

    #[test]
    fn aux_key_serde() {
        let key: AuxKey = serde_json::from_str("\"repository-url\"").unwrap();
        assert_eq!(key, AuxKey::RepositoryUrl);
    }
}
