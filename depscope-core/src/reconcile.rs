// Reconciliation: merge auxiliary sources into an already-loaded store.
//
// Sources only enrich records that exist. Anything that cannot be tied to a
// node is counted in the report and otherwise dropped.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::parse::parse_requirements_text;
use crate::repo_url::{MatchKind, RepoIndex};
use crate::sources::{AuxKey, AuxStatSource, NodeTypeMap, RequirementsCache};
use crate::store::NodeStore;
use crate::types::NodePatch;

/// Outcome of merging one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub source: String,
    pub matched_exact: usize,
    pub matched_fork: usize,
    /// Source keys that matched no node.
    pub unmatched: Vec<String>,
}

impl ReconcileReport {
    fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    fn record(&mut self, kind: MatchKind) {
        match kind {
            MatchKind::Exact => self.matched_exact += 1,
            MatchKind::Fork => self.matched_fork += 1,
        }
    }

    pub fn matched(&self) -> usize {
        self.matched_exact + self.matched_fork
    }
}

/// Everything `reconcile_all` can merge. Any part may be absent.
#[derive(Debug, Default)]
pub struct ReconcileSources {
    pub node_types: Option<NodeTypeMap>,
    pub requirements: Option<RequirementsCache>,
    pub stats: Vec<AuxStatSource>,
}

fn repo_index(store: &NodeStore) -> RepoIndex {
    RepoIndex::build(
        store
            .iter()
            .filter_map(|node| Some((node.id(), node.repository_url.as_deref()?))),
    )
}

/// Attribute node-type ids to the nodes whose repository matches, and flag
/// nodes whose repository declares only a node-name pattern.
#[instrument(skip_all, fields(entries = map.len()))]
pub fn reconcile_node_types(store: &mut NodeStore, map: &NodeTypeMap) -> ReconcileReport {
    let index = repo_index(store);
    let mut report = ReconcileReport::new("node-types");

    for (type_id, target) in &map.entries {
        match index.resolve(&target.repository_url) {
            Some((id, kind)) => {
                if kind == MatchKind::Fork {
                    debug!(type_id, url = %target.repository_url, node = id, "Fork-level match");
                }
                store.enrich(id, NodePatch::node_type(type_id, target.dynamic_pattern));
                report.record(kind);
            }
            None => report.unmatched.push(type_id.clone()),
        }
    }
    for url in &map.pattern_repositories {
        match index.resolve(url) {
            Some((id, kind)) => {
                store.enrich(id, NodePatch::dynamic_pattern());
                report.record(kind);
            }
            None => report.unmatched.push(url.clone()),
        }
    }

    info!(
        exact = report.matched_exact,
        fork = report.matched_fork,
        unmatched = report.unmatched.len(),
        "Node-type map reconciled"
    );
    report
}

/// Replace dependency lines with cached `requirements.txt` contents.
#[instrument(skip_all, fields(files = cache.len()))]
pub fn reconcile_requirements(store: &mut NodeStore, cache: &RequirementsCache) -> ReconcileReport {
    let mut report = ReconcileReport::new("requirements");

    for (id, text) in &cache.files {
        let lines = parse_requirements_text(text);
        if store.enrich(id, NodePatch::requirements(lines)) {
            report.matched_exact += 1;
        } else {
            report.unmatched.push(id.clone());
        }
    }

    info!(
        replaced = report.matched_exact,
        unmatched = report.unmatched.len(),
        "Requirements cache reconciled"
    );
    report
}

/// Attach an auxiliary stat payload under `aux_stats[source.kind]`.
///
/// Tables keyed by node-type id need [`reconcile_node_types`] to have run.
#[instrument(skip_all, fields(kind = %source.kind, key = ?source.key))]
pub fn reconcile_stats(store: &mut NodeStore, source: &AuxStatSource) -> ReconcileReport {
    let mut report = ReconcileReport::new(source.kind.clone());

    let targets: Vec<(String, Option<(String, MatchKind)>)> = match source.key {
        AuxKey::NodeId => source
            .entries
            .keys()
            .map(|key| {
                let hit = store.contains(key).then(|| (key.clone(), MatchKind::Exact));
                (key.clone(), hit)
            })
            .collect(),
        AuxKey::RepositoryUrl => {
            let index = repo_index(store);
            source
                .entries
                .keys()
                .map(|key| {
                    let hit = index
                        .resolve(key)
                        .map(|(id, kind)| (id.to_string(), kind));
                    (key.clone(), hit)
                })
                .collect()
        }
        AuxKey::NodeTypeId => {
            let mut owners: HashMap<&str, &str> = HashMap::new();
            for node in store.iter() {
                for type_id in &node.node_type_ids {
                    owners.entry(type_id.as_str()).or_insert(node.id());
                }
            }
            source
                .entries
                .keys()
                .map(|key| {
                    let hit = owners
                        .get(key.as_str())
                        .map(|id| ((*id).to_string(), MatchKind::Exact));
                    (key.clone(), hit)
                })
                .collect()
        }
    };

    for (key, hit) in targets {
        let Some((id, kind)) = hit else {
            report.unmatched.push(key);
            continue;
        };
        let payload = source.entries[&key].clone();
        if source.key == AuxKey::NodeTypeId {
            merge_type_keyed_stat(store, &id, &source.kind, &key, payload);
        } else {
            store.enrich(&id, NodePatch::aux_stat(source.kind.clone(), payload));
        }
        report.record(kind);
    }

    info!(
        matched = report.matched(),
        unmatched = report.unmatched.len(),
        "Auxiliary stats reconciled"
    );
    report
}

/// Several node types may belong to one node, so type-keyed payloads are
/// collected into an object keyed by type id.
fn merge_type_keyed_stat(
    store: &mut NodeStore,
    id: &str,
    kind: &str,
    type_id: &str,
    payload: serde_json::Value,
) {
    let mut merged = store
        .get(id)
        .and_then(|node| node.aux_stats.get(kind))
        .and_then(serde_json::Value::as_object)
        .cloned()
        .unwrap_or_default();
    merged.insert(type_id.to_string(), payload);
    store.enrich(id, NodePatch::aux_stat(kind, serde_json::Value::Object(merged)));
}

/// Merge every available source in dependency order: node types first (stat
/// tables keyed by type id need them), then requirements, then stats.
pub fn reconcile_all(store: &mut NodeStore, sources: &ReconcileSources) -> Vec<ReconcileReport> {
    let mut reports = Vec::new();
    if let Some(map) = &sources.node_types {
        reports.push(reconcile_node_types(store, map));
    }
    if let Some(cache) = &sources.requirements {
        reports.push(reconcile_requirements(store, cache));
    }
    for source in &sources.stats {
        reports.push(reconcile_stats(store, source));
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LatestVersion, NodeRecord};

    fn node(id: &str, url: Option<&str>, deps: &[&str]) -> NodeRecord {
        let mut record = NodeRecord::new(id);
        record.repository_url = url.map(String::from);
        record.latest_version = Some(LatestVersion {
            version: "1.0.0".into(),
            created_at: None,
            raw_dependencies: deps.iter().map(ToString::to_string).collect(),
        });
        record
    }

    fn sample_store() -> NodeStore {
        NodeStore::from_records([
            node("impact", Some("https://github.com/ltdrdata/ComfyUI-Impact-Pack"), &["ultralytics"]),
            node("kj", Some("https://github.com/kijai/ComfyUI-KJNodes.git"), &["numpy"]),
            node("no-repo", None, &[]),
        ])
    }

    #[test]
    fn node_types_exact_and_fork() {
        let mut store = sample_store();
        let mut map = NodeTypeMap::default();
        map.insert("DetailerForEach", "https://github.com/ltdrdata/comfyui-impact-pack", false);
        map.insert("ImageResizeKJ", "https://github.com/someone-else/ComfyUI-KJNodes", true);
        map.insert("Orphan", "https://github.com/x/unknown", false);

        let report = reconcile_node_types(&mut store, &map);
        assert_eq!(report.matched_exact, 1);
        assert_eq!(report.matched_fork, 1);
        assert_eq!(report.unmatched, vec!["Orphan"]);

        let kj = store.get("kj").unwrap();
        assert!(kj.node_type_ids.contains("ImageResizeKJ"));
        assert!(kj.has_dynamic_node_pattern);
        assert!(store.get("impact").unwrap().node_type_ids.contains("DetailerForEach"));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn pattern_only_repository_sets_flag_without_type_ids() {
        let mut store = sample_store();
        let mut map = NodeTypeMap::default();
        map.pattern_repositories
            .insert("https://github.com/ltdrdata/ComfyUI-Impact-Pack.git".into());
        map.pattern_repositories.insert("https://github.com/x/gone".into());

        let report = reconcile_node_types(&mut store, &map);
        assert_eq!(report.matched_exact, 1);
        assert_eq!(report.unmatched, vec!["https://github.com/x/gone"]);

        let impact = store.get("impact").unwrap();
        assert!(impact.has_dynamic_node_pattern);
        assert!(impact.node_type_ids.is_empty());
        assert!(!store.get("kj").unwrap().has_dynamic_node_pattern);
    }

    #[test]
    fn requirements_replace_with_backup() {
        let mut store = sample_store();
        let mut cache = RequirementsCache::default();
        cache.insert("kj", "numpy>=1.26\n\n# optional\nscipy\n");
        cache.insert("ghost", "torch\n");

        let report = reconcile_requirements(&mut store, &cache);
        assert_eq!(report.matched_exact, 1);
        assert_eq!(report.unmatched, vec!["ghost"]);
        assert!(!store.contains("ghost"));

        let kj = store.get("kj").unwrap();
        assert_eq!(kj.raw_dependencies(), ["numpy>=1.26", "# optional", "scipy"]);
        assert_eq!(kj.backup_raw_dependencies, Some(vec!["numpy".to_string()]));

        // A second pass must not overwrite the original backup.
        let mut second = RequirementsCache::default();
        second.insert("kj", "pandas\n");
        reconcile_requirements(&mut store, &second);
        let kj = store.get("kj").unwrap();
        assert_eq!(kj.backup_raw_dependencies, Some(vec!["numpy".to_string()]));
        assert_eq!(kj.raw_dependencies(), ["pandas"]);
    }

    #[test]
    fn stats_by_node_id_and_url() {
        let mut store = sample_store();
        let by_id = AuxStatSource::new("web-dirs", AuxKey::NodeId)
            .with_entry("impact", serde_json::json!(["js"]))
            .with_entry("missing", serde_json::json!([]));
        let by_url = AuxStatSource::new("routes", AuxKey::RepositoryUrl)
            .with_entry("https://github.com/kijai/comfyui-kjnodes", serde_json::json!(["/kj/x"]));

        let r1 = reconcile_stats(&mut store, &by_id);
        let r2 = reconcile_stats(&mut store, &by_url);
        assert_eq!(r1.matched(), 1);
        assert_eq!(r1.unmatched, vec!["missing"]);
        assert_eq!(r2.matched_exact, 1);
        assert_eq!(store.get("impact").unwrap().aux_stats["web-dirs"], serde_json::json!(["js"]));
        assert_eq!(store.get("kj").unwrap().aux_stats["routes"], serde_json::json!(["/kj/x"]));
    }

    #[test]
    fn type_keyed_stats_need_node_types_first() {
        let mut map = NodeTypeMap::default();
        map.insert("SAMLoader", "https://github.com/ltdrdata/ComfyUI-Impact-Pack", false);
        map.insert("DetailerForEach", "https://github.com/ltdrdata/ComfyUI-Impact-Pack", false);
        let stats = AuxStatSource::new("input-types", AuxKey::NodeTypeId)
            .with_entry("SAMLoader", serde_json::json!({"model": "STRING"}))
            .with_entry("DetailerForEach", serde_json::json!({"image": "IMAGE"}));

        // Out of order: nothing to key on yet.
        let mut early = sample_store();
        let report = reconcile_stats(&mut early, &stats);
        assert_eq!(report.unmatched.len(), 2);

        let mut store = sample_store();
        let reports = reconcile_all(
            &mut store,
            &ReconcileSources {
                node_types: Some(map),
                requirements: None,
                stats: vec![stats],
            },
        );
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].matched(), 2);
        let payload = &store.get("impact").unwrap().aux_stats["input-types"];
        assert_eq!(payload["SAMLoader"], serde_json::json!({"model": "STRING"}));
        assert_eq!(payload["DetailerForEach"], serde_json::json!({"image": "IMAGE"}));
    }
}
