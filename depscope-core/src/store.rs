//! In-memory node store.
//!
//! Records keep the order in which the primary source introduced them; every
//! ranking tie-break and report ordering downstream relies on that order.
//! Only [`NodeStore::insert_primary`] / [`NodeStore::load_primary`] (and the
//! explicit [`NodeStore::create_or_get`]) create records; auxiliary sources go
//! through [`NodeStore::enrich`], which ignores ids it does not know.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::sources::RawNode;
use crate::types::{NodePatch, NodeRecord};

/// Store shared with concurrent fetch units. Writers take the lock for one
/// unit's worth of changes at a time.
pub type SharedStore = Arc<tokio::sync::Mutex<NodeStore>>;

/// Counts from loading a primary source.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub loaded: usize,
    /// Entries that replaced an earlier record with the same id.
    pub duplicates: usize,
    /// Entries without an id.
    pub skipped: usize,
}

#[derive(Debug, Default, Clone)]
pub struct NodeStore {
    records: Vec<NodeRecord>,
    index: HashMap<String, usize>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from primary records in order.
    pub fn from_records(records: impl IntoIterator<Item = NodeRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.insert_primary(record);
        }
        store
    }

    /// Wrap into the lock used by the fetcher.
    pub fn into_shared(self) -> SharedStore {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Insert a record from the primary source. A repeated id replaces the
    /// earlier record but keeps its position. Returns true if it was new.
    pub fn insert_primary(&mut self, record: NodeRecord) -> bool {
        if let Some(&pos) = self.index.get(record.id()) {
            debug!(id = record.id(), "Duplicate node id, replacing earlier record");
            self.records[pos] = record;
            false
        } else {
            self.index.insert(record.id().to_string(), self.records.len());
            self.records.push(record);
            true
        }
    }

    /// Load raw primary-source nodes, skipping those without an id.
    pub fn load_primary(&mut self, nodes: impl IntoIterator<Item = RawNode>) -> LoadReport {
        let mut report = LoadReport::default();
        for raw in nodes {
            let Some(record) = raw.into_record() else {
                report.skipped += 1;
                continue;
            };
            if self.insert_primary(record) {
                report.loaded += 1;
            } else {
                report.duplicates += 1;
            }
        }
        info!(
            loaded = report.loaded,
            duplicates = report.duplicates,
            skipped = report.skipped,
            total = self.len(),
            "Loaded primary node source"
        );
        report
    }

    /// Return the record for `id`, creating a blank one at the end if needed.
    pub fn create_or_get(&mut self, id: &str) -> &mut NodeRecord {
        let pos = match self.index.get(id) {
            Some(&pos) => pos,
            None => {
                let pos = self.records.len();
                self.records.push(NodeRecord::new(id));
                self.index.insert(id.to_string(), pos);
                pos
            }
        };
        &mut self.records[pos]
    }

    /// Apply `patch` to an existing record. Unknown ids are a no-op and
    /// return false.
    pub fn enrich(&mut self, id: &str, patch: NodePatch) -> bool {
        match self.get_mut(id) {
            Some(record) => {
                record.apply(patch);
                true
            }
            None => {
                debug!(id, "Enrich target not in store, ignoring");
                false
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&NodeRecord> {
        self.index.get(id).map(|&pos| &self.records[pos])
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut NodeRecord> {
        let pos = *self.index.get(id)?;
        Some(&mut self.records[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in insertion order.
    pub fn all(&self) -> &[NodeRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeRecord> {
        self.records.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(NodeRecord::id)
    }
}

impl<'a> IntoIterator for &'a NodeStore {
    type Item = &'a NodeRecord;
    type IntoIter = std::slice::Iter<'a, NodeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_of(ids: &[&str]) -> NodeStore {
        NodeStore::from_records(ids.iter().map(|id| NodeRecord::new(*id)))
    }

    #[test]
    fn preserves_insertion_order() {
        let store = store_of(&["zeta", "alpha", "mid"]);
        let ids: Vec<_> = store.ids().collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn duplicate_primary_keeps_position() {
        let mut store = store_of(&["a", "b"]);
        let mut replacement = NodeRecord::new("a");
        replacement.downloads = 7;
        assert!(!store.insert_primary(replacement));
        assert_eq!(store.len(), 2);
        assert_eq!(store.all()[0].downloads, 7);
    }

    #[test]
    fn enrich_unknown_id_is_noop() {
        let mut store = store_of(&["a", "b"]);
        let before: Vec<String> = store.ids().map(String::from).collect();
        let applied = store.enrich("ghost", NodePatch::node_type("X", false));
        assert!(!applied);
        let after: Vec<String> = store.ids().map(String::from).collect();
        assert_eq!(before, after);
        assert!(!store.contains("ghost"));
    }

    #[test]
    fn enrich_known_id() {
        let mut store = store_of(&["a"]);
        assert!(store.enrich(
            "a",
            NodePatch {
                stars: Some(5),
                ..NodePatch::default()
            }
        ));
        assert_eq!(store.get("a").unwrap().stars, 5);
    }

    #[test]
    fn create_or_get_reuses_existing() {
        let mut store = store_of(&["a"]);
        store.create_or_get("a").downloads = 3;
        assert_eq!(store.len(), 1);
        store.create_or_get("b");
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").unwrap().downloads, 3);
        assert_eq!(store.ids().last(), Some("b"));
    }

    #[test]
    fn load_primary_counts() {
        let mut store = NodeStore::new();
        let nodes: Vec<RawNode> = serde_json::from_str(
            r#"[{"id": "a"}, {"name": "no id"}, {"id": "b"}, {"id": "a", "downloads": 9}]"#,
        )
        .unwrap();
        let report = store.load_primary(nodes);
        assert_eq!(
            report,
            LoadReport {
                loaded: 2,
                duplicates: 1,
                skipped: 1
            }
        );
        assert_eq!(store.get("a").unwrap().downloads, 9);
        assert_eq!(store.ids().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
