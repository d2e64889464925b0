// Disk-backed sources: read the configured JSON files into a reconciled store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, instrument};

use crate::config::{DepscopeConfig, SourcesSection};
use crate::error::SourceError;
use crate::reconcile::{ReconcileReport, ReconcileSources, reconcile_all};
use crate::sources::{AuxStatSource, NodeTypeMap, NodesFile, RequirementsCache};
use crate::store::{LoadReport, NodeStore};

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SourceError> {
    let text = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| SourceError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Write pretty JSON, creating parent directories as needed.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SourceError> {
    let io_err = |source| SourceError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let text = serde_json::to_string_pretty(value).map_err(|source| SourceError::Json {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(path, text).map_err(io_err)
}

/// A store built from disk plus what happened while building it.
#[derive(Debug)]
pub struct LoadedCorpus {
    pub store: NodeStore,
    pub load: LoadReport,
    pub reconcile: Vec<ReconcileReport>,
}

/// `path` itself if absolute, otherwise `path` under `base_dir`.
pub fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Read every configured source and reconcile it into a fresh store.
/// Relative paths resolve against `base_dir`. Only the primary nodes file is
/// required; optional sources that are configured but unreadable are errors.
#[instrument(skip_all, fields(base_dir = %base_dir.display()))]
pub fn load_corpus(sources: &SourcesSection, base_dir: &Path) -> Result<LoadedCorpus, SourceError> {
    let nodes: NodesFile = read_json(&resolve(base_dir, &sources.nodes_path))?;
    let mut store = NodeStore::new();
    let load = store.load_primary(nodes.nodes);

    let node_types = sources
        .extension_map_path
        .as_deref()
        .map(|p| read_json::<serde_json::Value>(&resolve(base_dir, p)))
        .transpose()?
        .map(|value| NodeTypeMap::from_extension_map(&value));

    let requirements = sources
        .requirements_cache_path
        .as_deref()
        .map(|p| read_json::<RequirementsCache>(&resolve(base_dir, p)))
        .transpose()?;

    let mut stats = Vec::with_capacity(sources.stats.len());
    for stat in &sources.stats {
        let entries: BTreeMap<String, serde_json::Value> = read_json(&resolve(base_dir, &stat.path))?;
        stats.push(AuxStatSource {
            kind: stat.kind.clone(),
            key: stat.key,
            entries,
        });
    }

    let reconcile = reconcile_all(
        &mut store,
        &ReconcileSources {
            node_types,
            requirements,
            stats,
        },
    );
    info!(nodes = store.len(), sources = reconcile.len() + 1, "Corpus loaded");

    Ok(LoadedCorpus {
        store,
        load,
        reconcile,
    })
}

/// Load a config file and the corpus it describes, resolving source paths
/// against the config file's directory.
pub fn load_from_config(path: &Path) -> crate::error::Result<(DepscopeConfig, LoadedCorpus)> {
    let config = DepscopeConfig::load(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let corpus = load_corpus(&config.sources, base_dir)?;
    Ok((config, corpus))
}
