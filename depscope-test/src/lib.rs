// Integration test utilities and fixture corpora for depscope.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use depscope_core::config::{SourcesSection, StatSourceConfig};
use depscope_core::error::FetchError;
use depscope_core::fetch::{FetchConfig, RegistryApi, RequirementsTarget, RetryPolicy};
use depscope_core::load::write_json;
use depscope_core::sources::{AuxKey, NodesFile, RawNode, RegistryPage};

/// Build a registry node the way the listing API returns it.
pub fn raw_node(id: &str, downloads: u64, repository: Option<&str>, deps: &[&str]) -> RawNode {
    let mut value = json!({
        "id": id,
        "name": format!("{id} pack"),
        "downloads": downloads,
        "github_stars": downloads / 10,
        "latest_version": {
            "version": "1.0.0",
            "createdAt": "2024-05-01T12:30:00Z",
            "dependencies": deps,
        },
    });
    if let Some(repo) = repository {
        value["repository"] = json!(repo);
    }
    serde_json::from_value(value).expect("fixture node")
}

/// The shared fixture corpus: popular packs with overlapping and
/// conflicting dependencies, one node without any, a git dependency,
/// a pip directive and a commented-out line.
pub fn sample_nodes() -> Vec<RawNode> {
    vec![
        raw_node(
            "impact-pack",
            9000,
            Some("https://github.com/ltdrdata/ComfyUI-Impact-Pack"),
            &["ultralytics", "numpy==1.26.4", "segment-anything", "# opencv-python"],
        ),
        raw_node(
            "kjnodes",
            7000,
            Some("https://github.com/kijai/ComfyUI-KJNodes"),
            &["numpy", "scipy>=1.10", "color-matcher"],
        ),
        raw_node(
            "controlnet-aux",
            5000,
            Some("git@github.com:Fannovel16/comfyui_controlnet_aux.git"),
            &["torch", "numpy==1.24.0", "opencv-python>=4.7"],
        ),
        raw_node(
            "was-suite",
            3000,
            Some("https://github.com/WASasquatch/was-node-suite-comfyui"),
            &[
                "numpy",
                "clip @ git+https://github.com/openai/CLIP.git",
                "--extra-index-url https://download.pytorch.org/whl/cu121",
            ],
        ),
        raw_node("bare-pack", 100, Some("https://github.com/someone/bare-pack"), &[]),
    ]
}

/// A temporary directory holding every source file `load_corpus` reads.
#[derive(Debug)]
pub struct TestCorpus {
    pub dir: tempfile::TempDir,
    pub sources: SourcesSection,
}

impl TestCorpus {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn nodes_path(&self) -> PathBuf {
        self.path().join(&self.sources.nodes_path)
    }

    /// Only the primary registry dump.
    pub fn nodes_only(nodes: Vec<RawNode>) -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        write_json(&dir.path().join("nodes.json"), &NodesFile { nodes }).expect("write nodes");
        Self {
            dir,
            sources: SourcesSection {
                nodes_path: "nodes.json".into(),
                ..SourcesSection::default()
            },
        }
    }

    /// The sample corpus plus an extension map (one key is a fork of the
    /// registered repository), a requirements cache and a stat table.
    pub fn full() -> Self {
        let mut corpus = Self::nodes_only(sample_nodes());
        let root = corpus.path().to_path_buf();

        write_json(
            &root.join("aux/extension-node-map.json"),
            &json!({
                "https://github.com/ltdrdata/ComfyUI-Impact-Pack": [["SAMLoader", "DetailerForEach"], {}],
                "https://github.com/some-fork/ComfyUI-KJNodes.git": [["GetImageSize"], {}],
                "https://github.com/Fannovel16/comfyui_controlnet_aux": [[], {"nodename_pattern": "Preprocessor$"}],
                "https://github.com/nobody/unregistered": [["Orphan"], {}]
            }),
        )
        .expect("write extension map");

        write_json(
            &root.join("aux/requirements-cache.json"),
            &json!({"bare-pack": "requests\n\n# pillow\n"}),
        )
        .expect("write requirements cache");

        write_json(
            &root.join("aux/web-dirs.json"),
            &json!({
                "https://github.com/kijai/ComfyUI-KJNodes": ["web/js"],
                "https://github.com/nobody/unregistered": ["js"]
            }),
        )
        .expect("write stats");

        corpus.sources.extension_map_path = Some("aux/extension-node-map.json".into());
        corpus.sources.requirements_cache_path = Some("aux/requirements-cache.json".into());
        corpus.sources.stats = vec![StatSourceConfig {
            kind: "web-dirs".into(),
            path: "aux/web-dirs.json".into(),
            key: AuxKey::RepositoryUrl,
        }];
        corpus
    }
}

/// Retry settings fast enough for real-time tests.
pub fn quick_fetch_config(workers: usize) -> FetchConfig {
    FetchConfig {
        workers,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2,
            max_backoff: Duration::from_millis(4),
        },
        deadline: None,
    }
}

/// In-memory registry that serves `nodes` in fixed-size pages.
#[derive(Debug, Default)]
pub struct MockRegistry {
    pub nodes: Vec<RawNode>,
    pub page_size: usize,
    /// Pages that answer 503 on every attempt.
    pub failing_pages: BTreeSet<u32>,
    /// Repository URL to requirements text; absent URLs answer 404.
    pub requirements: HashMap<String, String>,
    calls: Mutex<BTreeMap<u32, u32>>,
}

impl MockRegistry {
    pub fn new(nodes: Vec<RawNode>, page_size: usize) -> Self {
        Self {
            nodes,
            page_size: page_size.max(1),
            ..Self::default()
        }
    }

    pub fn total_pages(&self) -> u32 {
        u32::try_from(self.nodes.len().div_ceil(self.page_size)).unwrap_or(u32::MAX)
    }

    /// How many times `page` was requested.
    pub fn calls(&self, page: u32) -> u32 {
        self.calls
            .lock()
            .expect("calls lock")
            .get(&page)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RegistryApi for MockRegistry {
    async fn fetch_page(&self, page: u32) -> Result<RegistryPage, FetchError> {
        *self.calls.lock().expect("calls lock").entry(page).or_default() += 1;
        tokio::task::yield_now().await;

        if self.failing_pages.contains(&page) {
            return Err(FetchError::Status {
                status: 503,
                url: format!("mock://nodes?page={page}"),
            });
        }
        let start = (page.saturating_sub(1) as usize) * self.page_size;
        let nodes = self
            .nodes
            .iter()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();
        Ok(RegistryPage {
            nodes,
            page,
            limit: u32::try_from(self.page_size).unwrap_or(u32::MAX),
            total: self.nodes.len() as u64,
            total_pages: self.total_pages(),
        })
    }

    async fn fetch_requirements(
        &self,
        target: &RequirementsTarget,
    ) -> Result<Option<String>, FetchError> {
        tokio::task::yield_now().await;
        Ok(self.requirements.get(&target.repository_url).cloned())
    }
}
