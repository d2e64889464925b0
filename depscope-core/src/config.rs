use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level depscope configuration, matching `depscope.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepscopeConfig {
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub sources: SourcesSection,
}

impl DepscopeConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Parse and validate config text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the fetcher meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.workers == 0 {
            return Err(ConfigError::Invalid("fetch.workers must be at least 1".into()));
        }
        if self.fetch.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "fetch.max_attempts must be at least 1".into(),
            ));
        }
        if self.registry.page_limit == 0 {
            return Err(ConfigError::Invalid(
                "registry.page_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Base URL of the registry API.
    pub base_url: String,
    /// Nodes requested per page.
    pub page_limit: u32,
    /// Host serving raw repository files (requirements.txt).
    pub raw_host: String,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            base_url: "https://api.comfy.org".to_string(),
            page_limit: 30,
            raw_host: "https://raw.githubusercontent.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub workers: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Whole-operation deadline; 0 disables it.
    pub deadline_secs: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl FetchSection {
    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs))
    }
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            workers: 10,
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            deadline_secs: 0,
            request_timeout_secs: 30,
            user_agent: concat!("depscope/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesSection {
    pub nodes_path: PathBuf,
    pub extension_map_path: Option<PathBuf>,
    pub requirements_cache_path: Option<PathBuf>,
    #[serde(default)]
    pub stats: Vec<StatSourceConfig>,
}

impl Default for SourcesSection {
    fn default() -> Self {
        Self {
            nodes_path: PathBuf::from("manager-files/nodes.json"),
            extension_map_path: None,
            requirements_cache_path: None,
            stats: Vec::new(),
        }
    }
}

/// One auxiliary stat table on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatSourceConfig {
    /// Stat kind, e.g. `web-dirs` or `routes`.
    pub kind: String,
    pub path: PathBuf,
    /// How the file's keys relate to nodes.
    #[serde(default)]
    pub key: crate::sources::AuxKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DepscopeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetch.workers, 10);
        assert_eq!(config.fetch.max_attempts, 3);
        assert!(config.fetch.deadline().is_none());
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = DepscopeConfig::from_toml("").unwrap();
        assert_eq!(config.registry.base_url, "https://api.comfy.org");
        assert_eq!(
            config.sources.nodes_path,
            PathBuf::from("manager-files/nodes.json")
        );
    }

    #[test]
    fn zero_workers_rejected() {
        let text = r#"
[fetch]
workers = 0
"#;
        let err = DepscopeConfig::from_toml(text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn stat_sources_parse() {
        let text = r#"
[sources]
nodes_path = "nodes.json"

[[sources.stats]]
kind = "web-dirs"
path = "web_dirs.json"
key = "node-type-id"
"#;
        let config = DepscopeConfig::from_toml(text).unwrap();
        assert_eq!(config.sources.stats.len(), 1);
        assert_eq!(config.sources.stats[0].key, crate::sources::AuxKey::NodeTypeId);
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DepscopeConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depscope.toml");
        std::fs::write(
            &path,
            "[registry]\nbase_url = \"http://localhost:9\"\npage_limit = 5\nraw_host = \"http://localhost:9\"\n",
        )
        .unwrap();
        let config = DepscopeConfig::load(&path).unwrap();
        assert_eq!(config.registry.page_limit, 5);
    }
}
