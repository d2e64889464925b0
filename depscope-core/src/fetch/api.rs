// Network seam: the registry listing API and raw repository files.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::DepscopeConfig;
use crate::error::FetchError;
use crate::repo_url::normalize;
use crate::sources::RegistryPage;

/// Where to look for one node's `requirements.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementsTarget {
    pub node_id: String,
    pub repository_url: String,
}

/// Single-attempt network operations. Retries live in the fetcher.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// One page of the registry listing, 1-based.
    async fn fetch_page(&self, page: u32) -> Result<RegistryPage, FetchError>;

    /// Raw `requirements.txt` for a node's repository; `Ok(None)` when the
    /// repository has none.
    async fn fetch_requirements(
        &self,
        target: &RequirementsTarget,
    ) -> Result<Option<String>, FetchError>;
}

/// `RegistryApi` over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpRegistryApi {
    client: Client,
    base_url: String,
    page_limit: u32,
    raw_host: String,
}

impl HttpRegistryApi {
    pub fn new(config: &DepscopeConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config.fetch.user_agent.clone())
            .timeout(Duration::from_secs(config.fetch.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| FetchError::Network(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.registry.base_url.trim_end_matches('/').to_string(),
            page_limit: config.registry.page_limit,
            raw_host: config.registry.raw_host.trim_end_matches('/').to_string(),
        })
    }

    /// Raw file URL for a repository's `requirements.txt` on its default
    /// branch. Only GitHub-hosted repositories are supported.
    pub fn requirements_url(&self, repository_url: &str) -> Option<String> {
        let repo = normalize(repository_url)?;
        (repo.host == "github.com").then(|| {
            format!(
                "{}/{}/{}/HEAD/requirements.txt",
                self.raw_host, repo.owner, repo.repo
            )
        })
    }

    async fn get_text(&self, url: &str) -> Result<Option<String>, FetchError> {
        debug!(url, "HTTP GET");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        resp.text()
            .await
            .map(Some)
            .map_err(|e| FetchError::Network(e.to_string()))
    }
}

#[async_trait]
impl RegistryApi for HttpRegistryApi {
    async fn fetch_page(&self, page: u32) -> Result<RegistryPage, FetchError> {
        let url = format!(
            "{}/nodes?page={page}&limit={}",
            self.base_url, self.page_limit
        );
        let body = self.get_text(&url).await?.ok_or(FetchError::Status {
            status: StatusCode::NOT_FOUND.as_u16(),
            url: url.clone(),
        })?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(format!("{url}: {e}")))
    }

    async fn fetch_requirements(
        &self,
        target: &RequirementsTarget,
    ) -> Result<Option<String>, FetchError> {
        let Some(url) = self.requirements_url(&target.repository_url) else {
            debug!(
                node = %target.node_id,
                url = %target.repository_url,
                "No raw-file location for repository"
            );
            return Ok(None);
        };
        self.get_text(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirements_url_from_repository() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let api = HttpRegistryApi::new(&DepscopeConfig::default()).unwrap();
        assert_eq!(
            api.requirements_url("https://github.com/Kijai/ComfyUI-KJNodes.git").as_deref(),
            Some("https://raw.githubusercontent.com/kijai/comfyui-kjnodes/HEAD/requirements.txt")
        );
        assert_eq!(api.requirements_url("https://gitlab.com/a/b"), None);
        assert_eq!(api.requirements_url("nonsense"), None);
    }
}
