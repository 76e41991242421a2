use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::RepoLister;
use crate::auth::TokenManager;
use crate::config::ProviderConfig;
use crate::error::{ApiError, Result};
use crate::types::{ProviderKind, RepoRef};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Deserialize)]
struct GitHubRepo {
    name: String,
    ssh_url: String,
}

/// Walks `/user/repos?page=N` until an empty page comes back
pub struct GitHubLister {
    api_base: String,
    client: reqwest::Client,
}

impl GitHubLister {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE))
    }

    async fn fetch_page(&self, token: &str, page: u32) -> Result<Vec<GitHubRepo>> {
        let res = self
            .client
            .get(format!("{}/user/repos", self.api_base))
            .query(&[("page", page)])
            .bearer_auth(token)
            .header("User-Agent", crate::USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(ApiError::from)?;

        let res = ApiError::check(res).await?;
        let repos: Vec<GitHubRepo> = res
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(repos)
    }
}

#[async_trait]
impl RepoLister for GitHubLister {
    fn provider(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn list(&self, tokens: &TokenManager) -> Result<Vec<RepoRef>> {
        let token = tokens.authorize().await?;
        let mut repos = Vec::new();
        let mut page = 1;

        loop {
            let batch = self.fetch_page(&token, page).await?;
            debug!("GitHub page {}: {} repositories", page, batch.len());
            if batch.is_empty() {
                break;
            }
            repos.extend(batch.into_iter().map(|r| RepoRef::new(r.name, r.ssh_url)));
            page += 1;
        }

        info!("Found {} GitHub repositories", repos.len());
        Ok(repos)
    }
}
