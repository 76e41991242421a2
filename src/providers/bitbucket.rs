use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::RepoLister;
use crate::auth::TokenManager;
use crate::config::ProviderConfig;
use crate::error::{ApiError, Result};
use crate::types::{ProviderKind, RepoRef};

pub const DEFAULT_API_BASE: &str = "https://bitbucket.org/api";

/// Paginated collection; `next` is an absolute URL
#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct Team {
    username: String,
}

#[derive(Deserialize)]
struct BitbucketRepo {
    name: String,
    #[serde(default)]
    links: RepoLinks,
}

#[derive(Deserialize, Default)]
struct RepoLinks {
    #[serde(default)]
    clone: Vec<CloneLink>,
}

#[derive(Deserialize)]
struct CloneLink {
    name: String,
    href: String,
}

impl BitbucketRepo {
    fn into_ssh_ref(self) -> Option<RepoRef> {
        let href = self
            .links
            .clone
            .into_iter()
            .find(|link| link.name == "ssh")
            .map(|link| link.href);

        match href {
            Some(href) => Some(RepoRef::new(self.name, href)),
            None => {
                warn!("Bitbucket repository '{}' has no ssh clone link, skipping", self.name);
                None
            }
        }
    }
}

/// Token shared by the concurrent team paginators of one listing run.
/// After a 401 it is renewed at most once.
struct SharedToken<'a> {
    tokens: &'a TokenManager,
    state: Mutex<TokenState>,
}

struct TokenState {
    value: String,
    renewed: bool,
}

impl<'a> SharedToken<'a> {
    fn new(tokens: &'a TokenManager, value: String) -> Self {
        Self {
            tokens,
            state: Mutex::new(TokenState {
                value,
                renewed: false,
            }),
        }
    }

    async fn current(&self) -> String {
        self.state.lock().await.value.clone()
    }

    /// Replacement for a token the API just rejected
    async fn renew(&self, rejected: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.value != rejected {
            // Another paginator already refreshed
            return Ok(state.value.clone());
        }
        if state.renewed {
            return Err(ApiError::Unauthorized.into());
        }

        info!("Bitbucket rejected the access token, refreshing");
        state.value = self.tokens.force_refresh().await?;
        state.renewed = true;
        Ok(state.value.clone())
    }
}

/// Lists repositories of every team the user is a member of
pub struct BitbucketLister {
    api_base: String,
    client: reqwest::Client,
}

impl BitbucketLister {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        token: &str,
    ) -> Result<T> {
        let res = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(token)
            .header("User-Agent", crate::USER_AGENT)
            .send()
            .await
            .map_err(ApiError::from)?;

        let res = ApiError::check(res).await?;
        let body = res
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(body)
    }

    /// GET with a single refresh-and-retry on 401
    async fn get<T: DeserializeOwned>(
        &self,
        token: &SharedToken<'_>,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let current = token.current().await;
        match self.fetch(url, query, &current).await {
            Err(e) if e.is_unauthorized() => {
                let renewed = token.renew(&current).await?;
                self.fetch(url, query, &renewed).await
            }
            other => other,
        }
    }

    async fn team_repositories(&self, token: &SharedToken<'_>, team: &str) -> Result<Vec<RepoRef>> {
        let mut url = format!("{}/2.0/teams/{}/repositories", self.api_base, team);
        let mut repos = Vec::new();
        let mut pages = 0;

        loop {
            let page: Page<BitbucketRepo> = self.get(token, &url, &[]).await?;
            pages += 1;
            repos.extend(page.values.into_iter().filter_map(BitbucketRepo::into_ssh_ref));

            match page.next {
                Some(next) => url = next,
                None => break,
            }
        }

        debug!("Team '{}': {} repositories over {} pages", team, repos.len(), pages);
        Ok(repos)
    }
}

#[async_trait]
impl RepoLister for BitbucketLister {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Bitbucket
    }

    async fn list(&self, tokens: &TokenManager) -> Result<Vec<RepoRef>> {
        let token = SharedToken::new(tokens, tokens.authorize().await?);

        let teams: Page<Team> = self
            .get(&token, &format!("{}/2.0/teams", self.api_base), &[("role", "member")])
            .await?;
        debug!("Member of {} Bitbucket teams", teams.values.len());

        let per_team = try_join_all(
            teams
                .values
                .iter()
                .map(|team| self.team_repositories(&token, &team.username)),
        )
        .await?;

        let repos: Vec<RepoRef> = per_team.into_iter().flatten().collect();
        info!("Found {} Bitbucket repositories", repos.len());
        Ok(repos)
    }
}
