pub mod bitbucket;
pub mod github;

use crate::auth::TokenManager;
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::types::{ProviderKind, RepoRef};
use async_trait::async_trait;

pub use bitbucket::BitbucketLister;
pub use github::GitHubLister;

/// Enumerates every repository the authenticated user can clone
#[async_trait]
pub trait RepoLister: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// Tokens come from (and refreshes go through) the provider's manager
    async fn list(&self, tokens: &TokenManager) -> Result<Vec<RepoRef>>;
}

pub fn lister_for(provider: ProviderKind, config: &ProviderConfig) -> Box<dyn RepoLister> {
    match provider {
        ProviderKind::GitHub => Box::new(GitHubLister::from_config(config)),
        ProviderKind::Bitbucket => Box::new(BitbucketLister::from_config(config)),
    }
}
