use std::{path::PathBuf, sync::Arc};
use tracing::{error, info, warn};

use crate::auth::{CredentialStore, OAuthClient, TokenManager};
use crate::clone::CloneExecutor;
use crate::config::Config;
use crate::error::Result;
use crate::providers::{RepoLister, lister_for};
use crate::types::ProviderKind;

/// authorize → list → clone for one provider
pub struct Pipeline {
    tokens: TokenManager,
    lister: Box<dyn RepoLister>,
}

impl Pipeline {
    pub fn new(tokens: TokenManager, lister: Box<dyn RepoLister>) -> Self {
        Self { tokens, lister }
    }

    pub fn provider(&self) -> ProviderKind {
        self.lister.provider()
    }
}

/// Repositories cloned per provider
pub type RunSummary = Vec<(ProviderKind, usize)>;

/// Runs provider pipelines one after another; the first failure stops the run
pub struct Orchestrator {
    pipelines: Vec<Pipeline>,
    executor: CloneExecutor,
    base_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(executor: CloneExecutor, base_dir: PathBuf) -> Self {
        Self {
            pipelines: Vec::new(),
            executor,
            base_dir,
        }
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipelines.push(pipeline);
        self
    }

    /// One pipeline per provider with client credentials, GitHub first
    pub fn from_config(config: &Config, store: Arc<dyn CredentialStore>) -> Self {
        let mut orchestrator = Self::new(
            CloneExecutor::from_config(&config.clone),
            config.clone.base_dir(),
        );

        let enabled = config.enabled_providers();
        for kind in ProviderKind::ALL {
            if !enabled.iter().any(|(k, _)| *k == kind) {
                warn!("Skipping {}: no client credentials configured", kind.display_name());
            }
        }

        for (kind, provider) in enabled {
            let flow = Arc::new(OAuthClient::new(kind, provider, &config.oauth));
            let tokens = TokenManager::new(kind, store.clone(), flow);
            orchestrator = orchestrator.with_pipeline(Pipeline::new(tokens, lister_for(kind, provider)));
        }

        orchestrator
    }

    /// Providers in the order their pipelines run
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.pipelines.iter().map(Pipeline::provider).collect()
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::new();

        for pipeline in &self.pipelines {
            let provider = pipeline.provider();
            match self.run_pipeline(pipeline).await {
                Ok(count) => summary.push((provider, count)),
                Err(e) => {
                    error!("{} pipeline failed: {}", provider.display_name(), e);
                    return Err(e);
                }
            }
        }

        Ok(summary)
    }

    async fn run_pipeline(&self, pipeline: &Pipeline) -> Result<usize> {
        let provider = pipeline.provider();
        info!("▶ {}", provider.display_name());

        // Listing authorizes first
        let repos = pipeline.lister.list(&pipeline.tokens).await?;
        self.executor.clone_all(&self.base_dir, &repos).await?;

        info!("✓ {}: {} repositories cloned", provider.display_name(), repos.len());
        Ok(repos.len())
    }
}
