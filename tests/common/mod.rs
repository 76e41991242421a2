// Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use clone_all::{
    Error, ProviderKind, Result,
    auth::{AuthFlow, CredentialStore, Credentials, MemoryStore, TokenGrant, TokenManager},
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// Refresh always succeeds with `refreshed_token`; the browser flow is never expected
pub struct FakeFlow {
    pub refreshed_token: String,
    pub refreshes: AtomicUsize,
    pub authorizations: AtomicUsize,
}

impl FakeFlow {
    pub fn new(refreshed_token: &str) -> Arc<Self> {
        Arc::new(Self {
            refreshed_token: refreshed_token.to_string(),
            refreshes: AtomicUsize::new(0),
            authorizations: AtomicUsize::new(0),
        })
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn authorization_count(&self) -> usize {
        self.authorizations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthFlow for FakeFlow {
    async fn authorize_interactive(&self) -> Result<TokenGrant> {
        self.authorizations.fetch_add(1, Ordering::SeqCst);
        Err(Error::Authorization("browser flow not available in tests".to_string()))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(TokenGrant {
            access_token: self.refreshed_token.clone(),
            refresh_token: Some("rotated".to_string()),
            expires_in: Some(3600),
        })
    }
}

/// Token manager whose store already holds a valid `access_token`
pub fn manager_with_token(
    provider: ProviderKind,
    access_token: &str,
    flow: Arc<FakeFlow>,
) -> TokenManager {
    let store = Arc::new(MemoryStore::new());
    store
        .save(
            provider,
            &Credentials {
                access_token: access_token.to_string(),
                refresh_token: Some("r1".to_string()),
                expires_at: Utc::now() + Duration::hours(1),
            },
        )
        .unwrap();
    TokenManager::new(provider, store, flow)
}

/// Wraps a `MemoryStore` and counts reads
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    pub loads: AtomicUsize,
}

impl CountingStore {
    pub fn with_token(provider: ProviderKind, access_token: &str) -> Arc<Self> {
        let store = Arc::new(Self::default());
        store
            .inner
            .save(
                provider,
                &Credentials {
                    access_token: access_token.to_string(),
                    refresh_token: Some("r1".to_string()),
                    expires_at: Utc::now() + Duration::hours(1),
                },
            )
            .unwrap();
        store
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl CredentialStore for CountingStore {
    fn load(&self, provider: ProviderKind) -> Result<Option<Credentials>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(provider)
    }

    fn save(&self, provider: ProviderKind, credentials: &Credentials) -> Result<()> {
        self.inner.save(provider, credentials)
    }

    fn delete(&self, provider: ProviderKind) -> Result<()> {
        self.inner.delete(provider)
    }
}
