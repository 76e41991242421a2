/// Token manager with auto-refresh capabilities
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::oauth::AuthFlow;
use super::store::{CredentialStore, Credentials};
use crate::error::{Error, Result};
use crate::types::ProviderKind;

/// Owns one provider's token lifecycle: reuse, refresh, or full browser authorization
pub struct TokenManager {
    provider: ProviderKind,
    store: Arc<dyn CredentialStore>,
    flow: Arc<dyn AuthFlow>,
}

impl TokenManager {
    pub fn new(
        provider: ProviderKind,
        store: Arc<dyn CredentialStore>,
        flow: Arc<dyn AuthFlow>,
    ) -> Self {
        Self {
            provider,
            store,
            flow,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Get a valid access token, refreshing or re-authorizing as needed
    pub async fn authorize(&self) -> Result<String> {
        match self.store.load(self.provider)? {
            Some(creds) if !creds.is_expired() => {
                debug!(
                    "Using stored {} token ({} minutes remaining)",
                    self.provider,
                    creds.remaining().num_minutes()
                );
                Ok(creds.access_token)
            }
            Some(creds) => {
                info!("Stored {} token expired, refreshing", self.provider);
                match self.refresh_with(&creds).await {
                    Ok(token) => Ok(token),
                    Err(e) => {
                        warn!(
                            "Refreshing {} token failed ({}), falling back to browser authorization",
                            self.provider, e
                        );
                        self.authorize_interactive().await
                    }
                }
            }
            None => {
                info!("No stored {} token, starting browser authorization", self.provider);
                self.authorize_interactive().await
            }
        }
    }

    /// Run the browser flow unconditionally and persist the result
    pub async fn authorize_interactive(&self) -> Result<String> {
        let grant = self.flow.authorize_interactive().await?;
        let creds = grant.into_credentials(None);
        self.store.save(self.provider, &creds)?;
        Ok(creds.access_token)
    }

    /// Refresh using the stored refresh token
    pub async fn refresh(&self) -> Result<String> {
        let creds = self.stored()?;
        self.refresh_with(&creds).await
    }

    /// Drop the cached access token, then refresh. Used after a 401.
    pub async fn force_refresh(&self) -> Result<String> {
        let mut creds = self.stored()?;
        creds.access_token.clear();
        creds.expires_at = Utc::now();
        self.store.save(self.provider, &creds)?;

        self.refresh_with(&creds).await
    }

    pub fn credentials(&self) -> Result<Option<Credentials>> {
        self.store.load(self.provider)
    }

    fn stored(&self) -> Result<Credentials> {
        self.store.load(self.provider)?.ok_or_else(|| {
            Error::Authorization(format!("No stored credentials for {}", self.provider))
        })
    }

    async fn refresh_with(&self, creds: &Credentials) -> Result<String> {
        let refresh_token = creds
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::Authorization(format!("No refresh token available for {}", self.provider))
            })?;

        let grant = self.flow.refresh(refresh_token).await?;
        let new_creds = grant.into_credentials(creds.refresh_token.clone());
        self.store.save(self.provider, &new_creds)?;

        info!("Refreshed {} token", self.provider);
        Ok(new_creds.access_token)
    }
}
