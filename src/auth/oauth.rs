/// OAuth2 authorization-code flow against GitHub and Bitbucket
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use super::callback::CallbackServer;
use super::store::Credentials;
use crate::config::{OAuthConfig, ProviderConfig};
use crate::error::{Error, Result};
use crate::types::ProviderKind;

/// Lifetime assumed when the token endpoint does not send `expires_in`
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    /// Send a random anti-forgery `state` and require it on the callback
    pub use_state: bool,
    /// Client credentials via HTTP basic auth instead of form fields
    pub basic_auth: bool,
    /// Include `redirect_uri` in the authorize URL and code exchange
    pub send_redirect_uri: bool,
}

impl OAuthEndpoints {
    pub fn for_provider(provider: ProviderKind) -> Self {
        match provider {
            ProviderKind::GitHub => Self {
                authorize_url: "https://github.com/login/oauth/authorize".to_string(),
                token_url: "https://github.com/login/oauth/access_token".to_string(),
                scopes: vec!["repo".to_string(), "user".to_string(), "read:org".to_string()],
                use_state: true,
                basic_auth: false,
                send_redirect_uri: true,
            },
            ProviderKind::Bitbucket => Self {
                authorize_url: "https://bitbucket.org/site/oauth2/authorize".to_string(),
                token_url: "https://bitbucket.org/site/oauth2/access_token".to_string(),
                scopes: vec![],
                use_state: false,
                basic_auth: true,
                send_redirect_uri: false,
            },
        }
    }
}

/// Token endpoint success payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    /// Keeps `previous_refresh` when the grant does not rotate the refresh token
    pub fn into_credentials(self, previous_refresh: Option<String>) -> Credentials {
        let lifetime = self
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        Credentials {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .filter(|t| !t.is_empty())
                .or(previous_refresh),
            expires_at: Utc::now() + ChronoDuration::seconds(lifetime),
        }
    }
}

/// The two network exchanges a token manager needs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthFlow: Send + Sync {
    /// Full browser round-trip ending in a code exchange
    async fn authorize_interactive(&self) -> Result<TokenGrant>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;
}

pub struct OAuthClient {
    provider: ProviderKind,
    client_id: String,
    client_secret: String,
    endpoints: OAuthEndpoints,
    callback_port: u16,
    callback_timeout: Duration,
    client: reqwest::Client,
}

impl OAuthClient {
    pub fn new(provider: ProviderKind, credentials: &ProviderConfig, oauth: &OAuthConfig) -> Self {
        Self {
            provider,
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            endpoints: OAuthEndpoints::for_provider(provider),
            callback_port: oauth.callback_port,
            callback_timeout: Duration::from_secs(oauth.callback_timeout_secs),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/code", self.callback_port)
    }

    /// Generate random state for CSRF protection
    fn generate_state() -> String {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let mut random_bytes = vec![0u8; 32];
        rng.fill_bytes(&mut random_bytes);
        URL_SAFE_NO_PAD.encode(random_bytes)
    }

    /// Build authorization URL, returning the state it carries (if any)
    pub fn build_auth_url(&self) -> Result<(String, Option<String>)> {
        let state = self.endpoints.use_state.then(Self::generate_state);

        let mut params: Vec<(&str, String)> = vec![
            ("response_type", "code".to_string()),
            ("client_id", self.client_id.clone()),
        ];
        if !self.endpoints.scopes.is_empty() {
            params.push(("scope", self.endpoints.scopes.join(" ")));
        }
        if self.endpoints.send_redirect_uri {
            params.push(("redirect_uri", self.redirect_uri()));
        }
        if let Some(state) = &state {
            params.push(("state", state.clone()));
        }

        let url = url::Url::parse_with_params(&self.endpoints.authorize_url, &params)
            .map_err(|e| Error::Config(format!("Invalid authorize URL: {}", e)))?;

        Ok((url.into(), state))
    }

    /// Exchange authorization code for tokens
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
        ];
        if self.endpoints.send_redirect_uri {
            params.push(("redirect_uri", self.redirect_uri()));
        }

        self.token_request(params)
            .await
            .map_err(|e| Self::context("Token exchange failed", e))
    }

    /// Refresh access token using refresh token
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        let params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];

        self.token_request(params)
            .await
            .map_err(|e| Self::context("Token refresh failed", e))
    }

    async fn token_request(&self, mut params: Vec<(&str, String)>) -> Result<TokenGrant> {
        let mut request = self
            .client
            .post(&self.endpoints.token_url)
            .header("Accept", "application/json");

        if self.endpoints.basic_auth {
            request = request.basic_auth(&self.client_id, Some(&self.client_secret));
        } else {
            params.push(("client_id", self.client_id.clone()));
            params.push(("client_secret", self.client_secret.clone()));
        }

        let res = request
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Authorization(e.to_string()))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| Error::Authorization(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Authorization(format!("{}: {}", status, body)));
        }

        // GitHub reports failures as 200 with an `error` field
        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| Error::Authorization(format!("unreadable token response ({}): {}", e, body)))?;
        if value.get("error").is_some() {
            return Err(Error::Authorization(body));
        }

        serde_json::from_value(value)
            .map_err(|e| Error::Authorization(format!("unexpected token response ({}): {}", e, body)))
    }

    fn context(what: &str, err: Error) -> Error {
        match err {
            Error::Authorization(msg) => Error::Authorization(format!("{}: {}", what, msg)),
            other => other,
        }
    }
}

#[async_trait]
impl AuthFlow for OAuthClient {
    async fn authorize_interactive(&self) -> Result<TokenGrant> {
        let (auth_url, state) = self.build_auth_url()?;

        // Listen before the browser can redirect back
        let server = CallbackServer::bind(self.callback_port, state).await?;

        println!("\n🔐 {} OAuth", self.provider.display_name());
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!("\n📱 Opening browser...\n");
        println!("   {}\n", auth_url);

        if let Err(e) = opener::open(&auth_url) {
            warn!("Could not open browser ({}); open the URL above manually", e);
        }

        println!("⏳ Waiting for authorization...");
        let params = server.wait_for_code(self.callback_timeout).await?;

        info!("Received authorization code for {}, exchanging", self.provider);
        let grant = self.exchange_code(&params.code).await?;

        println!("✅ {} authenticated\n", self.provider.display_name());
        Ok(grant)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.refresh_token(refresh_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(provider: ProviderKind) -> OAuthClient {
        let creds = ProviderConfig {
            client_id: "my-client".to_string(),
            client_secret: "my-secret".to_string(),
            api_base: None,
        };
        OAuthClient::new(provider, &creds, &OAuthConfig::default())
    }

    fn with_token_url(provider: ProviderKind, token_url: String) -> OAuthClient {
        let mut endpoints = OAuthEndpoints::for_provider(provider);
        endpoints.token_url = token_url;
        client(provider).with_endpoints(endpoints)
    }

    #[test]
    fn test_github_auth_url() {
        let oauth = client(ProviderKind::GitHub);
        let (auth_url, state) = oauth.build_auth_url().unwrap();
        let state = state.expect("github sends a state");

        let parsed = url::Url::parse(&auth_url).unwrap();
        assert_eq!(parsed.host_str(), Some("github.com"));
        assert_eq!(parsed.path(), "/login/oauth/authorize");

        let query: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "my-client");
        assert_eq!(query["scope"], "repo user read:org");
        assert_eq!(query["redirect_uri"], "http://localhost:8080/code");
        assert_eq!(query["state"], state);
    }

    #[test]
    fn test_states_are_unique() {
        let oauth = client(ProviderKind::GitHub);
        let (_, a) = oauth.build_auth_url().unwrap();
        let (_, b) = oauth.build_auth_url().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_bitbucket_auth_url() {
        let oauth = client(ProviderKind::Bitbucket);
        let (auth_url, state) = oauth.build_auth_url().unwrap();

        assert!(state.is_none());
        assert!(auth_url.starts_with("https://bitbucket.org/site/oauth2/authorize?"));
        assert!(auth_url.contains("response_type=code"));
        assert!(auth_url.contains("client_id=my-client"));
        assert!(!auth_url.contains("scope="));
        assert!(!auth_url.contains("state="));
    }

    #[test]
    fn test_grant_expiry_defaults_to_one_hour() {
        let grant = TokenGrant {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: None,
        };
        let creds = grant.into_credentials(Some("old-refresh".to_string()));

        let remaining = creds.remaining().num_seconds();
        assert!(remaining > 3590 && remaining <= 3600);
        assert_eq!(creds.refresh_token.as_deref(), Some("old-refresh"));
    }

    #[test]
    fn test_grant_honors_expires_in() {
        let grant = TokenGrant {
            access_token: "a".to_string(),
            refresh_token: Some("new-refresh".to_string()),
            expires_in: Some(7200),
        };
        let creds = grant.into_credentials(Some("old-refresh".to_string()));

        assert!(creds.remaining().num_seconds() > 7100);
        assert_eq!(creds.refresh_token.as_deref(), Some("new-refresh"));
    }

    #[tokio::test]
    async fn test_bitbucket_refresh_uses_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/site/oauth2/access_token")
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".to_string(), "refresh_token".to_string()),
                Matcher::UrlEncoded("refresh_token".to_string(), "r1".to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"fresh","refresh_token":"r2","expires_in":7200}"#)
            .expect(1)
            .create_async()
            .await;

        let oauth = with_token_url(
            ProviderKind::Bitbucket,
            format!("{}/site/oauth2/access_token", server.url()),
        );
        let grant = oauth.refresh_token("r1").await.unwrap();

        assert_eq!(grant.access_token, "fresh");
        assert_eq!(grant.refresh_token.as_deref(), Some("r2"));
        assert_eq!(grant.expires_in, Some(7200));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_github_code_exchange_sends_client_credentials() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/login/oauth/access_token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".to_string(), "authorization_code".to_string()),
                Matcher::UrlEncoded("code".to_string(), "abc".to_string()),
                Matcher::UrlEncoded("client_id".to_string(), "my-client".to_string()),
                Matcher::UrlEncoded("client_secret".to_string(), "my-secret".to_string()),
                Matcher::UrlEncoded(
                    "redirect_uri".to_string(),
                    "http://localhost:8080/code".to_string(),
                ),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"gho_token","token_type":"bearer","scope":"repo"}"#)
            .create_async()
            .await;

        let oauth = with_token_url(
            ProviderKind::GitHub,
            format!("{}/login/oauth/access_token", server.url()),
        );
        let grant = oauth.exchange_code("abc").await.unwrap();

        assert_eq!(grant.access_token, "gho_token");
        assert!(grant.refresh_token.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_payload_is_rejected_with_raw_body() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"{"error":"bad_verification_code","error_description":"expired"}"#;
        let _mock = server
            .mock("POST", "/login/oauth/access_token")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let oauth = with_token_url(
            ProviderKind::GitHub,
            format!("{}/login/oauth/access_token", server.url()),
        );
        let err = oauth.exchange_code("abc").await.unwrap_err();

        assert!(matches!(err, Error::Authorization(msg) if msg.contains("bad_verification_code")));
    }

    #[tokio::test]
    async fn test_http_error_is_authorization_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/site/oauth2/access_token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let oauth = with_token_url(
            ProviderKind::Bitbucket,
            format!("{}/site/oauth2/access_token", server.url()),
        );
        let err = oauth.refresh_token("stale").await.unwrap_err();

        assert!(matches!(err, Error::Authorization(msg) if msg.contains("invalid_grant")));
    }
}
