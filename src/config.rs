use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};
use crate::types::ProviderKind;

/// Application name used for config directory paths
pub const APP_NAME: &str = "clone-all";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub clone: CloneConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneConfig {
    /// Base directory repositories are cloned into; a leading `~` is expanded
    #[serde(default = "default_clone_path")]
    pub path: String,
    #[serde(default = "default_git")]
    pub git: String,
    #[serde(default)]
    pub fail_on_stderr: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_secs: u64,
    #[serde(default)]
    pub store: StoreBackend,
    #[serde(default = "default_keyring_service")]
    pub keyring_service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<ProviderConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitbucket: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

// Defaults
fn default_clone_path() -> String { "~/Projects".to_string() }
fn default_git() -> String { "git".to_string() }
fn default_callback_port() -> u16 { 8080 }
fn default_callback_timeout() -> u64 { 300 }
fn default_keyring_service() -> String { APP_NAME.to_string() }

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            path: default_clone_path(),
            git: default_git(),
            fail_on_stderr: false,
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            callback_port: default_callback_port(),
            callback_timeout_secs: default_callback_timeout(),
            store: StoreBackend::default(),
            keyring_service: default_keyring_service(),
            credentials_path: None,
        }
    }
}

impl CloneConfig {
    pub fn base_dir(&self) -> PathBuf {
        expand_tilde(&self.path)
    }
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        match kind {
            ProviderKind::GitHub => self.github.as_ref(),
            ProviderKind::Bitbucket => self.bitbucket.as_ref(),
        }
    }
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config_path = Self::locate()?;

        #[cfg(unix)]
        Self::validate_file_permissions(&config_path)?;

        let content = fs::read_to_string(&config_path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", config_path.display(), e))
        })?;

        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{} ({})", e, config_path.display())))?;

        tracing::debug!("Loaded configuration from {}", config_path.display());
        Ok(config)
    }

    /// Parse TOML after substituting `${VAR}` references from the environment
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let content = substitute_vars(content, |name| env::var(name).ok());
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn locate() -> Result<PathBuf> {
        if let Ok(path) = env::var("CLONE_ALL_CONFIG") {
            return Ok(PathBuf::from(path));
        }

        let mut locations = vec![PathBuf::from("./clone-all.toml")];
        if let Some(dir) = dirs::config_dir() {
            locations.push(dir.join(APP_NAME).join("config.toml"));
        }

        locations
            .iter()
            .find(|path| path.exists())
            .cloned()
            .ok_or_else(|| {
                Error::Config(format!(
                    "No configuration file found (looked in: {})",
                    locations
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }

    fn validate(&self) -> Result<()> {
        let mut any = false;
        for kind in ProviderKind::ALL {
            match self.providers.get(kind) {
                Some(provider) if provider.is_configured() => any = true,
                Some(_) => tracing::warn!(
                    "Provider '{}' is missing client_id or client_secret - it will be skipped",
                    kind
                ),
                None => tracing::debug!("Provider '{}' not configured", kind),
            }
        }

        if !any {
            return Err(Error::Config(
                "No provider has client credentials configured".to_string(),
            ));
        }

        Ok(())
    }

    /// Provider configs with usable client credentials, in pipeline order
    pub fn enabled_providers(&self) -> Vec<(ProviderKind, &ProviderConfig)> {
        ProviderKind::ALL
            .iter()
            .filter_map(|kind| {
                self.providers
                    .get(*kind)
                    .filter(|p| p.is_configured())
                    .map(|p| (*kind, p))
            })
            .collect()
    }

    /// Validate config file permissions (Unix only)
    #[cfg(unix)]
    fn validate_file_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            Error::Config(format!("Failed to read metadata for {}: {}", path.display(), e))
        })?;
        let mode = metadata.permissions().mode();

        if mode & 0o044 != 0 {
            tracing::warn!(
                "Config file {} has insecure permissions: {:o}. It holds client secrets; run: chmod 600 {}",
                path.display(),
                mode & 0o777,
                path.display()
            );
        }

        if mode & 0o022 != 0 {
            return Err(Error::Config(format!(
                "Config file {} is writable by group or others (mode: {:o}). Run: chmod 600 {}",
                path.display(),
                mode & 0o777,
                path.display()
            )));
        }

        Ok(())
    }
}

/// Replace every `${NAME}` with `lookup(NAME)`, or an empty string when unset
fn substitute_vars(content: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let name = &rest[start + 2..start + len];
        result.push_str(&lookup(name).unwrap_or_default());
        rest = &rest[start + len + 1..];
    }

    result.push_str(rest);
    result
}

pub fn expand_tilde(path: &str) -> PathBuf {
    let home = dirs::home_dir();
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(&rest[1..]),
        _ => PathBuf::from(path),
    }
}
