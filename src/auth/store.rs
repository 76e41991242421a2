/// Credential persistence: JSON file (default), system keyring, or memory
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::config::{APP_NAME, OAuthConfig, StoreBackend, expand_tilde};
use crate::error::{Error, Result};
use crate::types::ProviderKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Serialized as RFC 3339
    pub expires_at: DateTime<Utc>,
}

impl Credentials {
    /// An empty access token counts as expired
    pub fn is_expired(&self) -> bool {
        self.access_token.is_empty() || Utc::now() >= self.expires_at
    }

    pub fn remaining(&self) -> chrono::Duration {
        self.expires_at - Utc::now()
    }
}

pub trait CredentialStore: Send + Sync {
    fn load(&self, provider: ProviderKind) -> Result<Option<Credentials>>;
    fn save(&self, provider: ProviderKind, credentials: &Credentials) -> Result<()>;
    fn delete(&self, provider: ProviderKind) -> Result<()>;
}

/// Build the store selected in config
pub fn open_store(config: &OAuthConfig) -> Result<Arc<dyn CredentialStore>> {
    match config.store {
        StoreBackend::File => {
            let store = match &config.credentials_path {
                Some(path) => FileStore::with_path(expand_tilde(path)),
                None => FileStore::new()?,
            };
            tracing::debug!("Using credential file {}", store.path().display());
            Ok(Arc::new(store))
        }
        StoreBackend::Keyring => {
            tracing::debug!("Using system keyring service '{}'", config.keyring_service);
            Ok(Arc::new(KeyringStore::new(&config.keyring_service)))
        }
    }
}

type CredentialMap = HashMap<ProviderKind, Credentials>;

/// File-based storage at `~/.config/clone-all/credentials.json`
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Store("Could not find config directory".to_string()))?;
        Ok(Self::with_path(dir.join(APP_NAME).join("credentials.json")))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<CredentialMap> {
        if !self.path.exists() {
            return Ok(CredentialMap::new());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| self.store_error(e))?;
        if data.trim().is_empty() {
            return Ok(CredentialMap::new());
        }
        serde_json::from_str(&data).map_err(|e| self.store_error(e))
    }

    fn write_map(&self, map: &CredentialMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.store_error(e))?;
        }

        let data = serde_json::to_string_pretty(map).map_err(|e| self.store_error(e))?;
        std::fs::write(&self.path, data).map_err(|e| self.store_error(e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| self.store_error(e))?;
        }

        Ok(())
    }

    fn store_error(&self, err: impl std::fmt::Display) -> Error {
        Error::Store(format!("{}: {}", self.path.display(), err))
    }
}

impl CredentialStore for FileStore {
    fn load(&self, provider: ProviderKind) -> Result<Option<Credentials>> {
        Ok(self.read_map()?.remove(&provider))
    }

    fn save(&self, provider: ProviderKind, credentials: &Credentials) -> Result<()> {
        let mut map = self.read_map()?;
        map.insert(provider, credentials.clone());
        self.write_map(&map)
    }

    fn delete(&self, provider: ProviderKind) -> Result<()> {
        let mut map = self.read_map()?;
        if map.remove(&provider).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

/// Native keyring: Secret Service (Linux), Keychain (macOS), Credential Manager (Windows)
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, provider: ProviderKind) -> Result<Entry> {
        Entry::new(&self.service, provider.id()).map_err(|e| Error::Store(e.to_string()))
    }
}

impl CredentialStore for KeyringStore {
    fn load(&self, provider: ProviderKind) -> Result<Option<Credentials>> {
        match self.entry(provider)?.get_password() {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| Error::Store(format!("corrupt keyring entry for {}: {}", provider, e))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Store(e.to_string())),
        }
    }

    fn save(&self, provider: ProviderKind, credentials: &Credentials) -> Result<()> {
        let json = serde_json::to_string(credentials).map_err(|e| Error::Store(e.to_string()))?;
        self.entry(provider)?
            .set_password(&json)
            .map_err(|e| Error::Store(e.to_string()))
    }

    fn delete(&self, provider: ProviderKind) -> Result<()> {
        match self.entry(provider)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Store(e.to_string())),
        }
    }
}

/// In-process store; nothing survives the run
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<CredentialMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CredentialMap>> {
        self.entries
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self, provider: ProviderKind) -> Result<Option<Credentials>> {
        Ok(self.lock()?.get(&provider).cloned())
    }

    fn save(&self, provider: ProviderKind, credentials: &Credentials) -> Result<()> {
        self.lock()?.insert(provider, credentials.clone());
        Ok(())
    }

    fn delete(&self, provider: ProviderKind) -> Result<()> {
        self.lock()?.remove(&provider);
        Ok(())
    }
}
