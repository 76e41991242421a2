use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Code-hosting provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    GitHub,
    Bitbucket,
}

impl ProviderKind {
    /// Pipelines run in this order
    pub const ALL: [ProviderKind; 2] = [ProviderKind::GitHub, ProviderKind::Bitbucket];

    /// Stable identifier used as the credential store key
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "github",
            ProviderKind::Bitbucket => "bitbucket",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "GitHub",
            ProviderKind::Bitbucket => "Bitbucket",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" | "gh" => Ok(ProviderKind::GitHub),
            "bitbucket" | "bb" => Ok(ProviderKind::Bitbucket),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// A repository to clone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub name: String,
    pub clone_uri: String,
}

impl RepoRef {
    pub fn new(name: impl Into<String>, clone_uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clone_uri: clone_uri.into(),
        }
    }
}
