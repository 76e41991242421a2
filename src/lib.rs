pub mod auth;
pub mod clone;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{ApiError, Error, Result};
pub use types::{ProviderKind, RepoRef};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Sent on every provider API request (GitHub rejects requests without one)
pub const USER_AGENT: &str = "clone-all-cli";
