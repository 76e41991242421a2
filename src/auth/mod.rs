// OAuth and credential modules

pub mod callback;
pub mod oauth;
pub mod store;
pub mod token_manager;

pub use callback::CallbackServer;
pub use oauth::{AuthFlow, OAuthClient, OAuthEndpoints, TokenGrant};
pub use store::{CredentialStore, Credentials, FileStore, KeyringStore, MemoryStore, open_store};
pub use token_manager::TokenManager;
