pub mod callback_server;
pub mod login_flow;
pub mod manager;
pub mod pkce;
pub mod storage;
pub mod types;


use url::Url;

use crate::config::ConfigError;
use crate::utils::join_url;

pub use callback_server::CallbackError;
pub use login_flow::{LoginError, LoginFlow, TerminalInteraction};
pub use manager::TokenManager;
pub use storage::{StorageError, TokenStore};
pub use types::{StoredTokens, TokenResponse};

pub const AUTHORIZE_PATH: &str = "/auth/v1/oauth/authorize";
pub const TOKEN_PATH: &str = "/auth/v1/oauth/token";
pub const LOGOUT_PATH: &str = "/auth/v1/logout";

/// Resolve one of the authority's fixed endpoints
pub fn authority_endpoint(authority: &Url, path: &str) -> Result<Url, ConfigError> {
    join_url(authority, path)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid authority endpoint {}: {}", path, e)))
}
