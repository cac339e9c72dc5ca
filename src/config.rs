//! Runtime configuration
//!
//! Built once from the command line (with environment fallbacks) and passed
//! by reference to whatever needs it. URLs and the client id are validated on
//! access, so a bad authority URL only hurts the operations that use it.

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use crate::utils::parse_base_url;

pub const DEFAULT_AUTH_URL: &str = "https://auth.eremos.jp";
pub const DEFAULT_API_URL: &str = "https://eremos.jp";
pub const DEFAULT_CLIENT_ID: &str = "28127dd8-2f0b-4809-80ab-08c6b919ef9b";
pub const DEFAULT_LOOPBACK_PORT: u16 = 17654;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0}")]
    InvalidUrl(String),
    #[error("OAuth client id must not be empty")]
    EmptyClientId,
    #[error("EREMOS_LOOPBACK_PORT must be a valid port number (1-65535), got: {0}")]
    InvalidPort(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub auth_url: String,
    pub api_url: String,
    pub client_id: String,
    pub loopback_port: u16,
    /// Overrides `~/.eremos`
    pub credentials_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            loopback_port: DEFAULT_LOOPBACK_PORT,
            credentials_dir: None,
        }
    }
}

impl Config {
    /// Base URL of the token-issuing authority
    pub fn authority_url(&self) -> Result<Url, ConfigError> {
        parse_base_url("EREMOS_AUTH_URL", &self.auth_url, true)
    }

    /// Base URL of the REST API
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        parse_base_url("EREMOS_API_URL", &self.api_url, true)
    }

    pub fn client_id(&self) -> Result<&str, ConfigError> {
        let id = self.client_id.trim();
        if id.is_empty() {
            return Err(ConfigError::EmptyClientId);
        }
        Ok(id)
    }
}

/// clap value parser for `--loopback-port`
pub fn parse_loopback_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(ConfigError::InvalidPort(raw.to_string())),
    }
}
