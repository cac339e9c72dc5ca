//! Top-level error type and process exit codes

use thiserror::Error;

use crate::api::ApiError;
use crate::auth::{CallbackError, LoginError, StorageError};
use crate::config::ConfigError;

pub const EXIT_GENERAL: i32 = 1;
/// Argument errors; clap exits with this code itself
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_AUTH: i32 = 4;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Login(#[from] LoginError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("{0}")]
    UnexpectedResponse(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Api(e) if e.is_auth_failure() => EXIT_AUTH,
            AppError::Login(
                LoginError::Callback(CallbackError::Denied(_))
                | LoginError::StateMismatch
                | LoginError::MissingCode
                | LoginError::Exchange(_),
            ) => EXIT_AUTH,
            _ => EXIT_GENERAL,
        }
    }
}
