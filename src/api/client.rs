use std::time::{Duration, Instant};

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::auth::{StorageError, TokenManager};
use crate::config::{Config, ConfigError};
use crate::http::{client_with_timeout, DEFAULT_TIMEOUT};
use crate::utils::join_url;

/// Longest slice of a response body quoted back in an error
const BODY_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-success status; `code` is the server's error code or `HTTP_<status>`
    #[error("{message}")]
    Status {
        status: StatusCode,
        code: String,
        message: String,
    },
    #[error("Failed to parse response: {snippet}")]
    Parse { status: StatusCode, snippet: String },
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Not authenticated. Please run `eremos login` first.")]
    AuthRequired,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// Missing credentials or a 401 from the API, whatever the body
    pub fn is_auth_failure(&self) -> bool {
        match self {
            ApiError::AuthRequired => true,
            ApiError::Status { status, .. } | ApiError::Parse { status, .. } => {
                *status == StatusCode::UNAUTHORIZED
            }
            _ => false,
        }
    }
}

/// Standard response envelope
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Default, Clone)]
pub struct RequestOptions {
    /// Public endpoint: never attach a bearer token
    pub no_auth: bool,
    /// Overrides the 20 s default
    pub timeout: Option<Duration>,
}

pub struct ApiClient<'a> {
    base: Url,
    tokens: &'a TokenManager,
    client: reqwest::Client,
}

impl<'a> ApiClient<'a> {
    pub fn new(config: &Config, tokens: &'a TokenManager) -> Result<Self, ApiError> {
        Ok(Self {
            base: config.api_url()?,
            tokens,
            client: client_with_timeout(DEFAULT_TIMEOUT).map_err(network_error)?,
        })
    }

    /// Send a request to the API, attaching a bearer token when one is
    /// available. A missing token is not an error here; see [`Self::require_auth`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<reqwest::Response, ApiError> {
        let url = join_url(&self.base, path)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid API path {}: {}", path, e)))?;

        let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = match options.timeout {
            Some(t) => client_with_timeout(t).map_err(network_error)?,
            None => self.client.clone(),
        };

        let mut builder = client
            .request(method.clone(), url.clone())
            .header("Accept", "application/json");

        if !options.no_auth {
            if let Some(token) = self.tokens.get_valid_token().await? {
                builder = builder.bearer_auth(token);
            }
        }

        if let Some(body) = body {
            builder = builder.json(body);
        }

        debug!("> {} {}", method, url);
        let start = Instant::now();

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(timeout)
            } else {
                network_error(e)
            }
        })?;

        debug!(
            "< {} ({}ms)",
            response.status(),
            start.elapsed().as_millis()
        );
        Ok(response)
    }

    /// [`Self::request`] plus envelope parsing; non-success statuses become
    /// [`ApiError::Status`].
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<ApiResponse<T>, ApiError> {
        let response = self.request(method, path, body, options).await?;
        let status = response.status();
        let text = response.text().await.map_err(network_error)?;
        parse_response(status, &text)
    }

    /// The current access token, or [`ApiError::AuthRequired`]
    pub async fn require_auth(&self) -> Result<String, ApiError> {
        self.tokens
            .get_valid_token()
            .await?
            .ok_or(ApiError::AuthRequired)
    }
}

fn parse_response<T: DeserializeOwned>(
    status: StatusCode,
    text: &str,
) -> Result<ApiResponse<T>, ApiError> {
    let body: Value = serde_json::from_str(text).map_err(|_| ApiError::Parse {
        status,
        snippet: snippet(text),
    })?;

    if !status.is_success() {
        let fallback_code = format!("HTTP_{}", status.as_u16());
        let (code, message) = match body.get("error") {
            Some(error) if !error.is_null() => (
                error.get("code").and_then(Value::as_str).map(str::to_string),
                error.get("message").and_then(Value::as_str).map(str::to_string),
            ),
            _ => (None, Some(snippet(text))),
        };
        return Err(ApiError::Status {
            status,
            code: code.unwrap_or(fallback_code),
            message: message.unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
        });
    }

    serde_json::from_value(body).map_err(|e| ApiError::Parse {
        status,
        snippet: e.to_string(),
    })
}

fn snippet(text: &str) -> String {
    text.chars().take(BODY_SNIPPET_CHARS).collect()
}

fn network_error(e: reqwest::Error) -> ApiError {
    ApiError::Network(e.to_string())
}
