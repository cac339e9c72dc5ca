//! Access-token lifecycle: hand out a valid bearer token, refreshing it
//! through the token endpoint when the stored one is (nearly) expired.

use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::{
    authority_endpoint, StorageError, StoredTokens, TokenResponse, TokenStore, TOKEN_PATH,
};
use crate::config::{Config, ConfigError};
use crate::http::{client_with_timeout, DEFAULT_TIMEOUT};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Invalid authority configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("Refresh request failed: {0}")]
    Network(String),
    #[error("Token refresh failed with status {0}")]
    Status(StatusCode),
    #[error("Malformed token response: {0}")]
    MalformedResponse(String),
    #[error("Failed to persist refreshed tokens: {0}")]
    Storage(#[from] StorageError),
}

pub struct TokenManager {
    config: Config,
    store: TokenStore,
    client: reqwest::Client,
    timeout: Duration,
}

impl TokenManager {
    pub fn new(config: &Config, store: TokenStore) -> Result<Self, reqwest::Error> {
        Self::with_timeout(config, store, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        config: &Config,
        store: TokenStore,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            config: config.clone(),
            store,
            client: client_with_timeout(timeout)?,
            timeout,
        })
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// A currently valid access token, or `None` when not logged in or the
    /// refresh failed. Only a credentials integrity violation is an error.
    pub async fn get_valid_token(&self) -> Result<Option<String>, StorageError> {
        let Some(tokens) = self.store.load()? else {
            return Ok(None);
        };

        if !tokens.is_expired() {
            return Ok(Some(tokens.access_token));
        }

        debug!("Access token expired, refreshing");
        match self.refresh(&tokens).await {
            Ok(refreshed) => Ok(Some(refreshed.access_token)),
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                Ok(None)
            }
        }
    }

    /// Exchange the refresh token for a new access token and persist it.
    ///
    /// The old refresh token is kept when the server does not rotate it.
    pub async fn refresh(&self, tokens: &StoredTokens) -> Result<StoredTokens, RefreshError> {
        let authority = self.config.authority_url()?;
        let endpoint = authority_endpoint(&authority, TOKEN_PATH)?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", tokens.refresh_token.as_str()),
            ("client_id", tokens.client_id.as_str()),
        ];

        let response = self
            .client
            .post(endpoint)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Status(status));
        }

        let body = response.text().await.map_err(|e| self.request_error(e))?;
        let data: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| RefreshError::MalformedResponse(e.to_string()))?;

        let now = Utc::now().timestamp();
        let expires_at = data
            .expires_at(now)
            .ok_or_else(|| RefreshError::MalformedResponse("invalid expires_in".to_string()))?;
        let access_token = data
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RefreshError::MalformedResponse("missing access_token".to_string()))?;

        let refreshed = StoredTokens {
            access_token,
            refresh_token: data
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| tokens.refresh_token.clone()),
            expires_at,
            client_id: tokens.client_id.clone(),
        };

        self.store.save(&refreshed)?;
        info!("Access token refreshed");
        Ok(refreshed)
    }

    fn request_error(&self, e: reqwest::Error) -> RefreshError {
        if e.is_timeout() {
            RefreshError::Timeout(self.timeout)
        } else {
            RefreshError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn stored(expires_at: i64) -> StoredTokens {
        StoredTokens {
            access_token: "old-access".to_string(),
            refresh_token: "old-refresh".to_string(),
            expires_at,
            client_id: "stored-client".to_string(),
        }
    }

    fn expired() -> StoredTokens {
        stored(Utc::now().timestamp() - 10)
    }

    fn manager(auth_url: &str, tmp: &TempDir) -> TokenManager {
        let config = Config {
            auth_url: auth_url.to_string(),
            ..Config::default()
        };
        TokenManager::new(&config, TokenStore::new(tmp.path().join(".eremos"))).unwrap()
    }

    #[tokio::test]
    async fn test_no_tokens_is_none() {
        let tmp = TempDir::new().unwrap();
        let manager = manager("https://auth.example.com", &tmp);
        assert_eq!(manager.get_valid_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fresh_token_returned_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let manager = manager(&server.uri(), &tmp);
        manager
            .store()
            .save(&stored(Utc::now().timestamp() + 3600))
            .unwrap();

        assert_eq!(
            manager.get_valid_token().await.unwrap().as_deref(),
            Some("old-access")
        );
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/oauth/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .and(body_string_contains("client_id=stored-client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 7200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let manager = manager(&server.uri(), &tmp);
        manager.store().save(&expired()).unwrap();

        let before = Utc::now().timestamp();
        assert_eq!(
            manager.get_valid_token().await.unwrap().as_deref(),
            Some("new-access")
        );

        let saved = manager.store().load().unwrap().unwrap();
        assert_eq!(saved.access_token, "new-access");
        assert_eq!(saved.refresh_token, "new-refresh");
        assert_eq!(saved.client_id, "stored-client");
        assert!(saved.expires_at >= before + 7200);
        assert!(saved.expires_at <= Utc::now().timestamp() + 7200);
    }

    #[tokio::test]
    async fn test_refresh_keeps_old_refresh_token_and_defaults_lifetime() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "access_token": "new-access" })),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let manager = manager(&server.uri(), &tmp);

        let before = Utc::now().timestamp();
        let refreshed = manager.refresh(&expired()).await.unwrap();
        assert_eq!(refreshed.refresh_token, "old-refresh");
        assert!(refreshed.expires_at >= before + 3600);
        assert_eq!(manager.store().load().unwrap(), Some(refreshed));
    }

    #[tokio::test]
    async fn test_error_status_is_soft_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let manager = manager(&server.uri(), &tmp);
        manager.store().save(&expired()).unwrap();

        assert!(matches!(
            manager.refresh(&expired()).await,
            Err(RefreshError::Status(s)) if s.as_u16() == 400
        ));
        assert_eq!(manager.get_valid_token().await.unwrap(), None);
        // Stored record left untouched
        let current = manager.store().load().unwrap().unwrap();
        assert_eq!(current.access_token, "old-access");
        assert_eq!(current.refresh_token, "old-refresh");
    }

    #[tokio::test]
    async fn test_redirect_is_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(307).insert_header("Location", "https://elsewhere.example/"),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let manager = manager(&server.uri(), &tmp);
        assert!(matches!(
            manager.refresh(&expired()).await,
            Err(RefreshError::Status(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_responses_are_failures() {
        for template in [
            ResponseTemplate::new(200).set_body_string("<html>oops</html>"),
            ResponseTemplate::new(200).set_body_json(json!({ "refresh_token": "r" })),
            ResponseTemplate::new(200).set_body_json(json!({ "access_token": "" })),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(template)
                .mount(&server)
                .await;

            let tmp = TempDir::new().unwrap();
            let manager = manager(&server.uri(), &tmp);
            assert!(matches!(
                manager.refresh(&expired()).await,
                Err(RefreshError::MalformedResponse(_))
            ));
            assert_eq!(manager.store().load().unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_unusable_expires_in_is_soft_failure() {
        for expires_in in [i64::MAX, 0, -1] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/auth/v1/oauth/token"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "access_token": "new-access",
                    "expires_in": expires_in
                })))
                .mount(&server)
                .await;

            let tmp = TempDir::new().unwrap();
            let manager = manager(&server.uri(), &tmp);
            let tokens = expired();
            manager.store().save(&tokens).unwrap();

            assert!(matches!(
                manager.refresh(&tokens).await,
                Err(RefreshError::MalformedResponse(_))
            ));
            assert_eq!(manager.get_valid_token().await.unwrap(), None);
            assert_eq!(manager.store().load().unwrap(), Some(tokens));
        }
    }

    #[tokio::test]
    async fn test_invalid_authority_is_soft_config_failure() {
        let tmp = TempDir::new().unwrap();
        let manager = manager("http://not-loopback.example.com", &tmp);
        manager.store().save(&expired()).unwrap();

        assert!(matches!(
            manager.refresh(&expired()).await,
            Err(RefreshError::Config(_))
        ));
        assert_eq!(manager.get_valid_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_timeout_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "late" }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let config = Config {
            auth_url: server.uri(),
            ..Config::default()
        };
        let manager = TokenManager::with_timeout(
            &config,
            TokenStore::new(tmp.path().join(".eremos")),
            Duration::from_millis(50),
        )
        .unwrap();

        let err = manager.refresh(&expired()).await.unwrap_err();
        assert!(matches!(err, RefreshError::Timeout(_)));
        assert_eq!(err.to_string(), "Request timed out after 50ms");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_credentials_propagate() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(".eremos");
        std::fs::create_dir_all(&dir).unwrap();
        let target = tmp.path().join("target.json");
        std::fs::write(&target, "{}").unwrap();
        std::os::unix::fs::symlink(&target, dir.join("credentials.json")).unwrap();

        let manager = manager("https://auth.example.com", &tmp);
        assert!(matches!(
            manager.get_valid_token().await,
            Err(StorageError::SymlinkedFile(_))
        ));
    }
}
