//! Interactive OAuth 2.1 Authorization Code + PKCE login

use std::io::{self, Write};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::auth::callback_server::{redirect_uri, CallbackError, CallbackServer, CALLBACK_TIMEOUT};
use crate::auth::pkce::{PkceParams, CHALLENGE_METHOD};
use crate::auth::{
    authority_endpoint, StorageError, StoredTokens, TokenResponse, TokenStore, AUTHORIZE_PATH,
    TOKEN_PATH,
};
use crate::config::{Config, ConfigError};
use crate::http::{client_with_timeout, DEFAULT_TIMEOUT};
use crate::sanitize::strip_terminal_escapes;

pub const OAUTH_SCOPES: &str = "openid";

#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Authorization failed: {0}")]
    Callback(#[from] CallbackError),
    #[error("Invalid callback URL")]
    InvalidCallbackUrl,
    #[error("No authorization code found in the callback URL")]
    MissingCode,
    #[error("State mismatch")]
    StateMismatch,
    #[error("Token exchange failed: {0}")]
    Exchange(String),
    #[error("Token exchange timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("Failed to save tokens: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to read callback URL: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// How the flow talks to the person logging in
pub trait LoginInteraction {
    /// Show the authorization URL (and try to open it)
    fn present_authorize_url(&self, url: &Url);

    fn status(&self, message: &str);

    /// Ask for the full callback URL (manual mode)
    fn read_callback_url(&self) -> io::Result<String>;
}

/// Browser launch plus prompts on stderr, input on stdin
pub struct TerminalInteraction;

impl LoginInteraction for TerminalInteraction {
    fn present_authorize_url(&self, url: &Url) {
        eprintln!("Opening browser for authorization...\n");
        if let Err(e) = webbrowser::open(url.as_str()) {
            debug!("Browser launch failed: {}", e);
            eprintln!("Could not open browser automatically.");
        }
        eprintln!("If the browser did not open, visit this URL:");
        eprintln!("{}\n", url);
    }

    fn status(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn read_callback_url(&self) -> io::Result<String> {
        eprintln!("After approving, copy the full callback URL from your browser address bar");
        eprintln!("and paste it here. (If the page shows an error, you can still copy the URL.)\n");
        eprint!("Callback URL: ");
        io::stderr().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }
}

/// One login attempt. No retries: the user re-runs the command.
pub struct LoginFlow<'a> {
    config: &'a Config,
    store: &'a TokenStore,
    client: reqwest::Client,
    request_timeout: Duration,
    callback_timeout: Duration,
}

impl<'a> LoginFlow<'a> {
    pub fn new(config: &'a Config, store: &'a TokenStore) -> Result<Self, LoginError> {
        Ok(Self {
            config,
            store,
            client: client_with_timeout(DEFAULT_TIMEOUT)?,
            request_timeout: DEFAULT_TIMEOUT,
            callback_timeout: CALLBACK_TIMEOUT,
        })
    }

    /// Override the loopback wait and the token request timeout
    #[cfg(test)]
    pub fn with_timeouts(
        mut self,
        callback_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, LoginError> {
        self.client = client_with_timeout(request_timeout)?;
        self.request_timeout = request_timeout;
        self.callback_timeout = callback_timeout;
        Ok(self)
    }

    pub async fn run(
        &self,
        manual: bool,
        interaction: &impl LoginInteraction,
    ) -> Result<StoredTokens, LoginError> {
        let authority = self.config.authority_url()?;
        let client_id = self.config.client_id()?;

        let pkce = PkceParams::generate();
        let redirect = redirect_uri(self.config.loopback_port);

        // Listen before the URL is shown so an early redirect cannot be missed
        let mut server = if manual {
            None
        } else {
            Some(
                CallbackServer::start(
                    self.config.loopback_port,
                    &pkce.state,
                    self.callback_timeout,
                )
                .await?,
            )
        };

        let authorize_url = build_authorize_url(&authority, client_id, &redirect, &pkce)?;
        interaction.present_authorize_url(&authorize_url);

        let code = match server.as_mut() {
            Some(server) => {
                interaction.status("Waiting for authorization...");
                let outcome = server.wait().await;
                server.close();
                outcome?.code
            }
            None => {
                let input = interaction.read_callback_url()?;
                parse_callback_url(&input, &pkce.state)?
            }
        };

        interaction.status("Exchanging code for tokens...");
        let tokens = self
            .exchange_code(&authority, client_id, &code, &pkce.code_verifier, &redirect)
            .await?;

        self.store.save(&tokens)?;
        info!("Login complete, tokens saved to {}", self.store.path().display());
        Ok(tokens)
    }

    async fn exchange_code(
        &self,
        authority: &Url,
        client_id: &str,
        code: &str,
        code_verifier: &str,
        redirect: &str,
    ) -> Result<StoredTokens, LoginError> {
        let endpoint = authority_endpoint(authority, TOKEN_PATH)?;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect),
            ("client_id", client_id),
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
        let body = response.text().await.map_err(|e| self.request_error(e))?;
        let data: TokenResponse = serde_json::from_str(&body).unwrap_or_default();

        if !status.is_success() {
            debug!("Token endpoint returned {}", status);
            return Err(LoginError::Exchange(strip_terminal_escapes(
                data.error_message(),
            )));
        }

        let expires_at = data
            .expires_at(Utc::now().timestamp())
            .ok_or_else(|| LoginError::Exchange("invalid expires_in in response".to_string()))?;
        match (data.access_token, data.refresh_token) {
            (Some(access_token), Some(refresh_token))
                if !access_token.is_empty() && !refresh_token.is_empty() =>
            {
                Ok(StoredTokens {
                    access_token,
                    refresh_token,
                    expires_at,
                    client_id: client_id.to_string(),
                })
            }
            _ => Err(LoginError::Exchange(
                "missing tokens in response".to_string(),
            )),
        }
    }

    fn request_error(&self, e: reqwest::Error) -> LoginError {
        if e.is_timeout() {
            LoginError::Timeout(self.request_timeout)
        } else {
            LoginError::Exchange(strip_terminal_escapes(&e.to_string()))
        }
    }
}

/// `<authority>/auth/v1/oauth/authorize` with the PKCE parameters attached
pub fn build_authorize_url(
    authority: &Url,
    client_id: &str,
    redirect: &str,
    pkce: &PkceParams,
) -> Result<Url, ConfigError> {
    let mut url = authority_endpoint(authority, AUTHORIZE_PATH)?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect)
        .append_pair("code_challenge", &pkce.code_challenge)
        .append_pair("code_challenge_method", CHALLENGE_METHOD)
        .append_pair("state", &pkce.state)
        .append_pair("scope", OAUTH_SCOPES);
    Ok(url)
}

/// Pull the authorization code out of a pasted callback URL, applying the
/// same state check as the loopback listener.
pub fn parse_callback_url(input: &str, expected_state: &str) -> Result<String, LoginError> {
    let url = Url::parse(input.trim()).map_err(|_| LoginError::InvalidCallbackUrl)?;

    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };

    let state = param("state");
    if let Some(error) = param("error") {
        if state.as_deref() == Some(expected_state) {
            let reason = param("error_description")
                .filter(|d| !d.is_empty())
                .unwrap_or(error);
            return Err(CallbackError::Denied(strip_terminal_escapes(&reason)).into());
        }
    }

    let code = param("code")
        .filter(|c| !c.is_empty())
        .ok_or(LoginError::MissingCode)?;
    if state.as_deref() != Some(expected_state) {
        return Err(LoginError::StateMismatch);
    }
    Ok(code)
}
