use reqwest::StatusCode;
use tracing::{debug, info};

use crate::auth::{authority_endpoint, LOGOUT_PATH};
use crate::commands::token_store;
use crate::config::Config;
use crate::error::AppError;
use crate::http::{client_with_timeout, LOGOUT_TIMEOUT};

pub async fn run(config: &Config) -> Result<String, AppError> {
    let store = token_store(config)?;
    let Some(tokens) = store.load()? else {
        return Ok("Not currently logged in.".to_string());
    };

    // Local credentials go away whatever the server says
    match revoke_session(config, &tokens.access_token).await {
        Ok(status) => debug!("Server-side logout returned {}", status),
        Err(e) => debug!("Server-side logout failed: {}", e),
    }

    store.delete()?;
    info!("Removed {}", store.path().display());
    Ok("Logged out successfully. Tokens removed.".to_string())
}

async fn revoke_session(config: &Config, access_token: &str) -> Result<StatusCode, AppError> {
    let endpoint = authority_endpoint(&config.authority_url()?, LOGOUT_PATH)?;
    let response = client_with_timeout(LOGOUT_TIMEOUT)?
        .post(endpoint)
        .bearer_auth(access_token)
        .header("Accept", "application/json")
        .send()
        .await?;
    Ok(response.status())
}
