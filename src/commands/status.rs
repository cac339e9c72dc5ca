use chrono::{DateTime, Local};

use crate::auth::TokenManager;
use crate::commands::{claim_text, decode_jwt_payload, token_store};
use crate::config::Config;
use crate::error::AppError;
use crate::sanitize::strip_terminal_escapes;

pub async fn run(config: &Config, show_email: bool) -> Result<String, AppError> {
    let store = token_store(config)?;
    let Some(tokens) = store.load()? else {
        return Ok("Not logged in.\nRun `eremos login` to authenticate.".to_string());
    };

    let mut lines = vec![
        "Authentication Status:".to_string(),
        format!("  Client ID: {}", strip_terminal_escapes(&tokens.client_id)),
        format!("  Token expires: {}", format_expiry(tokens.expires_at)),
        format!(
            "  Expired: {}",
            if tokens.is_expired() { "Yes" } else { "No" }
        ),
    ];

    let manager = TokenManager::new(config, store)?;
    let Some(token) = manager.get_valid_token().await? else {
        lines.push("  Status: Invalid (please re-login)".to_string());
        return Ok(lines.join("\n"));
    };
    lines.push("  Status: Active".to_string());

    if let Some(claims) = decode_jwt_payload(&token) {
        if let Some(sub) = claim_text(&claims, "sub") {
            lines.push(format!("  User ID: {}", strip_terminal_escapes(&sub)));
        }
        if show_email {
            if let Some(email) = claim_text(&claims, "email") {
                lines.push(format!("  Email: {}", strip_terminal_escapes(&email)));
            }
        }
    }

    Ok(lines.join("\n"))
}

fn format_expiry(expires_at: i64) -> String {
    match DateTime::from_timestamp(expires_at, 0) {
        Some(at) => at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S %:z")
            .to_string(),
        None => expires_at.to_string(),
    }
}
