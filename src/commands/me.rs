//! `eremos me`: the signed-in user's profile
//!
//! Some OAuth clients are not allowed to call `/api/users/me`. The API says
//! so with `OAUTH_NOT_ALLOWED` (as an error code or embedded in the profile),
//! in which case the profile is fetched by the token's `sub` instead.

use reqwest::Method;
use serde_json::{json, Map, Value};
use url::form_urlencoded;

use crate::api::{ApiClient, ApiError, RequestOptions};
use crate::auth::TokenManager;
use crate::commands::{claim_text, decode_jwt_payload, token_store};
use crate::config::Config;
use crate::error::AppError;
use crate::sanitize::sanitize_value;

const ME_PATH: &str = "/api/users/me";
const OAUTH_NOT_ALLOWED: &str = "OAUTH_NOT_ALLOWED";

const PROFILE_FIELDS: &[&str] = &[
    "id",
    "handle",
    "name",
    "bio",
    "avatar_url",
    "website",
    "role",
    "is_admin",
    "onboarded_at",
    "created_at",
    "updated_at",
];

#[derive(Debug, PartialEq)]
struct MeData {
    profile: Map<String, Value>,
    email: Option<String>,
    source: &'static str,
    warnings: Vec<String>,
}

pub async fn run(config: &Config, show_email: bool) -> Result<String, AppError> {
    let tokens = TokenManager::new(config, token_store(config)?)?;
    let api = ApiClient::new(config, &tokens)?;
    let token = api.require_auth().await?;

    let me = resolve_me(&api, &token).await?;
    let mut output = json!({
        "profile": me.profile,
        "source": me.source,
    });
    if show_email {
        output["email"] = me.email.map(Value::String).unwrap_or(Value::Null);
    }
    if !me.warnings.is_empty() {
        output["warnings"] = json!(me.warnings);
    }

    Ok(serde_json::to_string_pretty(&sanitize_value(output))?)
}

async fn resolve_me(api: &ApiClient<'_>, token: &str) -> Result<MeData, AppError> {
    let claims = decode_jwt_payload(token).unwrap_or_default();

    let data = match api
        .call::<Value>(Method::GET, ME_PATH, None, &RequestOptions::default())
        .await
    {
        Ok(response) => response.data,
        Err(ApiError::Status { code, .. }) if code == OAUTH_NOT_ALLOWED => {
            return fetch_by_id(api, &claims, claim_text(&claims, "email"), &code).await;
        }
        Err(e) => return Err(e.into()),
    };

    let email = data
        .get("email")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| claim_text(&claims, "email"));

    let profile = match data.get("profile") {
        Some(Value::Object(profile)) => profile,
        _ => data.as_object().ok_or_else(|| {
            AppError::UnexpectedResponse(
                "Invalid /api/users/me response: profile object is missing.".to_string(),
            )
        })?,
    };

    match profile.get("error").and_then(Value::as_str) {
        Some(OAUTH_NOT_ALLOWED) => fetch_by_id(api, &claims, email, OAUTH_NOT_ALLOWED).await,
        Some(other) => Err(AppError::UnexpectedResponse(format!(
            "/api/users/me returned profile error: {}",
            other
        ))),
        None => Ok(MeData {
            profile: normalize_profile(profile),
            email,
            source: "users_me",
            warnings: Vec::new(),
        }),
    }
}

async fn fetch_by_id(
    api: &ApiClient<'_>,
    claims: &Map<String, Value>,
    email: Option<String>,
    reason: &str,
) -> Result<MeData, AppError> {
    let user_id = claim_text(claims, "sub").ok_or_else(|| {
        AppError::UnexpectedResponse(
            "Unable to resolve current user ID from access token for `me` fallback.".to_string(),
        )
    })?;
    let path = format!("/api/users/{}", safe_path_segment(&user_id, "User ID")?);

    let response = api
        .call::<Value>(Method::GET, &path, None, &RequestOptions::default())
        .await?;
    let profile = response.data.as_object().cloned().unwrap_or_default();

    Ok(MeData {
        profile: normalize_profile(&profile),
        email,
        source: "users_get_fallback",
        warnings: vec![format!(
            "{} was unavailable ({}); fell back to /api/users/{{id}}.",
            ME_PATH, reason
        )],
    })
}

/// Keep the known profile fields, accepting the older `display_name` and
/// `website_url` spellings.
fn normalize_profile(raw: &Map<String, Value>) -> Map<String, Value> {
    let text = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);

    let role = text("role");
    let is_admin = match raw.get("is_admin") {
        Some(Value::Bool(b)) => Some(*b),
        _ if role.as_deref() == Some("admin") => Some(true),
        _ => None,
    };

    let mut out = Map::new();
    for key in PROFILE_FIELDS {
        let value = match *key {
            "name" => text("name").or_else(|| text("display_name")).map(Value::String),
            "website" => text("website")
                .or_else(|| text("website_url"))
                .map(Value::String),
            "role" => role.clone().map(Value::String),
            "is_admin" => is_admin.map(Value::Bool),
            other => text(other).map(Value::String),
        };
        if let Some(value) = value {
            out.insert(key.to_string(), value);
        }
    }
    out
}

/// Percent-encode a value for use as a single URL path segment
fn safe_path_segment(value: &str, name: &str) -> Result<String, AppError> {
    if value.is_empty() || value.contains('/') || value.contains('\\') || value.contains("..") {
        return Err(AppError::InvalidInput(format!(
            "{} must not contain path separators or \"..\"",
            name
        )));
    }
    let encoded: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
    Ok(encoded.replace('+', "%20"))
}
