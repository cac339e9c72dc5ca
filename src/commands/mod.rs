//! Command handlers. Each returns the text to print on stdout.

pub mod login;
pub mod logout;
pub mod me;
pub mod status;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value};

use crate::auth::{StorageError, TokenStore};
use crate::config::Config;

/// Credentials store for this invocation
pub fn token_store(config: &Config) -> Result<TokenStore, StorageError> {
    match &config.credentials_dir {
        Some(dir) => Ok(TokenStore::new(dir)),
        None => TokenStore::default_location(),
    }
}

/// Claims of a JWT, without verifying the signature. Display only.
pub fn decode_jwt_payload(token: &str) -> Option<Map<String, Value>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(claims) => Some(claims),
        _ => None,
    }
}

/// Claim value as display text
pub fn claim_text(claims: &Map<String, Value>, name: &str) -> Option<String> {
    match claims.get(name)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Unsigned token with the given claims
    pub fn jwt(claims: &Value) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::jwt;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_jwt_payload() {
        let token = jwt(&json!({ "sub": "user-1", "email": "a@example.com", "n": 5 }));
        let claims = decode_jwt_payload(&token).unwrap();
        assert_eq!(claim_text(&claims, "sub").as_deref(), Some("user-1"));
        assert_eq!(claim_text(&claims, "n").as_deref(), Some("5"));
        assert_eq!(claim_text(&claims, "missing"), None);
    }

    #[test]
    fn test_decode_jwt_payload_tolerates_garbage() {
        assert!(decode_jwt_payload("opaque-token").is_none());
        assert!(decode_jwt_payload("a.!!!.c").is_none());
        let not_object = format!("a.{}.c", URL_SAFE_NO_PAD.encode("[1,2]"));
        assert!(decode_jwt_payload(&not_object).is_none());
    }

    #[test]
    fn test_token_store_honors_override() {
        let config = Config {
            credentials_dir: Some("/tmp/eremos-test".into()),
            ..Config::default()
        };
        assert_eq!(
            token_store(&config).unwrap().path(),
            std::path::Path::new("/tmp/eremos-test/credentials.json")
        );
    }
}
