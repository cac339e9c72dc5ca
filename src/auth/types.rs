use chrono::Utc;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::fmt;

/// Seconds before `expires_at` at which a token is already treated as expired
pub const EXPIRY_BUFFER_SECS: i64 = 60;

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Access/refresh token pair as persisted in `credentials.json`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds
    #[serde(deserialize_with = "deserialize_seconds")]
    pub expires_at: i64,
    pub client_id: String,
}

impl StoredTokens {
    /// Name of the first malformed field, if any
    pub fn invalid_field(&self) -> Option<&'static str> {
        if self.access_token.is_empty() {
            Some("access_token")
        } else if self.refresh_token.is_empty() {
            Some("refresh_token")
        } else if self.client_id.is_empty() {
            Some("client_id")
        } else {
            None
        }
    }

    /// True once the access token is within the safety buffer of its expiry
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at.saturating_sub(EXPIRY_BUFFER_SECS)
    }
}

// Keep secrets out of logs and panic messages.
impl fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Token endpoint response body, for both code exchange and refresh
#[derive(Debug, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_seconds")]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry for a response received at `now`.
    ///
    /// `None` when `expires_in` is not a positive lifetime or the sum
    /// overflows.
    pub fn expires_at(&self, now: i64) -> Option<i64> {
        match self.expires_in {
            None => now.checked_add(DEFAULT_EXPIRES_IN_SECS),
            Some(secs) if secs > 0 => now.checked_add(secs),
            Some(_) => None,
        }
    }

    /// Best human-readable reason from an error response
    pub fn error_message(&self) -> &str {
        self.error_description
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.error.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or("Unknown error")
    }
}

/// Whole seconds from a JSON number, truncating fractions
fn seconds_from_number(n: &Number) -> Option<i64> {
    if let Some(secs) = n.as_i64() {
        return Some(secs);
    }
    let secs = n.as_f64()?.trunc();
    // i64::MAX rounds up to 2^63 as f64, hence the strict upper bound
    (secs.is_finite() && secs >= i64::MIN as f64 && secs < i64::MAX as f64)
        .then(|| secs as i64)
}

fn out_of_range<E: de::Error>(n: &Number) -> E {
    E::custom(format!("{} is not a valid number of seconds", n))
}

fn deserialize_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let n = Number::deserialize(deserializer)?;
    seconds_from_number(&n).ok_or_else(|| out_of_range(&n))
}

fn deserialize_optional_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Number>::deserialize(deserializer)?
        .map(|n| seconds_from_number(&n).ok_or_else(|| out_of_range(&n)))
        .transpose()
}
