//! HTTP client utilities
//!
//! Every outbound request goes through a client built here: bounded timeout,
//! no redirect following (credentials must never be replayed to a host we did
//! not choose) and a fixed user agent. Proxy environment variables are honored
//! by reqwest itself.

use reqwest::{redirect, Client};
use std::time::Duration;

/// Token exchange, refresh and ordinary API calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Best-effort server-side logout
pub const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);

pub const USER_AGENT: &str = concat!("eremos-cli/", env!("CARGO_PKG_VERSION"));

/// Build a reqwest Client with the given timeout and redirects disabled
pub fn client_with_timeout(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .redirect(redirect::Policy::none())
        .user_agent(USER_AGENT)
        .build()
}
