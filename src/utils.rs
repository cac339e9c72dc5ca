//! URL helpers shared by the OAuth flow and the API client

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::config::ConfigError;

/// Validate a configured base URL.
///
/// Rejects empty, relative and userinfo-bearing URLs. Plain `http` is only
/// accepted for loopback hosts, and only when `allow_http_loopback` is set.
/// Trailing slashes are stripped from the path so joining stays predictable.
pub fn parse_base_url(name: &str, raw: &str, allow_http_loopback: bool) -> Result<Url, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ConfigError::InvalidUrl(format!("{} is required", name)));
    }

    let mut url = Url::parse(value)
        .map_err(|_| ConfigError::InvalidUrl(format!("{} must be a valid absolute URL", name)))?;

    if !url.username().is_empty() || url.password().is_some() {
        return Err(ConfigError::InvalidUrl(format!(
            "{} must not include userinfo",
            name
        )));
    }

    if url.scheme() != "https" {
        let loopback_http = allow_http_loopback && url.scheme() == "http" && is_loopback_host(&url);
        if !loopback_http {
            return Err(ConfigError::InvalidUrl(format!(
                "{} must use https (http is only allowed for loopback URLs)",
                name
            )));
        }
    }

    let trimmed = url.path().trim_end_matches('/').to_string();
    url.set_path(&trimmed);

    Ok(url)
}

/// Resolve `path` against the origin of `base`
pub fn join_url(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    if path.starts_with('/') {
        base.join(path)
    } else {
        base.join(&format!("/{}", path))
    }
}

fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip == Ipv4Addr::LOCALHOST,
        Some(Host::Ipv6(ip)) => ip == Ipv6Addr::LOCALHOST,
        None => false,
    }
}
