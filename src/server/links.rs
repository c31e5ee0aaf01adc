//! Self links derived from the incoming request
//!
//! The relay usually sits behind a reverse proxy, so the externally visible
//! scheme and host come from `X-Forwarded-Proto` / `X-Forwarded-Host` when
//! present and from `Host` otherwise.

use std::net::IpAddr;

use http::header::HOST;
use http::HeaderMap;
use url::Url;

use crate::error::{RelayError, Result};

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Scheme and authority the browser used to reach the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalOrigin {
    scheme: String,
    authority: String,
}

impl ExternalOrigin {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let first = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let scheme = first(X_FORWARDED_PROTO)
            .filter(|s| s == "http" || s == "https")
            .unwrap_or_else(|| "http".to_string());
        let authority = first(X_FORWARDED_HOST)
            .or_else(|| first(HOST.as_str()))
            .unwrap_or_else(|| "localhost".to_string());

        Self { scheme, authority }
    }

    /// `scheme://authority` with no trailing slash.
    pub fn base(&self) -> String {
        format!("{}://{}", self.scheme, self.authority)
    }

    /// Host without port.
    pub fn host(&self) -> &str {
        let authority = self.authority.as_str();
        // IPv6 literal
        if let Some(end) = authority.find(']') {
            return &authority[..=end];
        }
        match authority.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
                host
            }
            _ => authority,
        }
    }

    /// `Domain` attribute for cookies set on this origin.
    ///
    /// IP literals are not valid cookie domains, so cookies for them are
    /// host-only.
    pub fn cookie_domain(&self) -> Option<&str> {
        let host = self.host();
        if host.starts_with('[') || host.parse::<IpAddr>().is_ok() {
            return None;
        }
        Some(host)
    }

    /// Redirect URI registered for the authorization callback.
    pub fn callback_url(&self, api_prefix: &str) -> String {
        format!("{}{}/identity/loggedIn", self.base(), api_prefix)
    }

    /// UI page for `realm`, e.g. `https://relay/acme/identity`.
    pub fn ui_link(&self, ui_prefix: &str, realm: &str, path: &str) -> Result<Url> {
        let raw = if path.is_empty() {
            format!("{}{}/{}/", self.base(), ui_prefix, realm)
        } else {
            format!("{}{}/{}/{}", self.base(), ui_prefix, realm, path)
        };
        Url::parse(&raw).map_err(|e| RelayError::InvalidRequest(format!("invalid host header: {e}")))
    }

    /// Resolves a caller-supplied post-login destination.
    ///
    /// Relative references resolve against the realm's UI root. Absolute
    /// URLs are accepted only when they point back at this origin.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] for destinations on other hosts.
    pub fn resolve_destination(&self, ui_prefix: &str, realm: &str, destination: &str) -> Result<Url> {
        let root = self.ui_link(ui_prefix, realm, "")?;
        let resolved = root
            .join(destination)
            .map_err(|e| RelayError::InvalidRequest(format!("invalid redirectUri: {e}")))?;

        if resolved.scheme() != root.scheme()
            || resolved.host_str() != root.host_str()
            || resolved.port_or_known_default() != root.port_or_known_default()
        {
            return Err(RelayError::InvalidRequest(format!(
                "redirectUri must stay on {}",
                self.base()
            )));
        }
        Ok(resolved)
    }
}
