//! Cookie packaging for browser-held tokens
//!
//! The relay never stores tokens server-side. Every token travels in a cookie
//! named `<service>_<kind>`: `ic_access`, `dam_refresh`, `ic_oauth_state`
//! and so on. All kinds except [`TokenKind::State`] are encrypted with the
//! [`TokenCipher`]; the state cookie carries a signed JWT that must compare
//! byte-for-byte against the `state` query parameter, so it stays clear.
//!
//! Extraction distinguishes three outcomes, see [`TokenLookup`]: a cookie
//! that was never set is not the same thing as a cookie sealed under a key
//! this instance no longer has.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cookie::Cookie;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};

use crate::error::{RelayError, Result};
use crate::security::cipher::{DecryptError, TokenCipher};

/// Value written into cookies being cleared.
pub const CLEARED_COOKIE_VALUE: &str = "expired";

// ---------------------------------------------------------------------------
// Cookie naming
// ---------------------------------------------------------------------------

/// Semantic role of a token, independent of which service issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// OAuth access token
    Access,
    /// OIDC identity token
    Identity,
    /// OAuth refresh token
    Refresh,
    /// Signed CSRF state token for an in-flight authorization
    State,
}

impl TokenKind {
    /// Suffix used in cookie names.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Identity => "identity",
            TokenKind::Refresh => "refresh",
            TokenKind::State => "oauth_state",
        }
    }
}

/// Downstream service a token is presented to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAudience {
    /// Identity concentrator
    Ic,
    /// Data-access manager
    Dam,
}

impl ServiceAudience {
    /// Prefix used in cookie names.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAudience::Ic => "ic",
            ServiceAudience::Dam => "dam",
        }
    }

    /// Derives the cookie name carrying `kind` tokens for this service.
    ///
    /// # Examples
    ///
    /// ```
    /// use tokenrelay::security::cookies::{ServiceAudience, TokenKind};
    ///
    /// assert_eq!(ServiceAudience::Dam.cookie_name(TokenKind::Refresh).to_string(), "dam_refresh");
    /// assert_eq!(ServiceAudience::Ic.cookie_name(TokenKind::State).to_string(), "ic_oauth_state");
    /// ```
    pub fn cookie_name(self, kind: TokenKind) -> CookieName {
        CookieName {
            audience: self,
            kind,
        }
    }
}

/// Name of a token cookie, derived from audience and kind and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CookieName {
    audience: ServiceAudience,
    kind: TokenKind,
}

impl CookieName {
    /// Service the cookie's token is presented to.
    pub fn audience(&self) -> ServiceAudience {
        self.audience
    }

    /// Semantic role of the cookie's token.
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Whether values under this name are encrypted at rest.
    pub fn is_encrypted(&self) -> bool {
        self.kind != TokenKind::State
    }
}

impl fmt::Display for CookieName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.audience.as_str(), self.kind.as_str())
    }
}

// ---------------------------------------------------------------------------
// Extracted values
// ---------------------------------------------------------------------------

/// A token cookie as received from the browser.
///
/// Holds the cipher text exactly as sent plus the outcome of decrypting it.
/// Equality and `Debug` only consider the cipher text.
#[derive(Clone)]
pub struct CookieValue {
    name: CookieName,
    cipher_text: String,
    clear_text: std::result::Result<String, DecryptError>,
}

impl CookieValue {
    /// The cookie value exactly as the browser sent it.
    pub fn cipher_text(&self) -> &str {
        &self.cipher_text
    }

    /// The decrypted token.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PlaintextNotDecryptable`] when the cookie was
    /// sealed under a different key or is corrupt.
    pub fn clear_text(&self) -> Result<&str> {
        self.clear_text
            .as_deref()
            .map_err(|_| RelayError::PlaintextNotDecryptable {
                cookie: self.name.to_string(),
            })
    }

    /// Whether [`clear_text`](Self::clear_text) would succeed.
    pub fn is_decryptable(&self) -> bool {
        self.clear_text.is_ok()
    }
}

impl PartialEq for CookieValue {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.cipher_text == other.cipher_text
    }
}

impl Eq for CookieValue {}

impl fmt::Debug for CookieValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieValue")
            .field("name", &self.name.to_string())
            .field("cipher_text", &self.cipher_text)
            .finish_non_exhaustive()
    }
}

/// Three-way outcome of looking up a token cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    /// The cookie was not sent.
    Absent,
    /// The cookie was sent but cannot be decrypted.
    Undecryptable(CookieValue),
    /// The cookie was sent and decrypts.
    Valid(CookieValue),
}

// ---------------------------------------------------------------------------
// CookiePackager
// ---------------------------------------------------------------------------

/// Converts bearer tokens into browser cookies and back.
///
/// The packager is immutable after construction and cheap to clone; the
/// cipher is shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct CookiePackager {
    cipher: Arc<TokenCipher>,
    secure: bool,
}

impl CookiePackager {
    /// Creates a packager.
    ///
    /// # Arguments
    ///
    /// * `cipher` - Cipher shared by every relay instance.
    /// * `secure` - Whether issued cookies carry the `Secure` attribute.
    ///   Disabled only for local development without HTTPS.
    pub fn new(cipher: TokenCipher, secure: bool) -> Self {
        Self {
            cipher: Arc::new(cipher),
            secure,
        }
    }

    /// Wraps `token` into a cookie named `name`.
    ///
    /// The value is encrypted unless `name` is a state cookie. The cookie is
    /// scoped to `/`, `HttpOnly`, `Secure` per deployment, and bound to
    /// `cookie_host` when one is given (host-only otherwise).
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be sealed.
    pub fn package_token(
        &self,
        token: &str,
        cookie_host: Option<&str>,
        name: CookieName,
    ) -> Result<Cookie<'static>> {
        let value = if name.is_encrypted() {
            self.cipher.encrypt(token)?
        } else {
            token.to_string()
        };

        let mut builder = Cookie::build((name.to_string(), value))
            .path("/")
            .secure(self.secure)
            .http_only(true);
        if let Some(host) = cookie_host.filter(|h| !h.is_empty()) {
            builder = builder.domain(host.to_string());
        }
        Ok(builder.build())
    }

    /// Packages the tokens of one exchange for `audience`.
    ///
    /// Yields the access and identity cookies, plus the refresh cookie when a
    /// refresh token was issued.
    pub fn package_token_set(
        &self,
        access_token: &str,
        id_token: &str,
        refresh_token: Option<&str>,
        cookie_host: Option<&str>,
        audience: ServiceAudience,
    ) -> Result<Vec<Cookie<'static>>> {
        let mut cookies = vec![
            self.package_token(access_token, cookie_host, audience.cookie_name(TokenKind::Access))?,
            self.package_token(id_token, cookie_host, audience.cookie_name(TokenKind::Identity))?,
        ];
        if let Some(refresh) = refresh_token {
            cookies.push(self.package_token(
                refresh,
                cookie_host,
                audience.cookie_name(TokenKind::Refresh),
            )?);
        }
        Ok(cookies)
    }

    /// Produces a cookie that deletes `name` for `cookie_host`.
    pub fn clear_token(&self, cookie_host: Option<&str>, name: CookieName) -> Cookie<'static> {
        expired_cookie(cookie_host, name)
    }

    /// Reads the cookie `name` from request headers.
    ///
    /// Returns `None` only when the cookie is absent. A present cookie is
    /// always returned; whether it decrypts is reported by
    /// [`CookieValue::clear_text`].
    pub fn extract_token(&self, headers: &HeaderMap, name: CookieName) -> Option<CookieValue> {
        let cipher_text = find_cookie(headers, &name.to_string())?;
        let clear_text = if name.is_encrypted() {
            self.cipher.decrypt(&cipher_text)
        } else {
            Ok(cipher_text.clone())
        };

        Some(CookieValue {
            name,
            cipher_text,
            clear_text,
        })
    }

    /// Reads the cookie `name` and classifies it.
    pub fn lookup(&self, headers: &HeaderMap, name: CookieName) -> TokenLookup {
        match self.extract_token(headers, name) {
            None => TokenLookup::Absent,
            Some(value) if value.is_decryptable() => TokenLookup::Valid(value),
            Some(value) => TokenLookup::Undecryptable(value),
        }
    }

    /// Reads a cookie the caller cannot proceed without.
    ///
    /// An undecryptable cookie is reported as absent: the only remedy for
    /// either is a fresh login.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::AuthCookieAbsent`] if the cookie is missing or
    /// cannot be decrypted.
    pub fn extract_required_token(
        &self,
        headers: &HeaderMap,
        name: CookieName,
    ) -> Result<CookieValue> {
        match self.lookup(headers, name) {
            TokenLookup::Valid(value) => Ok(value),
            TokenLookup::Undecryptable(_) => {
                tracing::debug!("Treating undecryptable {} cookie as absent", name);
                Err(RelayError::AuthCookieAbsent {
                    cookie: name.to_string(),
                })
            }
            TokenLookup::Absent => Err(RelayError::AuthCookieAbsent {
                cookie: name.to_string(),
            }),
        }
    }

    /// Reads several required cookies at once.
    ///
    /// # Errors
    ///
    /// Fails on the first cookie that [`extract_required_token`](Self::extract_required_token)
    /// rejects.
    pub fn extract_required_tokens(
        &self,
        headers: &HeaderMap,
        names: &[CookieName],
    ) -> Result<HashMap<CookieName, CookieValue>> {
        names
            .iter()
            .map(|name| Ok((*name, self.extract_required_token(headers, *name)?)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Header helpers
// ---------------------------------------------------------------------------

/// A cookie that makes the browser drop `name` for `cookie_host`.
pub fn expired_cookie(cookie_host: Option<&str>, name: CookieName) -> Cookie<'static> {
    let mut builder = Cookie::build((name.to_string(), CLEARED_COOKIE_VALUE))
        .path("/")
        .max_age(cookie::time::Duration::ZERO);
    if let Some(host) = cookie_host.filter(|h| !h.is_empty()) {
        builder = builder.domain(host.to_string());
    }
    builder.build()
}

/// Finds the first cookie called `name` across all `Cookie` headers.
fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(|c| c.ok())
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
}

/// Appends `cookie` as a `Set-Cookie` header.
///
/// Cookies whose rendering is not a valid header value are dropped with a
/// warning.
pub fn append_set_cookie(headers: &mut HeaderMap, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(e) => {
            tracing::warn!("Dropping unrenderable Set-Cookie for {}: {}", cookie.name(), e);
        }
    }
}
