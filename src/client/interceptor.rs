//! Refresh-on-unauthorized interceptor for outbound calls
//!
//! [`RefreshingClient::execute`] sends a request carrying the caller's
//! bearer token. When the downstream answers `401` and the caller holds a
//! refresh token, it refreshes once, retries once with the new bearer, and
//! attaches `Set-Cookie` headers for the refreshed tokens to the retried
//! response. There is no loop: a second `401` is returned as is.

use std::sync::Arc;

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::error::{RelayError, Result};
use crate::oauth::{OAuthClient, TokenResponse};
use crate::security::cookies::{
    append_set_cookie, CookieName, CookiePackager, ServiceAudience, TokenKind, TokenLookup,
};

/// Source of refreshed tokens.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchanges `refresh_token` for new tokens; `scope` of `None` keeps the
    /// previously granted scope.
    async fn refresh(
        &self,
        realm: &str,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenResponse>;
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(
        &self,
        realm: &str,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenResponse> {
        self.refresh_access_token(realm, refresh_token, scope).await
    }
}

/// Per-call inputs the interceptor needs beyond the request itself.
#[derive(Clone)]
pub struct RefreshContext {
    /// Realm the refresh is performed in
    pub realm: String,
    /// Service the request is addressed to; selects the bearer claim
    pub audience: ServiceAudience,
    /// Caller's refresh token; without one a `401` is returned unchanged
    pub refresh_token: Option<String>,
    /// Domain for refreshed cookies, host-only when `None`
    pub cookie_host: Option<String>,
}

impl RefreshContext {
    /// Builds a context from the caller's cookies.
    ///
    /// An absent or undecryptable refresh cookie means no refresh is possible.
    pub fn from_cookies(
        packager: &CookiePackager,
        headers: &HeaderMap,
        realm: &str,
        audience: ServiceAudience,
        cookie_host: Option<&str>,
    ) -> Self {
        let refresh_token = match packager.lookup(headers, audience.cookie_name(TokenKind::Refresh)) {
            TokenLookup::Valid(value) => value.clear_text().ok().map(str::to_string),
            TokenLookup::Undecryptable(_) | TokenLookup::Absent => None,
        };

        Self {
            realm: realm.to_string(),
            audience,
            refresh_token,
            cookie_host: cookie_host.map(str::to_string),
        }
    }
}

impl std::fmt::Debug for RefreshContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshContext")
            .field("realm", &self.realm)
            .field("audience", &self.audience)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("cookie_host", &self.cookie_host)
            .finish()
    }
}

/// Token presented to `audience`: the access token for the identity
/// concentrator, the identity token for the data-access manager.
pub fn bearer_for_audience(audience: ServiceAudience, tokens: &TokenResponse) -> Result<&str> {
    let required = tokens.require_tokens()?;
    Ok(match audience {
        ServiceAudience::Ic => required.access_token,
        ServiceAudience::Dam => required.id_token,
    })
}

/// Token to forward as bearer for cookie `name`.
///
/// A cookie that no longer decrypts is forwarded as its cipher text so the
/// downstream service rejects it and the caller sees a `401`.
pub fn bearer_from_cookie(
    packager: &CookiePackager,
    headers: &HeaderMap,
    name: CookieName,
) -> Option<String> {
    match packager.lookup(headers, name) {
        TokenLookup::Valid(value) => value.clear_text().ok().map(str::to_string),
        TokenLookup::Undecryptable(value) => {
            tracing::debug!("Forwarding undecryptable {} cookie unchanged", name);
            Some(value.cipher_text().to_string())
        }
        TokenLookup::Absent => None,
    }
}

/// HTTP client that refreshes and retries once on `401`.
#[derive(Clone)]
pub struct RefreshingClient {
    http: reqwest::Client,
    refresher: Arc<dyn TokenRefresher>,
    packager: CookiePackager,
}

impl RefreshingClient {
    /// Creates a client.
    ///
    /// # Arguments
    ///
    /// * `http` - Client used for both the first dispatch and the retry
    /// * `refresher` - Where refreshed tokens come from
    /// * `packager` - Seals refreshed tokens into `Set-Cookie` headers
    pub fn new(
        http: reqwest::Client,
        refresher: Arc<dyn TokenRefresher>,
        packager: CookiePackager,
    ) -> Self {
        Self {
            http,
            refresher,
            packager,
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Dispatches `request`, refreshing and retrying at most once.
    ///
    /// # Errors
    ///
    /// Transport failures of either dispatch and refresh failures propagate.
    /// An unauthorized retry is not an error; its response is returned.
    pub async fn execute(
        &self,
        request: reqwest::Request,
        context: &RefreshContext,
    ) -> Result<reqwest::Response> {
        let retry = request.try_clone();
        let response = self.http.execute(request).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(refresh_token) = context.refresh_token.as_deref() else {
            return Ok(response);
        };
        let Some(mut retry) = retry else {
            tracing::warn!("Cannot retry a streaming request body; returning 401 unchanged");
            return Ok(response);
        };

        tracing::debug!(
            "Downstream {} returned 401, refreshing tokens in realm {}",
            response.url(),
            context.realm
        );
        let tokens = self
            .refresher
            .refresh(&context.realm, refresh_token, None)
            .await?;
        let bearer = bearer_for_audience(context.audience, &tokens)?;

        let auth = HeaderValue::from_str(&format!("Bearer {bearer}")).map_err(|_| {
            RelayError::TokenExchange("refreshed token is not a valid header value".to_string())
        })?;
        retry.headers_mut().insert(AUTHORIZATION, auth);

        let required = tokens.require_tokens()?;
        let cookies = self.packager.package_token_set(
            required.access_token,
            required.id_token,
            required.refresh_token,
            context.cookie_host.as_deref(),
            context.audience,
        )?;

        let mut retried = self.http.execute(retry).await?;
        for cookie in &cookies {
            append_set_cookie(retried.headers_mut(), cookie);
        }
        Ok(retried)
    }
}

impl std::fmt::Debug for RefreshingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshingClient")
            .field("packager", &self.packager)
            .finish_non_exhaustive()
    }
}
