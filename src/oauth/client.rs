//! Dual-endpoint OAuth client
//!
//! Every token operation is tried against the primary endpoint set first. On
//! any failure (transport error, non-2xx, non-JSON body) the same operation
//! is retried once against the legacy set; only the legacy failure reaches
//! the caller. Callers cannot tell which variant answered.

use std::future::Future;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{RequestBuilder, StatusCode};
use url::Url;

use crate::error::{RelayError, Result};
use crate::oauth::endpoints::{EndpointSet, EndpointVariant};
use crate::oauth::token::TokenResponse;

/// OAuth client registration at the identity provider.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Parameters of an authorization redirect.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizeRequest<'a> {
    pub realm: &'a str,
    pub state: &'a str,
    pub scope: Option<&'a str>,
    pub redirect_uri: &'a str,
    pub login_hint: Option<&'a str>,
}

/// Token, revoke and user-info operations with primary-then-legacy fallback.
///
/// # Examples
///
/// ```
/// use tokenrelay::oauth::client::{AuthorizeRequest, ClientCredentials, OAuthClient};
/// use tokenrelay::oauth::endpoints::EndpointSet;
///
/// let client = OAuthClient::new(
///     reqwest::Client::new(),
///     ClientCredentials {
///         client_id: "relay".to_string(),
///         client_secret: "secret".to_string(),
///     },
///     EndpointSet::primary(
///         "https://idp.example.com/oauth2/auth",
///         "https://idp.example.com/oauth2/token",
///         "https://idp.example.com/oauth2/revoke",
///         None,
///     ),
///     EndpointSet::legacy("https://idp.example.com", true),
/// );
///
/// let url = client
///     .authorize_url(&AuthorizeRequest {
///         realm: "acme",
///         state: "xyz",
///         scope: Some("openid"),
///         redirect_uri: "https://relay.example.com/identity/loggedIn",
///         login_hint: None,
///     })
///     .unwrap();
/// assert!(url.as_str().starts_with("https://idp.example.com/oauth2/auth?response_type=code"));
/// ```
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    credentials: ClientCredentials,
    primary: EndpointSet,
    legacy: EndpointSet,
}

impl OAuthClient {
    /// Creates a client.
    ///
    /// # Arguments
    ///
    /// * `http` - Shared HTTP client; its timeout applies to every call
    /// * `credentials` - Client id and secret registered at the provider
    /// * `primary` - Endpoint set tried first
    /// * `legacy` - Endpoint set tried when the primary fails
    pub fn new(
        http: reqwest::Client,
        credentials: ClientCredentials,
        primary: EndpointSet,
        legacy: EndpointSet,
    ) -> Self {
        Self {
            http,
            credentials,
            primary,
            legacy,
        }
    }

    pub fn endpoints(&self, variant: EndpointVariant) -> &EndpointSet {
        match variant {
            EndpointVariant::Primary => &self.primary,
            EndpointVariant::Legacy => &self.legacy,
        }
    }

    // -----------------------------------------------------------------------
    // Authorization code exchange
    // -----------------------------------------------------------------------

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::TokenExchange`] carrying the legacy endpoint's
    /// failure when both variants reject the code.
    pub async fn exchange_authorization_code_for_tokens(
        &self,
        realm: &str,
        redirect_uri: &str,
        code: &str,
    ) -> Result<TokenResponse> {
        with_fallback(
            "exchanging authorization code",
            || self.exchange_code_at(EndpointVariant::Primary, realm, redirect_uri, code),
            || self.exchange_code_at(EndpointVariant::Legacy, realm, redirect_uri, code),
        )
        .await
    }

    async fn exchange_code_at(
        &self,
        variant: EndpointVariant,
        realm: &str,
        redirect_uri: &str,
        code: &str,
    ) -> Result<TokenResponse> {
        let mut url = self.endpoints(variant).token_url(realm)?;
        let request = match variant {
            EndpointVariant::Primary => self
                .http
                .post(url)
                .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
                .form(&[
                    ("grant_type", "authorization_code"),
                    ("redirect_uri", redirect_uri),
                    ("code", code),
                ]),
            EndpointVariant::Legacy => {
                url.query_pairs_mut()
                    .append_pair("grant_type", "authorization_code")
                    .append_pair("code", code)
                    .append_pair("redirect_uri", redirect_uri);
                self.append_legacy_credentials(&mut url);
                self.http.post(url)
            }
        };

        extract_tokens(request).await
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Obtains fresh tokens with a refresh token.
    ///
    /// `scope` is sent only when given; `None` keeps the previously granted
    /// scope. The legacy variant has no scope parameter.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::TokenExchange`] when both variants fail.
    pub async fn refresh_access_token(
        &self,
        realm: &str,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenResponse> {
        with_fallback(
            "refreshing access token",
            || self.refresh_at(EndpointVariant::Primary, realm, refresh_token, scope),
            || self.refresh_at(EndpointVariant::Legacy, realm, refresh_token, scope),
        )
        .await
    }

    async fn refresh_at(
        &self,
        variant: EndpointVariant,
        realm: &str,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenResponse> {
        let mut url = self.endpoints(variant).token_url(realm)?;
        let request = match variant {
            EndpointVariant::Primary => {
                let mut params = vec![
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                ];
                if let Some(scope) = scope {
                    params.push(("scope", scope));
                }
                self.http
                    .post(url)
                    .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
                    .form(&params)
            }
            EndpointVariant::Legacy => {
                url.query_pairs_mut()
                    .append_pair("grant_type", "refresh_token")
                    .append_pair("refresh_token", refresh_token);
                self.append_legacy_credentials(&mut url);
                self.http.post(url)
            }
        };

        extract_tokens(request).await
    }

    // -----------------------------------------------------------------------
    // Revoke
    // -----------------------------------------------------------------------

    /// Revokes a refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::TokenExchange`] when both variants fail. Logout
    /// treats this as best effort.
    pub async fn revoke_refresh_token(&self, realm: &str, refresh_token: &str) -> Result<()> {
        with_fallback(
            "revoking refresh token",
            || self.revoke_at(EndpointVariant::Primary, realm, refresh_token),
            || self.revoke_at(EndpointVariant::Legacy, realm, refresh_token),
        )
        .await
    }

    async fn revoke_at(
        &self,
        variant: EndpointVariant,
        realm: &str,
        refresh_token: &str,
    ) -> Result<()> {
        let mut url = self.endpoints(variant).revoke_url(realm)?;
        let request = match variant {
            EndpointVariant::Primary => self
                .http
                .post(url)
                .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
                .form(&[("refresh_token", refresh_token)]),
            EndpointVariant::Legacy => {
                url.query_pairs_mut().append_pair("token", refresh_token);
                self.append_legacy_credentials(&mut url);
                self.http.post(url)
            }
        };

        let resp = request.send().await.map_err(transport_error)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::TokenExchange(upstream_message(status, &body)));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // User info
    // -----------------------------------------------------------------------

    /// Fetches the caller's profile as opaque JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnsupportedOperation`] when neither variant
    /// exposes a user-info endpoint, otherwise the last upstream failure.
    pub async fn get_user_info(&self, realm: &str, access_token: &str) -> Result<serde_json::Value> {
        with_fallback(
            "fetching user info",
            || self.user_info_at(EndpointVariant::Primary, realm, access_token),
            || self.user_info_at(EndpointVariant::Legacy, realm, access_token),
        )
        .await
    }

    async fn user_info_at(
        &self,
        variant: EndpointVariant,
        realm: &str,
        access_token: &str,
    ) -> Result<serde_json::Value> {
        let url = self.endpoints(variant).user_info_url(realm).ok_or_else(|| {
            RelayError::UnsupportedOperation(format!("no {variant} user info endpoint configured"))
        })??;

        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::TokenExchange(upstream_message(status, &body)));
        }

        resp.json()
            .await
            .map_err(|e| RelayError::TokenExchange(format!("unreadable user info response: {e}")))
    }

    // -----------------------------------------------------------------------
    // Authorize URLs
    // -----------------------------------------------------------------------

    /// Builds the primary variant's authorization redirect. Adds a `realm`
    /// parameter so the provider can route the login.
    pub fn authorize_url(&self, request: &AuthorizeRequest<'_>) -> Result<Url> {
        let mut url = self.build_authorize_url(EndpointVariant::Primary, request)?;
        url.query_pairs_mut().append_pair("realm", request.realm);
        Ok(url)
    }

    /// Builds the legacy variant's authorization redirect.
    pub fn legacy_authorize_url(&self, request: &AuthorizeRequest<'_>) -> Result<Url> {
        self.build_authorize_url(EndpointVariant::Legacy, request)
    }

    fn build_authorize_url(
        &self,
        variant: EndpointVariant,
        request: &AuthorizeRequest<'_>,
    ) -> Result<Url> {
        let mut url = self.endpoints(variant).authorize_url(request.realm)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.credentials.client_id);
            query.append_pair("redirect_uri", request.redirect_uri);
            query.append_pair("state", request.state);
            if let Some(scope) = request.scope {
                query.append_pair("scope", scope);
            }
            if let Some(hint) = request.login_hint {
                query.append_pair("login_hint", hint);
            }
        }
        Ok(url)
    }

    /// Issues a GET against an authorize URL and reports the status.
    ///
    /// Used on login to detect realms the primary provider does not serve.
    pub async fn probe_authorize_endpoint(&self, url: &Url) -> Result<StatusCode> {
        let resp = self.http.get(url.clone()).send().await?;
        Ok(resp.status())
    }

    fn append_legacy_credentials(&self, url: &mut Url) {
        url.query_pairs_mut()
            .append_pair("clientId", &self.credentials.client_id)
            .append_pair("clientSecret", &self.credentials.client_secret);
    }
}

/// Runs `primary`, falling back to `legacy` on any error.
async fn with_fallback<T, P, PF, L, LF>(operation: &str, primary: P, legacy: L) -> Result<T>
where
    P: FnOnce() -> PF,
    PF: Future<Output = Result<T>>,
    L: FnOnce() -> LF,
    LF: Future<Output = Result<T>>,
{
    match primary().await {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::info!(
                "Error {} at primary endpoint, falling back to legacy endpoint: {}",
                operation,
                e
            );
            legacy().await
        }
    }
}

/// Sends a token request and accepts only a 2xx JSON response.
async fn extract_tokens(request: RequestBuilder) -> Result<TokenResponse> {
    let resp = request.send().await.map_err(transport_error)?;
    let status = resp.status();
    let is_json = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(is_json_content_type);

    if !status.is_success() || !is_json {
        let body = resp.text().await.unwrap_or_default();
        return Err(RelayError::TokenExchange(upstream_message(status, &body)));
    }

    resp.json()
        .await
        .map_err(|e| RelayError::TokenExchange(format!("unreadable token response: {e}")))
}

fn is_json_content_type(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case("application/json")
        || (essence.len() > 5 && essence.to_ascii_lowercase().ends_with("+json"))
}

fn transport_error(e: reqwest::Error) -> RelayError {
    RelayError::TokenExchange(format!("request failed: {e}"))
}

/// Prefers the upstream body; falls back to the status line when empty.
fn upstream_message(status: StatusCode, body: &str) -> String {
    if body.trim().is_empty() {
        format!("upstream returned {status}")
    } else {
        body.to_string()
    }
}
