//! Browser-facing identity endpoints
//!
//! Each handler resolves the external origin first so that every cookie it
//! sets, and every cookie an error clears, is bound to the host the browser
//! used.

use std::sync::Arc;

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use cookie::Cookie;
use serde::Deserialize;
use url::Url;

use crate::client::interceptor::{bearer_from_cookie, RefreshContext};
use crate::error::{RelayError, Result};
use crate::oauth::client::AuthorizeRequest;
use crate::oauth::endpoints::validate_realm;
use crate::security::cookies::{append_set_cookie, ServiceAudience, TokenKind, TokenLookup};
use crate::security::jwt::UnverifiedClaims;
use crate::security::state::StatePayload;
use crate::server::error::ApiError;
use crate::server::links::ExternalOrigin;
use crate::server::AppState;

/// Access tokens with more than this many seconds left are not refreshed.
pub const REFRESH_WINDOW_SECS: i64 = 300;

type HandlerResult = std::result::Result<Response, ApiError>;

fn fail(origin: &ExternalOrigin) -> impl Fn(RelayError) -> ApiError + '_ {
    move |error| ApiError::new(error, origin.cookie_domain())
}

fn redirect(location: &str, cookies: &[Cookie<'static>]) -> Result<Response> {
    let location = HeaderValue::from_str(location).map_err(|_| {
        RelayError::InvalidRequest("redirect location is not a valid header value".to_string())
    })?;
    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, location);
    for cookie in cookies {
        append_set_cookie(&mut headers, cookie);
    }
    Ok((StatusCode::TEMPORARY_REDIRECT, headers).into_response())
}

fn with_cookies(status: StatusCode, cookies: &[Cookie<'static>]) -> Response {
    let mut headers = HeaderMap::new();
    for cookie in cookies {
        append_set_cookie(&mut headers, cookie);
    }
    (status, headers).into_response()
}

/// Builds the authorize redirect for `state_token` and plants the state cookie.
///
/// The primary authorize URL is probed first; a `4xx` means the primary
/// provider does not serve the realm and the legacy URL is used instead. A
/// probe that fails outright keeps the primary URL.
async fn authorize_redirect(
    state: &AppState,
    origin: &ExternalOrigin,
    realm: &str,
    state_token: &str,
    scope: Option<&str>,
    login_hint: Option<&str>,
    resources: &[String],
) -> Result<Response> {
    let redirect_uri = origin.callback_url(&state.config.server.api_prefix);
    let request = AuthorizeRequest {
        realm,
        state: state_token,
        scope,
        redirect_uri: &redirect_uri,
        login_hint,
    };

    let mut url = state.oauth.authorize_url(&request)?;
    match state.oauth.probe_authorize_endpoint(&url).await {
        Ok(status) if status.is_client_error() => {
            tracing::info!(
                "Primary authorize endpoint answered {} for realm {}, using legacy endpoint",
                status,
                realm
            );
            url = state.oauth.legacy_authorize_url(&request)?;
        }
        Ok(_) => {}
        Err(e) => tracing::debug!("Authorize endpoint probe failed, keeping primary: {}", e),
    }
    if !resources.is_empty() {
        let mut query = url.query_pairs_mut();
        for resource in resources {
            query.append_pair("resource", resource);
        }
    }

    let cookie = state.packager.package_token(
        state_token,
        origin.cookie_domain(),
        state.config.idp.service.cookie_name(TokenKind::State),
    )?;
    redirect(url.as_str(), &[cookie])
}

fn resolve_destination(
    state: &AppState,
    origin: &ExternalOrigin,
    realm: &str,
    destination: Option<&str>,
) -> Result<Url> {
    let ui_prefix = &state.config.server.ui_prefix;
    match destination {
        Some(destination) => origin.resolve_destination(ui_prefix, realm, destination),
        None => origin.ui_link(ui_prefix, realm, ""),
    }
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginParams {
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub login_hint: Option<String>,
}

/// `GET {api}/realm/:realm/identity/login`
pub async fn login(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    Query(params): Query<LoginParams>,
    headers: HeaderMap,
) -> HandlerResult {
    let origin = ExternalOrigin::from_headers(&headers);
    start_login(&state, &origin, &realm, params)
        .await
        .map_err(fail(&origin))
}

async fn start_login(
    state: &AppState,
    origin: &ExternalOrigin,
    realm: &str,
    params: LoginParams,
) -> Result<Response> {
    validate_realm(realm)?;
    let destination = params
        .redirect_uri
        .as_deref()
        .map(|d| origin.resolve_destination(&state.config.server.ui_prefix, realm, d))
        .transpose()?;

    let state_token = state
        .states
        .generate_login_state(destination.as_ref().map(Url::as_str), realm)?;
    let scope = params
        .scope
        .as_deref()
        .unwrap_or(&state.config.idp.default_scopes);

    authorize_redirect(
        state,
        origin,
        realm,
        &state_token,
        Some(scope),
        params.login_hint.as_deref(),
        &[],
    )
    .await
}

// ---------------------------------------------------------------------------
// Account linking
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkParams {
    pub scope: Option<String>,
    pub login_hint: Option<String>,
}

/// `GET {api}/realm/:realm/identity/link`
///
/// Starts a login whose result is linked into the caller's current account.
pub async fn link(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    Query(params): Query<LinkParams>,
    headers: HeaderMap,
) -> HandlerResult {
    let origin = ExternalOrigin::from_headers(&headers);
    start_link(&state, &origin, &headers, &realm, params)
        .await
        .map_err(fail(&origin))
}

async fn start_link(
    state: &AppState,
    origin: &ExternalOrigin,
    headers: &HeaderMap,
    realm: &str,
    params: LinkParams,
) -> Result<Response> {
    validate_realm(realm)?;
    if state.linker.is_none() {
        return Err(RelayError::UnsupportedOperation(
            "account linking is not configured".to_string(),
        ));
    }

    let access = state
        .packager
        .extract_required_token(headers, state.config.idp.service.cookie_name(TokenKind::Access))?;
    let target_account = UnverifiedClaims::decode(access.clear_text()?)
        .and_then(|claims| claims.sub)
        .filter(|sub| !sub.is_empty())
        .ok_or_else(|| RelayError::AccountLinking("signed-in token has no subject".to_string()))?;

    let state_token = state
        .states
        .generate_account_linking_state(&target_account, realm)?;
    let scope = params
        .scope
        .as_deref()
        .unwrap_or(&state.config.idp.default_scopes);

    authorize_redirect(
        state,
        origin,
        realm,
        &state_token,
        Some(scope),
        params.login_hint.as_deref(),
        &[],
    )
    .await
}

// ---------------------------------------------------------------------------
// Resource authorization
// ---------------------------------------------------------------------------

/// `GET {api}/realm/:realm/resources/authorize?resource=..&redirectUri=..`
///
/// `resource` may repeat; each must be an absolute URL.
pub async fn authorize_resources(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> HandlerResult {
    let origin = ExternalOrigin::from_headers(&headers);
    start_resource_authorization(&state, &origin, &realm, query.as_deref().unwrap_or(""))
        .await
        .map_err(fail(&origin))
}

async fn start_resource_authorization(
    state: &AppState,
    origin: &ExternalOrigin,
    realm: &str,
    query: &str,
) -> Result<Response> {
    validate_realm(realm)?;

    let mut resources = Vec::new();
    let mut destination = None;
    let mut scope = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "resource" => {
                Url::parse(&value).map_err(|e| {
                    RelayError::InvalidRequest(format!("invalid resource '{value}': {e}"))
                })?;
                resources.push(value.into_owned());
            }
            "redirectUri" => destination = Some(value.into_owned()),
            "scope" => scope = Some(value.into_owned()),
            _ => {}
        }
    }
    if resources.is_empty() {
        return Err(RelayError::InvalidRequest(
            "at least one 'resource' parameter is required".to_string(),
        ));
    }

    let destination = resolve_destination(state, origin, realm, destination.as_deref())?;
    let state_token = state.states.generate_resource_state(
        Some(destination.as_str()),
        realm,
        &resources,
        None,
    )?;
    let scope = scope.as_deref().unwrap_or(&state.config.idp.default_scopes);

    authorize_redirect(
        state,
        origin,
        realm,
        &state_token,
        Some(scope),
        None,
        &resources,
    )
    .await
}

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// `GET {api}/identity/loggedIn`
///
/// Verifies the state, exchanges the code and completes whatever flow the
/// state token names.
pub async fn logged_in(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> HandlerResult {
    let origin = ExternalOrigin::from_headers(&headers);
    finish_login(&state, &origin, &headers, params)
        .await
        .map_err(fail(&origin))
}

async fn finish_login(
    state: &AppState,
    origin: &ExternalOrigin,
    headers: &HeaderMap,
    params: CallbackParams,
) -> Result<Response> {
    let service = state.config.idp.service;
    let state_name = service.cookie_name(TokenKind::State);
    let state_cookie = state.packager.extract_token(headers, state_name);
    let validated = state.states.parse_and_verify(
        params.state.as_deref(),
        state_cookie.as_ref().map(|c| c.cipher_text()),
        state_name,
    )?;

    if let StatePayload::CliLogin { .. } = validated.payload() {
        return Err(RelayError::UnsupportedOperation(
            "command-line login is not served by this relay".to_string(),
        ));
    }
    if let Some(error) = params.error {
        return Err(RelayError::TokenExchange(
            params.error_description.unwrap_or(error),
        ));
    }
    let code = params
        .code
        .ok_or_else(|| RelayError::InvalidRequest("Missing 'code' parameter".to_string()))?;

    let realm = validated.realm();
    let redirect_uri = origin.callback_url(&state.config.server.api_prefix);
    let tokens = state
        .oauth
        .exchange_authorization_code_for_tokens(realm, &redirect_uri, &code)
        .await?;
    let required = tokens.require_tokens()?;

    let host = origin.cookie_domain();
    let clear_state = state.packager.clear_token(host, state_name);

    match validated.payload() {
        StatePayload::Login { destination } => {
            let to = resolve_destination(state, origin, realm, destination.as_deref())?;
            let mut cookies = state.packager.package_token_set(
                required.access_token,
                required.id_token,
                required.refresh_token,
                host,
                service,
            )?;
            cookies.push(clear_state);
            tracing::info!("Completed login in realm {}", realm);
            redirect(to.as_str(), &cookies)
        }
        StatePayload::Link { target_account } => {
            let linker = state.linker.as_ref().ok_or_else(|| {
                RelayError::UnsupportedOperation("account linking is not configured".to_string())
            })?;
            let base = state
                .packager
                .extract_required_token(headers, service.cookie_name(TokenKind::Access))?;
            let base_token = base.clear_text()?;

            let current = UnverifiedClaims::decode(base_token).and_then(|c| c.sub);
            if target_account.is_empty() || current.as_deref() != Some(target_account.as_str()) {
                return Err(RelayError::AccountLinking(
                    "Link target does not match the signed-in account".to_string(),
                ));
            }

            linker.link(realm, base_token, required.access_token).await?;
            let to = origin.ui_link(&state.config.server.ui_prefix, realm, "identity")?;
            redirect(to.as_str(), &[clear_state])
        }
        StatePayload::ResourceAuth {
            destination,
            next_authorize_url,
            ..
        } => {
            let mut cookies = state.packager.package_token_set(
                required.access_token,
                required.id_token,
                required.refresh_token,
                host,
                ServiceAudience::Dam,
            )?;
            cookies.push(clear_state);
            let to = match next_authorize_url {
                Some(next) => Url::parse(next).map_err(|e| {
                    RelayError::InvalidRequest(format!("invalid next authorize URL: {e}"))
                })?,
                None => resolve_destination(state, origin, realm, destination.as_deref())?,
            };
            redirect(to.as_str(), &cookies)
        }
        StatePayload::CliLogin { .. } => Err(RelayError::UnsupportedOperation(
            "command-line login is not served by this relay".to_string(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Logout and refresh
// ---------------------------------------------------------------------------

/// `GET {api}/realm/:realm/identity/logout`
///
/// Revokes the refresh token if one is held, then clears every token
/// cookie. A failed revoke is logged and never fails the logout.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    headers: HeaderMap,
) -> Response {
    let origin = ExternalOrigin::from_headers(&headers);
    let service = state.config.idp.service;

    if let TokenLookup::Valid(refresh) = state
        .packager
        .lookup(&headers, service.cookie_name(TokenKind::Refresh))
    {
        if let Ok(token) = refresh.clear_text() {
            if let Err(e) = state.oauth.revoke_refresh_token(&realm, token).await {
                tracing::warn!("Failed to revoke refresh token in realm {}: {}", realm, e);
            }
        }
    }

    let host = origin.cookie_domain();
    let cookies: Vec<Cookie<'static>> = [
        TokenKind::Access,
        TokenKind::Identity,
        TokenKind::Refresh,
        TokenKind::State,
    ]
    .into_iter()
    .map(|kind| state.packager.clear_token(host, service.cookie_name(kind)))
    .collect();

    with_cookies(StatusCode::NO_CONTENT, &cookies)
}

/// `GET {api}/realm/:realm/identity/refresh`
///
/// Answers `200` without touching cookies while the access token has more
/// than [`REFRESH_WINDOW_SECS`] left, otherwise refreshes and answers `204`
/// with new cookies.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    headers: HeaderMap,
) -> HandlerResult {
    let origin = ExternalOrigin::from_headers(&headers);
    refresh_tokens(&state, &origin, &headers, &realm)
        .await
        .map_err(fail(&origin))
}

async fn refresh_tokens(
    state: &AppState,
    origin: &ExternalOrigin,
    headers: &HeaderMap,
    realm: &str,
) -> Result<Response> {
    let service = state.config.idp.service;
    let refresh = state
        .packager
        .extract_required_token(headers, service.cookie_name(TokenKind::Refresh))?;

    let claims = match state
        .packager
        .lookup(headers, service.cookie_name(TokenKind::Access))
    {
        TokenLookup::Valid(access) => access.clear_text().ok().and_then(UnverifiedClaims::decode),
        TokenLookup::Undecryptable(_) | TokenLookup::Absent => None,
    };

    let now = chrono::Utc::now().timestamp();
    if let Some(remaining) = claims.as_ref().and_then(|c| c.seconds_remaining(now)) {
        if remaining > REFRESH_WINDOW_SECS {
            tracing::debug!("Access token valid for {}s, skipping refresh", remaining);
            return Ok(StatusCode::OK.into_response());
        }
    }

    let scope = claims.as_ref().and_then(UnverifiedClaims::scope_param);
    let tokens = state
        .oauth
        .refresh_access_token(realm, refresh.clear_text()?, scope.as_deref())
        .await?;
    let required = tokens.require_tokens()?;
    let cookies = state.packager.package_token_set(
        required.access_token,
        required.id_token,
        required.refresh_token,
        origin.cookie_domain(),
        service,
    )?;

    Ok(with_cookies(StatusCode::NO_CONTENT, &cookies))
}

// ---------------------------------------------------------------------------
// User info and account
// ---------------------------------------------------------------------------

/// `GET {api}/realm/:realm/identity/userinfo`
pub async fn user_info(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    headers: HeaderMap,
) -> HandlerResult {
    let origin = ExternalOrigin::from_headers(&headers);
    let access = state
        .packager
        .extract_required_token(&headers, state.config.idp.service.cookie_name(TokenKind::Access))
        .map_err(fail(&origin))?;
    let token = access.clear_text().map_err(fail(&origin))?;

    let info = state
        .oauth
        .get_user_info(&realm, token)
        .await
        .map_err(fail(&origin))?;
    Ok(Json(info).into_response())
}

/// `GET {api}/realm/:realm/identity/account`
///
/// Proxies the SCIM `Me` resource, refreshing once if the bearer is rejected.
pub async fn account(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    headers: HeaderMap,
) -> HandlerResult {
    let origin = ExternalOrigin::from_headers(&headers);
    fetch_account(&state, &origin, &headers, &realm)
        .await
        .map_err(fail(&origin))
}

async fn fetch_account(
    state: &AppState,
    origin: &ExternalOrigin,
    headers: &HeaderMap,
    realm: &str,
) -> Result<Response> {
    let scim = state.scim.as_ref().ok_or_else(|| {
        RelayError::UnsupportedOperation("account lookup is not configured".to_string())
    })?;

    let service = state.config.idp.service;
    let access_name = service.cookie_name(TokenKind::Access);
    let bearer = bearer_from_cookie(&state.packager, headers, access_name).ok_or_else(|| {
        RelayError::AuthCookieAbsent {
            cookie: access_name.to_string(),
        }
    })?;
    let context =
        RefreshContext::from_cookies(&state.packager, headers, realm, service, origin.cookie_domain());

    let account = scim.fetch_account(&bearer, &context).await?;

    let mut response_headers = HeaderMap::new();
    for cookie in account.set_cookies {
        response_headers.append(SET_COOKIE, cookie);
    }
    Ok((account.status, response_headers, Json(account.body)).into_response())
}
