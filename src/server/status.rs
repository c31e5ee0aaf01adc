//! Authentication status reporting
//!
//! Every response carries `X-Relay-Authenticated`, derived from the access
//! cookie the request arrived with. A cookie that no longer decrypts, or
//! whose token has expired, is cleared on the way out so the browser stops
//! sending it.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

use crate::security::cookies::{
    append_set_cookie, expired_cookie, CookieName, CookiePackager, TokenKind, TokenLookup,
};
use crate::security::jwt::UnverifiedClaims;
use crate::server::links::ExternalOrigin;
use crate::server::AppState;

/// Response header reporting whether the request was authenticated.
pub const AUTHENTICATED_HEADER: &str = "x-relay-authenticated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessStatus {
    Missing,
    Stale,
    Current,
}

fn access_status(packager: &CookiePackager, headers: &HeaderMap, name: CookieName) -> AccessStatus {
    match packager.lookup(headers, name) {
        TokenLookup::Absent => AccessStatus::Missing,
        TokenLookup::Undecryptable(_) => AccessStatus::Stale,
        TokenLookup::Valid(value) => {
            let now = chrono::Utc::now().timestamp();
            match value.clear_text().ok().and_then(UnverifiedClaims::decode) {
                Some(claims) if !claims.is_expired(now) => AccessStatus::Current,
                _ => AccessStatus::Stale,
            }
        }
    }
}

/// Whether the response already sets a cookie called `name`.
fn sets_cookie(headers: &HeaderMap, name: CookieName) -> bool {
    let prefix = format!("{name}=");
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.starts_with(&prefix))
}

/// Middleware adding [`AUTHENTICATED_HEADER`] and clearing stale access
/// cookies.
pub async fn token_status(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let name = state.config.idp.service.cookie_name(TokenKind::Access);
    let status = access_status(&state.packager, request.headers(), name);
    let origin = ExternalOrigin::from_headers(request.headers());

    let mut response = next.run(request).await;

    let authenticated = if status == AccessStatus::Current {
        "true"
    } else {
        "false"
    };
    response
        .headers_mut()
        .insert(AUTHENTICATED_HEADER, HeaderValue::from_static(authenticated));

    if status == AccessStatus::Stale && !sets_cookie(response.headers(), name) {
        tracing::debug!("Clearing stale {} cookie", name);
        append_set_cookie(response.headers_mut(), &expired_cookie(origin.cookie_domain(), name));
    }
    response
}
