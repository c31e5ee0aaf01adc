//! End-to-end router tests: login, callback, logout, refresh and the
//! authentication status header, driven through `tower::ServiceExt::oneshot`
//! against a wiremock identity provider.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use tokenrelay::client::AccountLinker;
use tokenrelay::security::{ServiceAudience, TokenKind};
use tokenrelay::{AppState, Config};
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API: &str = "/api/v1alpha";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn app(config: Config) -> Router {
    tokenrelay::router(AppState::from_config(config).expect("state"))
}

/// Linker that only counts calls.
#[derive(Default)]
struct CountingLinker {
    calls: AtomicUsize,
}

#[async_trait]
impl AccountLinker for CountingLinker {
    async fn link(&self, _realm: &str, _base_token: &str, _link_token: &str) -> tokenrelay::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn get(uri: &str, cookies: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().uri(uri).header("host", common::HOST);
    if !cookies.is_empty() {
        let header = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        builder = builder.header("cookie", header);
    }
    builder.body(Body::empty()).unwrap()
}

fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn cookie_value<'a>(set_cookies: &'a [String], name: &str) -> Option<&'a str> {
    let prefix = format!("{name}=");
    set_cookies
        .iter()
        .find(|c| c.starts_with(&prefix))
        .map(|c| c[prefix.len()..].split(';').next().unwrap_or_default())
}

fn location(response: &Response<Body>) -> Url {
    Url::parse(response.headers().get("location").unwrap().to_str().unwrap()).unwrap()
}

fn query(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn mount_authorize_probe(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/oauth2/auth"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Runs the login leg and returns the issued state.
async fn start_login(app: &Router, query_string: &str) -> String {
    let response = app
        .clone()
        .oneshot(get(
            &format!("{API}/realm/acme/identity/login{query_string}"),
            &[],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    query(&location(&response), "state").expect("state parameter")
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_login_redirects_to_primary_and_sets_state_cookie() {
    let server = MockServer::start().await;
    mount_authorize_probe(&server, 302).await;
    let app = app(common::relay_config(&server.uri()));

    let response = app
        .oneshot(get(
            &format!("{API}/realm/acme/identity/login?loginHint=alice&scope=openid"),
            &[],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let to = location(&response);
    assert_eq!(to.path(), "/oauth2/auth");
    assert_eq!(query(&to, "realm").as_deref(), Some("acme"));
    assert_eq!(query(&to, "login_hint").as_deref(), Some("alice"));
    assert_eq!(query(&to, "scope").as_deref(), Some("openid"));
    assert_eq!(query(&to, "client_id").as_deref(), Some("relay-client"));
    assert_eq!(
        query(&to, "redirect_uri").as_deref(),
        Some("http://relay.example.com/api/v1alpha/identity/loggedIn")
    );

    let cookies = set_cookies(&response);
    let state = query(&to, "state").unwrap();
    assert_eq!(cookie_value(&cookies, "ic_oauth_state"), Some(state.as_str()));
    assert!(cookies[0].contains("Domain=relay.example.com"));
    assert!(cookies[0].contains("HttpOnly"));
}

#[tokio::test]
async fn test_login_switches_to_legacy_when_primary_rejects_realm() {
    let server = MockServer::start().await;
    mount_authorize_probe(&server, 404).await;
    let app = app(common::relay_config(&server.uri()));

    let response = app
        .oneshot(get(&format!("{API}/realm/acme/identity/login"), &[]))
        .await
        .unwrap();

    let to = location(&response);
    assert_eq!(to.path(), "/identity/v1alpha/acme/authorize");
    assert_eq!(query(&to, "realm"), None);
}

#[tokio::test]
async fn test_login_rejects_foreign_redirect() {
    let server = MockServer::start().await;
    mount_authorize_probe(&server, 302).await;
    let app = app(common::relay_config(&server.uri()));

    let response = app
        .oneshot(get(
            &format!("{API}/realm/acme/identity/login?redirectUri=https%3A%2F%2Fevil.example.org%2F"),
            &[],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_callback_sets_token_cookies_and_redirects() {
    let server = MockServer::start().await;
    mount_authorize_probe(&server, 302).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("code=the-code"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::token_body("at", "it", Some("rt"))),
        )
        .expect(1)
        .mount(&server)
        .await;
    let config = common::relay_config(&server.uri());
    let packager = common::packager(&config);
    let app = app(config);

    let state = start_login(&app, "?redirectUri=data%3Fq%3D1").await;
    let response = app
        .oneshot(get(
            &format!("{API}/identity/loggedIn?code=the-code&state={state}"),
            &[("ic_oauth_state", state.as_str())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response).as_str(),
        "http://relay.example.com/acme/data?q=1"
    );

    let cookies = set_cookies(&response);
    assert_eq!(cookie_value(&cookies, "ic_oauth_state"), Some("expired"));
    let sealed = cookie_value(&cookies, "ic_access").expect("access cookie");
    assert_ne!(sealed, "at", "tokens must not be stored in clear text");
    assert!(cookie_value(&cookies, "ic_identity").is_some());
    assert!(cookie_value(&cookies, "ic_refresh").is_some());

    // The cookie written by the relay decrypts back to the issued token.
    let headers = {
        let mut h = axum::http::HeaderMap::new();
        h.insert("cookie", format!("ic_access={sealed}").parse().unwrap());
        h
    };
    let value = packager
        .extract_token(&headers, ServiceAudience::Ic.cookie_name(TokenKind::Access))
        .unwrap();
    assert_eq!(value.clear_text().unwrap(), "at");
}

#[tokio::test]
async fn test_callback_state_mismatch_is_400_and_clears_state() {
    let server = MockServer::start().await;
    Mock::given(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let app = app(common::relay_config(&server.uri()));

    let response = app
        .oneshot(get(
            &format!("{API}/identity/loggedIn?code=c&state=one"),
            &[("ic_oauth_state", "two")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let cookies = set_cookies(&response);
    assert_eq!(cookie_value(&cookies, "ic_oauth_state"), Some("expired"));
    assert!(cookies.iter().any(|c| c.contains("Domain=relay.example.com")));

    let body = body_json(response).await;
    assert_eq!(body["statusCode"], 400);
    assert_eq!(body["message"], "Invalid OAuth state: CSRF state cookie mismatch");
}

#[tokio::test]
async fn test_callback_without_state_cookie() {
    let server = MockServer::start().await;
    let app = app(common::relay_config(&server.uri()));

    let response = app
        .oneshot(get(&format!("{API}/identity/loggedIn?code=c&state=one"), &[]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(
        body["message"],
        "Invalid OAuth state: Missing 'ic_oauth_state' cookie"
    );
}

#[tokio::test]
async fn test_callback_token_failure_is_401() {
    let server = MockServer::start().await;
    mount_authorize_probe(&server, 302).await;
    Mock::given(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad code"))
        .mount(&server)
        .await;
    Mock::given(path("/identity/v1alpha/acme/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("legacy bad code"))
        .mount(&server)
        .await;
    let app = app(common::relay_config(&server.uri()));

    let state = start_login(&app, "").await;
    let response = app
        .oneshot(get(
            &format!("{API}/identity/loggedIn?code=c&state={state}"),
            &[("ic_oauth_state", state.as_str())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Token exchange failed: legacy bad code");
}

// ---------------------------------------------------------------------------
// Logout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_logout_clears_cookies_even_when_revoke_fails() {
    let server = MockServer::start().await;
    Mock::given(path("/oauth2/revoke"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/identity/v1alpha/acme/revoke"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    let config = common::relay_config(&server.uri());
    let packager = common::packager(&config);
    let refresh = packager
        .package_token("rt", None, ServiceAudience::Ic.cookie_name(TokenKind::Refresh))
        .unwrap();
    let app = app(config);

    let response = app
        .oneshot(get(
            &format!("{API}/realm/acme/identity/logout"),
            &[("ic_refresh", refresh.value())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cookies = set_cookies(&response);
    for name in ["ic_access", "ic_identity", "ic_refresh", "ic_oauth_state"] {
        assert_eq!(cookie_value(&cookies, name), Some("expired"), "{name} not cleared");
    }
}

#[tokio::test]
async fn test_logout_without_cookies_skips_revoke() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let app = app(common::relay_config(&server.uri()));

    let response = app
        .oneshot(get(&format!("{API}/realm/acme/identity/logout"), &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(set_cookies(&response).len(), 4);
}

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_refresh_skipped_while_token_is_fresh() {
    let server = MockServer::start().await;
    Mock::given(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let config = common::relay_config(&server.uri());
    let packager = common::packager(&config);
    let access = common::unsigned_token(serde_json::json!({"sub": "alice", "exp": common::now() + 3600}));
    let access = packager
        .package_token(&access, None, ServiceAudience::Ic.cookie_name(TokenKind::Access))
        .unwrap();
    let refresh = packager
        .package_token("rt", None, ServiceAudience::Ic.cookie_name(TokenKind::Refresh))
        .unwrap();
    let app = app(config);

    let response = app
        .oneshot(get(
            &format!("{API}/realm/acme/identity/refresh"),
            &[("ic_access", access.value()), ("ic_refresh", refresh.value())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(response.headers()["x-relay-authenticated"], "true");
}

#[tokio::test]
async fn test_refresh_near_expiry_keeps_scopes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("scope=openid+identities"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::token_body("at2", "it2", Some("rt2"))),
        )
        .expect(1)
        .mount(&server)
        .await;
    let config = common::relay_config(&server.uri());
    let packager = common::packager(&config);
    let access = common::unsigned_token(serde_json::json!({
        "sub": "alice",
        "exp": common::now() + 60,
        "scp": ["openid", "identities"]
    }));
    let access = packager
        .package_token(&access, None, ServiceAudience::Ic.cookie_name(TokenKind::Access))
        .unwrap();
    let refresh = packager
        .package_token("rt", None, ServiceAudience::Ic.cookie_name(TokenKind::Refresh))
        .unwrap();
    let app = app(config);

    let response = app
        .oneshot(get(
            &format!("{API}/realm/acme/identity/refresh"),
            &[("ic_access", access.value()), ("ic_refresh", refresh.value())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cookies = set_cookies(&response);
    for name in ["ic_access", "ic_identity", "ic_refresh"] {
        assert!(cookie_value(&cookies, name).is_some(), "{name} not set");
    }
}

#[tokio::test]
async fn test_refresh_without_refresh_cookie_is_401() {
    let server = MockServer::start().await;
    let app = app(common::relay_config(&server.uri()));

    let response = app
        .oneshot(get(
            &format!("{API}/realm/acme/identity/refresh"),
            &[("ic_access", "garbage")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-relay-authenticated"], "false");
    let cookies = set_cookies(&response);
    assert_eq!(
        cookie_value(&cookies, "ic_access"),
        Some("expired"),
        "undecryptable access cookie should be cleared"
    );

    let body = body_json(response).await;
    assert_eq!(
        body["message"],
        "Authorization cookie not present in request: ic_refresh"
    );
}

// ---------------------------------------------------------------------------
// User info and account
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_account_unsupported_without_scim() {
    let server = MockServer::start().await;
    let app = app(common::relay_config(&server.uri()));

    let response = app
        .oneshot(get(&format!("{API}/realm/acme/identity/account"), &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_account_refreshes_on_401() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scim/v2/acme/Me"))
        .and(wiremock::matchers::header("authorization", "Bearer at2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"userName": "alice"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/scim/v2/acme/Me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::token_body("at2", "it2", None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut config = common::relay_config(&server.uri());
    config.linking.scim_base_url = Some(server.uri());
    let packager = common::packager(&config);
    let access = packager
        .package_token("at1", None, ServiceAudience::Ic.cookie_name(TokenKind::Access))
        .unwrap();
    let refresh = packager
        .package_token("rt", None, ServiceAudience::Ic.cookie_name(TokenKind::Refresh))
        .unwrap();
    let app = app(config);

    let response = app
        .oneshot(get(
            &format!("{API}/realm/acme/identity/account"),
            &[("ic_access", access.value()), ("ic_refresh", refresh.value())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert!(cookie_value(&cookies, "ic_access").is_some());
    let body = body_json(response).await;
    assert_eq!(body["userName"], "alice");
}

#[tokio::test]
async fn test_user_info_requires_access_cookie() {
    let server = MockServer::start().await;
    let app = app(common::relay_config(&server.uri()));

    let response = app
        .oneshot(get(&format!("{API}/realm/acme/identity/userinfo"), &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-relay-authenticated"], "false");
}

// ---------------------------------------------------------------------------
// Account linking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_link_flow_links_into_current_account() {
    let server = MockServer::start().await;
    mount_authorize_probe(&server, 302).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::token_body("second-at", "second-it", None)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/scim/v2/acme/Me"))
        .and(wiremock::matchers::header("x-link-authorization", "Bearer second-at"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = common::relay_config(&server.uri());
    config.linking.scim_base_url = Some(server.uri());
    let packager = common::packager(&config);
    let current = common::unsigned_token(serde_json::json!({"sub": "alice", "exp": common::now() + 3600}));
    let access = packager
        .package_token(&current, None, ServiceAudience::Ic.cookie_name(TokenKind::Access))
        .unwrap();
    let app = app(config);

    let response = app
        .clone()
        .oneshot(get(
            &format!("{API}/realm/acme/identity/link"),
            &[("ic_access", access.value())],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let state = query(&location(&response), "state").unwrap();

    let response = app
        .oneshot(get(
            &format!("{API}/identity/loggedIn?code=c&state={state}"),
            &[("ic_oauth_state", state.as_str()), ("ic_access", access.value())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response).as_str(),
        "http://relay.example.com/acme/identity"
    );
    let cookies = set_cookies(&response);
    assert_eq!(cookie_value(&cookies, "ic_oauth_state"), Some("expired"));
    assert_eq!(cookie_value(&cookies, "ic_access"), None, "link keeps the current session");
}

#[tokio::test]
async fn test_link_requires_access_cookie() {
    let server = MockServer::start().await;
    let mut config = common::relay_config(&server.uri());
    config.linking.scim_base_url = Some(server.uri());
    let app = app(config);

    let response = app
        .oneshot(get(&format!("{API}/realm/acme/identity/link"), &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_link_refused_when_signed_in_account_changed() {
    let server = MockServer::start().await;
    mount_authorize_probe(&server, 302).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::token_body("second-at", "second-it", None)),
        )
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/scim/v2/acme/Me"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = common::relay_config(&server.uri());
    config.linking.scim_base_url = Some(server.uri());
    let packager = common::packager(&config);
    let access_for = |sub: &str| {
        let token = common::unsigned_token(serde_json::json!({"sub": sub, "exp": common::now() + 3600}));
        packager
            .package_token(&token, None, ServiceAudience::Ic.cookie_name(TokenKind::Access))
            .unwrap()
            .value()
            .to_string()
    };
    let alice = access_for("alice");
    let bob = access_for("bob");
    let app = app(config);

    let response = app
        .clone()
        .oneshot(get(
            &format!("{API}/realm/acme/identity/link"),
            &[("ic_access", alice.as_str())],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let state = query(&location(&response), "state").unwrap();

    let response = app
        .oneshot(get(
            &format!("{API}/identity/loggedIn?code=c&state={state}"),
            &[("ic_oauth_state", state.as_str()), ("ic_access", bob.as_str())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(
        body["message"],
        "Account linking failed: Link target does not match the signed-in account"
    );
}

#[tokio::test]
async fn test_link_refused_for_token_without_subject() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = common::relay_config(&server.uri());
    let packager = common::packager(&config);
    let linker = Arc::new(CountingLinker::default());
    let state = AppState::from_config(config)
        .unwrap()
        .with_linker(linker.clone());
    let app = tokenrelay::router(state);

    for token in [
        "opaque-token".to_string(),
        common::unsigned_token(serde_json::json!({"exp": common::now() + 3600})),
    ] {
        let access = packager
            .package_token(&token, None, ServiceAudience::Ic.cookie_name(TokenKind::Access))
            .unwrap();
        let response = app
            .clone()
            .oneshot(get(
                &format!("{API}/realm/acme/identity/link"),
                &[("ic_access", access.value())],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get("location").is_none());
        let body = body_json(response).await;
        assert_eq!(
            body["message"],
            "Account linking failed: signed-in token has no subject"
        );
    }
    assert_eq!(linker.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_link_flow_uses_injected_linker() {
    let server = MockServer::start().await;
    mount_authorize_probe(&server, 302).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::token_body("second-at", "second-it", None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = common::relay_config(&server.uri());
    let packager = common::packager(&config);
    let current = common::unsigned_token(serde_json::json!({"sub": "alice", "exp": common::now() + 3600}));
    let access = packager
        .package_token(&current, None, ServiceAudience::Ic.cookie_name(TokenKind::Access))
        .unwrap();
    let linker = Arc::new(CountingLinker::default());
    let app = tokenrelay::router(
        AppState::from_config(config)
            .unwrap()
            .with_linker(linker.clone()),
    );

    let response = app
        .clone()
        .oneshot(get(
            &format!("{API}/realm/acme/identity/link"),
            &[("ic_access", access.value())],
        ))
        .await
        .unwrap();
    let state = query(&location(&response), "state").unwrap();

    let response = app
        .oneshot(get(
            &format!("{API}/identity/loggedIn?code=c&state={state}"),
            &[("ic_oauth_state", state.as_str()), ("ic_access", access.value())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(linker.calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Resource authorization
// ---------------------------------------------------------------------------

const DATASET_1: &str = "https://dam.example.com/dataset/1";
const DATASET_2: &str = "https://dam.example.com/dataset/2";

#[tokio::test]
async fn test_resource_authorization_round_trip() {
    let server = MockServer::start().await;
    mount_authorize_probe(&server, 302).await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("code=resource-code"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::token_body("dam-at", "dam-it", None)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let app = app(common::relay_config(&server.uri()));

    let query_string = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("resource", DATASET_1)
        .append_pair("resource", DATASET_2)
        .append_pair("redirectUri", "datasets")
        .finish();
    let response = app
        .clone()
        .oneshot(get(
            &format!("{API}/realm/acme/resources/authorize?{query_string}"),
            &[],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let to = location(&response);
    assert_eq!(to.path(), "/oauth2/auth");
    let resources: Vec<String> = to
        .query_pairs()
        .filter(|(k, _)| k == "resource")
        .map(|(_, v)| v.into_owned())
        .collect();
    assert_eq!(resources, vec![DATASET_1, DATASET_2]);
    let state = query(&to, "state").expect("state parameter");
    let cookies = set_cookies(&response);
    assert_eq!(cookie_value(&cookies, "ic_oauth_state"), Some(state.as_str()));

    let response = app
        .oneshot(get(
            &format!("{API}/identity/loggedIn?code=resource-code&state={state}"),
            &[("ic_oauth_state", state.as_str())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response).as_str(),
        "http://relay.example.com/acme/datasets"
    );
    let cookies = set_cookies(&response);
    assert!(cookie_value(&cookies, "dam_access").is_some());
    assert!(cookie_value(&cookies, "dam_identity").is_some());
    assert_eq!(cookie_value(&cookies, "ic_access"), None);
    assert_eq!(cookie_value(&cookies, "ic_oauth_state"), Some("expired"));
}

#[tokio::test]
async fn test_resource_authorization_requires_resource() {
    let server = MockServer::start().await;
    let app = app(common::relay_config(&server.uri()));

    let response = app
        .oneshot(get(
            &format!("{API}/realm/acme/resources/authorize?redirectUri=datasets"),
            &[],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_resource_callback_chains_to_next_authorize_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(common::token_body("dam-at", "dam-it", None)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let config = common::relay_config(&server.uri());
    let next = "https://idp.example.com/oauth2/auth?realm=other&state=next";
    let state = common::state_handler(&config)
        .generate_resource_state(None, "acme", &[DATASET_1.to_string()], Some(next))
        .unwrap();
    let app = app(config);

    let response = app
        .oneshot(get(
            &format!("{API}/identity/loggedIn?code=c&state={state}"),
            &[("ic_oauth_state", state.as_str())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response).as_str(), next);
    let cookies = set_cookies(&response);
    assert!(cookie_value(&cookies, "dam_access").is_some());
    assert_eq!(cookie_value(&cookies, "ic_oauth_state"), Some("expired"));
}

#[tokio::test]
async fn test_cli_login_state_is_not_served_by_browser_callback() {
    let server = MockServer::start().await;
    Mock::given(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::token_body("at", "it", None)))
        .expect(0)
        .mount(&server)
        .await;
    let config = common::relay_config(&server.uri());
    let state = common::state_handler(&config)
        .generate_cli_login_state("session-1", "acme")
        .unwrap();
    let app = app(config);

    let response = app
        .oneshot(get(
            &format!("{API}/identity/loggedIn?code=c&state={state}"),
            &[("ic_oauth_state", state.as_str())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
}
