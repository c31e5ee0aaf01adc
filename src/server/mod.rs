//! HTTP surface of the relay
//!
//! Wires configuration into shared state and exposes the identity endpoints
//! through an axum [`Router`].

pub mod error;
pub mod handlers;
pub mod links;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::client::interceptor::RefreshingClient;
use crate::client::linking::{AccountLinker, ScimClient};
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::oauth::OAuthClient;
use crate::security::cipher::TokenCipher;
use crate::security::cookies::CookiePackager;
use crate::security::state::StateTokenHandler;

pub use error::ApiError;
pub use links::ExternalOrigin;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub packager: CookiePackager,
    pub states: StateTokenHandler,
    pub oauth: Arc<OAuthClient>,
    pub linker: Option<Arc<dyn AccountLinker>>,
    pub scim: Option<ScimClient>,
}

impl AppState {
    /// Builds shared state from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if key material is unusable, the SCIM base URL does
    /// not parse, or the HTTP client cannot be built.
    pub fn from_config(config: Config) -> Result<Self> {
        let cipher = TokenCipher::new(
            &config.cookies.encryptor_password,
            &config.cookies.encryptor_salt,
        )?;
        let packager = CookiePackager::new(cipher, config.cookies.secure);
        let states = StateTokenHandler::new(
            config.state.audience.clone(),
            config.state.ttl(),
            &config.state.signing_key_bytes()?,
        )?;

        // Authorize probes must see the provider's own status, not the page
        // it redirects to.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http.timeout_seconds))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let oauth = Arc::new(OAuthClient::new(
            http.clone(),
            config.idp.credentials(),
            config.idp.primary_endpoints(),
            config.idp.legacy_endpoints(),
        ));

        let scim = match config.linking.scim_base_url.as_deref() {
            Some(base) => {
                let base = Url::parse(base)
                    .map_err(|e| RelayError::Config(format!("invalid linking.scim_base_url: {e}")))?;
                let refreshing = RefreshingClient::new(http, oauth.clone(), packager.clone());
                Some(ScimClient::new(base, refreshing))
            }
            None => None,
        };
        let linker = scim
            .clone()
            .map(|client| Arc::new(client) as Arc<dyn AccountLinker>);

        Ok(Self {
            config: Arc::new(config),
            packager,
            states,
            oauth,
            linker,
            scim,
        })
    }

    /// Replaces the account linker.
    pub fn with_linker(mut self, linker: Arc<dyn AccountLinker>) -> Self {
        self.linker = Some(linker);
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("packager", &self.packager)
            .field("linker", &self.linker.is_some())
            .field("scim", &self.scim)
            .finish_non_exhaustive()
    }
}

/// Builds the router for `state`.
///
/// Routes live under `server.api_prefix`; the status middleware wraps all of
/// them.
pub fn router(state: AppState) -> Router {
    let api = state.config.server.api_prefix.clone();
    let shared = Arc::new(state);

    Router::new()
        .route(
            &format!("{api}/realm/:realm/identity/login"),
            get(handlers::login),
        )
        .route(
            &format!("{api}/realm/:realm/identity/link"),
            get(handlers::link),
        )
        .route(
            &format!("{api}/realm/:realm/resources/authorize"),
            get(handlers::authorize_resources),
        )
        .route(&format!("{api}/identity/loggedIn"), get(handlers::logged_in))
        .route(
            &format!("{api}/realm/:realm/identity/logout"),
            get(handlers::logout),
        )
        .route(
            &format!("{api}/realm/:realm/identity/refresh"),
            get(handlers::refresh),
        )
        .route(
            &format!("{api}/realm/:realm/identity/userinfo"),
            get(handlers::user_info),
        )
        .route(
            &format!("{api}/realm/:realm/identity/account"),
            get(handlers::account),
        )
        .layer(middleware::from_fn_with_state(
            shared.clone(),
            status::token_status,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Binds `config.server.bind` and serves until the process is stopped.
///
/// # Errors
///
/// Returns an error if state cannot be built or the address cannot be bound.
pub async fn serve(config: Config) -> Result<()> {
    let bind = config.server.bind.clone();
    let app = router(AppState::from_config(config)?);

    let listener = TcpListener::bind(&bind).await?;
    tracing::info!("tokenrelay listening on {}", bind);
    axum::serve(listener, app).await?;
    Ok(())
}
