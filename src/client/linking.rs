//! Account linking and account lookup against the SCIM `Me` resource

use async_trait::async_trait;
use http::StatusCode;
use url::Url;

use crate::client::interceptor::{RefreshContext, RefreshingClient};
use crate::error::{RelayError, Result};
use crate::oauth::endpoints::validate_realm;

/// Header carrying the token of the identity being linked in.
pub const LINK_AUTHORIZATION_HEADER: &str = "X-Link-Authorization";

/// Merges a freshly authenticated identity into an existing account.
#[async_trait]
pub trait AccountLinker: Send + Sync {
    /// Links the identity behind `link_token` into the account behind
    /// `base_token`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::AccountLinking`] with the downstream message on
    /// failure.
    async fn link(&self, realm: &str, base_token: &str, link_token: &str) -> Result<()>;
}

/// Downstream account response passed back to the browser verbatim.
#[derive(Debug)]
pub struct AccountResponse {
    pub status: StatusCode,
    pub set_cookies: Vec<http::HeaderValue>,
    pub body: serde_json::Value,
}

/// Client for the identity concentrator's SCIM `Me` resource.
#[derive(Debug, Clone)]
pub struct ScimClient {
    base_url: Url,
    client: RefreshingClient,
}

impl ScimClient {
    pub fn new(base_url: Url, client: RefreshingClient) -> Self {
        Self { base_url, client }
    }

    fn me_url(&self, realm: &str) -> Result<Url> {
        validate_realm(realm)?;
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/scim/v2/{realm}/Me"))
            .map_err(|e| RelayError::Config(format!("invalid SCIM base URL: {e}")))
    }

    /// Reads the caller's account, refreshing the bearer once on `401`.
    ///
    /// Any `Set-Cookie` headers produced by a refresh are returned for the
    /// caller to forward.
    pub async fn fetch_account(
        &self,
        bearer: &str,
        context: &RefreshContext,
    ) -> Result<AccountResponse> {
        let request = self
            .client
            .http()
            .get(self.me_url(&context.realm)?)
            .bearer_auth(bearer)
            .header(http::header::ACCEPT, "application/json")
            .build()?;

        let resp = self.client.execute(request, context).await?;
        let status = resp.status();
        let set_cookies = resp
            .headers()
            .get_all(http::header::SET_COOKIE)
            .iter()
            .cloned()
            .collect();
        let text = resp.text().await?;
        let body = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str::<serde_json::Value>(&text).unwrap_or(serde_json::Value::String(text))
        };

        Ok(AccountResponse {
            status,
            set_cookies,
            body,
        })
    }
}

#[async_trait]
impl AccountLinker for ScimClient {
    async fn link(&self, realm: &str, base_token: &str, link_token: &str) -> Result<()> {
        let resp = self
            .client
            .http()
            .patch(self.me_url(realm)?)
            .bearer_auth(base_token)
            .header(LINK_AUTHORIZATION_HEADER, format!("Bearer {link_token}"))
            .header(http::header::CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await
            .map_err(|e| RelayError::AccountLinking(format!("Link failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("Linked account in realm {}", realm);
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(RelayError::AccountLinking(format!("Link failed: {body}")))
        }
    }
}
