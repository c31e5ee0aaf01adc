//! Endpoint sets for the two identity provider variants
//!
//! Every realm is served by a primary and a legacy provider variant. Both are
//! described by an [`EndpointSet`]; URLs may contain a `{realm}` placeholder
//! that is expanded per request.

use url::Url;

use crate::error::{RelayError, Result};

/// Placeholder substituted with the realm name.
pub const REALM_PLACEHOLDER: &str = "{realm}";

/// Which wire format an endpoint set speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointVariant {
    /// Form-encoded bodies with HTTP Basic client authentication
    Primary,
    /// Client credentials and grant parameters in the query string
    Legacy,
}

impl std::fmt::Display for EndpointVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointVariant::Primary => f.write_str("primary"),
            EndpointVariant::Legacy => f.write_str("legacy"),
        }
    }
}

/// URL templates for one provider variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSet {
    variant: EndpointVariant,
    authorize: String,
    token: String,
    revoke: String,
    user_info: Option<String>,
}

impl EndpointSet {
    /// Endpoint set for the primary variant from explicit templates.
    pub fn primary(
        authorize: impl Into<String>,
        token: impl Into<String>,
        revoke: impl Into<String>,
        user_info: Option<String>,
    ) -> Self {
        Self {
            variant: EndpointVariant::Primary,
            authorize: authorize.into(),
            token: token.into(),
            revoke: revoke.into(),
            user_info,
        }
    }

    /// Endpoint set for the legacy variant, rooted at `base_url`.
    ///
    /// The legacy provider serves `/identity/v1alpha/{realm}/{authorize,token,revoke}`
    /// and, when `user_info` is set, a realm-independent `/oidc/userinfo`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tokenrelay::oauth::endpoints::EndpointSet;
    ///
    /// let legacy = EndpointSet::legacy("https://idp.example.com/", true);
    /// assert_eq!(
    ///     legacy.token_url("acme").unwrap().as_str(),
    ///     "https://idp.example.com/identity/v1alpha/acme/token"
    /// );
    /// ```
    pub fn legacy(base_url: &str, user_info: bool) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            variant: EndpointVariant::Legacy,
            authorize: format!("{base}/identity/v1alpha/{REALM_PLACEHOLDER}/authorize"),
            token: format!("{base}/identity/v1alpha/{REALM_PLACEHOLDER}/token"),
            revoke: format!("{base}/identity/v1alpha/{REALM_PLACEHOLDER}/revoke"),
            user_info: user_info.then(|| format!("{base}/oidc/userinfo")),
        }
    }

    pub fn variant(&self) -> EndpointVariant {
        self.variant
    }

    pub fn authorize_url(&self, realm: &str) -> Result<Url> {
        expand(&self.authorize, realm)
    }

    pub fn token_url(&self, realm: &str) -> Result<Url> {
        expand(&self.token, realm)
    }

    pub fn revoke_url(&self, realm: &str) -> Result<Url> {
        expand(&self.revoke, realm)
    }

    /// `None` when this variant exposes no user-info endpoint.
    pub fn user_info_url(&self, realm: &str) -> Option<Result<Url>> {
        self.user_info.as_deref().map(|t| expand(t, realm))
    }

    /// Checks that every template expands to a valid URL.
    pub fn validate(&self) -> Result<()> {
        let probe = "realm";
        self.authorize_url(probe)?;
        self.token_url(probe)?;
        self.revoke_url(probe)?;
        if let Some(user_info) = self.user_info_url(probe) {
            user_info?;
        }
        Ok(())
    }
}

/// Realm names end up in URL paths, so only a conservative alphabet is allowed.
pub fn validate_realm(realm: &str) -> Result<()> {
    let valid = !realm.is_empty()
        && realm.len() <= 64
        && realm
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(RelayError::InvalidRequest(format!("invalid realm name: {realm:?}")))
    }
}

fn expand(template: &str, realm: &str) -> Result<Url> {
    validate_realm(realm)?;
    let expanded = template.replace(REALM_PLACEHOLDER, realm);
    Url::parse(&expanded)
        .map_err(|e| RelayError::Config(format!("invalid endpoint URL '{expanded}': {e}")))
}
