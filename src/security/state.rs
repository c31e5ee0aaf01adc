//! CSRF-protected OAuth state tokens
//!
//! A state token is a short-lived HS256 JWT that carries the purpose of an
//! authorization round trip and its realm. It is written into a state cookie
//! and sent to the identity provider as the `state` parameter; on callback the
//! two copies must match exactly before the signature is even checked.
//!
//! Nothing is stored server-side: the token is the state.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::security::cookies::CookieName;

/// Minimum HMAC key length for HS256.
pub const MIN_SIGNING_KEY_LEN: usize = 32;

/// Longest accepted state token lifetime, one day.
pub const MAX_STATE_TTL_SECS: u64 = 86_400;

/// Why an authorization round trip was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenExchangePurpose {
    /// Interactive login to the UI
    Login,
    /// Linking another identity to the caller's account
    Link,
    /// Authorizing access to specific resources
    ResourceAuth,
    /// Login on behalf of a command-line session
    CliLogin,
}

impl fmt::Display for TokenExchangePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenExchangePurpose::Login => "LOGIN",
            TokenExchangePurpose::Link => "LINK",
            TokenExchangePurpose::ResourceAuth => "RESOURCE_AUTH",
            TokenExchangePurpose::CliLogin => "CLI_LOGIN",
        };
        f.write_str(s)
    }
}

/// Purpose-specific content of a state token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatePayload {
    /// Return to `destination` after login, or to the UI root when `None`.
    Login { destination: Option<String> },
    /// Link the freshly authenticated identity into `target_account`.
    Link { target_account: String },
    /// Resource authorization; may chain to a further authorize URL.
    ResourceAuth {
        destination: Option<String>,
        resources: Vec<String>,
        next_authorize_url: Option<String>,
    },
    /// Hand the tokens to a waiting CLI session.
    CliLogin { session_id: String },
}

impl StatePayload {
    /// The purpose tag this payload is issued under.
    pub fn purpose(&self) -> TokenExchangePurpose {
        match self {
            StatePayload::Login { .. } => TokenExchangePurpose::Login,
            StatePayload::Link { .. } => TokenExchangePurpose::Link,
            StatePayload::ResourceAuth { .. } => TokenExchangePurpose::ResourceAuth,
            StatePayload::CliLogin { .. } => TokenExchangePurpose::CliLogin,
        }
    }
}

/// JWT claims as they appear on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateClaims {
    aud: String,
    iat: i64,
    exp: i64,
    jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    purpose: Option<TokenExchangePurpose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    realm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    destination_after_login: Option<String>,
    #[serde(default, rename = "resource", skip_serializing_if = "Option::is_none")]
    resources: Option<Vec<String>>,
    #[serde(default, rename = "nextAuthUrl", skip_serializing_if = "Option::is_none")]
    next_auth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cli_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_account: Option<String>,
}

/// Issues and verifies state tokens.
///
/// Keys are injected at construction; one handler serves every request.
#[derive(Clone)]
pub struct StateTokenHandler {
    audience: String,
    ttl: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl StateTokenHandler {
    /// Creates a handler.
    ///
    /// # Arguments
    ///
    /// * `audience` - Fixed `aud` claim written and required on every token
    /// * `ttl` - Lifetime of issued tokens
    /// * `signing_key` - HMAC key shared by all relay instances
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the key is shorter than
    /// [`MIN_SIGNING_KEY_LEN`] bytes, or the TTL is zero or longer than
    /// [`MAX_STATE_TTL_SECS`].
    pub fn new(audience: impl Into<String>, ttl: Duration, signing_key: &[u8]) -> Result<Self> {
        if signing_key.len() < MIN_SIGNING_KEY_LEN {
            return Err(RelayError::Config(format!(
                "state signing key must be at least {} bytes, got {}",
                MIN_SIGNING_KEY_LEN,
                signing_key.len()
            )));
        }
        if ttl.is_zero() {
            return Err(RelayError::Config(
                "state token ttl must be greater than zero".to_string(),
            ));
        }
        if ttl.as_secs() > MAX_STATE_TTL_SECS {
            return Err(RelayError::Config(format!(
                "state token ttl must be at most {} seconds, got {}",
                MAX_STATE_TTL_SECS,
                ttl.as_secs()
            )));
        }

        Ok(Self {
            audience: audience.into(),
            ttl,
            encoding_key: EncodingKey::from_secret(signing_key),
            decoding_key: DecodingKey::from_secret(signing_key),
        })
    }

    /// Builds a signed state token for `realm` carrying `payload`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use tokenrelay::security::state::{StatePayload, StateTokenHandler, TokenExchangePurpose};
    ///
    /// let handler = StateTokenHandler::new("tokenrelay", Duration::from_secs(600), &[7u8; 32]).unwrap();
    /// let state = handler
    ///     .generate_state("acme", &StatePayload::Login { destination: None })
    ///     .unwrap();
    /// let validated = handler.verify_token(&state).unwrap();
    /// assert_eq!(validated.purpose(), TokenExchangePurpose::Login);
    /// assert_eq!(validated.realm(), "acme");
    /// ```
    pub fn generate_state(&self, realm: &str, payload: &StatePayload) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let exp = i64::try_from(self.ttl.as_secs())
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| RelayError::Config("state token ttl out of range".to_string()))?;
        let mut claims = StateClaims {
            aud: self.audience.clone(),
            iat: now,
            exp,
            jti: random_id(),
            purpose: Some(payload.purpose()),
            realm: Some(realm.to_string()),
            ..StateClaims::default()
        };

        match payload {
            StatePayload::Login { destination } => {
                claims.destination_after_login = destination.clone();
            }
            StatePayload::Link { target_account } => {
                claims.target_account = Some(target_account.clone());
            }
            StatePayload::ResourceAuth {
                destination,
                resources,
                next_authorize_url,
            } => {
                claims.destination_after_login = destination.clone();
                claims.resources = Some(resources.clone());
                claims.next_auth_url = next_authorize_url.clone();
            }
            StatePayload::CliLogin { session_id } => {
                claims.cli_session_id = Some(session_id.clone());
            }
        }

        self.sign(&claims)
    }

    /// State for an interactive login returning to `destination`.
    pub fn generate_login_state(&self, destination: Option<&str>, realm: &str) -> Result<String> {
        self.generate_state(
            realm,
            &StatePayload::Login {
                destination: destination.map(str::to_string),
            },
        )
    }

    /// State for linking the next authenticated identity into `target_account`.
    pub fn generate_account_linking_state(&self, target_account: &str, realm: &str) -> Result<String> {
        self.generate_state(
            realm,
            &StatePayload::Link {
                target_account: target_account.to_string(),
            },
        )
    }

    /// State for a resource authorization, optionally chaining to another
    /// authorize URL.
    pub fn generate_resource_state(
        &self,
        destination: Option<&str>,
        realm: &str,
        resources: &[String],
        next_authorize_url: Option<&str>,
    ) -> Result<String> {
        self.generate_state(
            realm,
            &StatePayload::ResourceAuth {
                destination: destination.map(str::to_string),
                resources: resources.to_vec(),
                next_authorize_url: next_authorize_url.map(str::to_string),
            },
        )
    }

    /// State for a CLI login bound to `session_id`.
    pub fn generate_cli_login_state(&self, session_id: &str, realm: &str) -> Result<String> {
        self.generate_state(
            realm,
            &StatePayload::CliLogin {
                session_id: session_id.to_string(),
            },
        )
    }

    /// Verifies the callback `state` parameter against the state cookie.
    ///
    /// Checks run in order: cookie present, parameter present, exact match,
    /// then signature, audience and expiry. Verification has no side effects.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidOAuthState`] naming `cookie` for any
    /// failed check.
    pub fn parse_and_verify(
        &self,
        state_param: Option<&str>,
        state_cookie: Option<&str>,
        cookie: CookieName,
    ) -> Result<ValidatedState> {
        let Some(state_cookie) = state_cookie else {
            return Err(RelayError::invalid_state(
                format!("Missing '{cookie}' cookie"),
                cookie,
                None,
            ));
        };
        let Some(state_param) = state_param else {
            return Err(RelayError::invalid_state(
                "Missing 'state' parameter",
                cookie,
                None,
            ));
        };
        if state_param != state_cookie {
            return Err(RelayError::invalid_state(
                "CSRF state cookie mismatch",
                cookie,
                Some(state_cookie.to_string()),
            ));
        }

        self.verify_token(state_param).map_err(|e| {
            tracing::debug!("Rejecting state token: {}", e);
            RelayError::invalid_state("Invalid state token", cookie, Some(state_param.to_string()))
        })
    }

    /// Verifies a state token without the cookie comparison.
    pub fn verify_token(&self, token: &str) -> std::result::Result<ValidatedState, StateTokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "aud"]);
        validation.leeway = 0;

        let data = decode::<StateClaims>(token, &self.decoding_key, &validation)?;
        ValidatedState::from_claims(data.claims)
    }

    fn sign(&self, claims: &StateClaims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| RelayError::Config(format!("failed to sign state token: {e}")))
    }
}

impl fmt::Debug for StateTokenHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTokenHandler")
            .field("audience", &self.audience)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Reason a state token failed verification.
#[derive(Debug, thiserror::Error)]
pub enum StateTokenError {
    /// Bad signature, wrong audience, expired or unparsable
    #[error("state token rejected: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// A verified token lacked a claim every state token must carry
    #[error("state token is missing the '{0}' claim")]
    MissingClaim(&'static str),
}

/// A state token that passed every check.
///
/// A value of this type always has a purpose, a realm and the claims its
/// purpose requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedState {
    realm: String,
    payload: StatePayload,
}

impl ValidatedState {
    fn from_claims(claims: StateClaims) -> std::result::Result<Self, StateTokenError> {
        let purpose = claims.purpose.ok_or(StateTokenError::MissingClaim("purpose"))?;
        let realm = claims.realm.ok_or(StateTokenError::MissingClaim("realm"))?;

        let payload = match purpose {
            TokenExchangePurpose::Login => StatePayload::Login {
                destination: claims.destination_after_login,
            },
            TokenExchangePurpose::Link => StatePayload::Link {
                target_account: claims
                    .target_account
                    .ok_or(StateTokenError::MissingClaim("targetAccount"))?,
            },
            TokenExchangePurpose::ResourceAuth => StatePayload::ResourceAuth {
                destination: claims.destination_after_login,
                resources: claims.resources.unwrap_or_default(),
                next_authorize_url: claims.next_auth_url,
            },
            TokenExchangePurpose::CliLogin => StatePayload::CliLogin {
                session_id: claims
                    .cli_session_id
                    .ok_or(StateTokenError::MissingClaim("cliSessionId"))?,
            },
        };

        Ok(Self { realm, payload })
    }

    pub fn purpose(&self) -> TokenExchangePurpose {
        self.payload.purpose()
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn payload(&self) -> &StatePayload {
        &self.payload
    }

    /// Where to send the browser once the exchange completes.
    pub fn destination_after_login(&self) -> Option<&str> {
        match &self.payload {
            StatePayload::Login { destination } | StatePayload::ResourceAuth { destination, .. } => {
                destination.as_deref()
            }
            _ => None,
        }
    }

    pub fn resource_list(&self) -> Option<&[String]> {
        match &self.payload {
            StatePayload::ResourceAuth { resources, .. } => Some(resources),
            _ => None,
        }
    }

    pub fn next_authorize_url(&self) -> Option<&str> {
        match &self.payload {
            StatePayload::ResourceAuth {
                next_authorize_url, ..
            } => next_authorize_url.as_deref(),
            _ => None,
        }
    }

    pub fn cli_session(&self) -> Option<&str> {
        match &self.payload {
            StatePayload::CliLogin { session_id } => Some(session_id),
            _ => None,
        }
    }

    pub fn target_account(&self) -> Option<&str> {
        match &self.payload {
            StatePayload::Link { target_account } => Some(target_account),
            _ => None,
        }
    }
}

/// 256 random bits, base64url encoded.
fn random_id() -> String {
    use rand::RngCore as _;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
