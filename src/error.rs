//! Error types for tokenrelay
//!
//! This module defines every failure the relay can surface, using
//! `thiserror` for ergonomic error handling. Each variant maps to exactly one
//! HTTP status through [`RelayError::status_code`]; the axum layer performs
//! the actual translation in `server::error`.

use thiserror::Error;

use crate::security::cookies::CookieName;

/// Main error type for tokenrelay operations
///
/// The first group of variants is the user-visible authentication taxonomy.
/// The remaining variants wrap infrastructure failures (configuration, I/O,
/// serialization) and always translate to `500`.
#[derive(Error, Debug)]
pub enum RelayError {
    /// A required token cookie was not sent with the request.
    ///
    /// The caller must re-authenticate.
    #[error("Authorization cookie not present in request: {cookie}")]
    AuthCookieAbsent {
        /// Name of the missing cookie
        cookie: String,
    },

    /// A token cookie was present but could not be decrypted.
    ///
    /// Usually the encryption key rotated since the cookie was issued, or the
    /// cookie was corrupted in transit. Distinct from [`Self::AuthCookieAbsent`].
    #[error("Cookie value could not be decrypted: {cookie}")]
    PlaintextNotDecryptable {
        /// Name of the cookie that failed to decrypt
        cookie: String,
    },

    /// OAuth state verification failed (CSRF mismatch, missing values, or a
    /// state JWT that is expired or badly signed).
    #[error("Invalid OAuth state: {message}")]
    InvalidOAuthState {
        /// Human-readable reason
        message: String,
        /// The state cookie that must be cleared in the error response
        cookie: CookieName,
        /// The offending state value, when one was received
        state: Option<String>,
    },

    /// Both endpoint variants rejected a token exchange, refresh or revoke.
    ///
    /// Carries the upstream error body of the last attempt.
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    /// A token response lacked mandatory members.
    #[error("Incomplete token response: missing {}", .0.join(", "))]
    IncompleteTokenResponse(Vec<&'static str>),

    /// The capability is not available for this realm or deployment.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The downstream account-linking call failed.
    #[error("Account linking failed: {0}")]
    AccountLinking(String),

    /// The request carried a malformed realm, redirect or parameter.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RelayError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::AuthCookieAbsent { .. }
            | Self::PlaintextNotDecryptable { .. }
            | Self::TokenExchange(_) => 401,
            Self::InvalidOAuthState { .. }
            | Self::IncompleteTokenResponse(_)
            | Self::AccountLinking(_)
            | Self::InvalidRequest(_) => 400,
            Self::UnsupportedOperation(_) => 501,
            Self::Config(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Yaml(_)
            | Self::Http(_) => 500,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AuthCookieAbsent { .. } => "AUTH_COOKIE_ABSENT",
            Self::PlaintextNotDecryptable { .. } => "PLAINTEXT_NOT_DECRYPTABLE",
            Self::InvalidOAuthState { .. } => "INVALID_OAUTH_STATE",
            Self::TokenExchange(_) => "TOKEN_EXCHANGE_FAILED",
            Self::IncompleteTokenResponse(_) => "INCOMPLETE_TOKEN_RESPONSE",
            Self::UnsupportedOperation(_) => "UNSUPPORTED_OPERATION",
            Self::AccountLinking(_) => "ACCOUNT_LINKING_FAILED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::Io(_) | Self::Serialization(_) | Self::Yaml(_) | Self::Http(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Builds an [`RelayError::InvalidOAuthState`] for the given cookie.
    pub(crate) fn invalid_state(
        message: impl Into<String>,
        cookie: CookieName,
        state: Option<String>,
    ) -> Self {
        Self::InvalidOAuthState {
            message: message.into(),
            cookie,
            state,
        }
    }
}

/// Result type alias for tokenrelay library operations
pub type Result<T> = std::result::Result<T, RelayError>;
