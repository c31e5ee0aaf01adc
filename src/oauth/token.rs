//! Token endpoint responses

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// JSON body returned by a token endpoint.
///
/// Access and identity tokens are optional on the wire so that an
/// incomplete response can be reported precisely instead of as a parse
/// failure; [`TokenResponse::require_tokens`] enforces them.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// The tokens every successful exchange must yield.
#[derive(Clone, Copy)]
pub struct RequiredTokens<'a> {
    pub access_token: &'a str,
    pub id_token: &'a str,
    pub refresh_token: Option<&'a str>,
}

impl TokenResponse {
    /// Borrows the mandatory tokens.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::IncompleteTokenResponse`] naming each missing
    /// member.
    pub fn require_tokens(&self) -> Result<RequiredTokens<'_>> {
        let access_token = self.access_token.as_deref().filter(|t| !t.is_empty());
        let id_token = self.id_token.as_deref().filter(|t| !t.is_empty());

        match (access_token, id_token) {
            (Some(access_token), Some(id_token)) => Ok(RequiredTokens {
                access_token,
                id_token,
                refresh_token: self.refresh_token.as_deref().filter(|t| !t.is_empty()),
            }),
            _ => {
                let mut missing = Vec::new();
                if access_token.is_none() {
                    missing.push("access_token");
                }
                if id_token.is_none() {
                    missing.push("id_token");
                }
                Err(RelayError::IncompleteTokenResponse(missing))
            }
        }
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_response() {
        let json = r#"{
            "access_token": "at",
            "id_token": "it",
            "refresh_token": "rt",
            "token_type": "bearer",
            "expires_in": 3600
        }"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        let tokens = response.require_tokens().unwrap();
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.id_token, "it");
        assert_eq!(tokens.refresh_token, Some("rt"));
        assert_eq!(response.expires_in, Some(3600));
    }

    #[test]
    fn test_refresh_token_is_optional() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "at", "id_token": "it"}"#).unwrap();
        assert_eq!(response.require_tokens().unwrap().refresh_token, None);
    }

    #[test]
    fn test_missing_members_are_listed() {
        let response: TokenResponse = serde_json::from_str(r#"{"refresh_token": "rt"}"#).unwrap();
        match response.require_tokens() {
            Err(RelayError::IncompleteTokenResponse(missing)) => {
                assert_eq!(missing, vec!["access_token", "id_token"]);
            }
            other => panic!("expected IncompleteTokenResponse, got {:?}", other.err()),
        }

        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "at", "id_token": ""}"#).unwrap();
        assert!(matches!(
            response.require_tokens(),
            Err(RelayError::IncompleteTokenResponse(ref m)) if m == &vec!["id_token"]
        ));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let response = TokenResponse {
            access_token: Some("secret-access".to_string()),
            refresh_token: Some("secret-refresh".to_string()),
            ..TokenResponse::default()
        };
        let debug = format!("{response:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }
}
