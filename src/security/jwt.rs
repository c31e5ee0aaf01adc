//! Unverified JWT claim inspection
//!
//! The relay never validates IdP-issued tokens; downstream services do. It
//! only peeks at `exp` to decide whether a refresh is due and at `scp` to
//! keep the granted scopes on refresh.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer};

/// Claims read from a JWT payload without verifying its signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UnverifiedClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default, deserialize_with = "numeric_date")]
    pub exp: Option<i64>,
    #[serde(default)]
    scp: Option<Scopes>,
}

/// NumericDate may carry a fraction; it is truncated to whole seconds.
fn numeric_date<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.map(|exp| exp.trunc() as i64))
}

/// `scp` is an array in some providers and a space-separated string in others.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum Scopes {
    List(Vec<String>),
    Joined(String),
}

impl UnverifiedClaims {
    /// Decodes the payload segment of `token`.
    ///
    /// Returns `None` if the token is not a three-segment JWT with a JSON
    /// object payload.
    pub fn decode(token: &str) -> Option<Self> {
        let mut segments = token.split('.');
        let (_header, payload, _sig) = (segments.next()?, segments.next()?, segments.next()?);
        if segments.next().is_some() {
            return None;
        }

        let raw = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        serde_json::from_slice(&raw).ok()
    }

    /// Whether `exp` is at or before `now` (unix seconds). Tokens without
    /// `exp` never expire.
    pub fn is_expired(&self, now: i64) -> bool {
        self.exp.is_some_and(|exp| exp <= now)
    }

    /// Seconds until `exp`, negative once expired.
    pub fn seconds_remaining(&self, now: i64) -> Option<i64> {
        self.exp.map(|exp| exp.saturating_sub(now))
    }

    /// Granted scopes, in token order.
    pub fn scopes(&self) -> Vec<String> {
        match &self.scp {
            Some(Scopes::List(list)) => list.clone(),
            Some(Scopes::Joined(joined)) => joined.split_whitespace().map(str::to_string).collect(),
            None => Vec::new(),
        }
    }

    /// Scopes joined for a refresh request; `None` when the token lists none.
    pub fn scope_param(&self) -> Option<String> {
        let scopes = self.scopes();
        if scopes.is_empty() {
            None
        } else {
            Some(scopes.join(" "))
        }
    }
}

#[cfg(test)]
pub(crate) fn unsigned_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}
