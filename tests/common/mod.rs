use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use tokenrelay::security::{CookiePackager, StateTokenHandler, TokenCipher};
use tokenrelay::Config;

pub const HOST: &str = "relay.example.com";

/// Config whose primary and legacy endpoints both point at `idp_uri`.
#[allow(dead_code)]
pub fn relay_config(idp_uri: &str) -> Config {
    let mut config = Config::default();
    config.cookies.secure = false;
    config.cookies.encryptor_password = "integration-password".to_string();
    config.cookies.encryptor_salt = "integration-salt".to_string();
    config.state.signing_key = STANDARD.encode([7u8; 32]);
    config.idp.client_id = "relay-client".to_string();
    config.idp.client_secret = "relay-secret".to_string();
    config.idp.authorize_url = format!("{idp_uri}/oauth2/auth");
    config.idp.token_url = format!("{idp_uri}/oauth2/token");
    config.idp.revoke_url = format!("{idp_uri}/oauth2/revoke");
    config.idp.legacy_base_url = idp_uri.to_string();
    config.http.timeout_seconds = 5;
    config
}

/// Packager sharing the key material of `config`.
#[allow(dead_code)]
pub fn packager(config: &Config) -> CookiePackager {
    let cipher = TokenCipher::new(
        &config.cookies.encryptor_password,
        &config.cookies.encryptor_salt,
    )
    .expect("cipher");
    CookiePackager::new(cipher, config.cookies.secure)
}

/// State handler sharing the signing key of `config`.
#[allow(dead_code)]
pub fn state_handler(config: &Config) -> StateTokenHandler {
    StateTokenHandler::new(
        config.state.audience.clone(),
        config.state.ttl(),
        &config.state.signing_key_bytes().expect("signing key"),
    )
    .expect("state handler")
}

/// JWT-shaped token with the given claims and no real signature.
#[allow(dead_code)]
pub fn unsigned_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

#[allow(dead_code)]
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A token endpoint success body.
#[allow(dead_code)]
pub fn token_body(access: &str, id: &str, refresh: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": access,
        "id_token": id,
        "token_type": "Bearer",
        "expires_in": 3600
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = serde_json::Value::String(refresh.to_string());
    }
    body
}
