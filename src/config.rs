//! Configuration management for tokenrelay
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//!
//! Keys (cookie encryptor password and salt, state signing key) are read here
//! once and injected into the components that need them.

use crate::error::{RelayError, Result};
use crate::oauth::client::ClientCredentials;
use crate::oauth::endpoints::EndpointSet;
use crate::security::cookies::ServiceAudience;
use crate::security::state::{MAX_STATE_TTL_SECS, MIN_SIGNING_KEY_LEN};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for tokenrelay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener and route prefixes
    #[serde(default)]
    pub server: ServerConfig,
    /// Cookie attributes and encryption secrets
    #[serde(default)]
    pub cookies: CookieConfig,
    /// OAuth state token settings
    #[serde(default)]
    pub state: StateConfig,
    /// Identity provider endpoints and client registration
    #[serde(default)]
    pub idp: IdpConfig,
    /// Account linking
    #[serde(default)]
    pub linking: LinkingConfig,
    /// Outbound HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,
    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Prefix of every API route, e.g. `/api/v1alpha`
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Prefix under which the UI is served; post-login redirects land here
    #[serde(default)]
    pub ui_prefix: String,
}

fn default_bind() -> String {
    "0.0.0.0:8085".to_string()
}

fn default_api_prefix() -> String {
    "/api/v1alpha".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_prefix: default_api_prefix(),
            ui_prefix: String::new(),
        }
    }
}

/// Cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    /// Whether cookies carry the `Secure` attribute
    #[serde(default = "default_true")]
    pub secure: bool,

    /// Password the cookie key is derived from
    #[serde(default)]
    pub encryptor_password: String,

    /// Salt the cookie key is derived with
    #[serde(default)]
    pub encryptor_salt: String,
}

fn default_true() -> bool {
    true
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: true,
            encryptor_password: String::new(),
            encryptor_salt: String::new(),
        }
    }
}

/// State token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Audience claim written into and required on state tokens
    #[serde(default = "default_state_audience")]
    pub audience: String,

    /// Lifetime of a state token in seconds
    #[serde(default = "default_state_ttl")]
    pub ttl_seconds: u64,

    /// Base64 HMAC key, at least 32 bytes once decoded
    #[serde(default)]
    pub signing_key: String,
}

fn default_state_audience() -> String {
    "tokenrelay".to_string()
}

fn default_state_ttl() -> u64 {
    600
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            audience: default_state_audience(),
            ttl_seconds: default_state_ttl(),
            signing_key: String::new(),
        }
    }
}

impl StateConfig {
    /// Decodes the signing key.
    ///
    /// Whitespace (including line breaks in wrapped keys) is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the key is not base64 or is too short.
    pub fn signing_key_bytes(&self) -> Result<Vec<u8>> {
        let compact: String = self.signing_key.split_whitespace().collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| RelayError::Config(format!("state.signing_key is not valid base64: {e}")))?;
        if bytes.len() < MIN_SIGNING_KEY_LEN {
            return Err(RelayError::Config(format!(
                "state.signing_key must decode to at least {} bytes",
                MIN_SIGNING_KEY_LEN
            )));
        }
        Ok(bytes)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpConfig {
    /// Primary authorize endpoint; may contain `{realm}`
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,

    /// Primary token endpoint; may contain `{realm}`
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Primary revoke endpoint; may contain `{realm}`
    #[serde(default = "default_revoke_url")]
    pub revoke_url: String,

    /// Primary user-info endpoint, if the provider has one
    #[serde(default)]
    pub user_info_url: Option<String>,

    /// Root of the legacy provider
    #[serde(default = "default_legacy_base_url")]
    pub legacy_base_url: String,

    /// Whether the legacy provider exposes `/oidc/userinfo`
    #[serde(default = "default_true")]
    pub legacy_user_info: bool,

    /// OAuth client id
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret
    #[serde(default)]
    pub client_secret: String,

    /// Scopes requested when the login request names none
    #[serde(default = "default_scopes")]
    pub default_scopes: String,

    /// Audience whose cookies a login writes
    #[serde(default = "default_service")]
    pub service: ServiceAudience,
}

fn default_authorize_url() -> String {
    "http://localhost:4444/oauth2/auth".to_string()
}

fn default_token_url() -> String {
    "http://localhost:4444/oauth2/token".to_string()
}

fn default_revoke_url() -> String {
    "http://localhost:4444/oauth2/revoke".to_string()
}

fn default_legacy_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_scopes() -> String {
    "openid offline ga4gh_passport_v1 account_admin identities".to_string()
}

fn default_service() -> ServiceAudience {
    ServiceAudience::Ic
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            revoke_url: default_revoke_url(),
            user_info_url: None,
            legacy_base_url: default_legacy_base_url(),
            legacy_user_info: true,
            client_id: String::new(),
            client_secret: String::new(),
            default_scopes: default_scopes(),
            service: default_service(),
        }
    }
}

impl IdpConfig {
    pub fn primary_endpoints(&self) -> EndpointSet {
        EndpointSet::primary(
            self.authorize_url.clone(),
            self.token_url.clone(),
            self.revoke_url.clone(),
            self.user_info_url.clone(),
        )
    }

    pub fn legacy_endpoints(&self) -> EndpointSet {
        EndpointSet::legacy(&self.legacy_base_url, self.legacy_user_info)
    }

    pub fn credentials(&self) -> ClientCredentials {
        ClientCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }
}

/// Account linking configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkingConfig {
    /// Base URL of the SCIM service; linking is unsupported when unset
    #[serde(default)]
    pub scim_base_url: Option<String>,
}

/// Outbound HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout applied to every outbound request
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "tokenrelay=info,tower_http=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)))
    }

    fn apply_env_vars(&mut self) {
        // Server overrides
        if let Ok(bind) = std::env::var("TOKENRELAY_BIND") {
            self.server.bind = bind;
        }

        if let Ok(prefix) = std::env::var("TOKENRELAY_API_PREFIX") {
            self.server.api_prefix = prefix;
        }

        if let Ok(prefix) = std::env::var("TOKENRELAY_UI_PREFIX") {
            self.server.ui_prefix = prefix;
        }

        // Cookie overrides
        if let Ok(secure) = std::env::var("TOKENRELAY_COOKIES_SECURE") {
            if let Ok(value) = secure.parse() {
                self.cookies.secure = value;
            } else {
                tracing::warn!("Invalid TOKENRELAY_COOKIES_SECURE: {}", secure);
            }
        }

        if let Ok(password) = std::env::var("TOKENRELAY_ENCRYPTOR_PASSWORD") {
            self.cookies.encryptor_password = password;
        }

        if let Ok(salt) = std::env::var("TOKENRELAY_ENCRYPTOR_SALT") {
            self.cookies.encryptor_salt = salt;
        }

        // State overrides
        if let Ok(key) = std::env::var("TOKENRELAY_STATE_SIGNING_KEY") {
            self.state.signing_key = key;
        }

        if let Ok(ttl) = std::env::var("TOKENRELAY_STATE_TTL_SECONDS") {
            if let Ok(value) = ttl.parse() {
                self.state.ttl_seconds = value;
            } else {
                tracing::warn!("Invalid TOKENRELAY_STATE_TTL_SECONDS: {}", ttl);
            }
        }

        // Identity provider overrides
        if let Ok(url) = std::env::var("TOKENRELAY_IDP_AUTHORIZE_URL") {
            self.idp.authorize_url = url;
        }

        if let Ok(url) = std::env::var("TOKENRELAY_IDP_TOKEN_URL") {
            self.idp.token_url = url;
        }

        if let Ok(url) = std::env::var("TOKENRELAY_IDP_REVOKE_URL") {
            self.idp.revoke_url = url;
        }

        if let Ok(url) = std::env::var("TOKENRELAY_IDP_USER_INFO_URL") {
            self.idp.user_info_url = Some(url).filter(|u| !u.is_empty());
        }

        if let Ok(url) = std::env::var("TOKENRELAY_IDP_LEGACY_BASE_URL") {
            self.idp.legacy_base_url = url;
        }

        if let Ok(client_id) = std::env::var("TOKENRELAY_IDP_CLIENT_ID") {
            self.idp.client_id = client_id;
        }

        if let Ok(client_secret) = std::env::var("TOKENRELAY_IDP_CLIENT_SECRET") {
            self.idp.client_secret = client_secret;
        }

        if let Ok(url) = std::env::var("TOKENRELAY_SCIM_BASE_URL") {
            self.linking.scim_base_url = Some(url).filter(|u| !u.is_empty());
        }

        // HTTP client overrides
        if let Ok(timeout) = std::env::var("TOKENRELAY_HTTP_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.http.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid TOKENRELAY_HTTP_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("TOKENRELAY_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(json) = std::env::var("TOKENRELAY_LOG_JSON") {
            if let Ok(value) = json.parse() {
                self.logging.json = value;
            } else {
                tracing::warn!("Invalid TOKENRELAY_LOG_JSON: {}", json);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let crate::cli::Commands::Serve { bind: Some(bind) } = &cli.command {
            self.server.bind = bind.clone();
        }
    }

    /// Validate the configuration
    ///
    /// Ensures secrets are present, keys are usable and every endpoint
    /// template expands to a valid URL.
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        let prefix = &self.server.api_prefix;
        if !prefix.is_empty() && (!prefix.starts_with('/') || prefix.ends_with('/')) {
            return Err(RelayError::Config(format!(
                "server.api_prefix must start with '/' and not end with '/': {}",
                prefix
            )));
        }

        if self.cookies.encryptor_password.is_empty() {
            return Err(RelayError::Config(
                "cookies.encryptor_password cannot be empty".to_string(),
            ));
        }

        if self.cookies.encryptor_salt.is_empty() {
            return Err(RelayError::Config(
                "cookies.encryptor_salt cannot be empty".to_string(),
            ));
        }

        if self.state.audience.is_empty() {
            return Err(RelayError::Config("state.audience cannot be empty".to_string()));
        }

        if self.state.ttl_seconds == 0 {
            return Err(RelayError::Config(
                "state.ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if self.state.ttl_seconds > MAX_STATE_TTL_SECS {
            return Err(RelayError::Config(format!(
                "state.ttl_seconds must be at most {}",
                MAX_STATE_TTL_SECS
            )));
        }

        self.state.signing_key_bytes()?;

        if self.idp.client_id.is_empty() {
            return Err(RelayError::Config("idp.client_id cannot be empty".to_string()));
        }

        if self.idp.client_secret.is_empty() {
            return Err(RelayError::Config("idp.client_secret cannot be empty".to_string()));
        }

        self.idp.primary_endpoints().validate()?;
        self.idp.legacy_endpoints().validate()?;

        if let Some(scim) = &self.linking.scim_base_url {
            url::Url::parse(scim).map_err(|e| {
                RelayError::Config(format!("linking.scim_base_url is not a valid URL: {}", e))
            })?;
        }

        if self.http.timeout_seconds == 0 {
            return Err(RelayError::Config(
                "http.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.cookies.encryptor_password = "test-password".to_string();
    config.cookies.encryptor_salt = "test-salt".to_string();
    config.state.signing_key = base64::engine::general_purpose::STANDARD.encode([9u8; 32]);
    config.idp.client_id = "relay-client".to_string();
    config.idp.client_secret = "relay-secret".to_string();
    config
}
