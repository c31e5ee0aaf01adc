//! tokenrelay - stateless OAuth2 relay
//!
//! The relay sits between a browser UI and an identity provider. Tokens
//! never live in the browser's script-visible storage and never live in the
//! relay's memory: they travel as encrypted, `HttpOnly` cookies and are
//! unsealed only for the duration of a request.
//!
//! # Architecture
//!
//! - `security`: cookie sealing and packaging, signed CSRF state tokens
//! - `oauth`: token, refresh, revoke and user-info calls with primary/legacy
//!   endpoint fallback
//! - `client`: refresh-on-unauthorized interceptor for outbound calls and
//!   account linking
//! - `server`: the axum router exposing the identity endpoints
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli`: command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use tokenrelay::cli::{Cli, Commands};
//! use tokenrelay::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cli = Cli {
//!         config: Some("config/config.yaml".to_string()),
//!         verbose: false,
//!         command: Commands::Serve { bind: None },
//!     };
//!     let config = Config::load("config/config.yaml", &cli)?;
//!     config.validate()?;
//!     tokenrelay::server::serve(config).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod oauth;
pub mod security;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use error::{RelayError, Result};
pub use server::{router, AppState};
