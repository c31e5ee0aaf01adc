//! Token custody primitives
//!
//! - [`cipher`]: AES-256-GCM sealing of cookie values
//! - [`cookies`]: naming, packaging and extraction of token cookies
//! - [`state`]: signed CSRF state tokens
//! - [`jwt`]: unverified claim inspection for expiry and scope checks

pub mod cipher;
pub mod cookies;
pub mod jwt;
pub mod state;

pub use cipher::TokenCipher;
pub use cookies::{CookieName, CookiePackager, CookieValue, ServiceAudience, TokenKind, TokenLookup};
pub use state::{StatePayload, StateTokenHandler, TokenExchangePurpose, ValidatedState};
