//! OAuth2 operations against the identity provider
//!
//! - [`endpoints`]: primary and legacy endpoint sets with `{realm}` templating
//! - [`token`]: token endpoint responses
//! - [`client`]: the dual-endpoint client with error-triggered fallback

pub mod client;
pub mod endpoints;
pub mod token;

pub use client::{AuthorizeRequest, ClientCredentials, OAuthClient};
pub use endpoints::{EndpointSet, EndpointVariant};
pub use token::TokenResponse;
