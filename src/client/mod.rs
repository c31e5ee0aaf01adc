//! Outbound calls made on behalf of the browser
//!
//! - [`interceptor`]: refresh-and-retry-once on `401`
//! - [`linking`]: account linking and lookup via the SCIM `Me` resource

pub mod interceptor;
pub mod linking;

pub use interceptor::{bearer_from_cookie, RefreshContext, RefreshingClient, TokenRefresher};
pub use linking::{AccountLinker, ScimClient};
