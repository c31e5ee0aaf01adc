//! Translation of [`RelayError`] into HTTP responses
//!
//! This is the only place errors become responses. Every error yields a
//! JSON body `{"message": ..., "statusCode": ...}`; an invalid OAuth state
//! additionally clears the state cookie it was read from.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::RelayError;
use crate::security::cookies::{append_set_cookie, expired_cookie};

/// Error response JSON
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub status_code: u16,
}

/// A [`RelayError`] bound to the cookie domain of the request it failed.
#[derive(Debug)]
pub struct ApiError {
    error: RelayError,
    cookie_host: Option<String>,
}

impl ApiError {
    pub fn new(error: RelayError, cookie_host: Option<&str>) -> Self {
        Self {
            error,
            cookie_host: cookie_host.map(str::to_string),
        }
    }

    pub fn error(&self) -> &RelayError {
        &self.error
    }
}

impl From<RelayError> for ApiError {
    fn from(error: RelayError) -> Self {
        Self {
            error,
            cookie_host: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = if status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED {
            tracing::error!("Request failed ({}): {}", self.error.error_code(), self.error);
            "Internal server error".to_string()
        } else {
            tracing::info!("Request rejected ({}): {}", self.error.error_code(), self.error);
            self.error.to_string()
        };

        let mut headers = HeaderMap::new();
        if let RelayError::InvalidOAuthState { cookie, .. } = &self.error {
            append_set_cookie(&mut headers, &expired_cookie(self.cookie_host.as_deref(), *cookie));
        }

        let body = ErrorBody {
            message,
            status_code: status.as_u16(),
        };
        (status, headers, Json(body)).into_response()
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
