//! Error → HTTP response mapping.
//!
//! Callers only ever see a short, fixed message per error kind. Upstream
//! details stay in the logs.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use simguide_core::{Error, ProviderError};

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

/// An error on its way out as `{ "error": ... }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            message: message.to_string(),
            retry_after_secs: None,
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::Input(message) => Self::bad_request(message),
            Error::Provider(ProviderError::AuthenticationFailed(_)) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "service misconfigured")
            }
            Error::Provider(ProviderError::RateLimited { retry_after_secs }) => Self {
                retry_after_secs,
                ..Self::new(StatusCode::SERVICE_UNAVAILABLE, "try again shortly")
            },
            Error::Provider(ProviderError::Network(_)) => {
                Self::new(StatusCode::BAD_GATEWAY, "upstream service unavailable")
            }
            Error::Provider(ProviderError::Protocol { .. }) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "upstream returned an invalid response",
            ),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response();

        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
