use axum::http::StatusCode;
use axum::response::{ IntoResponse, Response };
use axum::Json;
use serde::Serialize;

use crate::dashboard::crypto::CryptoError;
use crate::error::InvalidRequest;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable code, e.g. "bad_request".
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    TooManyRequests(String),
    Internal(String),
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::TooManyRequests(msg) =>
                (StatusCode::TOO_MANY_REQUESTS, "too_many_requests", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::ServiceUnavailable(msg) =>
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg),
        };

        (status, Json(ErrorBody { error: code.to_string(), message })).into_response()
    }
}

impl From<InvalidRequest> for ApiError {
    fn from(err: InvalidRequest) -> Self {
        ApiError::BadRequest(err.0)
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::UnsupportedPair(_) => ApiError::NotFound(err.to_string()),
            CryptoError::Upstream { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_chat_request_is_bad_request() {
        let resp = ApiError::from(InvalidRequest("Missing message for AI chat.".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unsupported_pair_is_not_found() {
        let resp = ApiError::from(CryptoError::UnsupportedPair("DOGEUSD".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
