//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use parley_core::Error;

/// Wrapper turning core errors into HTTP responses
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<parley_ingest::IngestError> for ApiError {
    fn from(err: parley_ingest::IngestError) -> Self {
        ApiError(err.into())
    }
}

impl From<parley_store::StoreError> for ApiError {
    fn from(err: parley_store::StoreError) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::CapacityExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Backend(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: Error) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(Error::invalid_input("bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(Error::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(Error::Forbidden("y".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(Error::backend("db down")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(Error::BackendTimeout("slow".into())),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
