use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, warn};

use crate::extractor::ExtractError;

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    status: &'static str,
    message: &'a str,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// 500 whose body carries `detail` only when the server is configured to
    /// expose it. The detail is always logged.
    pub fn server(detail: impl std::fmt::Display, expose_details: bool) -> Self {
        error!("Server error: {detail}");
        if expose_details {
            Self::internal(format!("Server error: {detail}"))
        } else {
            Self::internal("Server error")
        }
    }

    /// Collaborator failures: download problems are the caller's (400),
    /// everything else is ours (500).
    pub fn from_extract(failure: ExtractError, expose_details: bool) -> Self {
        if failure.is_download_failure() {
            warn!("Download failed: {failure}");
            Self::bad_request(format!("Download failed: {failure}"))
        } else {
            Self::server(failure, expose_details)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            status: "error",
            message: &self.message,
        });

        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn download_failures_map_to_bad_request() {
        let error = ApiError::from_extract(
            ExtractError::Download("Unsupported URL: https://example.com".to_string()),
            false,
        );
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            error.message,
            "Download failed: Unsupported URL: https://example.com"
        );

        let error = ApiError::from_extract(ExtractError::TimedOut(Duration::from_secs(5)), false);
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert!(error.message.starts_with("Download failed:"));
    }

    #[test]
    fn server_failures_hide_details_unless_exposed() {
        let hidden = ApiError::from_extract(ExtractError::MissingOutput, false);
        assert_eq!(hidden.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(hidden.message, "Server error");

        let exposed = ApiError::from_extract(ExtractError::MissingOutput, true);
        assert_eq!(exposed.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(exposed.message.starts_with("Server error: "));
        assert!(exposed.message.len() > "Server error: ".len());
    }
}
