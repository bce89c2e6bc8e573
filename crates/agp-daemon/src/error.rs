// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP-shaped wrapper around [`AgpError`].
//!
//! `agp-error` deliberately has no `axum` dependency, so the
//! status-code/JSON-body mapping lives here, at the one crate that is
//! allowed to know about HTTP.

use agp_error::{AgpError, AgpErrorDto, ErrorCode};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Request-scoped error response. Wraps an [`AgpError`] plus the
/// request id it occurred under, so every error body carries
/// `requestId`.
pub struct ApiError {
    inner: AgpError,
    request_id: String,
}

impl ApiError {
    /// Attach `request_id` to `error` for response rendering.
    #[must_use]
    pub fn new(error: AgpError, request_id: String) -> Self {
        Self { inner: error, request_id }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: bool,
    message: String,
    code: String,
    #[serde(rename = "requestId")]
    request_id: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    details: serde_json::Map<String, serde_json::Value>,
}

fn status_for(code: ErrorCode) -> StatusCode {
    StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.inner.code);
        // 5xx bodies are sanitized: no context, no wrapped source message.
        let sanitized = status.is_server_error();
        let dto: AgpErrorDto = (&self.inner).into();
        let details = if sanitized { serde_json::Map::new() } else { map_from_context(dto.context) };
        let body = ErrorBody {
            error: true,
            message: if sanitized { "internal server error".to_string() } else { dto.message },
            code: dto.code.as_str().to_string(),
            request_id: self.request_id,
            details,
        };
        (status, Json(body)).into_response()
    }
}

fn map_from_context(
    context: std::collections::BTreeMap<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    context.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn client_error_messages_pass_through_unsanitized() {
        let err = AgpError::new(ErrorCode::Validation, "businessId is required");
        let resp = ApiError::new(err, "req-1".to_string()).into_response();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["message"], "businessId is required");
        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert_eq!(json["requestId"], "req-1");
    }

    #[tokio::test]
    async fn server_error_messages_are_sanitized() {
        let err = AgpError::new(ErrorCode::Internal, "leaked /etc/passwd path detail");
        let resp = ApiError::new(err, "req-2".to_string()).into_response();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["message"], "internal server error");
        assert!(!json["message"].as_str().unwrap().contains("passwd"));
    }

    #[tokio::test]
    async fn server_error_context_is_dropped() {
        let err = AgpError::new(ErrorCode::Internal, "boom").with_context("path", "/secret/file");
        let resp = ApiError::new(err, "req-3".to_string()).into_response();

        let json = body_json(resp).await;
        assert!(json.get("details").is_none() || json["details"].as_object().unwrap().is_empty());
    }

    #[test]
    fn unknown_http_status_falls_back_to_internal_server_error() {
        assert_eq!(status_for(ErrorCode::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_for_matches_the_error_codes_declared_http_status() {
        assert_eq!(status_for(ErrorCode::BusinessNotFound), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorCode::AdapterExecutionTimeout), StatusCode::GATEWAY_TIMEOUT);
    }
}
