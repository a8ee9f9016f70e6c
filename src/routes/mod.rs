//! HTTP routes for Sluice

pub mod health;
pub mod measurements;
pub mod tokens;

pub use health::health_check;
pub use measurements::handle_records_request;
pub use tokens::handle_tokens_request;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::collections::HashMap;

use crate::types::SluiceError;

/// JSON error envelope
#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

/// Build a JSON response with the given status
pub(crate) fn json_response<T: Serialize>(status: StatusCode, data: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(data).unwrap_or_default();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from(r#"{"error":"Internal error"}"#)))
                .unwrap()
        })
}

/// Build an empty response with the given status
pub(crate) fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Build a JSON error response from a service error
pub(crate) fn error_response(err: SluiceError) -> Response<Full<Bytes>> {
    let (status, message) = err.into_status_code_and_body();
    json_response(status, &ApiError { error: message })
}

/// Build a 404 response for unknown paths
pub(crate) fn not_found_response() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &ApiError {
            error: "Not found".to_string(),
        },
    )
}

/// Build a 405 response for unsupported methods
pub(crate) fn method_not_allowed_response() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ApiError {
            error: "Method not allowed".to_string(),
        },
    )
}

/// Parse a query string into a key-value map
pub(crate) fn parse_query_params(query: &str) -> HashMap<String, String> {
    if query.is_empty() {
        return HashMap::new();
    }

    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_params() {
        let params = parse_query_params("limit=10&skip=5&latest=true");
        assert_eq!(params.get("limit").map(String::as_str), Some("10"));
        assert_eq!(params.get("skip").map(String::as_str), Some("5"));
        assert_eq!(params.get("latest").map(String::as_str), Some("true"));

        assert!(parse_query_params("").is_empty());

        let params = parse_query_params("flag");
        assert_eq!(params.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(SluiceError::Unauthorized("no token".into()));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );
    }
}
