//! API token management routes
//!
//! Mounted under `{prefix}/tokens` and restricted to the administrator
//! token. Creation is additionally gated behind a deploy-time flag so
//! ordinary deployments never expose it.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{HeaderMap, Method, Response, StatusCode};

use crate::auth::context::resolve_context;
use crate::routes::{
    empty_response, error_response, json_response, method_not_allowed_response,
    not_found_response, parse_query_params,
};
use crate::server::AppState;
use crate::services::tokens::{self, CreateTokenRequest};
use crate::types::SluiceError;

/// Parsed tokens route components
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TokensRoute<'a> {
    /// `{prefix}/tokens`
    Collection,
    /// `{prefix}/tokens/{id}`
    Item(&'a str),
}

impl<'a> TokensRoute<'a> {
    /// Parse the path remainder after `{prefix}/tokens`
    pub(crate) fn parse(subpath: &'a str) -> Option<Self> {
        let trimmed = subpath.trim_start_matches('/');
        match trimmed {
            "" => Some(Self::Collection),
            id if !id.contains('/') => Some(Self::Item(id)),
            _ => None,
        }
    }
}

/// Handle requests under `{prefix}/tokens`
pub async fn handle_tokens_request(
    state: &AppState,
    method: &Method,
    subpath: &str,
    query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let context = match resolve_context(&state.args, &state.mongo, headers).await {
        Ok(context) => context,
        Err(err) => return error_response(err),
    };
    if let Err(err) = context.require_admin() {
        return error_response(err);
    }

    let Some(route) = TokensRoute::parse(subpath) else {
        return not_found_response();
    };
    let params = parse_query_params(query);

    match (method, route) {
        (&Method::POST, TokensRoute::Collection) => {
            if !state.args.enable_token_creation_route {
                return not_found_response();
            }

            let request = match serde_json::from_slice::<CreateTokenRequest>(&body) {
                Ok(request) => request,
                Err(err) => {
                    return error_response(SluiceError::Unprocessable(format!(
                        "Invalid body: {}",
                        err
                    )))
                }
            };

            match tokens::create_token(&state.mongo, request).await {
                Ok(created) => json_response(StatusCode::CREATED, &created),
                Err(err) => error_response(err),
            }
        }
        (&Method::GET, TokensRoute::Collection) => {
            let database = params.get("database").map(String::as_str);
            match tokens::list_tokens(&state.mongo, database).await {
                Ok(listed) => json_response(StatusCode::OK, &listed),
                Err(err) => error_response(err),
            }
        }
        (&Method::DELETE, TokensRoute::Item(token_id)) => {
            let Some(database) = params.get("database") else {
                return error_response(SluiceError::BadRequest(
                    "database query parameter is required".to_string(),
                ));
            };

            match tokens::revoke_token(&state.mongo, database, token_id).await {
                Ok(()) => empty_response(StatusCode::NO_CONTENT),
                Err(err) => error_response(err),
            }
        }
        _ => method_not_allowed_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_parsing() {
        assert_eq!(TokensRoute::parse(""), Some(TokensRoute::Collection));
        assert_eq!(TokensRoute::parse("/"), Some(TokensRoute::Collection));
        assert_eq!(
            TokensRoute::parse("/65f1a7b8c9d0e1f2a3b4c5d6"),
            Some(TokensRoute::Item("65f1a7b8c9d0e1f2a3b4c5d6"))
        );
        assert_eq!(TokensRoute::parse("/a/b"), None);
    }

    #[test]
    fn test_create_request_deserializes_optional_fields() {
        let request: CreateTokenRequest =
            serde_json::from_str(r#"{"database": "metrics"}"#).unwrap();
        assert_eq!(request.database, "metrics");
        assert!(request.token.is_none());
        assert!(request.description.is_none());
        assert!(request.expires_in_seconds.is_none());

        let request: CreateTokenRequest = serde_json::from_str(
            r#"{"database": "metrics", "token": "custom", "expires_in_seconds": 3600}"#,
        )
        .unwrap();
        assert_eq!(request.token.as_deref(), Some("custom"));
        assert_eq!(request.expires_in_seconds, Some(3600));
    }
}
