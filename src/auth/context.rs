//! Request token context
//!
//! Resolves the caller's API token (and optional explicit database override)
//! into the tenant database the request operates on. The static admin token
//! bypasses the per-database token lookup.

use hyper::HeaderMap;

use crate::config::Args;
use crate::db::MongoManager;
use crate::services::tokens::fetch_token_metadata;
use crate::types::{Result, SluiceError};

/// Header carrying the API token secret
pub const API_TOKEN_HEADER: &str = "x-api-token";
/// Header carrying an explicit tenant database override
pub const DATABASE_OVERRIDE_HEADER: &str = "x-database-name";

/// Information about the caller extracted from the API token
#[derive(Debug, Clone)]
pub struct TokenContext {
    /// Tenant database this request operates on
    pub database_name: String,
    /// Whether the caller presented the administrator token
    pub is_admin: bool,
}

impl TokenContext {
    /// Ensure the caller is using the administrator token
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(SluiceError::Forbidden(
                "Administrator token required".to_string(),
            ))
        }
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Validate the provided API token and resolve the target database.
///
/// Stamps `last_used_at` on the matched token document.
pub async fn resolve_context(
    args: &Args,
    mongo: &MongoManager,
    headers: &HeaderMap,
) -> Result<TokenContext> {
    let api_token = header_value(headers, API_TOKEN_HEADER)
        .ok_or_else(|| SluiceError::Unauthorized("API token required".to_string()))?;
    let database_override = header_value(headers, DATABASE_OVERRIDE_HEADER);

    if api_token == args.api_admin_token {
        let database_name = database_override
            .map(str::to_string)
            .unwrap_or_else(|| args.mongodb_database.clone());
        return Ok(TokenContext {
            database_name,
            is_admin: true,
        });
    }

    let metadata = fetch_token_metadata(mongo, api_token).await?;

    if let Some(requested) = database_override {
        if requested != metadata.database {
            return Err(SluiceError::Forbidden(
                "The provided token does not grant access to the requested database".to_string(),
            ));
        }
    }

    Ok(TokenContext {
        database_name: metadata.database,
        is_admin: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use hyper::header::HeaderValue;

    fn test_args() -> Args {
        Args::parse_from(["sluice", "--api-admin-token", "root-token"])
    }

    fn manager() -> MongoManager {
        MongoManager::new(crate::db::MongoSettings::from_args(&test_args()))
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                hyper::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let args = test_args();
        let mongo = manager();

        let err = resolve_context(&args, &mongo, &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::Unauthorized(_)));

        // A blank header is treated the same as a missing one
        let err = resolve_context(&args, &mongo, &headers(&[("x-api-token", "  ")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_admin_token_uses_default_database() {
        let args = test_args();
        let mongo = manager();

        let context = resolve_context(&args, &mongo, &headers(&[("x-api-token", "root-token")]))
            .await
            .unwrap();
        assert!(context.is_admin);
        assert_eq!(context.database_name, args.mongodb_database);
        assert!(context.require_admin().is_ok());
    }

    #[tokio::test]
    async fn test_admin_token_honours_override() {
        let args = test_args();
        let mongo = manager();

        let context = resolve_context(
            &args,
            &mongo,
            &headers(&[("x-api-token", "root-token"), ("x-database-name", " metrics ")]),
        )
        .await
        .unwrap();
        assert!(context.is_admin);
        assert_eq!(context.database_name, "metrics");
    }

    #[tokio::test]
    async fn test_tenant_token_without_connection_is_service_unavailable() {
        // A non-admin token forces a resolver lookup, which needs the client
        let args = test_args();
        let mongo = manager();

        let err = resolve_context(&args, &mongo, &headers(&[("x-api-token", "tenant-secret")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::Database(_)));
    }

    #[test]
    fn test_require_admin_rejects_tenant_context() {
        let context = TokenContext {
            database_name: "metrics".to_string(),
            is_admin: false,
        };
        assert!(matches!(
            context.require_admin().unwrap_err(),
            SluiceError::Forbidden(_)
        ));
    }
}
