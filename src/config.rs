//! Configuration for Sluice
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Sluice - multi-tenant HTTP gateway for MongoDB time-series collections
#[derive(Parser, Debug, Clone)]
#[command(name = "sluice")]
#[command(about = "Multi-tenant HTTP gateway for MongoDB time-series collections")]
pub struct Args {
    /// Unique node identifier for this gateway instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Path prefix for the records and tokens API
    #[arg(long, env = "API_PREFIX", default_value = "/api")]
    pub api_prefix: String,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB username (optional, combined with MONGODB_PASSWORD)
    #[arg(long, env = "MONGODB_USERNAME")]
    pub mongodb_username: Option<String>,

    /// MongoDB password (optional)
    #[arg(long, env = "MONGODB_PASSWORD")]
    pub mongodb_password: Option<String>,

    /// Default tenant database, used by admin-token requests without an override
    #[arg(long, env = "MONGODB_DATABASE", default_value = "sluice")]
    pub mongodb_database: String,

    /// Name of the per-tenant time-series collection
    #[arg(long, env = "MONGODB_COLLECTION", default_value = "measurements")]
    pub mongodb_collection: String,

    /// Maximum connections in the driver's pool
    #[arg(long, env = "MONGODB_MAX_POOL_SIZE", default_value = "10")]
    pub mongodb_max_pool_size: u32,

    /// Server selection timeout for the connect-time liveness probe (ms)
    #[arg(long, env = "SERVER_SELECTION_TIMEOUT_MS", default_value = "3000")]
    pub server_selection_timeout_ms: u64,

    /// Time field of the time-series collections
    #[arg(long, env = "TIMESERIES_TIME_FIELD", default_value = "timestamp")]
    pub timeseries_time_field: String,

    /// Metadata (grouping) field of the time-series collections; empty disables it
    #[arg(long, env = "TIMESERIES_META_FIELD", default_value = "metadata")]
    pub timeseries_meta_field: String,

    /// Name of the per-tenant API token collection
    #[arg(long, env = "API_TOKENS_COLLECTION", default_value = "api_tokens")]
    pub api_tokens_collection: String,

    /// Static administrator token (bypasses per-database token lookup)
    #[arg(long, env = "API_ADMIN_TOKEN")]
    pub api_admin_token: String,

    /// Expose the token creation route
    #[arg(long, env = "ENABLE_TOKEN_CREATION_ROUTE", default_value = "false")]
    pub enable_token_creation_route: bool,

    /// Minimum seconds between expired-document sweeps per tenant database.
    /// Zero or negative sweeps on every collection access.
    #[arg(long, env = "EXPIRATION_CLEANUP_INTERVAL_SECONDS", default_value = "3600")]
    pub expiration_cleanup_interval_seconds: i64,

    /// Comma-separated list of allowed CORS origins (empty disables CORS headers)
    #[arg(long, env = "ALLOWED_ORIGINS", default_value = "")]
    pub allowed_origins: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Get the effective time-series meta field (empty string disables it)
    pub fn meta_field(&self) -> Option<&str> {
        let trimmed = self.timeseries_meta_field.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }

    /// Get the list of allowed CORS origins
    pub fn allowed_origin_list(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.api_admin_token.trim().is_empty() {
            return Err("API_ADMIN_TOKEN must not be empty".to_string());
        }

        if self.timeseries_time_field.trim().is_empty() {
            return Err("TIMESERIES_TIME_FIELD must not be empty".to_string());
        }

        if self.mongodb_database.trim().is_empty() {
            return Err("MONGODB_DATABASE must not be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_args() -> Args {
        Args::parse_from([
            "sluice",
            "--api-admin-token",
            "super-secret",
            "--mongodb-uri",
            "mongodb://localhost:27017",
        ])
    }

    #[test]
    fn test_defaults() {
        let args = test_args();
        assert_eq!(args.api_prefix, "/api");
        assert_eq!(args.mongodb_collection, "measurements");
        assert_eq!(args.api_tokens_collection, "api_tokens");
        assert_eq!(args.timeseries_time_field, "timestamp");
        assert_eq!(args.expiration_cleanup_interval_seconds, 3600);
        assert!(!args.enable_token_creation_route);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_meta_field_empty_disables() {
        let mut args = test_args();
        assert_eq!(args.meta_field(), Some("metadata"));
        args.timeseries_meta_field = "  ".to_string();
        assert_eq!(args.meta_field(), None);
    }

    #[test]
    fn test_allowed_origin_list() {
        let mut args = test_args();
        assert!(args.allowed_origin_list().is_empty());
        args.allowed_origins = "https://a.example, https://b.example,,".to_string();
        assert_eq!(
            args.allowed_origin_list(),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn test_validate_rejects_blank_admin_token() {
        let mut args = test_args();
        args.api_admin_token = "   ".to_string();
        assert!(args.validate().is_err());
    }
}
