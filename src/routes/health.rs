//! Health check endpoint
//!
//! Liveness only: returns 200 whenever the process is serving, and reports
//! whether the MongoDB connection is up so operators can distinguish a
//! healthy gateway from one that lost its store.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::routes::json_response;
use crate::server::AppState;

/// Health response payload
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Git commit the binary was built from
    pub commit: &'static str,
    /// Build timestamp
    pub built: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    /// Whether the MongoDB connection is established
    pub database_connected: bool,
}

/// Handle `GET /healthz`
pub async fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let response = HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        commit: env!("GIT_COMMIT_SHORT"),
        built: env!("BUILD_TIMESTAMP"),
        uptime: state.started_at.elapsed().as_secs(),
        database_connected: state.mongo.is_connected().await,
    };

    json_response(StatusCode::OK, &response)
}
