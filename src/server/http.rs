//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Routing is a manual
//! dispatch on method and path; route modules own their own sub-paths.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::Args;
use crate::db::MongoManager;
use crate::routes;
use crate::types::{Result, SluiceError};

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub mongo: Arc<MongoManager>,
    /// Process start instant, reported by the health route
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, mongo: Arc<MongoManager>) -> Self {
        Self {
            args,
            mongo,
            started_at: Instant::now(),
        }
    }
}

/// Where a request path dispatches to
#[derive(Debug, PartialEq, Eq)]
enum RouteTarget<'a> {
    Health,
    Records(&'a str),
    Tokens(&'a str),
    Unknown,
}

fn route_target<'a>(path: &'a str, api_prefix: &str) -> RouteTarget<'a> {
    if path == "/health" || path == "/healthz" {
        return RouteTarget::Health;
    }

    let Some(rest) = path.strip_prefix(api_prefix) else {
        return RouteTarget::Unknown;
    };

    if let Some(sub) = rest.strip_prefix("/records") {
        if sub.is_empty() || sub.starts_with('/') {
            return RouteTarget::Records(sub);
        }
    }
    if let Some(sub) = rest.strip_prefix("/tokens") {
        if sub.is_empty() || sub.starts_with('/') {
            return RouteTarget::Tokens(sub);
        }
    }

    RouteTarget::Unknown
}

/// Origin allowed by the CORS configuration, if any
fn allowed_origin(state: &AppState, headers: &HeaderMap) -> Option<String> {
    let configured = state.args.allowed_origin_list();
    if configured.is_empty() {
        return None;
    }

    let origin = headers.get("origin")?.to_str().ok()?;
    configured
        .iter()
        .find(|allowed| allowed.as_str() == origin)
        .cloned()
}

fn apply_cors(response: &mut Response<Full<Bytes>>, origin: Option<String>) {
    if let Some(origin) = origin {
        if let Ok(value) = origin.parse() {
            response
                .headers_mut()
                .insert("Access-Control-Allow-Origin", value);
        }
    }
}

fn preflight_response(origin: Option<String>) -> Response<Full<Bytes>> {
    let mut response = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .header(
            "Access-Control-Allow-Headers",
            "Content-Type, X-API-Token, X-Database-Name",
        )
        .body(Full::new(Bytes::new()))
        .unwrap();
    apply_cors(&mut response, origin);
    response
}

async fn handle_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let headers = req.headers().clone();

    debug!(%method, %path, "Incoming request");

    let origin = allowed_origin(&state, &headers);

    if method == Method::OPTIONS {
        return Ok(preflight_response(origin));
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            error!(error = %err, "Failed to read request body");
            let mut response = routes::error_response(SluiceError::BadRequest(
                "Failed to read request body".to_string(),
            ));
            apply_cors(&mut response, origin);
            return Ok(response);
        }
    };

    let mut response = match route_target(&path, &state.args.api_prefix) {
        RouteTarget::Health => routes::health_check(&state).await,
        RouteTarget::Records(sub) => {
            routes::handle_records_request(&state, &method, sub, &query, &headers, body).await
        }
        RouteTarget::Tokens(sub) => {
            routes::handle_tokens_request(&state, &method, sub, &query, &headers, body).await
        }
        RouteTarget::Unknown => routes::not_found_response(),
    };

    apply_cors(&mut response, origin);
    Ok(response)
}

/// Run the HTTP server until `shutdown` resolves
pub async fn run(state: Arc<AppState>, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!(listen = %state.args.listen, "HTTP server listening");

    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = &mut shutdown => {
                info!("Shutdown signal received; no longer accepting connections");
                return Ok(());
            }
        };

        debug!(%peer, "Accepted connection");
        let state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| handle_request(state.clone(), req));

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, error = %err, "Connection ended with error");
            }
        });
    }
}
