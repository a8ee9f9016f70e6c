//! Measurement CRUD routes
//!
//! Mounted under `{prefix}/records`. Every route resolves the caller's token
//! context first; the tenant database comes from the token (or the override
//! header for admin calls), never from the path.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::{HeaderMap, Method, Response, StatusCode};
use serde::Serialize;
use std::collections::HashMap;

use mongodb::Collection;

use crate::auth::context::resolve_context;
use crate::db::schemas::MeasurementDoc;
use crate::routes::{
    empty_response, error_response, json_response, method_not_allowed_response,
    not_found_response, parse_query_params,
};
use crate::server::AppState;
use crate::services::measurements::{
    self, MeasurementCreate, MeasurementOut, MeasurementUpdate, SearchParams,
};
use crate::types::{Result, SluiceError};

/// Parsed records route components
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RecordsRoute<'a> {
    /// `{prefix}/records`
    Collection,
    /// `{prefix}/records/search` (matched before the item arm)
    Search,
    /// `{prefix}/records/{id}`
    Item(&'a str),
}

impl<'a> RecordsRoute<'a> {
    /// Parse the path remainder after `{prefix}/records`
    pub(crate) fn parse(subpath: &'a str) -> Option<Self> {
        let trimmed = subpath.trim_start_matches('/');
        match trimmed {
            "" => Some(Self::Collection),
            "search" => Some(Self::Search),
            id if !id.contains('/') => Some(Self::Item(id)),
            _ => None,
        }
    }
}

/// Response payload returned by the search endpoint
#[derive(Debug, Serialize)]
struct SearchResponse {
    latest: bool,
    count: usize,
    items: Vec<MeasurementOut>,
}

fn parse_i64_param(
    params: &HashMap<String, String>,
    name: &str,
    default: i64,
) -> Result<i64> {
    match params.get(name) {
        None => Ok(default),
        Some(raw) => raw.parse::<i64>().map_err(|_| {
            SluiceError::Unprocessable(format!("{} must be an integer", name))
        }),
    }
}

fn parse_timestamp_param(
    params: &HashMap<String, String>,
    name: &str,
) -> Result<Option<DateTime<Utc>>> {
    match params.get(name) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|_| {
                SluiceError::Unprocessable(format!("{} must be an ISO-8601 timestamp", name))
            }),
    }
}

fn parse_limit(params: &HashMap<String, String>) -> Result<i64> {
    let limit = parse_i64_param(params, "limit", 100)?;
    if !(1..=1000).contains(&limit) {
        return Err(SluiceError::Unprocessable(
            "limit must be between 1 and 1000".to_string(),
        ));
    }
    Ok(limit)
}

fn parse_skip(params: &HashMap<String, String>) -> Result<u64> {
    let skip = parse_i64_param(params, "skip", 0)?;
    u64::try_from(skip)
        .map_err(|_| SluiceError::Unprocessable("skip must not be negative".to_string()))
}

/// Handle requests under `{prefix}/records`
pub async fn handle_records_request(
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

    let collection = match state.mongo.measurement_collection(&context.database_name).await {
        Ok(collection) => collection,
        Err(err) => return error_response(err),
    };

    let Some(route) = RecordsRoute::parse(subpath) else {
        return not_found_response();
    };
    let params = parse_query_params(query);

    let result = match (method, route) {
        (&Method::POST, RecordsRoute::Collection) => {
            match serde_json::from_slice::<MeasurementCreate>(&body) {
                Ok(payload) => measurements::create_measurement(&collection, payload)
                    .await
                    .map(|created| json_response(StatusCode::CREATED, &created)),
                Err(err) => Err(SluiceError::Unprocessable(format!("Invalid body: {}", err))),
            }
        }
        (&Method::GET, RecordsRoute::Collection) => {
            let listing = async {
                let limit = parse_limit(&params)?;
                let skip = parse_skip(&params)?;
                measurements::list_measurements(&collection, limit, skip).await
            };
            listing
                .await
                .map(|items| json_response(StatusCode::OK, &items))
        }
        (&Method::GET, RecordsRoute::Search) => handle_search(&collection, &params).await,
        (&Method::GET, RecordsRoute::Item(id)) => measurements::fetch_measurement(&collection, id)
            .await
            .map(|record| json_response(StatusCode::OK, &record)),
        (&Method::PUT, RecordsRoute::Item(id)) => {
            match serde_json::from_slice::<MeasurementUpdate>(&body) {
                Ok(updates) => measurements::update_measurement(&collection, id, updates)
                    .await
                    .map(|record| json_response(StatusCode::OK, &record)),
                Err(err) => Err(SluiceError::Unprocessable(format!("Invalid body: {}", err))),
            }
        }
        (&Method::DELETE, RecordsRoute::Item(id)) => {
            measurements::delete_measurement(&collection, id)
                .await
                .map(|_| empty_response(StatusCode::NO_CONTENT))
        }
        _ => return method_not_allowed_response(),
    };

    result.unwrap_or_else(error_response)
}

async fn handle_search(
    collection: &Collection<MeasurementDoc>,
    params: &HashMap<String, String>,
) -> Result<Response<Full<Bytes>>> {
    let latest = matches!(
        params.get("latest").map(String::as_str),
        Some("true") | Some("True") | Some("1")
    );
    let start_time = parse_timestamp_param(params, "start_time")?;
    let end_time = parse_timestamp_param(params, "end_time")?;

    if let (Some(start), Some(end)) = (start_time, end_time) {
        if start > end {
            return Err(SluiceError::BadRequest(
                "The start_time must be before the end_time".to_string(),
            ));
        }
    }

    let search = SearchParams {
        field: params.get("field").cloned(),
        value: params.get("value").cloned(),
        start_time,
        end_time,
        latest,
        limit: parse_limit(params)?,
    };

    let (items, only_latest) = measurements::search_measurements(collection, search).await?;

    if only_latest && items.is_empty() {
        return Err(SluiceError::NotFound(
            "No records found for the given filters".to_string(),
        ));
    }

    Ok(json_response(
        StatusCode::OK,
        &SearchResponse {
            latest: only_latest,
            count: items.len(),
            items,
        },
    ))
}
