//! Measurement CRUD and search
//!
//! Operates on a tenant's time-series collection handle obtained from the
//! manager. Filters accept the API spelling of fields (`source`, `id`) and
//! translate them to the persisted layout.

use bson::{doc, oid::ObjectId, Bson, Document};
use chrono::{DateTime, Duration, Utc};
use futures_util::TryStreamExt;
use mongodb::options::ReturnDocument;
use mongodb::Collection;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::db::schemas::MeasurementDoc;
use crate::types::{Result, SluiceError};
use crate::utils::parsing::{coerce_value, normalize_field_path};

/// Payload required to create a new measurement
#[derive(Debug, Clone, Deserialize)]
pub struct MeasurementCreate {
    /// Origin identifier (alias: acronym)
    #[serde(alias = "acronym")]
    pub source: String,
    #[serde(default)]
    pub component: Option<String>,
    /// Arbitrary data describing the measurement (any JSON value)
    pub payload: JsonValue,
    #[serde(default)]
    pub metadata: serde_json::Map<String, JsonValue>,
    /// Defaults to the creation instant; always normalized to UTC
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Optional TTL in seconds; omitted or zero means the measurement never
    /// expires
    #[serde(default)]
    pub expires_in_seconds: Option<i64>,
}

/// Payload for partial updates of a measurement
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeasurementUpdate {
    #[serde(default, alias = "acronym")]
    pub source: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub payload: Option<JsonValue>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, JsonValue>>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Search filters for measurements
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub field: Option<String>,
    pub value: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub latest: bool,
    pub limit: i64,
}

/// Representation of a measurement returned to API consumers
#[derive(Debug, Clone, Serialize)]
pub struct MeasurementOut {
    pub id: String,
    #[serde(rename = "acronym")]
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    pub payload: JsonValue,
    pub metadata: JsonValue,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl MeasurementOut {
    fn from_doc(document: MeasurementDoc) -> Result<Self> {
        let id = document.id.ok_or_else(|| {
            SluiceError::Internal("Stored measurement is missing its ID".to_string())
        })?;
        Ok(Self {
            id: id.to_hex(),
            source: document.source,
            component: document.component,
            payload: document.payload.into_relaxed_extjson(),
            metadata: Bson::Document(document.metadata).into_relaxed_extjson(),
            timestamp: document.timestamp.to_chrono(),
            expires_at: document.expires_at.map(|at| at.to_chrono()),
        })
    }
}

fn object_id(value: &str) -> Result<ObjectId> {
    ObjectId::parse_str(value).map_err(|_| {
        SluiceError::Unprocessable("The provided record identifier is invalid".to_string())
    })
}

fn json_to_bson(value: JsonValue) -> Result<Bson> {
    Bson::try_from(value)
        .map_err(|e| SluiceError::BadRequest(format!("payload is not valid BSON: {}", e)))
}

fn json_map_to_document(map: serde_json::Map<String, JsonValue>) -> Result<Document> {
    Document::try_from(map)
        .map_err(|e| SluiceError::BadRequest(format!("metadata is not valid BSON: {}", e)))
}

/// Compute the expiry instant for a new measurement.
/// A zero TTL means "never expires"; negative values are rejected.
fn compute_expires_at(
    timestamp: DateTime<Utc>,
    expires_in_seconds: Option<i64>,
) -> Result<Option<DateTime<Utc>>> {
    match expires_in_seconds {
        None | Some(0) => Ok(None),
        Some(ttl) if ttl < 0 => Err(SluiceError::Unprocessable(
            "expires_in_seconds must be greater than or equal to 0".to_string(),
        )),
        Some(ttl) => Ok(Some(timestamp + Duration::seconds(ttl))),
    }
}

/// Insert a new measurement and return the stored representation
pub async fn create_measurement(
    collection: &Collection<MeasurementDoc>,
    payload: MeasurementCreate,
) -> Result<MeasurementOut> {
    let timestamp = payload.timestamp.unwrap_or_else(Utc::now);
    let expires_at = compute_expires_at(timestamp, payload.expires_in_seconds)?;

    let document = MeasurementDoc {
        id: None,
        source: payload.source,
        component: payload.component,
        payload: json_to_bson(payload.payload)?,
        metadata: json_map_to_document(payload.metadata)?,
        timestamp: bson::DateTime::from_chrono(timestamp),
        expires_at: expires_at.map(bson::DateTime::from_chrono),
    };

    let result = collection
        .insert_one(&document)
        .await
        .map_err(|e| SluiceError::Database(format!("Unable to store the record: {}", e)))?;

    // Read the document back so the response reflects what was persisted
    let inserted = collection
        .find_one(doc! { "_id": result.inserted_id.clone() })
        .await
        .map_err(|e| SluiceError::Database(format!("Unable to read back the record: {}", e)))?
        .ok_or_else(|| {
            SluiceError::Internal("Inserted record could not be read back".to_string())
        })?;

    MeasurementOut::from_doc(inserted)
}

/// Fetch a single measurement by its identifier
pub async fn fetch_measurement(
    collection: &Collection<MeasurementDoc>,
    record_id: &str,
) -> Result<MeasurementOut> {
    let oid = object_id(record_id)?;

    let document = collection
        .find_one(doc! { "_id": oid })
        .await
        .map_err(|e| SluiceError::Database(format!("Failed to retrieve the record: {}", e)))?
        .ok_or_else(|| SluiceError::NotFound("Record not found".to_string()))?;

    MeasurementOut::from_doc(document)
}

/// Return a paginated list of measurements, most recent first
pub async fn list_measurements(
    collection: &Collection<MeasurementDoc>,
    limit: i64,
    skip: u64,
) -> Result<Vec<MeasurementOut>> {
    let documents: Vec<MeasurementDoc> = collection
        .find(doc! {})
        .sort(doc! { "timestamp": -1 })
        .skip(skip)
        .limit(limit)
        .await
        .map_err(|e| SluiceError::Database(format!("Failed to retrieve records: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| SluiceError::Database(format!("Failed to retrieve records: {}", e)))?;

    documents.into_iter().map(MeasurementOut::from_doc).collect()
}

/// Build the `$set` document for a partial update
fn build_update_document(updates: MeasurementUpdate) -> Result<Document> {
    let mut set = Document::new();

    if let Some(source) = updates.source {
        set.insert("acronym", source);
    }
    if let Some(component) = updates.component {
        set.insert("component", component);
    }
    if let Some(payload) = updates.payload {
        set.insert("payload", json_to_bson(payload)?);
    }
    if let Some(metadata) = updates.metadata {
        set.insert("metadata", json_map_to_document(metadata)?);
    }
    if let Some(timestamp) = updates.timestamp {
        set.insert("timestamp", bson::DateTime::from_chrono(timestamp));
    }
    if let Some(expires_at) = updates.expires_at {
        set.insert("expires_at", bson::DateTime::from_chrono(expires_at));
    }

    if set.is_empty() {
        return Err(SluiceError::BadRequest(
            "At least one field must be provided for update".to_string(),
        ));
    }

    Ok(set)
}

/// Update an existing measurement with the provided fields
pub async fn update_measurement(
    collection: &Collection<MeasurementDoc>,
    record_id: &str,
    updates: MeasurementUpdate,
) -> Result<MeasurementOut> {
    let oid = object_id(record_id)?;
    let set = build_update_document(updates)?;

    let document = collection
        .find_one_and_update(doc! { "_id": oid }, doc! { "$set": set })
        .return_document(ReturnDocument::After)
        .await
        .map_err(|e| SluiceError::Database(format!("Failed to update the record: {}", e)))?
        .ok_or_else(|| SluiceError::NotFound("Record not found for update".to_string()))?;

    MeasurementOut::from_doc(document)
}

/// Remove a measurement
pub async fn delete_measurement(
    collection: &Collection<MeasurementDoc>,
    record_id: &str,
) -> Result<()> {
    let oid = object_id(record_id)?;

    let result = collection
        .delete_one(doc! { "_id": oid })
        .await
        .map_err(|e| SluiceError::Database(format!("Failed to delete the record: {}", e)))?;

    if result.deleted_count == 0 {
        return Err(SluiceError::NotFound(
            "Record not found for deletion".to_string(),
        ));
    }
    Ok(())
}

/// Build the query document for a search request
fn build_search_filter(params: &SearchParams) -> Result<Document> {
    let mut query = Document::new();

    if let (Some(field), Some(value)) = (&params.field, &params.value) {
        let normalized = normalize_field_path(field);
        let mut coerced = coerce_value(value);
        if normalized == "_id" {
            let raw = match &coerced {
                Bson::String(s) => s.clone(),
                other => other.to_string(),
            };
            coerced = Bson::ObjectId(object_id(&raw)?);
        }
        query.insert(normalized, coerced);
    }

    if params.start_time.is_some() || params.end_time.is_some() {
        let mut range = Document::new();
        if let Some(start) = params.start_time {
            range.insert("$gte", bson::DateTime::from_chrono(start));
        }
        if let Some(end) = params.end_time {
            range.insert("$lte", bson::DateTime::from_chrono(end));
        }
        query.insert("timestamp", range);
    }

    Ok(query)
}

/// Search measurements with optional filters.
///
/// Returns the matches and whether only the latest match was requested.
pub async fn search_measurements(
    collection: &Collection<MeasurementDoc>,
    params: SearchParams,
) -> Result<(Vec<MeasurementOut>, bool)> {
    let query = build_search_filter(&params)?;
    let limit = if params.latest { 1 } else { params.limit };

    let documents: Vec<MeasurementDoc> = collection
        .find(query)
        .sort(doc! { "timestamp": -1 })
        .limit(limit)
        .await
        .map_err(|e| SluiceError::Database(format!("Failed to search records: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| SluiceError::Database(format!("Failed to search records: {}", e)))?;

    let items = documents
        .into_iter()
        .map(MeasurementOut::from_doc)
        .collect::<Result<Vec<_>>>()?;

    Ok((items, params.latest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_at_is_timestamp_plus_ttl() {
        let timestamp = Utc::now();
        let expires_at = compute_expires_at(timestamp, Some(600)).unwrap().unwrap();
        assert_eq!(expires_at, timestamp + Duration::seconds(600));
    }

    #[test]
    fn test_no_ttl_means_no_expiry() {
        let timestamp = Utc::now();
        assert_eq!(compute_expires_at(timestamp, None).unwrap(), None);
        assert_eq!(compute_expires_at(timestamp, Some(0)).unwrap(), None);
    }

    #[test]
    fn test_negative_ttl_is_rejected() {
        let err = compute_expires_at(Utc::now(), Some(-1)).unwrap_err();
        assert!(matches!(err, SluiceError::Unprocessable(_)));
    }

    #[test]
    fn test_create_payload_accepts_source_alias() {
        let parsed: MeasurementCreate =
            serde_json::from_str(r#"{"acronym": "ws-1", "payload": 21.5}"#).unwrap();
        assert_eq!(parsed.source, "ws-1");

        let parsed: MeasurementCreate =
            serde_json::from_str(r#"{"source": "ws-2", "payload": {"t": 1}}"#).unwrap();
        assert_eq!(parsed.source, "ws-2");
    }

    #[test]
    fn test_update_document_translates_aliases() {
        let set = build_update_document(MeasurementUpdate {
            source: Some("ws-9".to_string()),
            component: Some("sensor".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(set.get_str("acronym").unwrap(), "ws-9");
        assert_eq!(set.get_str("component").unwrap(), "sensor");
        assert!(!set.contains_key("source"));
    }

    #[test]
    fn test_empty_update_is_rejected() {
        let err = build_update_document(MeasurementUpdate::default()).unwrap_err();
        assert!(matches!(err, SluiceError::BadRequest(_)));
    }

    #[test]
    fn test_search_filter_field_and_window() {
        let start = Utc::now();
        let end = start + Duration::seconds(60);
        let query = build_search_filter(&SearchParams {
            field: Some("source".to_string()),
            value: Some("ws-1".to_string()),
            start_time: Some(start),
            end_time: Some(end),
            latest: false,
            limit: 100,
        })
        .unwrap();

        assert_eq!(query.get_str("acronym").unwrap(), "ws-1");
        let range = query.get_document("timestamp").unwrap();
        assert!(range.contains_key("$gte"));
        assert!(range.contains_key("$lte"));
    }

    #[test]
    fn test_search_filter_coerces_id() {
        let oid = ObjectId::new();
        let query = build_search_filter(&SearchParams {
            field: Some("id".to_string()),
            value: Some(oid.to_hex()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(query.get_object_id("_id").unwrap(), oid);

        let err = build_search_filter(&SearchParams {
            field: Some("id".to_string()),
            value: Some("nonsense".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, SluiceError::Unprocessable(_)));
    }

    #[test]
    fn test_search_filter_without_filters_is_empty() {
        let query = build_search_filter(&SearchParams::default()).unwrap();
        assert!(query.is_empty());
    }

    #[test]
    fn test_measurement_out_round_trip() {
        let timestamp = Utc::now();
        let mut document = MeasurementDoc::new(
            "ws-1".to_string(),
            Bson::Double(21.5),
            bson::DateTime::from_chrono(timestamp),
        );
        document.id = Some(ObjectId::new());

        let out = MeasurementOut::from_doc(document).unwrap();
        assert_eq!(out.source, "ws-1");
        assert_eq!(out.payload, serde_json::json!(21.5));
        assert!(out.expires_at.is_none());

        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["acronym"], "ws-1");
        assert!(json.get("expires_at").is_none());
        assert!(json.get("component").is_none());
    }
}
