//! Measurement document schema
//!
//! One document per data point in a tenant's time-series collection. The
//! source identifier is persisted under its historical field name `acronym`;
//! the API accepts either spelling.

use bson::{oid::ObjectId, Bson, DateTime, Document};
use serde::{Deserialize, Serialize};

/// Measurement document stored in a tenant's time-series collection
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MeasurementDoc {
    /// MongoDB document ID
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Origin identifier for the measurement (persisted as `acronym`)
    #[serde(rename = "acronym", alias = "source")]
    pub source: String,

    /// Logical component associated with the measurement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    /// Arbitrary data describing the measurement (any BSON value)
    pub payload: Bson,

    /// Grouping metadata stored in the time-series meta field
    #[serde(default)]
    pub metadata: Document,

    /// When the measurement was produced (UTC, the time-series time field)
    pub timestamp: DateTime,

    /// When the measurement becomes eligible for sweeping.
    /// Absent (not null) means the measurement never expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime>,
}

impl MeasurementDoc {
    /// Create a new measurement document without an ID
    pub fn new(source: String, payload: Bson, timestamp: DateTime) -> Self {
        Self {
            id: None,
            source,
            component: None,
            payload,
            metadata: Document::new(),
            timestamp,
            expires_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_source_persisted_as_acronym() {
        let doc = MeasurementDoc::new(
            "weather-station".to_string(),
            Bson::Double(21.5),
            DateTime::now(),
        );

        let serialized = bson::to_document(&doc).unwrap();
        assert_eq!(serialized.get_str("acronym").unwrap(), "weather-station");
        assert!(!serialized.contains_key("source"));
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let doc = MeasurementDoc::new("s".to_string(), Bson::Int32(1), DateTime::now());
        let serialized = bson::to_document(&doc).unwrap();

        assert!(!serialized.contains_key("_id"));
        assert!(!serialized.contains_key("component"));
        assert!(!serialized.contains_key("expires_at"));
    }

    #[test]
    fn test_deserializes_source_alias() {
        let raw = doc! {
            "source": "legacy-name",
            "payload": 3,
            "timestamp": DateTime::now(),
        };

        let parsed: MeasurementDoc = bson::from_document(raw).unwrap();
        assert_eq!(parsed.source, "legacy-name");
    }

    #[test]
    fn test_round_trips_expires_at() {
        let mut doc = MeasurementDoc::new("s".to_string(), Bson::Int32(1), DateTime::now());
        doc.expires_at = Some(DateTime::from_millis(doc.timestamp.timestamp_millis() + 600_000));

        let serialized = bson::to_document(&doc).unwrap();
        let parsed: MeasurementDoc = bson::from_document(serialized).unwrap();
        assert_eq!(parsed.expires_at, doc.expires_at);
    }
}
