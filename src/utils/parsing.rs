//! Parsing helpers for user supplied search filters

use bson::Bson;

/// Map of API field names to their persisted equivalents. `source` is stored
/// under its historical name `acronym`; `id` is the document `_id`.
const FIELD_ALIASES: [(&str, &str); 4] = [
    ("source", "acronym"),
    ("acronym", "acronym"),
    ("id", "_id"),
    ("_id", "_id"),
];

/// Convert an API field name (optionally dotted) into its persisted path
pub fn normalize_field_path(field: &str) -> String {
    for (external, internal) in FIELD_ALIASES {
        if field == external {
            return internal.to_string();
        }
        if let Some(suffix) = field.strip_prefix(external) {
            if suffix.starts_with('.') {
                return format!("{}{}", internal, suffix);
            }
        }
    }
    field.to_string()
}

/// Attempt to coerce a string filter value into JSON, bool or fall back to
/// a plain string
pub fn coerce_value(value: &str) -> Bson {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(value) {
        if let Ok(bson) = Bson::try_from(json) {
            return bson;
        }
    }

    match value.to_lowercase().as_str() {
        "true" => Bson::Boolean(true),
        "false" => Bson::Boolean(false),
        _ => Bson::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_field_path() {
        assert_eq!(normalize_field_path("source"), "acronym");
        assert_eq!(normalize_field_path("acronym"), "acronym");
        assert_eq!(normalize_field_path("id"), "_id");
        assert_eq!(normalize_field_path("_id"), "_id");
        assert_eq!(normalize_field_path("payload.temperature"), "payload.temperature");
        assert_eq!(normalize_field_path("source.station"), "acronym.station");
        // Prefix match requires a dot boundary
        assert_eq!(normalize_field_path("sourceful"), "sourceful");
    }

    #[test]
    fn test_coerce_json_values() {
        assert!(matches!(coerce_value("42"), Bson::Int32(42) | Bson::Int64(42)));
        assert_eq!(coerce_value("4.5"), Bson::Double(4.5));
        assert_eq!(coerce_value("true"), Bson::Boolean(true));
        assert_eq!(coerce_value("\"quoted\""), Bson::String("quoted".to_string()));
        assert_eq!(coerce_value("null"), Bson::Null);
    }

    #[test]
    fn test_coerce_bool_spellings() {
        assert_eq!(coerce_value("True"), Bson::Boolean(true));
        assert_eq!(coerce_value("FALSE"), Bson::Boolean(false));
    }

    #[test]
    fn test_coerce_fallback_is_string() {
        assert_eq!(
            coerce_value("weather-station"),
            Bson::String("weather-station".to_string())
        );
        assert_eq!(coerce_value(""), Bson::String(String::new()));
    }
}
