//! Time-field index reconciliation
//!
//! Measurement collections must carry exactly one ascending index on the
//! configured time field, named `"<field>_1"`, with no `expireAfterSeconds`
//! and no `partialFilterExpression`. Collection-level TTL indexes from
//! earlier deployments are dropped; per-document expiry is handled by the
//! inline sweeper instead.
//!
//! The decision logic is pure over fetched index metadata, so reconciliation
//! plans can be tested without a live server.

use bson::{doc, Bson, Document};
use futures_util::TryStreamExt;
use mongodb::{options::IndexOptions, Collection, IndexModel};
use tracing::info;

use crate::types::{Result, SluiceError};

/// Index names used by earlier generations of this service for
/// collection-level TTL expiry. Must not coexist with the sweeper.
const LEGACY_TTL_INDEX_NAMES: [&str; 2] = ["expires_at_ttl", "expires_at_1"];

/// Deterministic name of the time-ordering index
pub fn time_index_name(time_field: &str) -> String {
    format!("{}_1", time_field)
}

/// What to do about the time-ordering index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeIndexAction {
    /// No index under the expected name; create it
    Create,
    /// Index exists but has the wrong shape or carries TTL/partial options;
    /// drop and recreate it plain
    Recreate,
    /// Index already matches the target shape
    Keep,
}

fn index_name(model: &IndexModel) -> Option<&str> {
    model.options.as_ref().and_then(|opts| opts.name.as_deref())
}

/// Whether the index keys are exactly `{ <time_field>: 1 }`.
/// Servers report the key value as Int32, Int64 or Double depending on how
/// the index was created; all spell "ascending".
fn keys_match(keys: &Document, time_field: &str) -> bool {
    if keys.len() != 1 {
        return false;
    }
    match keys.get(time_field) {
        Some(Bson::Int32(1)) | Some(Bson::Int64(1)) => true,
        Some(Bson::Double(value)) => *value == 1.0,
        _ => false,
    }
}

fn time_index_action(existing: Option<&IndexModel>, time_field: &str) -> TimeIndexAction {
    let Some(model) = existing else {
        return TimeIndexAction::Create;
    };

    if !keys_match(&model.keys, time_field) {
        return TimeIndexAction::Recreate;
    }

    if let Some(opts) = &model.options {
        if opts.expire_after.is_some() || opts.partial_filter_expression.is_some() {
            return TimeIndexAction::Recreate;
        }
    }

    TimeIndexAction::Keep
}

/// First legacy TTL index present on the collection, checked in historical
/// order (`expires_at_ttl` predates `expires_at_1`)
fn legacy_ttl_index(indexes: &[IndexModel]) -> Option<&str> {
    LEGACY_TTL_INDEX_NAMES.iter().copied().find(|candidate| {
        indexes
            .iter()
            .any(|model| index_name(model) == Some(candidate))
    })
}

fn wrap(err: mongodb::error::Error) -> SluiceError {
    SluiceError::Database(format!("Failed to ensure measurement indexes: {}", err))
}

/// Reconcile the time-ordering index on a measurement collection.
///
/// Idempotent: a collection already in the target shape produces zero
/// create/drop calls.
pub async fn ensure_time_index<T>(collection: &Collection<T>, time_field: &str) -> Result<()>
where
    T: Send + Sync,
{
    let indexes: Vec<IndexModel> = collection
        .list_indexes()
        .await
        .map_err(wrap)?
        .try_collect()
        .await
        .map_err(wrap)?;

    let name = time_index_name(time_field);
    let existing = indexes
        .iter()
        .find(|model| index_name(model) == Some(name.as_str()));

    let target = IndexModel::builder()
        .keys(doc! { time_field: 1 })
        .options(IndexOptions::builder().name(name.clone()).build())
        .build();

    match time_index_action(existing, time_field) {
        TimeIndexAction::Keep => {}
        TimeIndexAction::Create => {
            collection.create_index(target).await.map_err(wrap)?;
        }
        TimeIndexAction::Recreate => {
            info!(
                collection = collection.name(),
                index = %name,
                "Recreating time index without TTL/partial options"
            );
            collection.drop_index(&name).await.map_err(wrap)?;
            collection.create_index(target).await.map_err(wrap)?;
        }
    }

    if let Some(legacy) = legacy_ttl_index(&indexes) {
        info!(
            collection = collection.name(),
            index = legacy,
            "Dropping legacy collection-level TTL index"
        );
        collection.drop_index(legacy).await.map_err(wrap)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn named(keys: Document, name: &str) -> IndexModel {
        IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().name(name.to_string()).build())
            .build()
    }

    fn plain_time_index() -> IndexModel {
        named(doc! { "timestamp": 1 }, "timestamp_1")
    }

    #[test]
    fn test_missing_index_is_created() {
        assert_eq!(
            time_index_action(None, "timestamp"),
            TimeIndexAction::Create
        );
    }

    #[test]
    fn test_correct_index_is_kept() {
        let model = plain_time_index();
        assert_eq!(
            time_index_action(Some(&model), "timestamp"),
            TimeIndexAction::Keep
        );
    }

    #[test]
    fn test_double_valued_key_is_kept() {
        // Older servers report {timestamp: 1.0}
        let model = named(doc! { "timestamp": 1.0 }, "timestamp_1");
        assert_eq!(
            time_index_action(Some(&model), "timestamp"),
            TimeIndexAction::Keep
        );
    }

    #[test]
    fn test_wrong_key_shape_is_recreated() {
        let wrong_field = named(doc! { "created": 1 }, "timestamp_1");
        assert_eq!(
            time_index_action(Some(&wrong_field), "timestamp"),
            TimeIndexAction::Recreate
        );

        let descending = named(doc! { "timestamp": -1 }, "timestamp_1");
        assert_eq!(
            time_index_action(Some(&descending), "timestamp"),
            TimeIndexAction::Recreate
        );

        let compound = named(doc! { "timestamp": 1, "acronym": 1 }, "timestamp_1");
        assert_eq!(
            time_index_action(Some(&compound), "timestamp"),
            TimeIndexAction::Recreate
        );
    }

    #[test]
    fn test_ttl_option_forces_recreation() {
        let model = IndexModel::builder()
            .keys(doc! { "timestamp": 1 })
            .options(
                IndexOptions::builder()
                    .name("timestamp_1".to_string())
                    .expire_after(Duration::from_secs(86_400))
                    .build(),
            )
            .build();
        assert_eq!(
            time_index_action(Some(&model), "timestamp"),
            TimeIndexAction::Recreate
        );
    }

    #[test]
    fn test_partial_filter_forces_recreation() {
        let model = IndexModel::builder()
            .keys(doc! { "timestamp": 1 })
            .options(
                IndexOptions::builder()
                    .name("timestamp_1".to_string())
                    .partial_filter_expression(doc! { "expires_at": { "$exists": true } })
                    .build(),
            )
            .build();
        assert_eq!(
            time_index_action(Some(&model), "timestamp"),
            TimeIndexAction::Recreate
        );
    }

    #[test]
    fn test_second_pass_is_a_no_op() {
        // After reconciliation the collection carries exactly the plain index
        let model = plain_time_index();
        assert_eq!(
            time_index_action(Some(&model), "timestamp"),
            TimeIndexAction::Keep
        );
        assert_eq!(legacy_ttl_index(std::slice::from_ref(&model)), None);
    }

    #[test]
    fn test_legacy_ttl_detection() {
        assert_eq!(legacy_ttl_index(&[plain_time_index()]), None);

        let ttl = named(doc! { "expires_at": 1 }, "expires_at_ttl");
        assert_eq!(
            legacy_ttl_index(&[plain_time_index(), ttl.clone()]),
            Some("expires_at_ttl")
        );

        let legacy = named(doc! { "expires_at": 1 }, "expires_at_1");
        assert_eq!(
            legacy_ttl_index(std::slice::from_ref(&legacy)),
            Some("expires_at_1")
        );

        // Both present: only the older name is reported (single drop per pass)
        assert_eq!(
            legacy_ttl_index(&[legacy, ttl]),
            Some("expires_at_ttl")
        );
    }

    #[test]
    fn test_time_index_name() {
        assert_eq!(time_index_name("timestamp"), "timestamp_1");
        assert_eq!(time_index_name("recorded_at"), "recorded_at_1");
    }
}
