//! API token management
//!
//! Tokens are tied to one tenant database. Creation provisions the tenant's
//! measurement collection as a side effect, so a freshly issued token points
//! at a database that is ready to receive data.

use bson::{doc, oid::ObjectId};
use chrono::{DateTime, Duration, Utc};
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::token::{generate_token_secret, hash_token};
use crate::db::schemas::TokenDoc;
use crate::db::{is_duplicate_key_error, MongoManager};
use crate::types::{Result, SluiceError};

/// Persisted information about an API token
#[derive(Debug, Clone, Serialize)]
pub struct TokenMetadata {
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenMetadata {
    fn from_doc(document: &TokenDoc) -> Self {
        Self {
            database: document.database.clone(),
            description: document.description.clone(),
            created_at: document.created_at.to_chrono(),
            last_used_at: document.last_used_at.map(|at| at.to_chrono()),
            expires_at: document.expires_at.map(|at| at.to_chrono()),
        }
    }
}

/// Details about a newly created token, including its one-time secret
#[derive(Debug, Clone, Serialize)]
pub struct CreatedToken {
    /// The token secret. Store it securely; it cannot be recovered later.
    pub token: String,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Token metadata augmented with the document identifier
#[derive(Debug, Clone, Serialize)]
pub struct StoredToken {
    pub id: String,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredToken {
    fn from_doc(database_name: &str, document: &TokenDoc) -> Result<Self> {
        let id = document
            .id
            .ok_or_else(|| SluiceError::Internal("Stored token is missing its ID".to_string()))?;
        Ok(Self {
            id: id.to_hex(),
            database: database_name.to_string(),
            description: document.description.clone(),
            created_at: document.created_at.to_chrono(),
            last_used_at: document.last_used_at.map(|at| at.to_chrono()),
            expires_at: document.expires_at.map(|at| at.to_chrono()),
        })
    }
}

/// Payload for creating a new API token
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTokenRequest {
    /// Tenant database the token grants access to
    pub database: String,
    /// Optional caller-supplied secret; generated when omitted
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// TTL in seconds; zero or omitted means the token never expires
    #[serde(default)]
    pub expires_in_seconds: Option<i64>,
}

/// Retrieve token metadata for `secret`, stamping `last_used_at`.
///
/// An unknown secret maps to an authentication failure, not an internal
/// error; infrastructure failures keep their service-unavailable mapping.
pub async fn fetch_token_metadata(mongo: &MongoManager, secret: &str) -> Result<TokenMetadata> {
    let token_hash = hash_token(secret);

    let Some((document, collection)) = mongo.find_token_document(&token_hash).await? else {
        return Err(SluiceError::Unauthorized("Invalid API token".to_string()));
    };

    let metadata = TokenMetadata::from_doc(&document);

    let id = document
        .id
        .ok_or_else(|| SluiceError::Internal("Stored token is missing its ID".to_string()))?;
    let now = bson::DateTime::from_chrono(Utc::now());
    collection
        .update_one(doc! { "_id": id }, doc! { "$set": { "last_used_at": now } })
        .await
        .map_err(|e| {
            SluiceError::Database(format!("Unable to update token usage timestamp: {}", e))
        })?;

    Ok(metadata)
}

/// Create a new token associated with `request.database`.
///
/// If no secret is supplied a random hex string is generated.
pub async fn create_token(mongo: &MongoManager, request: CreateTokenRequest) -> Result<CreatedToken> {
    let database = request.database.trim().to_string();
    if database.is_empty() {
        return Err(SluiceError::BadRequest("database must not be empty".to_string()));
    }
    if matches!(&request.token, Some(token) if token.is_empty()) {
        return Err(SluiceError::BadRequest(
            "token must not be empty when provided".to_string(),
        ));
    }

    // Provision the tenant's measurement collection so the token points at a
    // database that is ready for writes
    mongo.measurement_collection(&database).await?;
    let collection = mongo.token_collection(&database).await?;

    let secret = request.token.unwrap_or_else(generate_token_secret);
    let token_hash = hash_token(&secret);

    let now = Utc::now();
    let expires_at = match request.expires_in_seconds {
        Some(ttl) if ttl > 0 => Some(now + Duration::seconds(ttl)),
        _ => None,
    };

    let document = TokenDoc {
        id: None,
        token_hash: token_hash.clone(),
        database: database.clone(),
        description: request.description.clone(),
        created_at: bson::DateTime::from_chrono(now),
        last_used_at: None,
        expires_at: expires_at.map(bson::DateTime::from_chrono),
    };

    collection.insert_one(&document).await.map_err(|e| {
        if is_duplicate_key_error(&e) {
            SluiceError::Conflict("A token with the provided value already exists".to_string())
        } else {
            SluiceError::Database(format!("Unable to store the new API token: {}", e))
        }
    })?;

    mongo.remember_token_location(&token_hash, &database);
    info!(database = %database, "Created API token");

    Ok(CreatedToken {
        token: secret,
        database,
        description: request.description,
        created_at: now,
        last_used_at: None,
        expires_at,
    })
}

/// Return metadata for every stored token, optionally scoped to a database
pub async fn list_tokens(
    mongo: &MongoManager,
    database_name: Option<&str>,
) -> Result<Vec<StoredToken>> {
    let collections = mongo.token_collections(database_name).await?;

    let mut tokens = Vec::new();
    for (name, collection) in collections {
        let documents: Vec<TokenDoc> = collection
            .find(doc! {})
            .await
            .map_err(|e| SluiceError::Database(format!("Unable to query stored API tokens: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| SluiceError::Database(format!("Unable to query stored API tokens: {}", e)))?;

        for document in &documents {
            tokens.push(StoredToken::from_doc(&name, document)?);
        }
    }

    Ok(tokens)
}

/// Delete the token with `token_id` persisted inside `database_name`
pub async fn revoke_token(mongo: &MongoManager, database_name: &str, token_id: &str) -> Result<()> {
    let object_id = ObjectId::parse_str(token_id).map_err(|_| {
        SluiceError::NotFound("Token not found for the requested database".to_string())
    })?;

    let collection = mongo.token_collection(database_name).await?;

    let deleted = collection
        .find_one_and_delete(doc! { "_id": object_id })
        .await
        .map_err(|e| {
            SluiceError::Database(format!("Unable to revoke the requested API token: {}", e))
        })?;

    let Some(document) = deleted else {
        return Err(SluiceError::NotFound(
            "Token not found for the requested database".to_string(),
        ));
    };

    mongo.forget_token_location(&document.token_hash);
    info!(database = database_name, "Revoked API token");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MongoSettings;
    use clap::Parser;

    fn manager() -> MongoManager {
        let args = crate::config::Args::parse_from(["sluice", "--api-admin-token", "root"]);
        MongoManager::new(MongoSettings::from_args(&args))
    }

    #[test]
    fn test_stored_token_from_doc() {
        let mut document = TokenDoc::new(
            "hash".to_string(),
            "metrics".to_string(),
            Some("ingest".to_string()),
            None,
        );
        document.id = Some(ObjectId::new());

        let stored = StoredToken::from_doc("metrics", &document).unwrap();
        assert_eq!(stored.id.len(), 24);
        assert_eq!(stored.database, "metrics");
        assert_eq!(stored.description.as_deref(), Some("ingest"));
        assert!(stored.last_used_at.is_none());
    }

    #[test]
    fn test_stored_token_requires_id() {
        let document = TokenDoc::new("hash".to_string(), "metrics".to_string(), None, None);
        assert!(matches!(
            StoredToken::from_doc("metrics", &document).unwrap_err(),
            SluiceError::Internal(_)
        ));
    }

    #[test]
    fn test_created_token_serializes_one_time_secret() {
        let created = CreatedToken {
            token: "aabbcc".to_string(),
            database: "metrics".to_string(),
            description: None,
            created_at: Utc::now(),
            last_used_at: None,
            expires_at: None,
        };

        let json = serde_json::to_value(&created).unwrap();
        assert_eq!(json["token"], "aabbcc");
        assert_eq!(json["database"], "metrics");
        assert_eq!(json["last_used_at"], serde_json::Value::Null);
        assert!(json.get("expires_at").is_none());
        assert!(json.get("description").is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_blank_database() {
        let mongo = manager();
        let err = create_token(
            &mongo,
            CreateTokenRequest {
                database: "   ".to_string(),
                token: None,
                description: None,
                expires_in_seconds: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SluiceError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_empty_secret() {
        let mongo = manager();
        let err = create_token(
            &mongo,
            CreateTokenRequest {
                database: "metrics".to_string(),
                token: Some(String::new()),
                description: None,
                expires_in_seconds: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SluiceError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_revoke_with_invalid_id_is_not_found() {
        let mongo = manager();
        let err = revoke_token(&mongo, "metrics", "not-an-object-id")
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::NotFound(_)));
    }
}
