//! API token document schema
//!
//! Stores hashed API tokens inside the tenant database they grant access to.
//! Only the SHA-256 hash of a secret is ever persisted.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::mongo::IntoIndexes;

/// API token document stored in a tenant's token collection
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TokenDoc {
    /// MongoDB document ID
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// SHA-256 hex digest of the token secret (unique per collection)
    pub token_hash: String,

    /// Tenant database this token grants access to
    pub database: String,

    /// Human friendly description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// When the token was created (UTC)
    pub created_at: DateTime,

    /// Last successful authentication with this token (null until first use)
    #[serde(default)]
    pub last_used_at: Option<DateTime>,

    /// When the token expires. Absent means the token never expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime>,
}

impl TokenDoc {
    /// Create a new token document without an ID
    pub fn new(
        token_hash: String,
        database: String,
        description: Option<String>,
        expires_at: Option<DateTime>,
    ) -> Self {
        Self {
            id: None,
            token_hash,
            database,
            description,
            created_at: DateTime::now(),
            last_used_at: None,
            expires_at,
        }
    }

    /// Check if the token has expired
    pub fn is_expired(&self) -> bool {
        if let Some(expires_at) = self.expires_at {
            expires_at < DateTime::now()
        } else {
            false
        }
    }
}

impl IntoIndexes for TokenDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on token_hash
            (
                doc! { "token_hash": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("token_hash_1".to_string())
                        .build(),
                ),
            ),
            // Server-side TTL on expires_at; the inline sweeper also deletes
            // expired tokens so it can evict the location cache
            (
                doc! { "expires_at": 1 },
                Some(
                    IndexOptions::builder()
                        .expire_after(Duration::from_secs(0))
                        .name("expires_at_ttl".to_string())
                        .build(),
                ),
            ),
        ]
    }
}
