//! MongoDB client and tenant collection lifecycle
//!
//! One long-lived client serves every in-flight request; the driver manages
//! its own connection pool. Per-tenant databases hold a time-series
//! measurement collection and an API token collection, both provisioned
//! lazily on first reference and memoized. Collection fetches trigger the
//! inline expiry sweep, and token lookups resolve through a cascading
//! fast/medium/slow path (location cache, open collections, full server
//! scan).
//!
//! Cache entries are pure memoization and never the source of truth;
//! populating them concurrently is harmless, so no lock serializes creators.
//! The store's own create-if-absent semantics make duplicate provisioning a
//! recoverable race.

use std::collections::HashSet;
use std::time::Duration;

use bson::{doc, oid::ObjectId, Document};
use chrono::Utc;
use dashmap::DashMap;
use futures_util::TryStreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{ClientOptions, Credential, IndexOptions, TimeseriesOptions},
    Client, Collection, Database, IndexModel,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Args;
use crate::db::indexes::ensure_time_index;
use crate::db::schemas::{MeasurementDoc, TokenDoc};
use crate::db::sweep::SweepTracker;
use crate::types::{Result, SluiceError};

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Databases maintained by the server itself; never treated as tenants
const SYSTEM_DATABASES: [&str; 3] = ["admin", "config", "local"];

/// Connection and collection settings for the manager
#[derive(Debug, Clone)]
pub struct MongoSettings {
    pub uri: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_pool_size: u32,
    pub server_selection_timeout: Duration,
    pub measurement_collection: String,
    pub token_collection: String,
    pub time_field: String,
    pub meta_field: Option<String>,
    pub cleanup_interval_seconds: i64,
}

impl MongoSettings {
    pub fn from_args(args: &Args) -> Self {
        Self {
            uri: args.mongodb_uri.clone(),
            username: args.mongodb_username.clone(),
            password: args.mongodb_password.clone(),
            max_pool_size: args.mongodb_max_pool_size,
            server_selection_timeout: Duration::from_millis(args.server_selection_timeout_ms),
            measurement_collection: args.mongodb_collection.clone(),
            token_collection: args.api_tokens_collection.clone(),
            time_field: args.timeseries_time_field.clone(),
            meta_field: args.meta_field().map(str::to_string),
            cleanup_interval_seconds: args.expiration_cleanup_interval_seconds,
        }
    }
}

/// Manage the MongoDB client and per-tenant collection lifecycle
pub struct MongoManager {
    settings: MongoSettings,
    client: RwLock<Option<Client>>,
    databases: DashMap<String, Database>,
    measurements: DashMap<String, Collection<MeasurementDoc>>,
    tokens: DashMap<String, Collection<TokenDoc>>,
    token_locations: DashMap<String, String>,
    measurement_sweeps: SweepTracker,
    token_sweeps: SweepTracker,
}

impl MongoManager {
    pub fn new(settings: MongoSettings) -> Self {
        Self {
            settings,
            client: RwLock::new(None),
            databases: DashMap::new(),
            measurements: DashMap::new(),
            tokens: DashMap::new(),
            token_locations: DashMap::new(),
            measurement_sweeps: SweepTracker::new(),
            token_sweeps: SweepTracker::new(),
        }
    }

    pub fn settings(&self) -> &MongoSettings {
        &self.settings
    }

    /// Establish the client connection if one does not already exist.
    ///
    /// A failed liveness probe leaves the handle unset so a later call can
    /// retry. Success clears every cache in case a previous connection left
    /// partial state behind.
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.client.write().await;
        if guard.is_some() {
            return Ok(());
        }

        info!(uri = %self.settings.uri, "Connecting to MongoDB");

        let mut options = ClientOptions::parse(&self.settings.uri)
            .await
            .map_err(|e| SluiceError::Database(format!("Invalid MongoDB URI: {}", e)))?;
        options.max_pool_size = Some(self.settings.max_pool_size);
        options.server_selection_timeout = Some(self.settings.server_selection_timeout);
        if let (Some(username), Some(password)) = (&self.settings.username, &self.settings.password)
        {
            options.credential = Some(
                Credential::builder()
                    .username(username.clone())
                    .password(password.clone())
                    .build(),
            );
        }

        let client = Client::with_options(options)
            .map_err(|e| SluiceError::Database(format!("Failed to build MongoDB client: {}", e)))?;

        // Liveness probe, bounded by the server selection timeout
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| SluiceError::Database(format!("MongoDB ping failed: {}", e)))?;

        self.clear_caches();
        *guard = Some(client);
        info!("MongoDB connection ready");
        Ok(())
    }

    /// Terminate the connection. Idempotent.
    pub async fn close(&self) {
        let mut guard = self.client.write().await;
        if let Some(client) = guard.take() {
            info!("Closing MongoDB connection");
            client.shutdown().await;
        }
        self.clear_caches();
    }

    pub async fn is_connected(&self) -> bool {
        self.client.read().await.is_some()
    }

    fn clear_caches(&self) {
        self.databases.clear();
        self.measurements.clear();
        self.tokens.clear();
        self.token_locations.clear();
        self.measurement_sweeps.clear();
        self.token_sweeps.clear();
    }

    async fn client(&self) -> Result<Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| SluiceError::Database("MongoDB client has not been initialized".into()))
    }

    /// Return (and cache) a database handle.
    ///
    /// The catalog lookup on first access is informational only; MongoDB
    /// creates databases on first write regardless.
    pub async fn database(&self, database_name: &str) -> Result<Database> {
        if let Some(database) = self.databases.get(database_name) {
            return Ok(database.value().clone());
        }

        let client = self.client().await?;
        let database = client.database(database_name);

        match client.list_database_names().await {
            Ok(existing) if !existing.iter().any(|name| name == database_name) => {
                info!(
                    database = database_name,
                    "Database not found; it will be created automatically"
                );
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    database = database_name,
                    error = %err,
                    "Could not list databases while opening a handle"
                );
            }
        }

        self.databases
            .insert(database_name.to_string(), database.clone());
        Ok(database)
    }

    /// Database handle for scan paths, skipping the catalog lookup (the
    /// caller just enumerated the name from the server)
    fn cached_database(&self, client: &Client, database_name: &str) -> Database {
        self.databases
            .entry(database_name.to_string())
            .or_insert_with(|| client.database(database_name))
            .value()
            .clone()
    }

    /// Return the tenant's time-series measurement collection, provisioning
    /// it on first access and sweeping expired documents opportunistically.
    pub async fn measurement_collection(
        &self,
        database_name: &str,
    ) -> Result<Collection<MeasurementDoc>> {
        let cached = self
            .measurements
            .get(database_name)
            .map(|entry| entry.value().clone());
        let collection = match cached {
            Some(collection) => collection,
            None => {
                let database = self.database(database_name).await?;
                self.ensure_measurement_collection(&database, database_name)
                    .await?
            }
        };

        self.sweep_measurements(&collection, database_name).await;
        Ok(collection)
    }

    /// Return the tenant's API token collection, provisioning it on first
    /// access and sweeping expired tokens opportunistically.
    pub async fn token_collection(&self, database_name: &str) -> Result<Collection<TokenDoc>> {
        let cached = self
            .tokens
            .get(database_name)
            .map(|entry| entry.value().clone());
        let collection = match cached {
            Some(collection) => collection,
            None => {
                let database = self.database(database_name).await?;
                self.ensure_token_collection(&database, database_name)
                    .await?
            }
        };

        self.sweep_tokens(&collection, database_name).await;
        Ok(collection)
    }

    async fn ensure_measurement_collection(
        &self,
        database: &Database,
        database_name: &str,
    ) -> Result<Collection<MeasurementDoc>> {
        let collection_name = &self.settings.measurement_collection;

        let existing = database.list_collection_names().await.map_err(|e| {
            SluiceError::Database(format!(
                "Failed to inspect collections in {}: {}",
                database_name, e
            ))
        })?;

        if !existing.iter().any(|name| name == collection_name) {
            info!(
                collection = %collection_name,
                database = database_name,
                "Creating time-series collection"
            );

            let mut timeseries = TimeseriesOptions::builder()
                .time_field(self.settings.time_field.clone())
                .build();
            timeseries.meta_field = self.settings.meta_field.clone();

            match database
                .create_collection(collection_name)
                .timeseries(timeseries)
                .await
            {
                Ok(()) => {}
                Err(err) if is_namespace_exists(&err) => {
                    warn!(
                        collection = %collection_name,
                        database = database_name,
                        "Collection already exists despite initial check"
                    );
                }
                Err(err) => {
                    return Err(SluiceError::Database(format!(
                        "Failed to create time-series collection: {}",
                        err
                    )))
                }
            }
        }

        let collection = database.collection::<MeasurementDoc>(collection_name);
        ensure_time_index(&collection, &self.settings.time_field).await?;

        self.measurements
            .insert(database_name.to_string(), collection.clone());
        Ok(collection)
    }

    async fn ensure_token_collection(
        &self,
        database: &Database,
        database_name: &str,
    ) -> Result<Collection<TokenDoc>> {
        if let Some(collection) = self.tokens.get(database_name) {
            return Ok(collection.value().clone());
        }

        let collection_name = &self.settings.token_collection;

        let existing = database.list_collection_names().await.map_err(|e| {
            SluiceError::Database(format!(
                "Failed to inspect collections in {}: {}",
                database_name, e
            ))
        })?;

        if !existing.iter().any(|name| name == collection_name) {
            info!(
                collection = %collection_name,
                database = database_name,
                "Creating API token collection"
            );

            match database.create_collection(collection_name).await {
                Ok(()) => {}
                Err(err) if is_namespace_exists(&err) => {
                    warn!(
                        collection = %collection_name,
                        database = database_name,
                        "Collection already exists despite initial check"
                    );
                }
                Err(err) => {
                    return Err(SluiceError::Database(format!(
                        "Failed to create token collection: {}",
                        err
                    )))
                }
            }
        }

        let collection = database.collection::<TokenDoc>(collection_name);

        let indices: Vec<IndexModel> = TokenDoc::into_indices()
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        collection.create_indexes(indices).await.map_err(|e| {
            SluiceError::Database(format!("Failed to ensure token indexes: {}", e))
        })?;

        self.tokens
            .insert(database_name.to_string(), collection.clone());
        Ok(collection)
    }

    /// Best-effort removal of expired measurements. Never fails the request
    /// that triggered it.
    async fn sweep_measurements(
        &self,
        collection: &Collection<MeasurementDoc>,
        database_name: &str,
    ) {
        let now = Utc::now();
        if !self.measurement_sweeps.should_run(
            database_name,
            now,
            self.settings.cleanup_interval_seconds,
        ) {
            return;
        }

        let cutoff = bson::DateTime::from_chrono(now);
        match collection
            .delete_many(doc! { "expires_at": { "$lte": cutoff } })
            .await
        {
            Ok(result) if result.deleted_count > 0 => {
                info!(
                    database = database_name,
                    deleted = result.deleted_count,
                    "Removed expired measurements"
                );
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    database = database_name,
                    error = %err,
                    "Failed to purge expired measurements"
                );
            }
        }
    }

    /// Best-effort removal of expired tokens, evicting their location cache
    /// entries so stale mappings never resolve to a deleted token.
    async fn sweep_tokens(&self, collection: &Collection<TokenDoc>, database_name: &str) {
        let now = Utc::now();
        if !self
            .token_sweeps
            .should_run(database_name, now, self.settings.cleanup_interval_seconds)
        {
            return;
        }

        let cutoff = bson::DateTime::from_chrono(now);
        let scan = collection.clone_with_type::<Document>();
        let cursor = match scan
            .find(doc! { "expires_at": { "$lte": cutoff } })
            .projection(doc! { "_id": 1, "token_hash": 1 })
            .await
        {
            Ok(cursor) => cursor,
            Err(err) => {
                warn!(
                    database = database_name,
                    error = %err,
                    "Failed to inspect expired API tokens"
                );
                return;
            }
        };

        let expired: Vec<Document> = match cursor.try_collect().await {
            Ok(documents) => documents,
            Err(err) => {
                warn!(
                    database = database_name,
                    error = %err,
                    "Failed to read expired API tokens"
                );
                return;
            }
        };

        if expired.is_empty() {
            return;
        }

        let ids: Vec<ObjectId> = expired
            .iter()
            .filter_map(|document| document.get_object_id("_id").ok())
            .collect();
        if ids.is_empty() {
            return;
        }

        match collection.delete_many(doc! { "_id": { "$in": ids } }).await {
            Ok(result) if result.deleted_count > 0 => {
                info!(
                    database = database_name,
                    deleted = result.deleted_count,
                    "Removed expired API tokens"
                );
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    database = database_name,
                    error = %err,
                    "Failed to delete expired API tokens"
                );
                return;
            }
        }

        for document in &expired {
            if let Ok(token_hash) = document.get_str("token_hash") {
                self.token_locations.remove(token_hash);
            }
        }
    }

    /// Cache the database where `token_hash` is persisted
    pub fn remember_token_location(&self, token_hash: &str, database_name: &str) {
        self.token_locations
            .insert(token_hash.to_string(), database_name.to_string());
    }

    /// Remove any cached location for `token_hash`
    pub fn forget_token_location(&self, token_hash: &str) {
        self.token_locations.remove(token_hash);
    }

    pub fn cached_token_location(&self, token_hash: &str) -> Option<String> {
        self.token_locations
            .get(token_hash)
            .map(|entry| entry.value().clone())
    }

    /// Locate the token document for `token_hash` across tenant databases.
    ///
    /// Resolution is a short-circuiting chain: the remembered location, then
    /// collections already open in this process, then a scan of every
    /// database on the server. `Ok(None)` is the normal no-match result.
    pub async fn find_token_document(
        &self,
        token_hash: &str,
    ) -> Result<Option<(TokenDoc, Collection<TokenDoc>)>> {
        let client = self.client().await?;

        if let Some(found) = self.resolve_from_location_cache(token_hash).await? {
            return Ok(Some(found));
        }
        if let Some(found) = self.resolve_from_open_collections(token_hash).await? {
            return Ok(Some(found));
        }
        self.resolve_from_server_scan(&client, token_hash).await
    }

    /// Fast path: the remembered hash location. A miss evicts the stale
    /// entry and falls through to the wider scans.
    async fn resolve_from_location_cache(
        &self,
        token_hash: &str,
    ) -> Result<Option<(TokenDoc, Collection<TokenDoc>)>> {
        let Some(database_name) = self.cached_token_location(token_hash) else {
            return Ok(None);
        };

        let collection = match self.token_collection(&database_name).await {
            Ok(collection) => collection,
            Err(SluiceError::Database(reason)) => {
                warn!(
                    database = %database_name,
                    error = %reason,
                    "Dropping stale token location after fetch failure"
                );
                self.token_locations.remove(token_hash);
                return Ok(None);
            }
            Err(other) => return Err(other),
        };

        match collection
            .find_one(doc! { "token_hash": token_hash })
            .await
            .map_err(|e| SluiceError::Database(format!("Failed to query API tokens: {}", e)))?
        {
            Some(document) => Ok(Some((document, collection))),
            None => {
                self.token_locations.remove(token_hash);
                Ok(None)
            }
        }
    }

    /// Medium path: probe every token collection already open in this
    /// process, remembering a hit for next time.
    async fn resolve_from_open_collections(
        &self,
        token_hash: &str,
    ) -> Result<Option<(TokenDoc, Collection<TokenDoc>)>> {
        let open: Vec<(String, Collection<TokenDoc>)> = self
            .tokens
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (database_name, collection) in open {
            let found = collection
                .find_one(doc! { "token_hash": token_hash })
                .await
                .map_err(|e| {
                    SluiceError::Database(format!("Failed to query API tokens: {}", e))
                })?;

            if let Some(document) = found {
                self.token_locations
                    .insert(token_hash.to_string(), database_name);
                return Ok(Some((document, collection)));
            }
        }

        Ok(None)
    }

    /// Slow path: enumerate every database on the server, skipping system
    /// databases and ones whose token collection is already open, and probe
    /// each one that actually contains a token collection.
    async fn resolve_from_server_scan(
        &self,
        client: &Client,
        token_hash: &str,
    ) -> Result<Option<(TokenDoc, Collection<TokenDoc>)>> {
        let names = client
            .list_database_names()
            .await
            .map_err(|e| SluiceError::Database(format!("Failed to enumerate databases: {}", e)))?;

        for database_name in names {
            if self.tokens.contains_key(&database_name)
                || SYSTEM_DATABASES.contains(&database_name.as_str())
            {
                continue;
            }

            let database = self.cached_database(client, &database_name);
            let existing = database.list_collection_names().await.map_err(|e| {
                SluiceError::Database(format!(
                    "Failed to inspect database {} for API tokens: {}",
                    database_name, e
                ))
            })?;
            if !existing.iter().any(|name| name == &self.settings.token_collection) {
                continue;
            }

            let collection = self
                .ensure_token_collection(&database, &database_name)
                .await?;
            let found = collection
                .find_one(doc! { "token_hash": token_hash })
                .await
                .map_err(|e| {
                    SluiceError::Database(format!("Failed to query API tokens: {}", e))
                })?;

            if let Some(document) = found {
                self.token_locations
                    .insert(token_hash.to_string(), database_name);
                return Ok(Some((document, collection)));
            }
        }

        Ok(None)
    }

    /// Token collections that exist on the server, optionally scoped to one
    /// database. Open collections are returned first; the rest are
    /// discovered by enumeration. Each returned collection has been swept.
    pub async fn token_collections(
        &self,
        database_name: Option<&str>,
    ) -> Result<Vec<(String, Collection<TokenDoc>)>> {
        let client = self.client().await?;

        let target: Vec<String> = match database_name {
            Some(name) => vec![name.to_string()],
            None => client
                .list_database_names()
                .await
                .map_err(|e| {
                    SluiceError::Database(format!("Failed to enumerate databases: {}", e))
                })?
                .into_iter()
                .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
                .collect(),
        };

        let mut collections = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let cached: Vec<(String, Collection<TokenDoc>)> = self
            .tokens
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (cached_name, collection) in cached {
            if database_name.is_none_or(|name| name == cached_name) {
                self.sweep_tokens(&collection, &cached_name).await;
                seen.insert(cached_name.clone());
                collections.push((cached_name, collection));
            }
        }

        for name in target {
            if seen.contains(&name) {
                continue;
            }

            let database = self.cached_database(&client, &name);
            let existing = database.list_collection_names().await.map_err(|e| {
                SluiceError::Database(format!(
                    "Failed to inspect database {} for API tokens: {}",
                    name, e
                ))
            })?;
            if !existing.iter().any(|coll| coll == &self.settings.token_collection) {
                continue;
            }

            let collection = self.ensure_token_collection(&database, &name).await?;
            self.sweep_tokens(&collection, &name).await;
            seen.insert(name.clone());
            collections.push((name, collection));
        }

        Ok(collections)
    }
}

/// Whether the error is a duplicate-key write failure (unique index hit)
pub fn is_duplicate_key_error(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref write_error)) if write_error.code == 11000
    )
}

/// Whether the error is the NamespaceExists race from a concurrent creator
fn is_namespace_exists(err: &mongodb::error::Error) -> bool {
    matches!(*err.kind, ErrorKind::Command(ref command_error) if command_error.code == 48)
}
