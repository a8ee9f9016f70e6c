//! Sluice - multi-tenant HTTP gateway for MongoDB time-series collections
//!
//! Each API token is tied to one tenant database holding a time-series
//! measurement collection and a token collection, both provisioned lazily on
//! first reference. Expired documents are swept inline, throttled per
//! database, whenever a collection handle is fetched.
//!
//! ## Components
//!
//! - **Manager**: MongoDB client lifecycle, per-tenant collection caches,
//!   index reconciliation, token resolution
//! - **Services**: measurement CRUD/search and token management
//! - **Routes**: hyper HTTP surface (health, records, tokens)

pub mod auth;
pub mod config;
pub mod db;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;
pub mod utils;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, SluiceError};
