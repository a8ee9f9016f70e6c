//! Service layer for Sluice
//!
//! Measurement CRUD/search and API token management on top of the MongoDB
//! manager. Route handlers call into these and serialize the results.

pub mod measurements;
pub mod tokens;
