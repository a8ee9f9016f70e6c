//! Authentication for Sluice
//!
//! Provides:
//! - SHA-256 token hashing and secret generation
//! - Request context resolution (API token + optional database override)

pub mod context;
pub mod token;

pub use context::{TokenContext, API_TOKEN_HEADER, DATABASE_OVERRIDE_HEADER};
pub use token::{generate_token_secret, hash_token};
