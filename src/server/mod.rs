//! HTTP server for Sluice

pub mod http;

pub use http::{run, AppState};
