//! Utility helpers

pub mod parsing;

pub use parsing::{coerce_value, normalize_field_path};
