//! Core data models for the upload broker.
//!
//! Persisted entities map to SQLite tables via `sqlx::FromRow`; everything
//! handed to clients serializes as JSON via `serde`.

pub mod cached_key;
pub mod cors;
pub mod credentials;
pub mod file_record;
pub mod policy;
pub mod settings;
