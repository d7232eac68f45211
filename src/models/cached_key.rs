//! Local hint about objects known to exist in the bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Last-known metadata for an `s3://` URI.
///
/// Only a hint for key allocation; the object store stays authoritative.
/// Rows are written by the allocator and finalizer and pruned elsewhere.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct CachedKeyRecord {
    pub uri: String,
    pub file_exists: bool,
    pub filesize: i64,
    pub updated_at: DateTime<Utc>,
}

impl CachedKeyRecord {
    pub fn present(uri: impl Into<String>, filesize: i64) -> Self {
        Self {
            uri: uri.into(),
            file_exists: true,
            filesize,
            updated_at: Utc::now(),
        }
    }
}
