//! Represents a managed file row created once an upload is finalized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle state of a file record. New uploads start temporary; the CMS
/// flips them to permanent once something references them.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum FileStatus {
    Temporary = 0,
    Permanent = 1,
}

/// Metadata for an object uploaded through the broker.
///
/// The `uri` always uses the abstract `public://`/`private://` addressing when
/// the object lives under one of the scheme folders.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Numeric file id handed back to forms.
    pub id: i64,

    pub uuid: Uuid,

    /// Uploading user, `0` for anonymous.
    pub owner_id: i64,

    pub status: FileStatus,

    /// Display name (the sanitized original file name).
    pub filename: String,

    pub uri: String,

    /// Size in bytes as reported by the transport.
    pub filesize: i64,

    pub filemime: String,

    /// Form field the file was uploaded through.
    pub source: String,

    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_temporary(&self) -> bool {
        self.status == FileStatus::Temporary
    }

    /// Extension of the display name, without the leading dot.
    pub fn extension(&self) -> Option<&str> {
        self.filename
            .rfind('.')
            .map(|pos| &self.filename[pos + 1..])
    }
}
