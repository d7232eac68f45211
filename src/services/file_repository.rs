//! SQLite access to managed file records.

use crate::{
    errors::BrokerResult,
    models::file_record::{FileRecord, FileStatus},
};
use chrono::Utc;
use sqlx::{QueryBuilder, SqliteConnection, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use uuid::Uuid;

const FILE_COLUMNS: &str =
    "id, uuid, owner_id, status, filename, uri, filesize, filemime, source, created_at";

/// Values for a record about to be inserted.
#[derive(Clone, Debug)]
pub struct NewFile {
    pub owner_id: i64,
    pub filename: String,
    pub uri: String,
    pub filesize: i64,
    pub filemime: String,
    pub source: String,
}

#[derive(Clone)]
pub struct FileRepository {
    db: Arc<SqlitePool>,
}

impl FileRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a temporary record on `conn`, usually inside a transaction.
    pub async fn insert_temporary(
        conn: &mut SqliteConnection,
        file: &NewFile,
    ) -> BrokerResult<FileRecord> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "INSERT INTO files (uuid, owner_id, status, filename, uri, filesize, filemime, source, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {}",
            FILE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(file.owner_id)
        .bind(FileStatus::Temporary)
        .bind(&file.filename)
        .bind(&file.uri)
        .bind(file.filesize)
        .bind(&file.filemime)
        .bind(&file.source)
        .bind(Utc::now())
        .fetch_one(conn)
        .await?;
        Ok(record)
    }

    pub async fn load_many(&self, ids: &[i64]) -> BrokerResult<Vec<FileRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM files WHERE id IN (", FILE_COLUMNS));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id ASC");
        let records: Vec<FileRecord> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(records)
    }

    /// Ids of records whose URI starts with any of `prefixes`.
    pub async fn ids_with_uri_prefix(&self, prefixes: &[String]) -> BrokerResult<Vec<i64>> {
        let mut ids = Vec::new();
        for prefix in prefixes {
            let mut matching = sqlx::query_scalar::<_, i64>(
                "SELECT id FROM files WHERE substr(uri, 1, length(?)) = ? ORDER BY id ASC",
            )
            .bind(prefix)
            .bind(prefix)
            .fetch_all(&*self.db)
            .await?;
            ids.append(&mut matching);
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    pub async fn update_uri(&self, id: i64, uri: &str) -> BrokerResult<()> {
        sqlx::query("UPDATE files SET uri = ? WHERE id = ?")
            .bind(uri)
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn count(&self) -> BrokerResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files")
            .fetch_one(&*self.db)
            .await?)
    }
}
