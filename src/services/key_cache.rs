//! Local cache of object URIs known to exist in the bucket.

use crate::{errors::BrokerResult, models::cached_key::CachedKeyRecord};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

#[async_trait]
pub trait KeyCache: Send + Sync {
    async fn lookup(&self, uri: &str) -> BrokerResult<Option<CachedKeyRecord>>;

    /// URIs of existing objects starting with `prefix`, in lexical order.
    async fn search_prefix(&self, prefix: &str) -> BrokerResult<Vec<String>>;

    /// Insert or refresh a record.
    async fn write(&self, record: &CachedKeyRecord) -> BrokerResult<()>;
}

#[derive(Clone)]
pub struct SqliteKeyCache {
    db: Arc<SqlitePool>,
}

impl SqliteKeyCache {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl KeyCache for SqliteKeyCache {
    async fn lookup(&self, uri: &str) -> BrokerResult<Option<CachedKeyRecord>> {
        let record = sqlx::query_as::<_, CachedKeyRecord>(
            "SELECT uri, file_exists, filesize, updated_at FROM key_cache WHERE uri = ?",
        )
        .bind(uri)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    async fn search_prefix(&self, prefix: &str) -> BrokerResult<Vec<String>> {
        let uris = sqlx::query_scalar::<_, String>(
            "SELECT uri FROM key_cache
             WHERE uri LIKE ? ESCAPE '\\' AND file_exists = 1
             ORDER BY uri ASC",
        )
        .bind(format!("{}%", escape_like(prefix)))
        .fetch_all(&*self.db)
        .await?;
        Ok(uris)
    }

    async fn write(&self, record: &CachedKeyRecord) -> BrokerResult<()> {
        sqlx::query(
            "INSERT INTO key_cache (uri, file_exists, filesize, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(uri) DO UPDATE SET
                file_exists = excluded.file_exists,
                filesize = excluded.filesize,
                updated_at = excluded.updated_at",
        )
        .bind(&record.uri)
        .bind(record.file_exists)
        .bind(record.filesize)
        .bind(record.updated_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}

/// Escape `LIKE` wildcards so file names such as `100%_done.txt` match literally.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::test_pool;

    #[tokio::test]
    async fn prefix_search_treats_wildcards_literally() {
        let cache = SqliteKeyCache::new(test_pool().await);
        for uri in [
            "s3://docs/report_1.pdf",
            "s3://docs/reportX1.pdf",
            "s3://docs/report%.pdf",
            "s3://other/report_1.pdf",
        ] {
            cache.write(&CachedKeyRecord::present(uri, 10)).await.unwrap();
        }

        let found = cache.search_prefix("s3://docs/report_").await.unwrap();
        assert_eq!(found, vec!["s3://docs/report_1.pdf".to_string()]);
    }

    #[tokio::test]
    async fn write_refreshes_existing_rows() {
        let cache = SqliteKeyCache::new(test_pool().await);
        cache
            .write(&CachedKeyRecord::present("s3://a/b.txt", 1))
            .await
            .unwrap();
        let mut gone = CachedKeyRecord::present("s3://a/b.txt", 0);
        gone.file_exists = false;
        cache.write(&gone).await.unwrap();

        let record = cache.lookup("s3://a/b.txt").await.unwrap().unwrap();
        assert!(!record.file_exists);
        assert!(cache.search_prefix("s3://a/").await.unwrap().is_empty());
    }
}
