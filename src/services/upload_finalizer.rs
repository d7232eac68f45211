//! Turns a reported browser upload into a managed file record.
//!
//! The object is already in the bucket when we get here. On validation
//! failure the inserted row is rolled back but the object stays where it is;
//! orphan cleanup happens elsewhere.

use crate::{
    errors::{BrokerError, BrokerResult},
    models::{cached_key::CachedKeyRecord, file_record::FileRecord},
    services::{
        file_repository::{FileRepository, NewFile},
        key_cache::KeyCache,
        storage_paths::StoragePaths,
        validators::{ExtensionValidator, FileValidator, MaxSizeValidator, ValidatorSet},
    },
};
use futures::future::join_all;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

/// What the transport reports after a successful POST to the store.
#[derive(Deserialize, Clone, Debug)]
pub struct UploadReport {
    /// Bucket key of the object, `/` optionally encoded as `::`.
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub field_name: String,
    /// Space separated extension allow-list of the field, if any.
    pub extensions: Option<String>,
    pub max_filesize: Option<u64>,
}

pub struct UploadFinalizer {
    db: Arc<SqlitePool>,
    cache: Arc<dyn KeyCache>,
    paths: StoragePaths,
    validators: ValidatorSet,
}

impl UploadFinalizer {
    pub fn new(
        db: Arc<SqlitePool>,
        cache: Arc<dyn KeyCache>,
        paths: StoragePaths,
        validators: ValidatorSet,
    ) -> Self {
        Self {
            db,
            cache,
            paths,
            validators,
        }
    }

    /// Record `report` for `owner_id` if every validator accepts it.
    pub async fn finalize(&self, report: &UploadReport, owner_id: i64) -> BrokerResult<FileRecord> {
        let file_size = i64::try_from(report.file_size).map_err(|_| {
            BrokerError::Validation(vec![format!(
                "The reported file size of {} bytes is out of range.",
                report.file_size
            )])
        })?;
        let key = StoragePaths::decode(&report.file_path);
        let storage_uri = self.paths.storage_uri(&key);

        // Cache first so later allocations see the object without a remote round trip.
        self.cache
            .write(&CachedKeyRecord::present(&storage_uri, file_size))
            .await?;

        let new_file = NewFile {
            owner_id,
            filename: report.file_name.clone(),
            uri: self.paths.abstract_uri(&storage_uri),
            filesize: file_size,
            filemime: guess_mime(&report.file_name).to_string(),
            source: report.field_name.clone(),
        };

        let mut tx = self.db.begin().await?;
        let record = FileRepository::insert_temporary(&mut *tx, &new_file).await?;

        let field_validators = field_validators(report);
        let checks = self
            .validators
            .iter()
            .chain(field_validators.iter())
            .map(|validator| validator.validate(&record));
        let errors: Vec<String> = join_all(checks).await.into_iter().flatten().collect();

        if !errors.is_empty() {
            tx.rollback().await?;
            warn!(
                "rejected upload {} ({} problems); object left in bucket",
                record.uri,
                errors.len()
            );
            return Err(BrokerError::Validation(errors));
        }

        tx.commit().await?;
        info!("recorded upload {} as file {}", record.uri, record.id);
        Ok(record)
    }
}

fn field_validators(report: &UploadReport) -> Vec<Arc<dyn FileValidator>> {
    let mut validators: Vec<Arc<dyn FileValidator>> = Vec::new();
    if let Some(max) = report.max_filesize {
        validators.push(Arc::new(MaxSizeValidator::new(max)));
    }
    if let Some(list) = report.extensions.as_deref().filter(|l| !l.trim().is_empty()) {
        validators.push(Arc::new(ExtensionValidator::from_list(list)));
    }
    validators
}

/// MIME type from the file extension, `application/octet-stream` when unknown.
pub fn guess_mime(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" | "jpe" => mime::IMAGE_JPEG.as_ref(),
        "png" => mime::IMAGE_PNG.as_ref(),
        "gif" => mime::IMAGE_GIF.as_ref(),
        "bmp" => mime::IMAGE_BMP.as_ref(),
        "svg" => mime::IMAGE_SVG.as_ref(),
        "webp" => "image/webp",
        "pdf" => mime::APPLICATION_PDF.as_ref(),
        "json" => mime::APPLICATION_JSON.as_ref(),
        "js" => mime::APPLICATION_JAVASCRIPT.as_ref(),
        "txt" => mime::TEXT_PLAIN.as_ref(),
        "csv" => mime::TEXT_CSV.as_ref(),
        "css" => mime::TEXT_CSS.as_ref(),
        "htm" | "html" => mime::TEXT_HTML.as_ref(),
        "xml" => mime::TEXT_XML.as_ref(),
        "woff" => mime::FONT_WOFF.as_ref(),
        "woff2" => mime::FONT_WOFF2.as_ref(),
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        _ => mime::APPLICATION_OCTET_STREAM.as_ref(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        key_cache::SqliteKeyCache, test_support::test_pool, validators::NameLengthValidator,
    };

    fn report(path: &str, name: &str, size: u64) -> UploadReport {
        UploadReport {
            file_path: path.into(),
            file_name: name.into(),
            file_size: size,
            field_name: "field_document".into(),
            extensions: None,
            max_filesize: None,
        }
    }

    async fn setup(
        root: Option<&str>,
    ) -> (UploadFinalizer, FileRepository, Arc<SqliteKeyCache>) {
        let db = test_pool().await;
        let cache = Arc::new(SqliteKeyCache::new(db.clone()));
        let paths = StoragePaths::new(root.map(String::from), "s3fs-public", "s3fs-private");
        let finalizer = UploadFinalizer::new(
            db.clone(),
            cache.clone(),
            paths,
            vec![Arc::new(NameLengthValidator)],
        );
        (finalizer, FileRepository::new(db), cache)
    }

    #[tokio::test]
    async fn successful_upload_uses_abstract_scheme() {
        let (finalizer, files, cache) = setup(Some("site")).await;

        let record = finalizer
            .finalize(
                &report("site::s3fs-public::docs::report_1.pdf", "report.pdf", 2048),
                7,
            )
            .await
            .unwrap();

        assert_eq!(record.uri, "public://docs/report_1.pdf");
        assert!(record.is_temporary());
        assert_eq!(record.owner_id, 7);
        assert_eq!(record.filemime, "application/pdf");
        assert_eq!(record.source, "field_document");
        assert_eq!(files.count().await.unwrap(), 1);

        let cached = cache
            .lookup("s3://s3fs-public/docs/report_1.pdf")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.filesize, 2048);
    }

    #[tokio::test]
    async fn private_and_unmapped_keys() {
        let (finalizer, _, _) = setup(None).await;
        let private = finalizer
            .finalize(&report("s3fs-private/contracts/a.docx", "a.docx", 1), 1)
            .await
            .unwrap();
        assert_eq!(private.uri, "private://contracts/a.docx");

        let raw = finalizer
            .finalize(&report("imports/a.csv", "a.csv", 1), 1)
            .await
            .unwrap();
        assert_eq!(raw.uri, "s3://imports/a.csv");
    }

    #[tokio::test]
    async fn size_limit_failure_creates_no_record() {
        let (finalizer, files, _) = setup(None).await;
        let mut too_big = report("s3fs-public/big.bin", "big.bin", 5000);
        too_big.max_filesize = Some(4096);

        let err = finalizer.finalize(&too_big, 1).await.unwrap_err();

        match err {
            BrokerError::Validation(messages) => {
                assert_eq!(messages.len(), 1);
                assert!(messages[0].contains("4096"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(files.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn validator_messages_are_aggregated() {
        let (finalizer, files, _) = setup(None).await;
        let mut bad = report("s3fs-public/x.exe", "x.exe", 10);
        bad.max_filesize = Some(1);
        bad.extensions = Some("png jpg".into());

        let err = finalizer.finalize(&bad, 1).await.unwrap_err();
        assert!(matches!(&err, BrokerError::Validation(m) if m.len() == 2));
        assert_eq!(err.to_string().lines().count(), 2);
        assert_eq!(files.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn out_of_range_size_is_rejected_before_anything_is_written() {
        let (finalizer, files, cache) = setup(None).await;
        let huge = report("s3fs-public/huge.bin", "huge.bin", u64::MAX);

        let err = finalizer.finalize(&huge, 1).await.unwrap_err();

        assert!(matches!(err, BrokerError::Validation(ref m) if m.len() == 1));
        assert_eq!(files.count().await.unwrap(), 0);
        assert!(
            cache
                .lookup("s3://s3fs-public/huge.bin")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn negative_sizes_do_not_deserialize() {
        let parsed = serde_json::from_value::<UploadReport>(serde_json::json!({
            "file_path": "s3fs-public/a.txt",
            "file_name": "a.txt",
            "file_size": -5000,
            "field_name": "field_document",
            "max_filesize": 10
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn mime_guess_falls_back_to_octet_stream() {
        assert_eq!(guess_mime("photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime("notes.txt"), "text/plain");
        assert_eq!(guess_mime("archive.tar.zst"), "application/octet-stream");
        assert_eq!(guess_mime("README"), "application/octet-stream");
    }
}
