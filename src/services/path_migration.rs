//! Rewrites file records that still point at raw `s3://<scheme folder>/…`
//! URIs into the `public://` / `private://` form.

use crate::{
    errors::BrokerResult,
    services::{file_repository::FileRepository, storage_paths::StoragePaths},
};
use serde::Serialize;
use tracing::info;

pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Records processed so far.
    pub progress: usize,
    /// Records selected for migration.
    pub max: usize,
    /// Records whose URI actually changed.
    pub rewritten: usize,
}

pub struct PathMigration {
    files: FileRepository,
    paths: StoragePaths,
    batch_size: usize,
}

impl PathMigration {
    pub fn new(files: FileRepository, paths: StoragePaths) -> Self {
        Self {
            files,
            paths,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn run(&self) -> BrokerResult<MigrationReport> {
        let ids = self
            .files
            .ids_with_uri_prefix(&self.paths.legacy_prefixes())
            .await?;
        let mut report = MigrationReport {
            max: ids.len(),
            ..MigrationReport::default()
        };

        for batch in ids.chunks(self.batch_size) {
            for record in self.files.load_many(batch).await? {
                let uri = self.paths.abstract_uri(&record.uri);
                if uri != record.uri {
                    self.files.update_uri(record.id, &uri).await?;
                    report.rewritten += 1;
                }
                report.progress += 1;
            }
            info!(
                "updated the public and private file paths ({} out of {} paths)",
                report.progress, report.max
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{file_repository::NewFile, test_support::test_pool};

    #[tokio::test]
    async fn rewrites_legacy_uris_in_batches() {
        let db = test_pool().await;
        let files = FileRepository::new(db.clone());
        let uris = [
            "s3://s3fs-public/images/a.png",
            "s3://s3fs-private/contracts/b.pdf",
            "s3://s3fs-public-old/c.png",
            "public://already/d.png",
            "s3://raw/e.csv",
        ];
        let mut ids = Vec::new();
        for uri in uris {
            let mut conn = db.acquire().await.unwrap();
            let record = FileRepository::insert_temporary(
                &mut conn,
                &NewFile {
                    owner_id: 1,
                    filename: "f".into(),
                    uri: uri.into(),
                    filesize: 1,
                    filemime: "application/octet-stream".into(),
                    source: "field_upload".into(),
                },
            )
            .await
            .unwrap();
            ids.push(record.id);
        }

        let migration = PathMigration::new(
            files.clone(),
            StoragePaths::new(None, "s3fs-public", "s3fs-private"),
        )
        .with_batch_size(2);
        let report = migration.run().await.unwrap();

        assert_eq!(
            report,
            MigrationReport {
                progress: 3,
                max: 3,
                rewritten: 2,
            }
        );
        let loaded: Vec<String> = files
            .load_many(&ids)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.uri)
            .collect();
        assert_eq!(
            loaded,
            vec![
                "public://images/a.png",
                "private://contracts/b.pdf",
                "s3://s3fs-public-old/c.png",
                "public://already/d.png",
                "s3://raw/e.csv",
            ]
        );

        let again = migration.run().await.unwrap();
        assert_eq!(again.rewritten, 0);
        assert_eq!(again.max, 1);
    }
}
