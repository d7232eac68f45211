//! BrokerService: the request-level operations of the upload broker.
//!
//! Holds the shared SQLite pool plus one instance of each component and is
//! cloned into every axum handler as router state.

use crate::{
    config::BrokerConfig,
    errors::BrokerResult,
    models::{
        file_record::FileRecord,
        policy::{SignedUploadGrant, UploadFormSettings},
        settings::BrokerSettings,
    },
    services::{
        cors_service::{CorsSync, CorsSyncOutcome},
        credential_service::{CredentialResolver, CredentialSource, FederationScope},
        file_access::{FileReference, FileReferenceCheck},
        file_repository::FileRepository,
        key_allocator::{AllocatedKey, CollisionPolicy, KeyAllocator},
        key_cache::{KeyCache, SqliteKeyCache},
        object_store::ObjectStore,
        path_migration::{MigrationReport, PathMigration},
        policy_builder::{FieldUploadOptions, PolicyBuilder},
        settings_service::SettingsStore,
        storage_paths::StoragePaths,
        token_service::TokenService,
        upload_finalizer::{UploadFinalizer, UploadReport},
        validators::{FileValidator, NameLengthValidator},
    },
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info};

/// External collaborators injected at startup.
pub struct Collaborators {
    pub object_store: Arc<dyn ObjectStore>,
    pub token_service: Arc<dyn TokenService>,
    pub credential_sources: Vec<Arc<dyn CredentialSource>>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct KeyRequest {
    /// Bucket key prefix the upload goes under, `/` optionally sent as `::`.
    pub directory: String,
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file_index: u32,
    #[serde(default)]
    pub on_collision: CollisionPolicy,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct KeyResponse {
    pub file_key: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_index: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct GrantRequest {
    /// Abstract upload location such as `public://images/2024`.
    pub upload_location: String,
    #[serde(default)]
    pub field: FieldUploadOptions,
}

#[derive(Serialize, Clone, Debug)]
pub struct GrantResponse {
    pub grant: SignedUploadGrant,
    pub form_fields: BTreeMap<&'static str, String>,
    pub settings: UploadFormSettings,
}

#[derive(Serialize, Clone, Debug)]
pub struct FinalizedUpload {
    pub file: FileRecord,
    /// Proof of ownership for anonymous uploaders, see [`FileReferenceCheck`].
    pub token: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct SavedSettings {
    pub settings: BrokerSettings,
    pub cors: CorsSyncOutcome,
}

#[derive(Clone)]
pub struct BrokerService {
    pub db: Arc<SqlitePool>,
    pub config: Arc<BrokerConfig>,
    store: Arc<dyn ObjectStore>,
    credentials: Arc<CredentialResolver>,
    allocator: Arc<KeyAllocator>,
    paths: StoragePaths,
    policies: PolicyBuilder,
    finalizer: Arc<UploadFinalizer>,
    settings: SettingsStore,
    cors: Arc<CorsSync>,
    references: Arc<FileReferenceCheck>,
    migration: Arc<PathMigration>,
}

impl BrokerService {
    pub fn new(db: Arc<SqlitePool>, config: BrokerConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            object_store,
            token_service,
            credential_sources,
        } = collaborators;

        let paths = StoragePaths::from_config(&config);
        let cache: Arc<dyn KeyCache> = Arc::new(SqliteKeyCache::new(db.clone()));
        let files = FileRepository::new(db.clone());
        let validators: Vec<Arc<dyn FileValidator>> = vec![Arc::new(NameLengthValidator)];

        Self {
            credentials: Arc::new(CredentialResolver::new(
                credential_sources,
                token_service,
                FederationScope::from_config(&config),
            )),
            allocator: Arc::new(KeyAllocator::new(
                object_store.clone(),
                cache.clone(),
                paths.clone(),
                config.bucket.clone(),
                config.replace_reserved_chars,
            )),
            policies: PolicyBuilder::from_config(&config),
            finalizer: Arc::new(UploadFinalizer::new(
                db.clone(),
                cache,
                paths.clone(),
                validators,
            )),
            settings: SettingsStore::new(db.clone()),
            cors: Arc::new(CorsSync::new(object_store.clone(), config.bucket.clone())),
            references: Arc::new(FileReferenceCheck::new(
                files.clone(),
                config.form_token_secret.clone(),
            )),
            migration: Arc::new(PathMigration::new(files, paths.clone())),
            store: object_store,
            paths,
            db,
            config: Arc::new(config),
        }
    }

    pub async fn allocate_key(&self, request: &KeyRequest) -> BrokerResult<KeyResponse> {
        let AllocatedKey { key, file_name } = self
            .allocator
            .allocate(&request.directory, &request.file_name, request.on_collision)
            .await?;
        Ok(KeyResponse {
            file_key: key,
            file_name,
            file_size: request.file_size,
            file_index: request.file_index,
        })
    }

    /// Resolve credentials and sign a grant for `request.upload_location`.
    pub async fn issue_grant(&self, request: &GrantRequest) -> BrokerResult<GrantResponse> {
        let key_prefix = self.paths.key_prefix_for(&request.upload_location)?;
        let settings = self.settings.get().await?;
        let credentials = self.credentials.resolve().await?;

        let grant = self.policies.build(
            &key_prefix,
            settings.access_control,
            &credentials,
            settings.upload_scheme,
            Utc::now(),
        )?;
        debug!(
            "issued upload grant for {} expiring {}",
            key_prefix, grant.expires_at
        );

        Ok(GrantResponse {
            form_fields: grant.form_fields(),
            settings: self.policies.form_settings(
                &key_prefix,
                &request.field,
                self.config.default_max_upload_size,
            ),
            grant,
        })
    }

    pub async fn finalize_upload(
        &self,
        report: &UploadReport,
        owner_id: i64,
    ) -> BrokerResult<FinalizedUpload> {
        let file = self.finalizer.finalize(report, owner_id).await?;
        Ok(FinalizedUpload {
            token: self.references.reuse_token(file.id),
            file,
        })
    }

    pub async fn allowed_files(
        &self,
        submitter: i64,
        submissions: &[FileReference],
    ) -> BrokerResult<Vec<i64>> {
        self.references.allowed_files(submitter, submissions).await
    }

    pub async fn settings(&self) -> BrokerResult<BrokerSettings> {
        self.settings.get().await
    }

    /// Persist `settings` and push the matching bucket CORS configuration.
    pub async fn save_settings(&self, settings: BrokerSettings) -> BrokerResult<SavedSettings> {
        self.settings.save(&settings).await?;
        let settings = self.settings.get().await?;
        let cors = self.cors.sync(&settings).await?;
        info!("saved broker settings ({:?} bucket CORS)", cors);
        Ok(SavedSettings { settings, cors })
    }

    pub async fn migrate_file_paths(&self) -> BrokerResult<MigrationReport> {
        self.migration.run().await
    }

    /// Whether the bucket answers existence checks.
    pub async fn object_store_reachable(&self) -> BrokerResult<()> {
        self.store
            .exists_at(&self.config.bucket, ".upload-broker-readyz")
            .await
            .map(|_| ())
    }
}
