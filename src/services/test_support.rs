//! In-memory collaborators and fixtures shared by the unit tests.

use crate::{
    config::BrokerConfig,
    db,
    errors::{BrokerError, BrokerResult},
    models::{cors::CorsRule, credentials::CredentialSet},
    services::{
        broker_service::{BrokerService, Collaborators},
        credential_service::{CredentialSource, StaticCredentialSource},
        object_store::ObjectStore,
        token_service::{FederationTokenRequest, TokenService},
    },
};
use async_trait::async_trait;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Single-connection in-memory database with the schema applied.
pub async fn test_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    db::run_migrations(&pool).await.expect("migrations");
    Arc::new(pool)
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashSet<(String, String)>>,
    cors: Mutex<Option<Vec<CorsRule>>>,
    exists_calls: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn with_objects(bucket: &str, keys: &[&str]) -> Self {
        let store = Self::default();
        for key in keys {
            store.insert(bucket, key);
        }
        store
    }

    pub fn insert(&self, bucket: &str, key: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()));
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn cors(&self) -> Option<Vec<CorsRule>> {
        self.cors.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn exists_at(&self, bucket: &str, key: &str) -> BrokerResult<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .objects
            .lock()
            .unwrap()
            .contains(&(bucket.to_string(), key.to_string())))
    }

    async fn put_cors(&self, _bucket: &str, rules: &[CorsRule]) -> BrokerResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.cors.lock().unwrap() = Some(rules.to_vec());
        Ok(())
    }

    async fn delete_cors(&self, _bucket: &str) -> BrokerResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.cors.lock().unwrap() = None;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTokenService {
    fail: bool,
    calls: AtomicUsize,
    last: Mutex<Option<(CredentialSet, FederationTokenRequest)>>,
}

impl FakeTokenService {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<FederationTokenRequest> {
        self.last.lock().unwrap().as_ref().map(|(_, req)| req.clone())
    }

    pub fn last_base(&self) -> Option<CredentialSet> {
        self.last.lock().unwrap().as_ref().map(|(base, _)| base.clone())
    }
}

#[async_trait]
impl TokenService for FakeTokenService {
    async fn federation_token(
        &self,
        base: &CredentialSet,
        request: &FederationTokenRequest,
    ) -> BrokerResult<CredentialSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some((base.clone(), request.clone()));
        if self.fail {
            return Err(BrokerError::CredentialResolution(
                "token service unavailable".into(),
            ));
        }
        Ok(CredentialSet::new("ASIAFEDERATED", "federated-secret")
            .with_session_token("federated-token"))
    }
}

pub fn test_config() -> BrokerConfig {
    BrokerConfig {
        bucket: "uploads".into(),
        region: "eu-west-1".into(),
        access_key: Some("AKIDEXAMPLE".into()),
        secret_key: Some("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into()),
        form_token_secret: "form-secret".into(),
        replace_reserved_chars: false,
        default_max_upload_size: 1024 * 1024,
        ..BrokerConfig::default()
    }
}

/// A fully wired service over in-memory collaborators.
pub async fn test_service(
    config: BrokerConfig,
    store: Arc<InMemoryObjectStore>,
) -> BrokerService {
    let db = test_pool().await;
    let sources: Vec<Arc<dyn CredentialSource>> =
        vec![Arc::new(StaticCredentialSource::from_config(&config))];
    BrokerService::new(
        db,
        config,
        Collaborators {
            object_store: store,
            token_service: Arc::new(FakeTokenService::default()),
            credential_sources: sources,
        },
    )
}
