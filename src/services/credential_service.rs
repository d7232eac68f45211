//! Credential resolution for signing upload grants.
//!
//! Sources are tried in order: statically configured keys first, then the
//! ambient AWS chain (environment, profile, instance or container role). A
//! session token from the ambient chain is used as-is; otherwise the resolved
//! keys are exchanged for a one-hour federation token scoped to object-level
//! permissions. Nothing is cached between requests.

use crate::{
    config::BrokerConfig,
    errors::{BrokerError, BrokerResult},
    models::credentials::CredentialSet,
    services::token_service::{FederationTokenRequest, TokenService},
};
use async_trait::async_trait;
use aws_config::{Region, default_provider::credentials::DefaultCredentialsChain};
use aws_credential_types::provider::{ProvideCredentials, error::CredentialsError};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Lifetime requested for federation tokens.
pub const FEDERATION_TOKEN_SECONDS: i32 = 3600;

/// Object-level permissions granted to federated upload sessions.
pub const FEDERATION_ACTIONS: [&str; 9] = [
    "s3:PutObject",
    "s3:GetObjectAcl",
    "s3:GetObject",
    "s3:DeleteObjectVersion",
    "s3:PutObjectVersionAcl",
    "s3:GetObjectVersionAcl",
    "s3:DeleteObject",
    "s3:PutObjectAcl",
    "s3:GetObjectVersion",
];

#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the source has nothing to offer.
    async fn provide(&self) -> BrokerResult<Option<CredentialSet>>;
}

/// Keys from site configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentialSource {
    credentials: Option<CredentialSet>,
}

impl StaticCredentialSource {
    pub fn new(credentials: Option<CredentialSet>) -> Self {
        Self { credentials }
    }

    pub fn from_config(cfg: &BrokerConfig) -> Self {
        match (&cfg.access_key, &cfg.secret_key) {
            (Some(access), Some(secret)) if !access.is_empty() && !secret.is_empty() => {
                Self::new(Some(CredentialSet::new(access, secret)))
            }
            _ => Self::new(None),
        }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn provide(&self) -> BrokerResult<Option<CredentialSet>> {
        Ok(self.credentials.clone())
    }
}

/// The AWS default credential chain, built on first use.
#[derive(Debug)]
pub struct AmbientCredentialSource {
    region: String,
    chain: OnceCell<DefaultCredentialsChain>,
}

impl AmbientCredentialSource {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            chain: OnceCell::new(),
        }
    }

    async fn chain(&self) -> &DefaultCredentialsChain {
        self.chain
            .get_or_init(|| async {
                DefaultCredentialsChain::builder()
                    .region(Region::new(self.region.clone()))
                    .build()
                    .await
            })
            .await
    }
}

#[async_trait]
impl CredentialSource for AmbientCredentialSource {
    fn name(&self) -> &'static str {
        "ambient"
    }

    async fn provide(&self) -> BrokerResult<Option<CredentialSet>> {
        match self.chain().await.provide_credentials().await {
            Ok(creds) => {
                let mut set = CredentialSet::new(creds.access_key_id(), creds.secret_access_key());
                if let Some(token) = creds.session_token() {
                    set = set.with_session_token(token);
                }
                if let Some(expiry) = creds.expiry() {
                    set = set.with_expiry(DateTime::<Utc>::from(expiry));
                }
                Ok(Some(set))
            }
            Err(CredentialsError::CredentialsNotLoaded(_)) => Ok(None),
            Err(err) => {
                warn!("ambient credential chain failed: {}", err);
                Ok(None)
            }
        }
    }
}

/// Scope of federation tokens requested by the resolver.
#[derive(Clone, Debug)]
pub struct FederationScope {
    pub name: String,
    pub resource: String,
}

impl FederationScope {
    pub fn from_config(cfg: &BrokerConfig) -> Self {
        Self {
            name: cfg.federation_name.clone(),
            resource: if cfg.sts_policy_resource.is_empty() {
                format!("arn:aws:s3:::{}/*", cfg.bucket)
            } else {
                cfg.sts_policy_resource.clone()
            },
        }
    }

    /// Inline policy limiting the token to object operations on `resource`.
    pub fn policy_document(&self, now: DateTime<Utc>) -> String {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Sid": format!("uploadbroker{}", now.timestamp()),
                "Action": FEDERATION_ACTIONS,
                "Effect": "Allow",
                "Resource": self.resource,
            }]
        })
        .to_string()
    }
}

/// Chains credential sources and tops them up with a federation token.
pub struct CredentialResolver {
    sources: Vec<Arc<dyn CredentialSource>>,
    token_service: Arc<dyn TokenService>,
    scope: FederationScope,
}

impl CredentialResolver {
    pub fn new(
        sources: Vec<Arc<dyn CredentialSource>>,
        token_service: Arc<dyn TokenService>,
        scope: FederationScope,
    ) -> Self {
        Self {
            sources,
            token_service,
            scope,
        }
    }

    pub async fn resolve(&self) -> BrokerResult<CredentialSet> {
        let mut resolved = None;
        for source in &self.sources {
            if let Some(set) = source.provide().await? {
                debug!("credentials resolved from {} source", source.name());
                resolved = Some(set);
                break;
            }
        }

        let base = resolved.ok_or_else(|| {
            BrokerError::CredentialResolution("no credential source yielded keys".into())
        })?;

        if base.has_session_token() {
            return Ok(base);
        }

        let request = FederationTokenRequest {
            name: self.scope.name.clone(),
            policy: self.scope.policy_document(Utc::now()),
            duration_seconds: FEDERATION_TOKEN_SECONDS,
        };
        let federated = self.token_service.federation_token(&base, &request).await?;
        info!(
            "issued federation token `{}` valid until {:?}",
            request.name, federated.expires_at
        );
        Ok(federated)
    }
}
