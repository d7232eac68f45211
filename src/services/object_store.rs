//! Remote object store capabilities used by the broker.
//!
//! The broker never moves object bytes; it only asks whether keys exist and
//! manages the bucket CORS configuration. Uploads themselves go straight from
//! the browser to the store.

use crate::{
    config::BrokerConfig,
    errors::{BrokerError, BrokerResult},
    models::cors::CorsRule,
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{
    Client,
    config::Credentials,
    operation::head_object::HeadObjectError,
    types::{CorsConfiguration, CorsRule as S3CorsRule},
};
use tracing::debug;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether `key` currently exists in `bucket`.
    async fn exists_at(&self, bucket: &str, key: &str) -> BrokerResult<bool>;

    /// Replace the bucket CORS configuration with `rules`.
    async fn put_cors(&self, bucket: &str, rules: &[CorsRule]) -> BrokerResult<()>;

    /// Remove the bucket CORS configuration.
    async fn delete_cors(&self, bucket: &str) -> BrokerResult<()>;
}

/// [`ObjectStore`] backed by the AWS SDK, usable against S3 and compatible
/// stores reachable through a custom host.
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn from_config(cfg: &BrokerConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()));
        if let (Some(access_key), Some(secret_key)) = (&cfg.access_key, &cfg.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "upload-broker-config",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(host) = &cfg.custom_host {
            let lower = host.to_ascii_lowercase();
            let endpoint = if lower.starts_with("http://") || lower.starts_with("https://") {
                host.clone()
            } else {
                format!("https://{}", host)
            };
            builder = builder.endpoint_url(endpoint);
        }
        if cfg.path_style {
            builder = builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn exists_at(&self, bucket: &str, key: &str) -> BrokerResult<bool> {
        let result = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(HeadObjectError::is_not_found)
                {
                    return Ok(false);
                }
                Err(BrokerError::ObjectStore(format!(
                    "HEAD {}/{} failed: {}",
                    bucket, key, err
                )))
            }
        }
    }

    async fn put_cors(&self, bucket: &str, rules: &[CorsRule]) -> BrokerResult<()> {
        let s3_rules = rules
            .iter()
            .map(|rule| {
                S3CorsRule::builder()
                    .set_allowed_methods(Some(rule.allowed_methods.clone()))
                    .set_allowed_origins(Some(rule.allowed_origins.clone()))
                    .set_allowed_headers(non_empty(&rule.allowed_headers))
                    .set_expose_headers(non_empty(&rule.expose_headers))
                    .set_max_age_seconds(rule.max_age_seconds)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| BrokerError::ObjectStore(format!("invalid CORS rule: {}", err)))?;

        let configuration = CorsConfiguration::builder()
            .set_cors_rules(Some(s3_rules))
            .build()
            .map_err(|err| BrokerError::ObjectStore(format!("invalid CORS rule: {}", err)))?;

        self.client
            .put_bucket_cors()
            .bucket(bucket)
            .cors_configuration(configuration)
            .send()
            .await
            .map_err(|err| {
                BrokerError::ObjectStore(format!("PutBucketCors on {} failed: {}", bucket, err))
            })?;
        debug!("pushed {} CORS rules to {}", rules.len(), bucket);
        Ok(())
    }

    async fn delete_cors(&self, bucket: &str) -> BrokerResult<()> {
        self.client
            .delete_bucket_cors()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| {
                BrokerError::ObjectStore(format!(
                    "DeleteBucketCors on {} failed: {}",
                    bucket, err
                ))
            })?;
        debug!("deleted CORS configuration of {}", bucket);
        Ok(())
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}
