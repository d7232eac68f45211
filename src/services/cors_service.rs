//! Keeps the bucket CORS configuration in line with the broker settings.

use crate::{
    errors::BrokerResult,
    models::{cors::CorsRule, settings::BrokerSettings},
    services::object_store::ObjectStore,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

const UPLOAD_MAX_AGE_SECONDS: i32 = 3000;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CorsSyncOutcome {
    Updated,
    Deleted,
}

/// Rules for `settings`, or `None` when no upload origin is configured.
pub fn build_cors_rules(settings: &BrokerSettings) -> Option<Vec<CorsRule>> {
    let origins = settings.origins();
    if origins.is_empty() {
        return None;
    }

    let allowed_origins = origins
        .iter()
        .flat_map(|origin| [format!("http://{}", origin), format!("https://{}", origin)])
        .collect();

    Some(vec![
        CorsRule {
            allowed_methods: vec!["POST".into()],
            allowed_origins,
            allowed_headers: vec!["*".into()],
            expose_headers: vec!["x-amz-version-id".into()],
            max_age_seconds: Some(UPLOAD_MAX_AGE_SECONDS),
        },
        CorsRule {
            allowed_methods: vec!["GET".into()],
            allowed_origins: vec!["*".into()],
            ..CorsRule::default()
        },
    ])
}

pub struct CorsSync {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl CorsSync {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub async fn sync(&self, settings: &BrokerSettings) -> BrokerResult<CorsSyncOutcome> {
        match build_cors_rules(settings) {
            Some(rules) => {
                self.store.put_cors(&self.bucket, &rules).await?;
                info!(
                    "updated CORS on bucket {} for origins {}",
                    self.bucket,
                    settings.origins().join(", ")
                );
                Ok(CorsSyncOutcome::Updated)
            }
            None => {
                self.store.delete_cors(&self.bucket).await?;
                info!("removed CORS configuration from bucket {}", self.bucket);
                Ok(CorsSyncOutcome::Deleted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::InMemoryObjectStore;

    fn settings(origin: &str) -> BrokerSettings {
        BrokerSettings {
            cors_origin: origin.into(),
            ..BrokerSettings::default()
        }
    }

    #[test]
    fn each_origin_is_allowed_over_both_schemes() {
        let rules = build_cors_rules(&settings("example.com, cdn.example.com")).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(
            rules[0].allowed_origins,
            vec![
                "http://example.com",
                "https://example.com",
                "http://cdn.example.com",
                "https://cdn.example.com",
            ]
        );
        assert_eq!(rules[0].allowed_methods, vec!["POST"]);
        assert_eq!(rules[0].max_age_seconds, Some(3000));
        assert_eq!(rules[0].expose_headers, vec!["x-amz-version-id"]);
        assert_eq!(rules[1].allowed_methods, vec!["GET"]);
        assert_eq!(rules[1].allowed_origins, vec!["*"]);
    }

    #[test]
    fn blank_origin_yields_no_rules() {
        assert!(build_cors_rules(&settings("  , ")).is_none());
    }

    #[tokio::test]
    async fn sync_puts_then_deletes() {
        let store = Arc::new(InMemoryObjectStore::default());
        let sync = CorsSync::new(store.clone(), "uploads");

        let outcome = sync.sync(&settings("*.example.com")).await.unwrap();
        assert_eq!(outcome, CorsSyncOutcome::Updated);
        let rules = store.cors().unwrap();
        assert_eq!(
            rules[0].allowed_origins,
            vec!["http://*.example.com", "https://*.example.com"]
        );

        let outcome = sync.sync(&settings("")).await.unwrap();
        assert_eq!(outcome, CorsSyncOutcome::Deleted);
        assert!(store.cors().is_none());
        assert_eq!(store.writes(), 2);
    }
}
