//! Security token service issuing short-lived federation credentials.

use crate::{
    errors::{BrokerError, BrokerResult},
    models::credentials::CredentialSet,
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use chrono::{DateTime, Utc};

/// Parameters of a `GetFederationToken` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FederationTokenRequest {
    pub name: String,
    /// Inline IAM policy document (JSON).
    pub policy: String,
    pub duration_seconds: i32,
}

#[async_trait]
pub trait TokenService: Send + Sync {
    /// Exchange `base` credentials for a scoped federation token.
    async fn federation_token(
        &self,
        base: &CredentialSet,
        request: &FederationTokenRequest,
    ) -> BrokerResult<CredentialSet>;
}

/// [`TokenService`] calling AWS STS.
#[derive(Clone, Debug)]
pub struct StsTokenService {
    region: String,
}

impl StsTokenService {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }
}

#[async_trait]
impl TokenService for StsTokenService {
    async fn federation_token(
        &self,
        base: &CredentialSet,
        request: &FederationTokenRequest,
    ) -> BrokerResult<CredentialSet> {
        let credentials = Credentials::new(
            base.access_key.clone(),
            base.secret_key.clone(),
            base.session_token.clone(),
            None,
            "upload-broker-resolved",
        );
        let config = aws_sdk_sts::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(credentials)
            .build();
        let client = aws_sdk_sts::Client::from_conf(config);

        let output = client
            .get_federation_token()
            .name(&request.name)
            .duration_seconds(request.duration_seconds)
            .policy(&request.policy)
            .send()
            .await
            .map_err(|err| {
                BrokerError::CredentialResolution(format!("GetFederationToken failed: {}", err))
            })?;

        let issued = output.credentials().ok_or_else(|| {
            BrokerError::CredentialResolution("GetFederationToken returned no credentials".into())
        })?;
        let expiration = issued.expiration();
        let expires_at = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos());

        let mut federated =
            CredentialSet::new(issued.access_key_id(), issued.secret_access_key())
                .with_session_token(issued.session_token());
        if let Some(expires_at) = expires_at {
            federated = federated.with_expiry(expires_at);
        }
        Ok(federated)
    }
}
