//! Signed browser upload policies (S3 POST policy, SigV4).
//!
//! The policy pins the bucket, the ACL and the key prefix of the upload, and
//! expires six hours after issuance. It is base64-encoded and signed with the
//! SigV4 signing key derived from the secret key, date, region and service:
//!
//! ```text
//! kDate    = HMAC("AWS4" + secret, YYYYMMDD)
//! kRegion  = HMAC(kDate, region)
//! kService = HMAC(kRegion, "s3")
//! kSigning = HMAC(kService, "aws4_request")
//! signature = hex(HMAC(kSigning, base64(policy)))
//! ```

use crate::{
    config::BrokerConfig,
    errors::BrokerResult,
    models::{
        credentials::CredentialSet,
        policy::{
            POLICY_EXPIRES_SECONDS, PolicyCondition, SIGNING_ALGORITHM, SUCCESS_ACTION_STATUS,
            SignedUploadGrant, UploadFormSettings, UploadPolicy,
        },
        settings::{AccessControl, UploadScheme},
    },
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";
const REQUEST_TYPE: &str = "aws4_request";

/// Derive the SigV4 signing key for `date` (`YYYYMMDD`), `region` and `service`.
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let date_region_key = hmac_sha256(&date_key, region.as_bytes());
    let date_region_service_key = hmac_sha256(&date_region_key, service.as_bytes());
    hmac_sha256(&date_region_service_key, REQUEST_TYPE.as_bytes())
}

/// Hex HMAC-SHA256 of `data` under `signing_key`.
pub fn compute_signature(signing_key: &[u8], data: &str) -> String {
    hex::encode(hmac_sha256(signing_key, data.as_bytes()))
}

/// `<access key>/<YYYYMMDD>/<region>/s3/aws4_request`
pub fn credential_scope(access_key: &str, date: &str, region: &str) -> String {
    format!("{access_key}/{date}/{region}/{SERVICE}/{REQUEST_TYPE}")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can accept keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Field-level options of the upload widget requesting a grant.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct FieldUploadOptions {
    pub field_name: String,
    #[serde(default)]
    pub field_parents: Vec<String>,
    #[serde(default)]
    pub array_parents: Vec<String>,
    #[serde(default)]
    pub multiple: bool,
    /// Space separated allowed extensions.
    pub extensions: Option<String>,
    pub max_filesize: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct PolicyBuilder {
    bucket: String,
    region: String,
    custom_host: Option<String>,
    path_style: bool,
}

impl PolicyBuilder {
    pub fn new(
        bucket: impl Into<String>,
        region: impl Into<String>,
        custom_host: Option<String>,
        path_style: bool,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            custom_host,
            path_style,
        }
    }

    pub fn from_config(cfg: &BrokerConfig) -> Self {
        Self::new(
            cfg.bucket.clone(),
            cfg.region.clone(),
            cfg.custom_host.clone(),
            cfg.path_style,
        )
    }

    /// The unsigned policy document for an upload under `key_prefix`.
    pub fn policy(
        &self,
        key_prefix: &str,
        access_control: AccessControl,
        credentials: &CredentialSet,
        issued_at: DateTime<Utc>,
    ) -> UploadPolicy {
        let expiration = issued_at + Duration::seconds(POLICY_EXPIRES_SECONDS);
        let date = issued_at.format("%Y%m%d").to_string();

        let mut conditions = vec![
            PolicyCondition::exact("bucket", &self.bucket),
            PolicyCondition::exact("acl", access_control.as_str()),
            PolicyCondition::starts_with("key", key_prefix),
            PolicyCondition::starts_with("Content-Type", ""),
            PolicyCondition::exact("success_action_status", SUCCESS_ACTION_STATUS),
            PolicyCondition::exact("x-amz-algorithm", SIGNING_ALGORITHM),
            PolicyCondition::exact(
                "x-amz-credential",
                credential_scope(&credentials.access_key, &date, &self.region),
            ),
            PolicyCondition::exact("x-amz-date", amz_date(issued_at)),
            PolicyCondition::exact("x-amz-expires", POLICY_EXPIRES_SECONDS.to_string()),
        ];
        if let Some(token) = credentials.session_token.as_deref().filter(|t| !t.is_empty()) {
            conditions.push(PolicyCondition::exact("x-amz-security-token", token));
        }

        UploadPolicy {
            expiration: expiration.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            conditions,
        }
    }

    /// Build and sign a grant for uploads under `key_prefix`.
    pub fn build(
        &self,
        key_prefix: &str,
        access_control: AccessControl,
        credentials: &CredentialSet,
        scheme: UploadScheme,
        issued_at: DateTime<Utc>,
    ) -> BrokerResult<SignedUploadGrant> {
        let policy = self.policy(key_prefix, access_control, credentials, issued_at);
        let encoded = general_purpose::STANDARD.encode(serde_json::to_vec(&policy)?);

        let date = issued_at.format("%Y%m%d").to_string();
        let signing_key = derive_signing_key(&credentials.secret_key, &date, &self.region, SERVICE);
        let signature = compute_signature(&signing_key, &encoded);

        Ok(SignedUploadGrant {
            form_action: self.form_action(scheme),
            policy: encoded,
            signature,
            credential: credential_scope(&credentials.access_key, &date, &self.region),
            date: amz_date(issued_at),
            acl: access_control.as_str().to_string(),
            session_token: credentials
                .session_token
                .clone()
                .filter(|token| !token.is_empty()),
            issued_at,
            expires_at: issued_at + Duration::seconds(POLICY_EXPIRES_SECONDS),
        })
    }

    /// URL the browser posts the multipart form to.
    pub fn form_action(&self, scheme: UploadScheme) -> String {
        let hostname = match &self.custom_host {
            Some(host) => strip_scheme(host).trim_end_matches('/').to_string(),
            None => format!("s3.{}.amazonaws.com", self.region),
        };
        let endpoint = if self.path_style {
            format!("{}/{}", hostname, self.bucket)
        } else {
            format!("{}.{}", self.bucket, hostname)
        };
        format!("{}://{}/", scheme, endpoint)
    }

    /// Widget settings accompanying a grant for `key_prefix`.
    pub fn form_settings(
        &self,
        key_prefix: &str,
        options: &FieldUploadOptions,
        default_max_size: u64,
    ) -> UploadFormSettings {
        let extension_list = options
            .extensions
            .as_deref()
            .map(|list| {
                list.split(' ')
                    .filter(|ext| !ext.is_empty())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .filter(|list| !list.is_empty());

        let mut element_parents = options.array_parents.clone();
        if options.multiple {
            element_parents.pop();
        }

        let field_name = if options.field_parents.is_empty() {
            options.field_name.clone()
        } else {
            format!("{}_{}", options.field_parents.join("_"), options.field_name)
        };

        UploadFormSettings {
            upload_location: format!("{}::{}", self.bucket, key_prefix),
            extension_list,
            max_size: options.max_filesize.unwrap_or(default_max_size),
            element_parents: element_parents.join("/"),
            field_name,
        }
    }
}

fn amz_date(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

fn strip_scheme(host: &str) -> &str {
    host.strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host)
}
