//! Browser upload policy documents and the grant handed to clients.

use chrono::{DateTime, Utc};
use serde::{
    Serialize, Serializer,
    ser::{SerializeMap, SerializeSeq},
};
use std::collections::BTreeMap;

pub const SIGNING_ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const SUCCESS_ACTION_STATUS: &str = "201";
/// Lifetime of a grant in seconds (6 hours).
pub const POLICY_EXPIRES_SECONDS: i64 = 6 * 60 * 60;

/// A single policy condition.
///
/// Exact matches serialize as `{"field": "value"}`, prefix matches as
/// `["starts-with", "$field", "prefix"]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyCondition {
    Exact { field: String, value: String },
    StartsWith { field: String, prefix: String },
}

impl PolicyCondition {
    pub fn exact(field: impl Into<String>, value: impl Into<String>) -> Self {
        PolicyCondition::Exact {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        PolicyCondition::StartsWith {
            field: field.into(),
            prefix: prefix.into(),
        }
    }
}

impl Serialize for PolicyCondition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PolicyCondition::Exact { field, value } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(field, value)?;
                map.end()
            }
            PolicyCondition::StartsWith { field, prefix } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("starts-with")?;
                seq.serialize_element(&format!("${}", field))?;
                seq.serialize_element(prefix)?;
                seq.end()
            }
        }
    }
}

/// The policy document the store checks the browser POST against.
#[derive(Serialize, Clone, Debug)]
pub struct UploadPolicy {
    /// `YYYY-MM-DDTHH:MM:SSZ`
    pub expiration: String,
    pub conditions: Vec<PolicyCondition>,
}

/// Everything the browser needs to POST straight to the bucket.
#[derive(Serialize, Clone, Debug)]
pub struct SignedUploadGrant {
    pub form_action: String,
    /// Base64 of the JSON policy.
    pub policy: String,
    /// Hex HMAC-SHA256 of `policy` with the derived signing key.
    pub signature: String,
    /// `<access key>/<YYYYMMDD>/<region>/s3/aws4_request`
    pub credential: String,
    /// `YYYYMMDDTHHMMSSZ`
    pub date: String,
    pub acl: String,
    pub session_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SignedUploadGrant {
    /// Multipart form fields to send along with the file bytes.
    pub fn form_fields(&self) -> BTreeMap<&'static str, String> {
        let mut fields = BTreeMap::new();
        fields.insert("acl", self.acl.clone());
        fields.insert("success_action_status", SUCCESS_ACTION_STATUS.to_string());
        fields.insert("x-amz-algorithm", SIGNING_ALGORITHM.to_string());
        fields.insert("x-amz-credential", self.credential.clone());
        fields.insert("x-amz-date", self.date.clone());
        fields.insert("policy", self.policy.clone());
        fields.insert("x-amz-signature", self.signature.clone());
        fields.insert("x-amz-expires", POLICY_EXPIRES_SECONDS.to_string());
        if let Some(token) = &self.session_token {
            fields.insert("x-amz-security-token", token.clone());
        }
        fields
    }
}

/// Per-field settings the upload widget needs besides the grant.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadFormSettings {
    /// `bucket::key-prefix`, the prefix the policy allows.
    pub upload_location: String,
    /// Comma separated allowed extensions, if the field restricts them.
    pub extension_list: Option<String>,
    pub max_size: u64,
    pub element_parents: String,
    pub field_name: String,
}
