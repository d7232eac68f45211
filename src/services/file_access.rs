//! Which submitted file ids a form submitter may attach.
//!
//! Temporary files belong to whoever uploaded them. Anonymous uploaders all
//! share owner id 0, so they prove ownership with the reuse token handed out
//! at finalize time.

use crate::{
    errors::BrokerResult,
    models::file_record::FileRecord,
    services::file_repository::FileRepository,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub const ANONYMOUS: i64 = 0;

/// One file id as submitted by a form, with its reuse token if any.
#[derive(Deserialize, Clone, Debug)]
pub struct FileReference {
    pub fid: i64,
    #[serde(default)]
    pub token: Option<String>,
}

pub struct FileReferenceCheck {
    files: FileRepository,
    secret: String,
}

impl FileReferenceCheck {
    pub fn new(files: FileRepository, secret: impl Into<String>) -> Self {
        Self {
            files,
            secret: secret.into(),
        }
    }

    /// Token proving the holder uploaded file `fid`.
    pub fn reuse_token(&self, fid: i64) -> String {
        URL_SAFE_NO_PAD.encode(self.mac(fid).finalize().into_bytes())
    }

    fn verify_token(&self, fid: i64, token: &str) -> bool {
        match URL_SAFE_NO_PAD.decode(token) {
            Ok(bytes) => self.mac(fid).verify_slice(&bytes).is_ok(),
            Err(_) => false,
        }
    }

    fn mac(&self, fid: i64) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can accept keys of any length");
        mac.update(format!("file-{}", fid).as_bytes());
        mac
    }

    /// Ids from `submissions` that `submitter` may reference.
    ///
    /// Unknown ids are dropped. A single temporary file the submitter cannot
    /// prove ownership of empties the whole selection.
    pub async fn allowed_files(
        &self,
        submitter: i64,
        submissions: &[FileReference],
    ) -> BrokerResult<Vec<i64>> {
        let ids: Vec<i64> = submissions.iter().map(|s| s.fid).collect();
        let records: HashMap<i64, FileRecord> = self
            .files
            .load_many(&ids)
            .await?
            .into_iter()
            .map(|record| (record.id, record))
            .collect();

        let mut allowed = Vec::new();
        for submission in submissions {
            let Some(record) = records.get(&submission.fid) else {
                continue;
            };
            if record.is_temporary() && !self.may_claim(submitter, record, submission) {
                warn!(
                    "user {} referenced temporary file {} it does not own",
                    submitter, record.id
                );
                return Ok(Vec::new());
            }
            if !allowed.contains(&record.id) {
                allowed.push(record.id);
            }
        }
        Ok(allowed)
    }

    fn may_claim(&self, submitter: i64, record: &FileRecord, submission: &FileReference) -> bool {
        if record.owner_id != submitter {
            return false;
        }
        if submitter != ANONYMOUS {
            return true;
        }
        submission
            .token
            .as_deref()
            .is_some_and(|token| self.verify_token(record.id, token))
    }
}
