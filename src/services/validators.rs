//! File validators run against a finalized upload before it is kept.

use crate::models::file_record::FileRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// Names longer than this are rejected, matching common file system limits.
pub const MAX_FILE_NAME_LENGTH: usize = 240;

#[async_trait]
pub trait FileValidator: Send + Sync {
    /// Human-readable problems with `file`; empty when it passes.
    async fn validate(&self, file: &FileRecord) -> Vec<String>;
}

pub type ValidatorSet = Vec<Arc<dyn FileValidator>>;

#[derive(Clone, Debug)]
pub struct MaxSizeValidator {
    max_bytes: u64,
}

impl MaxSizeValidator {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl FileValidator for MaxSizeValidator {
    async fn validate(&self, file: &FileRecord) -> Vec<String> {
        let Ok(size) = u64::try_from(file.filesize) else {
            return vec![format!("The file size of {} bytes is invalid.", file.filesize)];
        };
        if size > self.max_bytes {
            vec![format!(
                "The file is {} bytes exceeding the maximum file size of {} bytes.",
                size, self.max_bytes
            )]
        } else {
            Vec::new()
        }
    }
}

/// Allow-list of extensions, compared case-insensitively.
#[derive(Clone, Debug)]
pub struct ExtensionValidator {
    allowed: Vec<String>,
}

impl ExtensionValidator {
    /// Build from a space or comma separated list such as `"jpg png gif"`.
    pub fn from_list(list: &str) -> Self {
        Self {
            allowed: list
                .split([' ', ','])
                .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl FileValidator for ExtensionValidator {
    async fn validate(&self, file: &FileRecord) -> Vec<String> {
        let allowed = file
            .extension()
            .map(str::to_ascii_lowercase)
            .is_some_and(|ext| self.allowed.contains(&ext));
        if allowed {
            Vec::new()
        } else {
            vec![format!(
                "Only files with the following extensions are allowed: {}.",
                self.allowed.join(" ")
            )]
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NameLengthValidator;

#[async_trait]
impl FileValidator for NameLengthValidator {
    async fn validate(&self, file: &FileRecord) -> Vec<String> {
        let len = file.filename.chars().count();
        if len == 0 {
            vec!["The file's name is empty. Please give a name to the file.".into()]
        } else if len > MAX_FILE_NAME_LENGTH {
            vec![format!(
                "The file's name exceeds the {} characters limit. Please rename the file and try again.",
                MAX_FILE_NAME_LENGTH
            )]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::file_record::FileStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn file(name: &str, size: i64) -> FileRecord {
        FileRecord {
            id: 1,
            uuid: Uuid::new_v4(),
            owner_id: 1,
            status: FileStatus::Temporary,
            filename: name.into(),
            uri: format!("public://{}", name),
            filesize: size,
            filemime: "application/octet-stream".into(),
            source: "field_upload".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn size_limit_is_inclusive() {
        let validator = MaxSizeValidator::new(100);
        assert!(validator.validate(&file("a.txt", 100)).await.is_empty());
        assert_eq!(validator.validate(&file("a.txt", 101)).await.len(), 1);
    }

    #[tokio::test]
    async fn negative_size_fails_the_size_limit() {
        let errors = MaxSizeValidator::new(10).validate(&file("a.txt", -5000)).await;
        assert_eq!(errors, vec!["The file size of -5000 bytes is invalid.".to_string()]);
    }

    #[tokio::test]
    async fn extensions_match_case_insensitively() {
        let validator = ExtensionValidator::from_list("jpg  .PNG,gif");
        assert!(validator.validate(&file("cat.JPG", 1)).await.is_empty());
        assert!(validator.validate(&file("cat.png", 1)).await.is_empty());
        let errors = validator.validate(&file("cat.exe", 1)).await;
        assert_eq!(
            errors,
            vec!["Only files with the following extensions are allowed: jpg png gif.".to_string()]
        );
        assert_eq!(validator.validate(&file("noext", 1)).await.len(), 1);
    }

    #[tokio::test]
    async fn name_length_rejects_empty_and_long_names() {
        let validator = NameLengthValidator;
        assert_eq!(validator.validate(&file("", 1)).await.len(), 1);
        assert_eq!(validator.validate(&file(&"x".repeat(241), 1)).await.len(), 1);
        assert!(validator.validate(&file(&"x".repeat(240), 1)).await.is_empty());
    }
}
