//! Mapping between CMS upload locations, bucket keys and stored file URIs.
//!
//! Three addressing forms meet here:
//! - abstract CMS locations: `public://images`, `private://docs`, `s3://raw`
//! - bucket keys: `[root/]s3fs-public/images/cat.jpg`
//! - storage URIs used by the key cache: `s3://s3fs-public/images/cat.jpg`
//!   (root folder stripped)

use crate::{
    config::BrokerConfig,
    errors::{BrokerError, BrokerResult},
};

const STORAGE_SCHEME: &str = "s3://";

#[derive(Clone, Debug)]
pub struct StoragePaths {
    root_folder: Option<String>,
    public_folder: String,
    private_folder: String,
}

impl StoragePaths {
    pub fn new(
        root_folder: Option<String>,
        public_folder: impl Into<String>,
        private_folder: impl Into<String>,
    ) -> Self {
        Self {
            root_folder: root_folder
                .map(|folder| folder.trim_matches('/').to_string())
                .filter(|folder| !folder.is_empty()),
            public_folder: public_folder.into().trim_matches('/').to_string(),
            private_folder: private_folder.into().trim_matches('/').to_string(),
        }
    }

    pub fn from_config(cfg: &BrokerConfig) -> Self {
        Self::new(
            cfg.root_folder.clone(),
            cfg.public_folder.clone(),
            cfg.private_folder.clone(),
        )
    }

    /// Client transports encode `/` as `::` inside path segments.
    pub fn decode(path: &str) -> String {
        path.replace("::", "/")
    }

    /// Drop the root folder from the front of a bucket key, if configured.
    pub fn strip_root<'a>(&self, key: &'a str) -> &'a str {
        let Some(root) = self.root_folder.as_deref() else {
            return key;
        };
        match key.strip_prefix(root) {
            Some("") => "",
            Some(rest) if rest.starts_with('/') => &rest[1..],
            _ => key,
        }
    }

    /// Put the root folder in front of a bucket-relative path.
    pub fn with_root(&self, path: &str) -> String {
        match self.root_folder.as_deref() {
            Some(root) if path.is_empty() => root.to_string(),
            Some(root) => format!("{}/{}", root, path),
            None => path.to_string(),
        }
    }

    /// Cache URI (`s3://…`, root stripped) of a bucket key.
    pub fn storage_uri(&self, key: &str) -> String {
        format!("{}{}", STORAGE_SCHEME, self.strip_root(key))
    }

    /// Rewrite a storage URI under the public/private folders into the
    /// abstract `public://` / `private://` form. Other URIs pass through.
    pub fn abstract_uri(&self, storage_uri: &str) -> String {
        let folders = [
            (self.public_folder.as_str(), "public"),
            (self.private_folder.as_str(), "private"),
        ];
        for (folder, scheme) in folders {
            let Some(rest) = storage_uri
                .strip_prefix(STORAGE_SCHEME)
                .and_then(|path| path.strip_prefix(folder))
            else {
                continue;
            };
            if rest.is_empty() {
                return format!("{}://", scheme);
            }
            if rest.starts_with('/') {
                return format!("{}:/{}", scheme, rest);
            }
        }
        storage_uri.to_string()
    }

    /// Storage URI prefixes still carrying raw scheme folders.
    pub fn legacy_prefixes(&self) -> [String; 2] {
        [
            format!("{}{}", STORAGE_SCHEME, self.public_folder),
            format!("{}{}", STORAGE_SCHEME, self.private_folder),
        ]
    }

    /// Bucket key prefix for an abstract upload location such as
    /// `public://images/2024`.
    pub fn key_prefix_for(&self, location: &str) -> BrokerResult<String> {
        let (scheme, target) = location
            .split_once("://")
            .ok_or_else(|| BrokerError::InvalidLocation(location.to_string()))?;

        let folder = match scheme {
            "public" => Some(self.public_folder.as_str()),
            "private" => Some(self.private_folder.as_str()),
            "s3" => None,
            _ => return Err(BrokerError::InvalidLocation(location.to_string())),
        };

        let target = target.trim_matches('/');
        if target.split('/').any(|segment| segment == "..") {
            return Err(BrokerError::InvalidLocation(location.to_string()));
        }

        let relative = match folder {
            Some(folder) if target.is_empty() => folder.to_string(),
            Some(folder) => format!("{}/{}", folder, target),
            None => target.to_string(),
        };
        Ok(self.with_root(&relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(root: Option<&str>) -> StoragePaths {
        StoragePaths::new(root.map(String::from), "s3fs-public", "s3fs-private")
    }

    #[test]
    fn maps_public_location_to_folder_under_root() {
        let p = paths(Some("site"));
        assert_eq!(
            p.key_prefix_for("public://images/2024").unwrap(),
            "site/s3fs-public/images/2024"
        );
        assert_eq!(p.key_prefix_for("private://").unwrap(), "site/s3fs-private");
        assert_eq!(paths(None).key_prefix_for("s3://raw/").unwrap(), "raw");
    }

    #[test]
    fn rejects_unknown_schemes_and_traversal() {
        let p = paths(None);
        assert!(matches!(
            p.key_prefix_for("temporary://x"),
            Err(BrokerError::InvalidLocation(_))
        ));
        assert!(p.key_prefix_for("images").is_err());
        assert!(p.key_prefix_for("public://a/../b").is_err());
    }

    #[test]
    fn storage_uri_strips_only_a_leading_root() {
        let p = paths(Some("site"));
        assert_eq!(
            p.storage_uri("site/s3fs-public/a.txt"),
            "s3://s3fs-public/a.txt"
        );
        assert_eq!(p.storage_uri("other/site/a.txt"), "s3://other/site/a.txt");
        assert_eq!(p.storage_uri("sitemap/a.txt"), "s3://sitemap/a.txt");
    }

    #[test]
    fn abstract_uri_respects_folder_boundaries() {
        let p = paths(None);
        assert_eq!(
            p.abstract_uri("s3://s3fs-public/images/a.png"),
            "public://images/a.png"
        );
        assert_eq!(p.abstract_uri("s3://s3fs-private/a.pdf"), "private://a.pdf");
        assert_eq!(
            p.abstract_uri("s3://s3fs-public-old/a.png"),
            "s3://s3fs-public-old/a.png"
        );
        assert_eq!(p.abstract_uri("s3://raw/a.png"), "s3://raw/a.png");
    }

    #[test]
    fn decodes_transport_separators() {
        assert_eq!(StoragePaths::decode("s3fs-public::images"), "s3fs-public/images");
    }
}
