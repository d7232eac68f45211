//! Collision-free object key allocation.
//!
//! The object store is authoritative for existence; the local key cache only
//! narrows down which `_<n>` suffixes are taken. A suffix picked from the cache
//! is always confirmed remotely, and a hit there means the cache is stale, in
//! which case we probe upward from the largest known suffix.
//!
//! Allocation is check-then-issue without any reservation: two concurrent
//! requests for the same directory and name can receive the same key, and the
//! later upload overwrites the earlier one. Nothing here serializes requests.

use crate::{
    errors::{BrokerError, BrokerResult},
    models::cached_key::CachedKeyRecord,
    services::{key_cache::KeyCache, object_store::ObjectStore, storage_paths::StoragePaths},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, warn};

/// Upper bound on remote probes after a stale cache was detected.
const MAX_SUFFIX_PROBES: u64 = 10_000;

/// Cached suffixes above this are ignored; they come from client-reported paths.
const MAX_TRACKED_SUFFIX: u64 = u32::MAX as u64;

const RESERVED_CHARS: [char; 7] = [':', '*', '?', '"', '<', '>', '|'];

/// What to do when the requested key is already taken.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Hand out the same key; the upload overwrites the object.
    Replace,
    /// Append the first free `_<n>` suffix.
    #[default]
    Rename,
    /// Refuse with [`BrokerError::KeyCollision`].
    Error,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct AllocatedKey {
    pub key: String,
    /// The sanitized file name the key was built from.
    pub file_name: String,
}

/// Replace control characters (and, when asked, characters reserved by
/// Windows file systems) with `_`.
pub fn sanitize_file_name(name: &str, replace_reserved: bool) -> String {
    name.chars()
        .map(|c| {
            if (c as u32) < 0x20 || (replace_reserved && RESERVED_CHARS.contains(&c)) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Split at the last `.`; the extension keeps its dot. No dot means no extension.
fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(pos) => file_name.split_at(pos),
        None => (file_name, ""),
    }
}

/// Parse the `_<n>` between `uri_base` and `extension`, if `uri` has exactly that shape.
fn parse_suffix(uri: &str, uri_base: &str, extension: &str) -> Option<u64> {
    let middle = uri.strip_prefix(uri_base)?.strip_suffix(extension)?;
    let digits = middle.strip_prefix('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Lowest non-negative integer not in `known`, so gaps left by deleted files get reused.
fn first_free_suffix(known: &BTreeSet<u64>) -> u64 {
    let mut candidate = 0;
    for &taken in known {
        if taken != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}

pub struct KeyAllocator {
    store: Arc<dyn ObjectStore>,
    cache: Arc<dyn KeyCache>,
    paths: StoragePaths,
    bucket: String,
    replace_reserved_chars: bool,
    max_probes: u64,
}

impl KeyAllocator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cache: Arc<dyn KeyCache>,
        paths: StoragePaths,
        bucket: impl Into<String>,
        replace_reserved_chars: bool,
    ) -> Self {
        Self {
            store,
            cache,
            paths,
            bucket: bucket.into(),
            replace_reserved_chars,
            max_probes: MAX_SUFFIX_PROBES,
        }
    }

    #[cfg(test)]
    pub fn with_max_probes(mut self, max_probes: u64) -> Self {
        self.max_probes = max_probes;
        self
    }

    /// Allocate a key for `file_name` under `directory`.
    ///
    /// `directory` is a bucket key prefix (root folder included) and may use
    /// `::` in place of `/`.
    pub async fn allocate(
        &self,
        directory: &str,
        file_name: &str,
        on_collision: CollisionPolicy,
    ) -> BrokerResult<AllocatedKey> {
        let file_name = sanitize_file_name(file_name, self.replace_reserved_chars);
        let directory = StoragePaths::decode(directory);
        let directory = directory.trim_end_matches('/');
        let candidate = join_key(directory, &file_name);

        if !self.key_exists(&candidate).await? {
            debug!("key {} is free", candidate);
            return Ok(AllocatedKey {
                key: candidate,
                file_name,
            });
        }

        let key = match on_collision {
            CollisionPolicy::Replace => {
                debug!("key {} exists, replacing", candidate);
                candidate
            }
            CollisionPolicy::Error => return Err(BrokerError::KeyCollision(candidate)),
            CollisionPolicy::Rename => self.disambiguate(directory, &file_name).await?,
        };

        Ok(AllocatedKey { key, file_name })
    }

    async fn disambiguate(&self, directory: &str, file_name: &str) -> BrokerResult<String> {
        let (base_name, extension) = split_extension(file_name);
        let key_base = join_key(directory, base_name);
        let uri_base = self.paths.storage_uri(&key_base);

        let known: BTreeSet<u64> = self
            .cache
            .search_prefix(&uri_base)
            .await?
            .iter()
            .filter_map(|uri| parse_suffix(uri, &uri_base, extension))
            .filter(|suffix| *suffix <= MAX_TRACKED_SUFFIX)
            .collect();

        let suffix = first_free_suffix(&known);
        let trial_key = format!("{}_{}{}", key_base, suffix, extension);
        if !self.key_exists(&trial_key).await? {
            return Ok(trial_key);
        }

        warn!(
            "key cache rebuild required: {} exists remotely but is not cached",
            trial_key
        );
        let exhausted = || BrokerError::KeyExhausted(join_key(directory, file_name));
        let mut suffix = known.last().copied().unwrap_or(suffix).max(suffix);
        for _ in 0..self.max_probes {
            suffix = suffix.checked_add(1).ok_or_else(exhausted)?;
            let trial_key = format!("{}_{}{}", key_base, suffix, extension);
            if !self.key_exists(&trial_key).await? {
                return Ok(trial_key);
            }
        }

        Err(exhausted())
    }

    /// Remote existence check, keeping the cache in line with what the store reports.
    async fn key_exists(&self, key: &str) -> BrokerResult<bool> {
        let uri = self.paths.storage_uri(key);
        let cached = self.cache.lookup(&uri).await?;
        let exists = self.store.exists_at(&self.bucket, key).await?;

        let cached_exists = cached.as_ref().map(|record| record.file_exists);
        match (cached_exists, exists) {
            (Some(true), true) => {}
            (None | Some(false), false) => {}
            (_, true) => {
                warn!("key cache missed existing object {}", uri);
                self.cache.write(&CachedKeyRecord::present(uri, 0)).await?;
            }
            (Some(true), false) => {
                warn!("key cache lists {} but the object is gone", uri);
                let mut record = CachedKeyRecord::present(uri, 0);
                record.file_exists = false;
                self.cache.write(&record).await?;
            }
        }
        Ok(exists)
    }
}

fn join_key(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", directory, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        key_cache::SqliteKeyCache,
        test_support::{InMemoryObjectStore, test_pool},
    };

    const BUCKET: &str = "uploads";

    async fn allocator_with(
        remote: &[&str],
        cached: &[&str],
        root: Option<&str>,
    ) -> (KeyAllocator, Arc<InMemoryObjectStore>, Arc<SqliteKeyCache>) {
        let store = Arc::new(InMemoryObjectStore::with_objects(BUCKET, remote));
        let cache = Arc::new(SqliteKeyCache::new(test_pool().await));
        for uri in cached {
            cache.write(&CachedKeyRecord::present(*uri, 1)).await.unwrap();
        }
        let paths = StoragePaths::new(root.map(String::from), "s3fs-public", "s3fs-private");
        let allocator = KeyAllocator::new(store.clone(), cache.clone(), paths, BUCKET, true);
        (allocator, store, cache)
    }

    #[test]
    fn sanitize_replaces_control_and_reserved_characters() {
        let raw = "re\u{1}port\t<v2>|final?.pdf";
        let clean = sanitize_file_name(raw, true);
        assert_eq!(clean, "re_port__v2__final_.pdf");
        assert_eq!(sanitize_file_name(raw, false), "re_port_<v2>|final?.pdf");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "plain.txt",
            "\u{0}\u{1f}x.bin",
            "a:b*c?d\"e<f>g|h",
            "tab\there\nnewline",
            "ünïcode ✓.png",
        ];
        for sample in samples {
            for reserved in [true, false] {
                let once = sanitize_file_name(sample, reserved);
                assert_eq!(sanitize_file_name(&once, reserved), once);
                assert!(once.chars().all(|c| c as u32 >= 0x20));
                if reserved {
                    assert!(!once.chars().any(|c| RESERVED_CHARS.contains(&c)));
                }
            }
        }
    }

    #[test]
    fn suffix_parsing_is_strict() {
        let base = "s3://docs/base";
        assert_eq!(parse_suffix("s3://docs/base_7.ext", base, ".ext"), Some(7));
        assert_eq!(parse_suffix("s3://docs/base.ext", base, ".ext"), None);
        assert_eq!(parse_suffix("s3://docs/base_old.ext", base, ".ext"), None);
        assert_eq!(parse_suffix("s3://docs/base_1.png", base, ".ext"), None);
        assert_eq!(parse_suffix("s3://docs/base_3", base, ""), Some(3));
    }

    #[test]
    fn first_free_suffix_fills_gaps() {
        assert_eq!(first_free_suffix(&BTreeSet::new()), 0);
        assert_eq!(first_free_suffix(&BTreeSet::from([0, 2])), 1);
        assert_eq!(first_free_suffix(&BTreeSet::from([0, 1, 2])), 3);
        assert_eq!(first_free_suffix(&BTreeSet::from([1, 2])), 0);
    }

    #[tokio::test]
    async fn free_key_is_returned_unchanged() {
        let (allocator, _, _) = allocator_with(&[], &[], None).await;
        let allocated = allocator
            .allocate("s3fs-public::docs", "base.ext", CollisionPolicy::Rename)
            .await
            .unwrap();
        assert_eq!(allocated.key, "s3fs-public/docs/base.ext");
        assert_eq!(allocated.file_name, "base.ext");
    }

    #[tokio::test]
    async fn rename_fills_the_first_gap_in_cached_suffixes() {
        let (allocator, _, _) = allocator_with(
            &["docs/base.ext", "docs/base_0.ext", "docs/base_2.ext"],
            &["s3://docs/base.ext", "s3://docs/base_0.ext", "s3://docs/base_2.ext"],
            None,
        )
        .await;

        let allocated = allocator
            .allocate("docs", "base.ext", CollisionPolicy::Rename)
            .await
            .unwrap();
        assert_eq!(allocated.key, "docs/base_1.ext");
    }

    #[tokio::test]
    async fn rename_with_empty_cache_starts_at_zero() {
        let (allocator, _, _) = allocator_with(&["docs/readme"], &[], None).await;
        let allocated = allocator
            .allocate("docs", "readme", CollisionPolicy::Rename)
            .await
            .unwrap();
        assert_eq!(allocated.key, "docs/readme_0");
    }

    #[tokio::test]
    async fn stale_cache_probes_past_the_largest_known_suffix() {
        let (allocator, store, cache) = allocator_with(
            &[
                "site/docs/base.ext",
                "site/docs/base_0.ext",
                "site/docs/base_1.ext",
                "site/docs/base_3.ext",
                "site/docs/base_4.ext",
            ],
            &["s3://docs/base.ext", "s3://docs/base_0.ext", "s3://docs/base_3.ext"],
            Some("site"),
        )
        .await;

        let allocated = allocator
            .allocate("site/docs", "base.ext", CollisionPolicy::Rename)
            .await
            .unwrap();

        assert_eq!(allocated.key, "site/docs/base_5.ext");
        // candidate, base_1, base_4, base_5
        assert_eq!(store.exists_calls(), 4);
        let healed = cache.lookup("s3://docs/base_1.ext").await.unwrap().unwrap();
        assert!(healed.file_exists);
    }

    #[tokio::test]
    async fn oversized_cached_suffix_does_not_derail_probing() {
        let (allocator, _, _) = allocator_with(
            &["docs/a.txt", "docs/a_0.txt"],
            &["s3://docs/a_18446744073709551615.txt"],
            None,
        )
        .await;

        let allocated = allocator
            .allocate("docs", "a.txt", CollisionPolicy::Rename)
            .await
            .unwrap();
        assert_eq!(allocated.key, "docs/a_1.txt");
    }

    #[tokio::test]
    async fn probing_gives_up_after_the_bound() {
        let (allocator, store, _) = allocator_with(
            &["docs/a.txt", "docs/a_0.txt", "docs/a_1.txt", "docs/a_2.txt"],
            &[],
            None,
        )
        .await;
        let allocator = allocator.with_max_probes(2);

        let err = allocator
            .allocate("docs", "a.txt", CollisionPolicy::Rename)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::KeyExhausted(key) if key == "docs/a.txt"));
        // candidate, a_0, a_1, a_2
        assert_eq!(store.exists_calls(), 4);
    }

    #[tokio::test]
    async fn error_policy_reports_collision_without_writing() {
        let (allocator, store, _) = allocator_with(&["docs/base.ext"], &[], None).await;
        let err = allocator
            .allocate("docs", "base.ext", CollisionPolicy::Error)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::KeyCollision(key) if key == "docs/base.ext"));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn replace_policy_keeps_the_existing_key() {
        let (allocator, _, _) = allocator_with(&["docs/base.ext"], &[], None).await;
        let allocated = allocator
            .allocate("docs/", "base.ext", CollisionPolicy::Replace)
            .await
            .unwrap();
        assert_eq!(allocated.key, "docs/base.ext");
    }

    #[tokio::test]
    async fn name_is_sanitized_before_lookup() {
        let (allocator, _, _) = allocator_with(&[], &[], None).await;
        let allocated = allocator
            .allocate("docs", "a\u{7}b|c.txt", CollisionPolicy::Rename)
            .await
            .unwrap();
        assert_eq!(allocated.key, "docs/a_b_c.txt");
    }
}
