//! # Cache Types
//!
//! Common types used across the media cache.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Whether a fetch was served from disk or downloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Resource found in cache
    Hit,
    /// Resource downloaded and written to the cache
    Miss,
}

/// Which file survives when several files exist for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Keep the first match in directory listing order
    #[default]
    FirstListed,
    /// Keep the most recently modified match
    NewestModified,
}

/// Digest of a source URL, used as the file stem of its cache entry.
///
/// The URL string is hashed verbatim: no normalization, so two spellings of
/// the same resource get two keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_url(url: &str) -> Self {
        let hash = Sha256::digest(url.as_bytes());
        Self(hex::encode(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `key` or `key.<ext>`
    pub(crate) fn matches_file_name(&self, name: &str) -> bool {
        match name.strip_prefix(self.0.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('.') && rest.len() > 1,
            None => false,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration for the media cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding the cached files
    pub root: PathBuf,
    /// Tie-break among duplicate files of one key
    pub duplicate_policy: DuplicatePolicy,
}

impl CacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("media-cache"))
    }
}

/// Media served by [`MediaCache::fetch`](crate::MediaCache::fetch)
#[derive(Debug, Clone)]
pub struct CachedMedia {
    pub bytes: Bytes,
    pub content_type: String,
    pub path: PathBuf,
    pub status: CacheStatus,
}

/// Limits enforced by a maintenance pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Remove files older than this many days
    pub max_age_days: Option<i64>,
    /// Trim oldest files until the cache fits in this many MB
    pub max_size_mb: Option<u64>,
    /// Pause between maintenance passes
    pub interval: Duration,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: Some(30),
            max_size_mb: Some(500),
            interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Files removed by one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub expired: usize,
    pub trimmed: usize,
}
