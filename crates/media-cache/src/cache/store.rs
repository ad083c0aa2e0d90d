//! # Media Cache Store
//!
//! Flat directory of `sha256(url) + extension` files. The directory listing is
//! the index: there is no metadata file, and an entry is whatever file carries
//! the key as its stem.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::eviction;
use crate::cache::mime::{self, GENERIC_EXTENSION};
use crate::cache::types::{
    CacheConfig, CacheKey, CacheStatus, CachedMedia, DuplicatePolicy, EvictionPolicy,
    EvictionReport,
};
use crate::downloader::MediaDownloader;
use crate::error::{CacheError, DownloadError};
use crate::flight::KeyedLocks;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Subdirectory of the root holding writes in progress
const STAGING_DIR: &str = ".partial";

/// Content-addressable media cache backed by a single directory
#[derive(Debug)]
pub struct MediaCache {
    config: CacheConfig,
    downloader: MediaDownloader,
    in_flight: KeyedLocks,
}

impl MediaCache {
    /// Create the cache, making sure its directory exists.
    pub async fn new(config: CacheConfig, downloader: MediaDownloader) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.root)
            .await
            .map_err(|e| CacheError::io(&config.root, e))?;

        Ok(Self {
            config,
            downloader,
            in_flight: KeyedLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn downloader(&self) -> &MediaDownloader {
        &self.downloader
    }

    /// Expected path of `url`'s entry, derived from the URL alone.
    pub fn path_for(&self, url: &str) -> PathBuf {
        let key = CacheKey::from_url(url);
        let ext = mime::extension_from_url(url).unwrap_or(GENERIC_EXTENSION);
        self.config.root.join(format!("{key}{ext}"))
    }

    /// Find the file holding `url`, whatever its extension.
    ///
    /// When several files exist for the key, one is kept according to the
    /// configured [`DuplicatePolicy`] and the others are deleted.
    pub async fn resolve(&self, url: &str) -> Result<Option<PathBuf>, CacheError> {
        let key = CacheKey::from_url(url);
        let root = &self.config.root;

        let mut entries = match fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(root, e)),
        };

        let mut matches = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::io(root, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !key.matches_file_name(&name) {
                continue;
            }
            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => matches.push(entry.path()),
                _ => {}
            }
        }

        if matches.len() <= 1 {
            return Ok(matches.pop());
        }

        let keep = match self.config.duplicate_policy {
            DuplicatePolicy::FirstListed => 0,
            DuplicatePolicy::NewestModified => newest_index(&matches).await,
        };
        let kept = matches.swap_remove(keep);

        for stale in matches {
            warn!(
                kept = %kept.display(),
                removed = %stale.display(),
                "Removing duplicate cache file"
            );
            if let Err(e) = fs::remove_file(&stale).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %stale.display(), error = %e, "Failed to remove duplicate cache file");
                }
            }
        }

        Ok(Some(kept))
    }

    /// Whether an entry exists for `url`.
    pub async fn exists(&self, url: &str) -> bool {
        matches!(self.resolve(url).await, Ok(Some(_)))
    }

    /// Serve `url` from disk, downloading and caching it on a miss.
    ///
    /// `page_referer` is the page the media was found on. Concurrent misses
    /// for the same URL download it once; later callers read the stored file.
    pub async fn fetch(
        &self,
        url: &str,
        page_referer: &str,
        cancel: &CancellationToken,
    ) -> Result<CachedMedia, CacheError> {
        if let Some(hit) = self.read_cached(url).await? {
            return Ok(hit);
        }

        let key = CacheKey::from_url(url);
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled.into()),
            guard = self.in_flight.lock(key.as_str()) => guard,
        };

        // Filled by another caller while we waited for the key
        if let Some(hit) = self.read_cached(url).await? {
            return Ok(hit);
        }

        let download = self.downloader.download(url, page_referer, cancel).await?;
        let path = self
            .write(url, &download.bytes, download.declared_content_type.as_deref())
            .await?;

        debug!(url, path = %path.display(), bytes = download.bytes.len(), "Cached media");

        Ok(CachedMedia {
            content_type: download.content_type(),
            bytes: download.bytes,
            path,
            status: CacheStatus::Miss,
        })
    }

    async fn read_cached(&self, url: &str) -> Result<Option<CachedMedia>, CacheError> {
        let Some(path) = self.resolve(url).await? else {
            return Ok(None);
        };

        let data = match fs::read(&path).await {
            Ok(data) => data,
            // Evicted between listing and reading
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

        Ok(Some(CachedMedia {
            bytes: Bytes::from(data),
            content_type: mime::content_type_from_extension(ext).to_string(),
            path,
            status: CacheStatus::Hit,
        }))
    }

    /// Store `data` for `url`.
    ///
    /// The extension comes from `content_type` when it names a known media
    /// type, else from the URL, else `.bin`. The file is written under the
    /// staging directory and renamed into place.
    pub async fn write(
        &self,
        url: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<PathBuf, CacheError> {
        let key = CacheKey::from_url(url);
        let ext = content_type
            .and_then(mime::extension_from_content_type)
            .or_else(|| mime::extension_from_url(url))
            .unwrap_or(GENERIC_EXTENSION);

        let staged = self.stage(&key, data).await?;
        let path = self.config.root.join(format!("{key}{ext}"));
        self.publish(&staged, &path).await?;
        Ok(path)
    }

    // Staged files live one level down, out of reach of eviction and resolve().
    async fn stage(&self, key: &CacheKey, data: &[u8]) -> Result<PathBuf, CacheError> {
        let staging = self.config.root.join(STAGING_DIR);
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| CacheError::io(&staging, e))?;

        let temp_path = staging.join(format!(
            "{key}.{}-{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = fs::write(&temp_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(CacheError::io(&temp_path, e));
        }
        Ok(temp_path)
    }

    async fn publish(&self, temp_path: &Path, path: &Path) -> Result<(), CacheError> {
        if let Err(e) = fs::rename(temp_path, path).await {
            warn!(
                from = %temp_path.display(),
                to = %path.display(),
                error = %e,
                "Failed to move cache file into place"
            );
            let _ = fs::remove_file(temp_path).await;
            return Err(CacheError::io(path, e));
        }
        Ok(())
    }

    /// Delete every file cached for `url`. Returns whether anything was removed.
    pub async fn remove(&self, url: &str) -> Result<bool, CacheError> {
        let mut removed = false;
        // resolve() leaves at most one file behind
        while let Some(path) = self.resolve(url).await? {
            match fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(&path, e)),
            }
        }
        Ok(removed)
    }

    /// Delete every cached file.
    pub async fn clear(&self) -> io::Result<usize> {
        self.cleanup_old_files(0).await
    }

    /// Replace the proxy used by later downloads; see [`MediaDownloader::set_proxy`].
    pub fn set_proxy(&self, proxy_url: &str) -> Result<(), DownloadError> {
        self.downloader.set_proxy(proxy_url)
    }

    /// Delete files older than `max_age_days`; `<= 0` deletes everything.
    pub async fn cleanup_old_files(&self, max_age_days: i64) -> io::Result<usize> {
        eviction::cleanup_old_files(&self.config.root, max_age_days).await
    }

    /// Total size of the cached files.
    pub async fn cache_size_bytes(&self) -> io::Result<u64> {
        eviction::cache_size_bytes(&self.config.root).await
    }

    /// Delete oldest files until the cache fits in `max_size_mb`.
    pub async fn cleanup_by_size(&self, max_size_mb: u64) -> io::Result<usize> {
        eviction::cleanup_by_size(&self.config.root, max_size_mb).await
    }

    /// Delete oldest files until the cache fits in `max_bytes`.
    pub async fn cleanup_by_size_bytes(&self, max_bytes: u64) -> io::Result<usize> {
        eviction::cleanup_by_size_bytes(&self.config.root, max_bytes).await
    }

    /// Apply both eviction limits of `policy` once.
    pub async fn run_eviction(&self, policy: &EvictionPolicy) -> io::Result<EvictionReport> {
        let mut report = EvictionReport::default();

        if let Some(days) = policy.max_age_days {
            report.expired = self.cleanup_old_files(days).await?;
        }
        if let Some(mb) = policy.max_size_mb {
            report.trimmed = self.cleanup_by_size(mb).await?;
        }

        if report.expired + report.trimmed > 0 {
            info!(
                expired = report.expired,
                trimmed = report.trimmed,
                root = %self.config.root.display(),
                "Cache maintenance removed files"
            );
        }
        Ok(report)
    }

    /// Start a background task running [`run_eviction`](Self::run_eviction)
    /// every `policy.interval` until `cancel` fires.
    pub fn spawn_maintenance(
        self: Arc<Self>,
        policy: EvictionPolicy,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(policy.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.run_eviction(&policy).await {
                            warn!(error = %e, "Cache maintenance error");
                        }
                    }
                }
            }
            debug!("Cache maintenance stopped");
        })
    }
}

async fn newest_index(paths: &[PathBuf]) -> usize {
    let mut newest = (0, SystemTime::UNIX_EPOCH);
    for (index, path) in paths.iter().enumerate() {
        let modified = fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if modified > newest.1 {
            newest = (index, modified);
        }
    }
    newest.0
}
