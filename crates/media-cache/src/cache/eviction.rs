//! Age and size based eviction over a cache directory.
//!
//! Only regular files directly under the directory are considered. A file
//! that cannot be inspected or removed is logged and skipped; the pass goes on.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, info, warn};

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const BYTES_PER_MB: u64 = 1024 * 1024;

struct CachedFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

async fn list_files(dir: &Path) -> io::Result<Vec<CachedFile>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "Skipping unreadable cache entry");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        files.push(CachedFile {
            path: entry.path(),
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    Ok(files)
}

async fn remove(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            false
        }
    }
}

/// Delete files last modified more than `max_age_days` ago.
///
/// A non-positive age removes every file.
pub async fn cleanup_old_files(dir: &Path, max_age_days: i64) -> io::Result<usize> {
    let now = SystemTime::now();
    let cutoff = if max_age_days <= 0 {
        now + Duration::from_secs(SECS_PER_DAY)
    } else {
        let age = Duration::from_secs((max_age_days as u64).saturating_mul(SECS_PER_DAY));
        now.checked_sub(age).unwrap_or(SystemTime::UNIX_EPOCH)
    };

    let mut removed = 0;
    for file in list_files(dir).await? {
        if file.modified < cutoff && remove(&file.path).await {
            removed += 1;
        }
    }

    if removed > 0 {
        info!(dir = %dir.display(), removed, max_age_days, "Removed expired cache files");
    }
    Ok(removed)
}

/// Sum of the sizes of the files directly under `dir`.
pub async fn cache_size_bytes(dir: &Path) -> io::Result<u64> {
    Ok(list_files(dir).await?.iter().map(|f| f.size).sum())
}

/// Delete least recently modified files until the total is at most
/// `max_size_mb` megabytes.
pub async fn cleanup_by_size(dir: &Path, max_size_mb: u64) -> io::Result<usize> {
    cleanup_by_size_bytes(dir, max_size_mb.saturating_mul(BYTES_PER_MB)).await
}

/// Byte-granular form of [`cleanup_by_size`].
pub async fn cleanup_by_size_bytes(dir: &Path, limit: u64) -> io::Result<usize> {
    let mut files = list_files(dir).await?;
    let mut total: u64 = files.iter().map(|f| f.size).sum();

    if total <= limit {
        return Ok(0);
    }

    files.sort_by_key(|f| f.modified);

    let mut removed = 0;
    for file in files {
        if total <= limit {
            break;
        }
        if remove(&file.path).await {
            total = total.saturating_sub(file.size);
            removed += 1;
        }
    }

    info!(
        dir = %dir.display(),
        removed,
        remaining_bytes = total,
        limit_bytes = limit,
        "Trimmed cache to size limit"
    );
    Ok(removed)
}
