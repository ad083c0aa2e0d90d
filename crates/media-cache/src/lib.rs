//! # Media Cache Engine
//!
//! A local cache for remote media (images, video, audio) behind
//! anti-hotlinking checks. Files are stored flat under a directory, named by
//! the SHA-256 of their source URL, and served back without re-fetching.
//!
//! ## Features
//!
//! - Content-addressable store with duplicate reconciliation
//! - Adaptive downloader: HEAD size probe, size-scaled timeouts, jittered backoff
//! - Referer selection that passes common hotlink checks
//! - Runtime proxy switching (HTTP, HTTPS, SOCKS5)
//! - Age and size based eviction, optionally on a background task

pub mod builder;
pub mod cache;
pub mod client;
pub mod config;
pub mod downloader;
pub mod error;
pub mod flight;
pub mod proxy;
pub mod referer;
pub mod retry;

pub use builder::DownloaderConfigBuilder;
pub use cache::{
    CacheConfig, CacheKey, CacheStatus, CachedMedia, DuplicatePolicy, EvictionPolicy,
    EvictionReport, MediaCache,
};
pub use config::DownloaderConfig;
pub use downloader::{MediaDownload, MediaDownloader};
pub use error::{CacheError, DownloadError};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use referer::smart_referer;
pub use retry::{NetworkErrorKind, RetryAttempt, RetryPolicy};
