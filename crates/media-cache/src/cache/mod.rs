//! # Cache Module
//!
//! On-disk storage of downloaded media, keyed by the SHA-256 of the source URL.

pub mod eviction;
pub mod mime;
mod store;
mod types;

pub use store::MediaCache;
pub use types::{
    CacheConfig, CacheKey, CacheStatus, CachedMedia, DuplicatePolicy, EvictionPolicy,
    EvictionReport,
};
