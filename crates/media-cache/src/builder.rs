//! # Builder for DownloaderConfig
//!
//! Fluent construction of [`DownloaderConfig`] instances.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use media_cache_engine::DownloaderConfig;
//!
//! let config = DownloaderConfig::builder()
//!     .with_overall_timeout(Duration::from_secs(30))
//!     .with_max_retries(3)
//!     .with_user_agent("MyReader/1.0")
//!     .with_header("X-Requested-With", "XMLHttpRequest")
//!     .with_proxy_url("socks5://127.0.0.1:1080")
//!     .expect("valid proxy")
//!     .build();
//!
//! assert_eq!(config.max_retries, 3);
//! assert!(config.proxy.is_some());
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::{DownloadError, DownloaderConfig, proxy::ProxyConfig, retry::RetryPolicy};

/// Builder for creating DownloaderConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct DownloaderConfigBuilder {
    config: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: DownloaderConfig::default(),
        }
    }

    /// Set the deadline covering a whole download call
    pub fn with_overall_timeout(mut self, timeout: Duration) -> Self {
        self.config.overall_timeout = timeout;
        self
    }

    /// Set the HEAD probe timeout
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    /// Enable or disable the HEAD probe
    pub fn with_probe_enabled(mut self, enabled: bool) -> Self {
        self.config.probe_enabled = enabled;
        self
    }

    /// Set the per-attempt timeout used for files below the size threshold
    pub fn with_base_timeout(mut self, timeout: Duration) -> Self {
        self.config.base_timeout = timeout;
        self
    }

    /// Set the per-attempt timeout used when the size is unknown
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// Set the cap of the size-derived per-attempt timeout
    pub fn with_max_download_timeout(mut self, timeout: Duration) -> Self {
        self.config.max_download_timeout = timeout;
        self
    }

    /// Set the number of GET attempts (at least one)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries.max(1);
        self
    }

    /// Set the backoff curve between attempts
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Set all HTTP headers, replacing any existing headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    /// Add headers on top of the current ones, overriding same-named entries
    pub fn with_extra_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.config.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Set the proxy configuration
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self.config.use_system_proxy = false; // Explicit proxy overrides system proxy
        self
    }

    /// Parse and set a proxy URL; an empty string leaves the proxy unset
    pub fn with_proxy_url(self, proxy_url: &str) -> Result<Self, DownloadError> {
        Ok(match ProxyConfig::parse(proxy_url)? {
            Some(proxy) => self.with_proxy(proxy),
            None => self,
        })
    }

    /// Set whether to use system proxy settings if available
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        if self.config.proxy.is_none() {
            self.config.use_system_proxy = use_system_proxy;
        }
        self
    }

    /// Build the DownloaderConfig instance
    pub fn build(self) -> DownloaderConfig {
        self.config
    }
}

impl Default for DownloaderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
