use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};

use crate::{proxy::ProxyConfig, retry::RetryPolicy};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

const MB: u64 = 1024 * 1024;

/// Configurable options for the media downloader
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Deadline wrapping the probe, every attempt and every backoff sleep
    pub overall_timeout: Duration,

    /// Timeout of the HEAD request used to learn the content length
    pub probe_timeout: Duration,

    /// Whether to send the HEAD probe at all
    pub probe_enabled: bool,

    /// Per-attempt timeout for a known size below the threshold
    pub base_timeout: Duration,

    /// Per-attempt timeout when the size is unknown
    pub default_timeout: Duration,

    /// Upper bound of the size-derived per-attempt timeout
    pub max_download_timeout: Duration,

    /// Size in bytes above which extra time is granted
    pub size_threshold: u64,

    /// Extra time granted per MB above the threshold
    pub timeout_per_mb: Duration,

    /// Number of GET attempts
    pub max_retries: u32,

    /// Backoff between attempts
    pub retry_policy: RetryPolicy,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every probe and download
    pub headers: HeaderMap,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if no proxy is configured
    pub use_system_proxy: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(3),
            probe_enabled: true,
            base_timeout: Duration::from_secs(30),
            default_timeout: Duration::from_secs(90),
            max_download_timeout: Duration::from_secs(180),
            size_threshold: 10 * MB,
            timeout_per_mb: Duration::from_secs(3),
            max_retries: 2,
            retry_policy: RetryPolicy::media(),
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            proxy: None,
            use_system_proxy: true,
        }
    }
}

impl DownloaderConfig {
    pub fn builder() -> crate::builder::DownloaderConfigBuilder {
        crate::builder::DownloaderConfigBuilder::new()
    }

    /// Per-attempt timeout for a response of `content_length` bytes.
    pub fn attempt_timeout(&self, content_length: Option<u64>) -> Duration {
        let Some(length) = content_length.filter(|len| *len > 0) else {
            return self.default_timeout;
        };

        let extra_mb = length.saturating_sub(self.size_threshold) / MB;
        let extra = self
            .timeout_per_mb
            .saturating_mul(u32::try_from(extra_mb).unwrap_or(u32::MAX));

        self.base_timeout
            .saturating_add(extra)
            .min(self.max_download_timeout)
    }

    /// Browser-like headers. `Accept-Encoding` is left to the client so that
    /// responses are transparently decompressed.
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8",
            ),
        );

        default_headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5,zh-CN;q=0.3,zh;q=0.2"),
        );

        default_headers.insert(header::DNT, HeaderValue::from_static("1"));

        default_headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

        default_headers.insert(
            header::UPGRADE_INSECURE_REQUESTS,
            HeaderValue::from_static("1"),
        );
        default_headers
    }
}
