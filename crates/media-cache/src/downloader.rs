//! # Adaptive Downloader
//!
//! Fetches one media URL the way a browser would, within an overall deadline:
//!
//! 1. a best-effort `HEAD` probe learns the content length,
//! 2. up to `max_retries` `GET` attempts follow, each with a timeout sized
//!    from the known length, separated by jittered exponential backoff,
//! 3. 4xx responses fail fast, 5xx/429 and network failures are retried.
//!
//! The `Referer` presented to the origin is chosen by [`smart_referer`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, REFERER};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::DownloadError;
use crate::cache::mime;
use crate::client::ClientPool;
use crate::config::DownloaderConfig;
use crate::proxy::ProxyConfig;
use crate::referer::smart_referer;
use crate::retry::{AttemptOutcome, Deadline, RetryAttempt, sleep_with_deadline};

/// Network settings read once at the start of each download.
#[derive(Debug, Clone, Default)]
pub struct NetworkSettings {
    pub proxy: Option<ProxyConfig>,
}

/// A successfully downloaded resource
#[derive(Debug, Clone)]
pub struct MediaDownload {
    pub url: String,
    pub bytes: Bytes,
    /// `Content-Type` header of the response, if any
    pub declared_content_type: Option<String>,
    /// Referer that was sent
    pub referer: Option<String>,
    pub attempts: Vec<RetryAttempt>,
}

impl MediaDownload {
    /// Declared content type, else one guessed from the URL.
    pub fn content_type(&self) -> String {
        self.declared_content_type
            .clone()
            .unwrap_or_else(|| mime::content_type_from_url(&self.url).to_string())
    }
}

struct AttemptSuccess {
    bytes: Bytes,
    content_type: Option<String>,
    status: StatusCode,
}

/// Downloader shared by every caller of a cache
#[derive(Debug)]
pub struct MediaDownloader {
    config: Arc<DownloaderConfig>,
    clients: ClientPool,
    settings: RwLock<Arc<NetworkSettings>>,
}

impl MediaDownloader {
    pub fn new(config: DownloaderConfig) -> Self {
        let settings = NetworkSettings {
            proxy: config.proxy.clone(),
        };

        Self {
            clients: ClientPool::new(&config),
            config: Arc::new(config),
            settings: RwLock::new(Arc::new(settings)),
        }
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Replace the proxy used by downloads started from now on.
    ///
    /// An empty string removes the proxy. In-flight downloads keep the
    /// settings they started with.
    pub fn set_proxy(&self, proxy_url: &str) -> Result<(), DownloadError> {
        let proxy = ProxyConfig::parse(proxy_url)?;

        match &proxy {
            Some(proxy) => info!(proxy_url = %proxy.url, "Media proxy updated"),
            None => info!("Media proxy cleared"),
        }

        *self.settings.write() = Arc::new(NetworkSettings { proxy });
        Ok(())
    }

    /// Proxy currently applied to new downloads.
    pub fn proxy(&self) -> Option<ProxyConfig> {
        self.settings.read().proxy.clone()
    }

    fn snapshot(&self) -> Arc<NetworkSettings> {
        self.settings.read().clone()
    }

    /// Download `url`, found on page `page_referer`.
    ///
    /// Cancelling `cancel` aborts the request or backoff sleep in progress and
    /// returns [`DownloadError::Cancelled`].
    pub async fn download(
        &self,
        url: &str,
        page_referer: &str,
        cancel: &CancellationToken,
    ) -> Result<MediaDownload, DownloadError> {
        let parsed = Url::parse(url).map_err(|e| DownloadError::UrlError(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::UrlError(format!(
                "unsupported scheme '{}' in {url}",
                parsed.scheme()
            )));
        }

        let deadline = Deadline::after(self.config.overall_timeout);
        let settings = self.snapshot();
        let client = self
            .clients
            .get(settings.proxy.as_ref(), self.config.max_download_timeout)?;
        let referer = smart_referer(url, page_referer);

        debug!(url, referer = ?referer, "Downloading media");

        let work = self.run(&client, &parsed, referer.as_deref(), &deadline, cancel);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
            result = tokio::time::timeout_at(deadline.instant(), work) => {
                let (bytes, content_type, attempts) = result.map_err(|_| deadline.error())??;
                Ok(MediaDownload {
                    url: url.to_string(),
                    bytes,
                    declared_content_type: content_type,
                    referer,
                    attempts,
                })
            }
        }
    }

    async fn run(
        &self,
        client: &Client,
        url: &Url,
        referer: Option<&str>,
        deadline: &Deadline,
        cancel: &CancellationToken,
    ) -> Result<(Bytes, Option<String>, Vec<RetryAttempt>), DownloadError> {
        let mut content_length = if self.config.probe_enabled {
            self.probe(client, url, referer, deadline).await
        } else {
            None
        };

        let max_attempts = self.config.max_retries.max(1);
        let mut attempts = Vec::with_capacity(max_attempts as usize);
        let mut index = 0;

        loop {
            if deadline.is_expired() {
                return Err(deadline.error());
            }

            let timeout = self
                .config
                .attempt_timeout(content_length)
                .min(deadline.remaining());

            debug!(
                url = %url,
                attempt = index + 1,
                timeout_secs = timeout.as_secs_f64(),
                content_length,
                "Starting download attempt"
            );

            let error = match self
                .attempt(client, url, referer, timeout, &mut content_length)
                .await
            {
                Ok(success) => {
                    attempts.push(RetryAttempt {
                        index,
                        timeout,
                        outcome: AttemptOutcome::Success {
                            status: success.status.as_u16(),
                        },
                    });
                    debug!(url = %url, bytes = success.bytes.len(), "Download finished");
                    return Ok((success.bytes, success.content_type, attempts));
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                attempts.push(RetryAttempt {
                    index,
                    timeout,
                    outcome: AttemptOutcome::Fatal(error.to_string()),
                });
                debug!(url = %url, error = %error, "Download failed, not retrying");
                return Err(error);
            }

            attempts.push(RetryAttempt {
                index,
                timeout,
                outcome: AttemptOutcome::Retryable(error.to_string()),
            });

            if index + 1 >= max_attempts {
                return Err(DownloadError::RetriesExhausted {
                    attempts: max_attempts,
                    last: Box::new(error),
                });
            }

            if deadline.is_expired() {
                return Err(deadline.error());
            }

            let delay = self.config.retry_policy.backoff(index);
            warn!(
                url = %url,
                attempt = index + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Media download failed, retrying"
            );
            sleep_with_deadline(delay, deadline, cancel).await?;
            index += 1;
        }
    }

    /// Best-effort size probe; any failure yields `None`.
    async fn probe(
        &self,
        client: &Client,
        url: &Url,
        referer: Option<&str>,
        deadline: &Deadline,
    ) -> Option<u64> {
        let timeout = self.config.probe_timeout.min(deadline.remaining());
        if timeout.is_zero() {
            return None;
        }

        let mut request = client.head(url.clone()).timeout(timeout);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        match tokio::time::timeout(timeout, request.send()).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => {
                let length = content_length(response.headers());
                debug!(url = %url, content_length = length, "HEAD probe succeeded");
                length
            }
            Ok(Ok(response)) => {
                debug!(url = %url, status = %response.status(), "HEAD probe ignored");
                None
            }
            Ok(Err(e)) => {
                debug!(url = %url, error = %e, "HEAD probe failed");
                None
            }
            Err(_) => {
                debug!(url = %url, "HEAD probe timed out");
                None
            }
        }
    }

    async fn attempt(
        &self,
        client: &Client,
        url: &Url,
        referer: Option<&str>,
        timeout: Duration,
        known_length: &mut Option<u64>,
    ) -> Result<AttemptSuccess, DownloadError> {
        let mut request = client.get(url.clone()).timeout(timeout);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request.send().await?;
        let status = response.status();

        if let Some(length) = content_length(response.headers()) {
            *known_length = Some(length);
        }

        if !status.is_success() {
            return Err(DownloadError::StatusCode {
                status,
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_owned);

        let bytes = response.bytes().await?;

        Ok(AttemptSuccess {
            bytes,
            content_type,
            status,
        })
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|len| *len > 0)
}
