//! Shared, proxy-aware HTTP clients.
//!
//! A `reqwest::Client` owns a connection pool, so one client is built per
//! `(proxy, timeout)` pair and handed out to every concurrent download.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use reqwest::Client;
use reqwest::header::HeaderMap;
use rustls::{ClientConfig, crypto::ring};
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::{debug, info, warn};

use crate::DownloadError;
use crate::config::DownloaderConfig;
use crate::proxy::{ProxyConfig, build_proxy_from_config};

const MAX_POOLED_CLIENTS: u64 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    proxy: Option<ProxyConfig>,
    timeout: Duration,
}

/// Settings shared by every client of a pool
#[derive(Debug, Clone)]
struct ClientTemplate {
    user_agent: String,
    headers: HeaderMap,
    connect_timeout: Duration,
    follow_redirects: bool,
    use_system_proxy: bool,
}

/// Memoizing factory of HTTP clients keyed by proxy and timeout
#[derive(Clone)]
pub struct ClientPool {
    clients: Cache<ClientKey, Client>,
    template: Arc<ClientTemplate>,
}

impl ClientPool {
    pub fn new(config: &DownloaderConfig) -> Self {
        Self {
            clients: Cache::new(MAX_POOLED_CLIENTS),
            template: Arc::new(ClientTemplate {
                user_agent: config.user_agent.clone(),
                headers: config.headers.clone(),
                connect_timeout: config.connect_timeout,
                follow_redirects: config.follow_redirects,
                use_system_proxy: config.use_system_proxy,
            }),
        }
    }

    /// Get the client for `proxy` with the given overall request `timeout`,
    /// building it on first use.
    pub fn get(
        &self,
        proxy: Option<&ProxyConfig>,
        timeout: Duration,
    ) -> Result<Client, DownloadError> {
        let key = ClientKey {
            proxy: proxy.cloned(),
            timeout,
        };

        self.clients
            .try_get_with(key, || create_client(&self.template, proxy, timeout))
            .map_err(|e| DownloadError::ClientError(e.to_string()))
    }

    #[cfg(test)]
    fn len(&self) -> u64 {
        self.clients.run_pending_tasks();
        self.clients.entry_count()
    }
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("clients", &self.clients.entry_count())
            .field("template", &self.template)
            .finish()
    }
}

fn platform_tls_config() -> Result<ClientConfig, DownloadError> {
    let provider = Arc::new(ring::default_provider());

    Ok(ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DownloadError::ClientError(format!("TLS protocol versions: {e}")))?
        .with_platform_verifier()
        .map_err(|e| DownloadError::ClientError(format!("TLS platform verifier: {e}")))?
        .with_no_client_auth())
}

fn create_client(
    template: &ClientTemplate,
    proxy: Option<&ProxyConfig>,
    timeout: Duration,
) -> Result<Client, DownloadError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&template.user_agent)
        .default_headers(template.headers.clone())
        .redirect(if template.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    match platform_tls_config() {
        Ok(tls_config) => client_builder = client_builder.use_preconfigured_tls(tls_config),
        Err(e) => {
            // Falls back to the bundled webpki roots, which need a process-wide provider.
            warn!(error = %e, "Platform certificate verifier unavailable, using bundled roots");
            let _ = ring::default_provider().install_default();
        }
    }

    if !timeout.is_zero() {
        client_builder = client_builder.timeout(timeout);
    }

    if !template.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(template.connect_timeout);
    }

    if let Some(proxy_config) = proxy {
        client_builder = client_builder.proxy(build_proxy_from_config(proxy_config)?);
        info!(proxy_url = %proxy_config.url, "Using configured proxy for media downloads");
    } else if template.use_system_proxy {
        debug!("Using system proxy settings for media downloads");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for media downloads");
    }

    client_builder.build().map_err(DownloadError::from)
}
