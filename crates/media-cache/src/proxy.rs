use percent_encoding::percent_decode_str;
use reqwest::Proxy;
use url::Url;

use crate::DownloadError;

/// Proxy protocol, taken from the proxy URL scheme
#[derive(Debug, Clone, PartialEq, Eq, Hash, Copy)]
pub enum ProxyType {
    /// HTTP proxy
    Http,
    /// HTTP proxy reached over TLS
    Https,
    /// SOCKS5 proxy, local DNS resolution
    Socks5,
    /// SOCKS5 proxy, DNS resolved by the proxy
    Socks5h,
}

impl ProxyType {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(ProxyType::Http),
            "https" => Some(ProxyType::Https),
            "socks5" => Some(ProxyType::Socks5),
            "socks5h" => Some(ProxyType::Socks5h),
            _ => None,
        }
    }

    fn is_socks(self) -> bool {
        matches!(self, ProxyType::Socks5 | ProxyType::Socks5h)
    }
}

/// Proxy authentication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Proxy configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyConfig {
    /// Proxy server URL without credentials (e.g., "http://proxy.example.com:8080")
    pub url: String,
    /// Type of proxy
    pub proxy_type: ProxyType,
    /// Authentication for the proxy (optional)
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    /// Parse a `scheme://[user[:pass]@]host:port` proxy string.
    ///
    /// Returns `Ok(None)` for an empty string, which means "no proxy".
    pub fn parse(proxy_url: &str) -> Result<Option<Self>, DownloadError> {
        let proxy_url = proxy_url.trim();
        if proxy_url.is_empty() {
            return Ok(None);
        }

        let mut url = Url::parse(proxy_url)
            .map_err(|e| DownloadError::ProxyError(format!("{proxy_url}: {e}")))?;

        let proxy_type = ProxyType::from_scheme(url.scheme()).ok_or_else(|| {
            DownloadError::ProxyError(format!("unsupported proxy scheme '{}'", url.scheme()))
        })?;

        if url.host_str().is_none() {
            return Err(DownloadError::ProxyError(format!(
                "missing proxy host in '{proxy_url}'"
            )));
        }

        let auth = if url.username().is_empty() {
            None
        } else {
            Some(ProxyAuth {
                username: decode(url.username()),
                password: url.password().map(decode).unwrap_or_default(),
            })
        };

        // Credentials are kept apart so the URL can be logged as-is.
        let _ = url.set_username("");
        let _ = url.set_password(None);

        Ok(Some(Self {
            url: url.as_str().trim_end_matches('/').to_string(),
            proxy_type,
            auth,
        }))
    }
}

fn decode(component: &str) -> String {
    percent_decode_str(component).decode_utf8_lossy().into_owned()
}

/// Build a reqwest Proxy object from our proxy configuration
pub fn build_proxy_from_config(config: &ProxyConfig) -> Result<Proxy, DownloadError> {
    if config.proxy_type.is_socks() {
        // reqwest reads SOCKS credentials from the URL itself
        let mut url = Url::parse(&config.url)
            .map_err(|e| DownloadError::ProxyError(format!("{}: {e}", config.url)))?;
        if let Some(auth) = &config.auth {
            let _ = url.set_username(&auth.username);
            let _ = url.set_password(Some(&auth.password));
        }
        return Proxy::all(url.as_str())
            .map_err(|e| DownloadError::ProxyError(format!("Invalid SOCKS5 proxy URL: {e}")));
    }

    let mut proxy = Proxy::all(&config.url)
        .map_err(|e| DownloadError::ProxyError(format!("Invalid proxy URL: {e}")))?;

    if let Some(auth) = &config.auth {
        proxy = proxy.basic_auth(&auth.username, &auth.password);
    }

    Ok(proxy)
}
