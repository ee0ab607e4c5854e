//! HTTP client collaborator
//!
//! The scraping core only needs `GET(url) -> (status, body)`. That contract is
//! the [`Fetcher`] trait; [`HttpFetcher`] implements it on top of a shared
//! `reqwest::Client`, and tests substitute their own fakes.
//!
//! [`ClientBuilder`] configures the real client: request timeout, idle
//! connection timeout, pool size and an optional SOCKS5 proxy.
//!
//! ```rust,no_run
//! use gitrip::client::{ClientBuilder, HttpFetcher};
//! use std::time::Duration;
//!
//! # async fn example() -> gitrip::Result<()> {
//! let builder = ClientBuilder::new()
//!     .timeout(Duration::from_secs(10))
//!     .proxy(Some("127.0.0.1:9150".to_string()));
//! builder.probe_proxy().await?;
//! let fetcher = HttpFetcher::new(builder.build()?);
//! # Ok(())
//! # }
//! ```

use crate::error::{BoxError, Result, ScrapeError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Status and body of one GET request
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status
    pub status: StatusCode,
    /// Full response body
    pub body: Bytes,
}

/// Minimal HTTP capability the scraper depends on
///
/// Implementations must be safe to share across worker tasks.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform one GET and read the whole body
    ///
    /// Non-success statuses are returned as responses, not errors; only
    /// transport failures are errors.
    async fn get(&self, url: &Url) -> std::result::Result<FetchResponse, BoxError>;
}

/// [`Fetcher`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Wrap an existing client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Underlying client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &Url) -> std::result::Result<FetchResponse, BoxError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(FetchResponse { status, body })
    }
}

/// Builder for the outbound `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    timeout: Duration,
    idle_timeout: Duration,
    max_idle_per_host: usize,
    proxy: Option<String>,
    user_agent: String,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Defaults: 30s request timeout, 5s idle timeout, 10 pooled connections, no proxy
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(5),
            max_idle_per_host: 10,
            proxy: None,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Total time allowed for one request, body included
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How long an idle pooled connection is kept
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Pooled connections kept per host; usually the concurrency limit
    pub fn max_idle_per_host(mut self, count: usize) -> Self {
        self.max_idle_per_host = count;
        self
    }

    /// SOCKS5 proxy as `host:port` or a full `socks5://` / `socks5h://` URL
    pub fn proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy.filter(|p| !p.trim().is_empty());
        self
    }

    /// User-Agent header sent with every request
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Proxy URL handed to reqwest, if any
    ///
    /// A bare `host:port` becomes `socks5h://host:port` so DNS resolution
    /// happens on the proxy side.
    pub fn proxy_url(&self) -> Option<String> {
        self.proxy.as_ref().map(|proxy| {
            if proxy.contains("://") {
                proxy.clone()
            } else {
                format!("socks5h://{}", proxy)
            }
        })
    }

    /// Check that the proxy accepts TCP connections
    ///
    /// Does nothing when no proxy is configured.
    pub async fn probe_proxy(&self) -> Result<()> {
        let Some(proxy) = &self.proxy else {
            return Ok(());
        };
        let addr = match proxy.split_once("://") {
            Some((_, rest)) => rest.trim_end_matches('/').to_string(),
            None => proxy.clone(),
        };

        let connect = tokio::net::TcpStream::connect(addr.as_str());
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_stream)) => {
                info!("SOCKS5 proxy ready at {}", addr);
                Ok(())
            }
            Ok(Err(source)) => Err(ScrapeError::ProxyUnavailable { addr, source }),
            Err(_) => Err(ScrapeError::ProxyUnavailable {
                addr,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            }),
        }
    }

    /// Build the client
    pub fn build(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_idle_timeout(self.idle_timeout)
            .pool_max_idle_per_host(self.max_idle_per_host)
            .user_agent(self.user_agent.as_str());

        if let Some(proxy_url) = self.proxy_url() {
            let proxy = reqwest::Proxy::all(proxy_url.as_str())
                .map_err(|e| ScrapeError::Client(format!("invalid proxy {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        } else {
            builder = builder.no_proxy();
        }

        builder
            .build()
            .map_err(|e| ScrapeError::Client(e.to_string()))
    }
}
