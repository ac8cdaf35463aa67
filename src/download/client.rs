//! HTTP client wrapper: proxy selection, timeouts, range requests.
//!
//! Thin layer over reqwest that owns everything configured once per engine
//! instance (proxy mode, user agent, timeouts) and exposes the two request
//! shapes the engine needs: a GET with an optional `Range` header and a
//! ranged probe that discovers resource length and range support.

use std::fmt;
use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, NoProxy, Proxy};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_USER_AGENT, READ_TIMEOUT_SECS};
use super::error::TransferError;

/// Proxy selection, fixed at client construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProxyConfig {
    /// Never use a proxy.
    Direct,
    /// Use whatever the environment/system provides.
    #[default]
    SystemDefault,
    /// Route everything through the given proxy server.
    UserSpecified {
        /// Proxy URL, e.g. `http://proxy.corp:8080`.
        server: String,
        /// Hosts to bypass, comma-separated patterns as reqwest accepts them.
        bypass: Vec<String>,
    },
}

/// Byte-range request shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=<offset>-`: open-ended, from offset to end of resource.
    From(u64),
    /// `bytes=<start>-<end>`: inclusive bounded range.
    Bounded(u64, u64),
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::From(offset) => write!(f, "bytes={offset}-"),
            Self::Bounded(start, end) => write!(f, "bytes={start}-{end}"),
        }
    }
}

/// Result of a ranged probe against a resource.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Probe {
    /// Total resource length, known only when the server honored the range.
    pub total_length: Option<u64>,
    /// HTTP status of the probe response.
    pub status: u16,
}

/// HTTP client for driving transfers.
///
/// Created once per engine instance and cloned freely; clones share the
/// underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with the system proxy and default timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static default
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_settings(
            &ProxyConfig::SystemDefault,
            DEFAULT_USER_AGENT,
            CONNECT_TIMEOUT_SECS,
            READ_TIMEOUT_SECS,
        )
        .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a client with an explicit proxy configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidProxy`] for an unusable proxy server
    /// and [`TransferError::ClientBuild`] if the client cannot be built.
    pub fn with_proxy(proxy: &ProxyConfig) -> Result<Self, TransferError> {
        Self::with_settings(
            proxy,
            DEFAULT_USER_AGENT,
            CONNECT_TIMEOUT_SECS,
            READ_TIMEOUT_SECS,
        )
    }

    /// Creates a client with explicit proxy, user agent, and timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidProxy`] for an unusable proxy server
    /// and [`TransferError::ClientBuild`] if the client cannot be built.
    #[instrument(level = "debug", skip(proxy))]
    pub fn with_settings(
        proxy: &ProxyConfig,
        user_agent: &str,
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, TransferError> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent);

        builder = match proxy {
            ProxyConfig::Direct => builder.no_proxy(),
            ProxyConfig::SystemDefault => builder,
            ProxyConfig::UserSpecified { server, bypass } => {
                let resolved = Proxy::all(server.as_str())
                    .map_err(|e| TransferError::invalid_proxy(server.clone(), e))?;
                let resolved = if bypass.is_empty() {
                    resolved
                } else {
                    resolved.no_proxy(NoProxy::from_string(&bypass.join(",")))
                };
                builder.proxy(resolved)
            }
        };

        let client = builder.build().map_err(TransferError::client_build)?;
        Ok(Self { client })
    }

    /// Issues a GET, with a `Range` header when `range` is given.
    ///
    /// Error statuses are NOT turned into errors here: the session state
    /// machine reads the status itself and decides what is terminal.
    pub(crate) async fn get(
        &self,
        url: &str,
        range: Option<RangeSpec>,
    ) -> Result<reqwest::Response, TransferError> {
        Url::parse(url).map_err(|_| TransferError::invalid_url(url))?;

        let mut request = self.client.get(url);
        if let Some(range) = range {
            debug!(url, %range, "issuing ranged request");
            request = request.header(RANGE, range.to_string());
        }

        request
            .send()
            .await
            .map_err(|e| TransferError::connect(url, e))
    }

    /// Probes a resource with `Range: bytes=0-0`.
    ///
    /// A 206 answer proves range support and carries the total length in
    /// `Content-Range`; anything else means chunking is off the table.
    pub(crate) async fn probe(&self, url: &str) -> Result<Probe, TransferError> {
        let response = self.get(url, Some(RangeSpec::Bounded(0, 0))).await?;
        let status = response.status().as_u16();

        let total_length = if status == 206 {
            response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total)
        } else {
            None
        };

        debug!(url, status, ?total_length, "probe complete");
        Ok(Probe {
            total_length,
            status,
        })
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Total resource length from a `Content-Range` header, if it names one.
fn parse_content_range_total(value: &str) -> Option<u64> {
    // "bytes 0-0/12345" or "bytes 0-0/*"
    value.strip_prefix("bytes ")?.split('/').nth(1)?.parse().ok()
}

/// Content length from response headers as a raw byte count.
pub(crate) fn header_content_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}
