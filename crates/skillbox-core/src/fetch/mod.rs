//! Download collaborator
//!
//! The install pipeline only sees the [`Fetcher`] trait. [`HttpFetcher`] is
//! the production implementation; it refuses to talk to private or local
//! network addresses unless explicitly allowed.

pub mod address;
pub mod http;

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

pub use address::is_blocked_ip;
pub use http::HttpFetcher;

/// Maximum number of redirects followed for one download.
pub const MAX_REDIRECTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported URL scheme '{scheme}' (only http and https are allowed)")]
    UnsupportedScheme { scheme: String },

    #[error("blocked request to private or local address {addr} (host '{host}')")]
    BlockedAddress { host: String, addr: IpAddr },

    #[error("failed to resolve host '{host}': {reason}")]
    Resolve { host: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("too many redirects (more than {max}) starting at {url}")]
    TooManyRedirects { url: String, max: usize },
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Limits applied by [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub max_bytes: u64,
    /// Permit loopback, private and link-local destinations.
    pub allow_private_network: bool,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_bytes: 512 * 1024 * 1024,
            allow_private_network: false,
        }
    }
}

/// Resolves a URL to bytes.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}
