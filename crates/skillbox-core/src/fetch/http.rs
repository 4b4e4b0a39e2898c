//! reqwest-backed [`Fetcher`]

use std::net::SocketAddr;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use url::{Host, Url};

use super::address::resolve_vetted;
use super::{FetchError, FetchPolicy, FetchResponse, Fetcher, MAX_REDIRECTS};

/// Downloads over http(s) with address vetting on every hop.
///
/// Redirects are never followed by reqwest itself. Each `Location` is parsed,
/// re-vetted and requested with a fresh client pinned to the vetted address,
/// so a DNS answer cannot change between the check and the connect. Proxy
/// settings from the environment are ignored for the same reason.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    policy: FetchPolicy,
}

impl HttpFetcher {
    pub fn new(policy: FetchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    fn client_for(&self, url: &Url, pinned: SocketAddr) -> Result<reqwest::Client, FetchError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("skillbox/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .timeout(self.policy.timeout);

        if let Some(Host::Domain(domain)) = url.host() {
            builder = builder.resolve(domain, pinned);
        }

        builder.build().map_err(|e| FetchError::Transport {
            url: url.to_string(),
            reason: format!("failed to build HTTP client: {e}"),
        })
    }

    async fn read_body(&self, mut response: reqwest::Response, url: &Url) -> Result<Vec<u8>, FetchError> {
        let limit = self.policy.max_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(FetchError::TooLarge { limit });
        }

        let mut body = Vec::new();
        loop {
            let chunk = response.chunk().await.map_err(|e| FetchError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            let Some(chunk) = chunk else { break };
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let start = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let mut current = start.clone();

        for hop in 0..=MAX_REDIRECTS {
            let pinned = resolve_vetted(&current, self.policy.allow_private_network).await?;
            let client = self.client_for(&current, pinned)?;

            tracing::debug!(url = %current, addr = %pinned, hop, "Fetching");
            let response = client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| FetchError::Transport {
                    url: current.to_string(),
                    reason: e.to_string(),
                })?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| FetchError::Status {
                        url: current.to_string(),
                        status: status.as_u16(),
                    })?;
                let next = current.join(location).map_err(|e| FetchError::InvalidUrl {
                    url: location.to_string(),
                    reason: e.to_string(),
                })?;
                tracing::debug!(from = %current, to = %next, "Following redirect");
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::Status {
                    url: current.to_string(),
                    status: status.as_u16(),
                });
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = self.read_body(response, &current).await?;

            tracing::info!(url = %current, bytes = body.len(), "Download complete");
            return Ok(FetchResponse {
                status: status.as_u16(),
                content_type,
                body,
            });
        }

        Err(FetchError::TooManyRedirects {
            url: start.to_string(),
            max: MAX_REDIRECTS,
        })
    }
}
