//! Shared HTTP client for manifests, segments, progressive files and embed pages
//!
//! Features:
//! - HTTP/2 multiplexing for parallel segment fetches
//! - Brotli, Zstd, Gzip compression (auto-negotiated)
//! - Connection pooling with keep-alive
//! - Browser identity headers on every request

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, instrument};

use crate::config::DeviceClass;
use crate::fingerprint::{profile_for, BrowserProfile, RequestKind};

/// HTTP client carrying a browser profile
#[derive(Clone)]
pub struct MediaClient {
    client: Client,
    profile: Arc<BrowserProfile>,
}

impl MediaClient {
    /// Create a client with a profile matching the device class
    pub fn new(device: DeviceClass) -> Result<Self> {
        Self::with_profile(profile_for(device))
    }

    /// Create a client with a specific browser profile
    pub fn with_profile(profile: BrowserProfile) -> Result<Self> {
        let client = Client::builder()
            // Keep connections alive; segment fetches hit the same host repeatedly
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .brotli(true)
            .zstd(true)
            .gzip(true)
            .deflate(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            profile: Arc::new(profile),
        })
    }

    /// GET request pre-loaded with the profile headers for `kind`
    #[must_use]
    pub fn get(&self, url: &str, kind: RequestKind) -> RequestBuilder {
        self.client.get(url).headers(self.profile.headers_for(kind))
    }

    /// Fetch a URL and fail on non-success status
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &str, kind: RequestKind) -> Result<Response> {
        let response = self.get(url, kind).send().await?;
        debug!(status = %response.status(), version = ?response.version(), "Response received");

        if !response.status().is_success() {
            return Err(anyhow!("{url} returned {}", response.status()));
        }
        Ok(response)
    }

    /// Fetch and return body as string
    pub async fn fetch_text(&self, url: &str, kind: RequestKind) -> Result<String> {
        let response = self.fetch(url, kind).await?;
        Ok(response.text().await?)
    }

    #[must_use]
    pub fn profile(&self) -> &BrowserProfile {
        &self.profile
    }

    /// Get the underlying reqwest client
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_mobile_profile() {
        let client = MediaClient::new(DeviceClass::Mobile).unwrap();
        assert!(client.profile().is_mobile());
    }

    #[test]
    fn requests_carry_profile_headers() {
        let client = MediaClient::new(DeviceClass::Desktop).unwrap();
        let request = client
            .get("https://cdn.example/live.m3u8", RequestKind::Media)
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get("user-agent").unwrap(),
            client.profile().user_agent.as_str()
        );
        assert_eq!(request.headers().get("sec-fetch-mode").unwrap(), "cors");
    }
}
