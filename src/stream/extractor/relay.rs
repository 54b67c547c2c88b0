//! CORS relays used to read third-party embed pages.
//!
//! Relays are interchangeable: any endpoint that returns the page text for a
//! URL satisfies the contract. They are tried in configuration order.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::config::ExtractorConfig;
use crate::fingerprint::RequestKind;
use crate::http_client::MediaClient;

/// Something that can return the text of a page on our behalf.
#[async_trait]
pub trait PageRelay: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Fetch the page body for `url`.
    async fn fetch_page(&self, url: &str) -> Result<String>;
}

/// Relay addressed through a URL template such as
/// `https://api.allorigins.win/raw?url={url}`.
pub struct CorsRelay {
    template: String,
    client: MediaClient,
    timeout: Duration,
}

impl CorsRelay {
    pub fn new(template: impl Into<String>, client: MediaClient, timeout: Duration) -> Self {
        Self {
            template: template.into(),
            client,
            timeout,
        }
    }

    /// Build the relay request URL for a target page. Templates without a
    /// `{url}` placeholder get the encoded target appended.
    #[must_use]
    pub fn relay_url(&self, target: &str) -> String {
        let encoded = urlencoding::encode(target);
        if self.template.contains("{url}") {
            self.template.replace("{url}", &encoded)
        } else {
            format!("{}{encoded}", self.template)
        }
    }
}

#[async_trait]
impl PageRelay for CorsRelay {
    fn name(&self) -> &str {
        &self.template
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let relay_url = self.relay_url(url);
        debug!(relay = %self.template, "Fetching embed page through relay");

        let response = self
            .client
            .get(&relay_url, RequestKind::Document)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("relay returned {}", response.status()));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(anyhow!("relay returned an empty body"));
        }
        Ok(body)
    }
}

/// Build the configured relay chain.
#[must_use]
pub fn relays_from_config(config: &ExtractorConfig, client: &MediaClient) -> Vec<Box<dyn PageRelay>> {
    config
        .relays
        .iter()
        .map(|template| {
            Box::new(CorsRelay::new(
                template.clone(),
                client.clone(),
                config.relay_timeout(),
            )) as Box<dyn PageRelay>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceClass;

    fn relay(template: &str) -> CorsRelay {
        let client = MediaClient::new(DeviceClass::Desktop).unwrap();
        CorsRelay::new(template, client, Duration::from_secs(1))
    }

    #[test]
    fn substitutes_encoded_target() {
        let r = relay("https://api.allorigins.win/raw?url={url}");
        assert_eq!(
            r.relay_url("https://provider.example/embed/1?x=2"),
            "https://api.allorigins.win/raw?url=https%3A%2F%2Fprovider.example%2Fembed%2F1%3Fx%3D2"
        );
    }

    #[test]
    fn appends_when_no_placeholder() {
        let r = relay("https://corsproxy.io/?");
        assert_eq!(
            r.relay_url("https://a.example/"),
            "https://corsproxy.io/?https%3A%2F%2Fa.example%2F"
        );
    }

    #[test]
    fn builds_chain_in_order() {
        let client = MediaClient::new(DeviceClass::Desktop).unwrap();
        let chain = relays_from_config(&ExtractorConfig::default(), &client);
        assert_eq!(chain.len(), 3);
        assert!(chain[0].name().contains("allorigins"));
    }
}
