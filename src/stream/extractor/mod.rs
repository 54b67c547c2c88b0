//! Direct media URL extraction from third-party embed pages.
//!
//! Given an opaque embed URL, try to recover the playable stream behind it so
//! the selector can play it directly instead of framing the provider's player.
//! Results, including failures, are cached per embed URL: the same embed
//! rarely changes mid-session, and a dead one should not keep hitting relays.

pub mod patterns;
pub mod relay;

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ExtractorConfig;
use crate::stream::descriptor::{ExtractedStream, MediaType};

pub use patterns::scan_page;
pub use relay::{relays_from_config, CorsRelay, PageRelay};

struct CacheEntry {
    result: Option<ExtractedStream>,
    stored_at: Instant,
}

/// Extractor with a relay chain and a TTL cache.
pub struct StreamExtractor {
    relays: Vec<Box<dyn PageRelay>>,
    ttl: Duration,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl StreamExtractor {
    pub fn new(relays: Vec<Box<dyn PageRelay>>, config: &ExtractorConfig) -> Self {
        Self::with_ttl(relays, config.cache_ttl())
    }

    pub fn with_ttl(relays: Vec<Box<dyn PageRelay>>, ttl: Duration) -> Self {
        Self {
            relays,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve an embed URL to a direct stream. Never fails: anything that
    /// goes wrong resolves to `None`.
    pub async fn extract(&self, embed_url: &str) -> Option<ExtractedStream> {
        if MediaType::from_url(embed_url) != MediaType::Unknown {
            debug!(embed_url, "Embed URL is already a media URL");
            return Some(ExtractedStream::new(embed_url));
        }

        if let Some(hit) = self.lookup(embed_url).await {
            debug!(embed_url, found = hit.is_some(), "Extraction cache hit");
            return hit;
        }

        let result = self.fetch_and_scan(embed_url).await;
        match &result {
            Some(found) => info!(embed_url, url = %found.url, media_type = ?found.media_type, "Extracted direct stream"),
            None => info!(embed_url, "No direct stream found in embed"),
        }

        let mut cache = self.cache.write().await;
        let ttl = self.ttl;
        cache.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        cache.insert(
            embed_url.to_string(),
            CacheEntry {
                result: result.clone(),
                stored_at: Instant::now(),
            },
        );

        result
    }

    /// Drop any cached result for `embed_url`, forcing the next call to
    /// fetch again.
    pub async fn invalidate(&self, embed_url: &str) {
        if self.cache.write().await.remove(embed_url).is_some() {
            debug!(embed_url, "Extraction cache entry discarded");
        }
    }

    /// Number of entries currently cached, expired ones included.
    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn lookup(&self, embed_url: &str) -> Option<Option<ExtractedStream>> {
        let cache = self.cache.read().await;
        let entry = cache.get(embed_url)?;
        if entry.stored_at.elapsed() < self.ttl {
            Some(entry.result.clone())
        } else {
            None
        }
    }

    async fn fetch_and_scan(&self, embed_url: &str) -> Option<ExtractedStream> {
        for relay in &self.relays {
            match relay.fetch_page(embed_url).await {
                Ok(body) => return scan_page(&body, embed_url),
                Err(e) => warn!(relay = relay.name(), embed_url, "Relay failed: {e}"),
            }
        }
        warn!(embed_url, relays = self.relays.len(), "All relays failed");
        None
    }
}
