//! Strategy selection: descriptor in, engine kind out.
//!
//! Rules, first match wins:
//! 1. A direct URL whose path names an adaptive manifest plays adaptive.
//! 2. Any other direct URL plays progressive.
//! 3. Otherwise the embed URL is framed.
//!
//! With an extractor configured, rule 3 first tries to recover a direct
//! stream from the embed page and only frames it when that fails.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::DescriptorError;
use crate::stream::descriptor::{MediaType, StreamDescriptor};
use crate::stream::engine::EngineKind;
use crate::stream::extractor::StreamExtractor;

/// What to attach for a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackPlan {
    pub kind: EngineKind,
    /// URL handed to the engine.
    pub url: String,
    /// Page or file the viewer can open directly when playback fails.
    pub source_url: String,
    /// Whether `url` was recovered from an embed page.
    pub extracted: bool,
}

#[derive(Default)]
pub struct StrategySelector {
    extractor: Option<Arc<StreamExtractor>>,
}

impl StrategySelector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<StreamExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    #[must_use]
    pub fn extractor(&self) -> Option<&StreamExtractor> {
        self.extractor.as_deref()
    }

    /// Pure selection from the descriptor alone. Deterministic and free of
    /// I/O.
    pub fn select(&self, descriptor: &StreamDescriptor) -> Result<EngineKind, DescriptorError> {
        descriptor.validate()?;
        Ok(match &descriptor.direct_url {
            Some(url) => kind_for_direct(url),
            None => EngineKind::Embedded,
        })
    }

    /// Selection including extraction for embed-only descriptors.
    pub async fn resolve(&self, descriptor: &StreamDescriptor) -> Result<PlaybackPlan, DescriptorError> {
        let kind = self.select(descriptor)?;
        let source_url = descriptor.source_url().unwrap_or_default().trim().to_string();

        if let Some(direct) = &descriptor.direct_url {
            debug!(id = %descriptor.id, %kind, "Direct URL selected");
            return Ok(PlaybackPlan {
                kind,
                url: direct.trim().to_string(),
                source_url,
                extracted: false,
            });
        }

        // validate() guarantees an embed URL when there is no direct one
        let embed = descriptor.embed_url.as_deref().unwrap_or_default().trim();

        if let Some(extractor) = &self.extractor {
            if let Some(found) = extractor.extract(embed).await {
                let kind = match found.media_type {
                    MediaType::Adaptive => EngineKind::Adaptive,
                    MediaType::Progressive | MediaType::Unknown => EngineKind::Progressive,
                };
                info!(id = %descriptor.id, %kind, url = %found.url, "Playing extracted stream");
                return Ok(PlaybackPlan {
                    kind,
                    url: found.url,
                    source_url,
                    extracted: true,
                });
            }
        }

        Ok(PlaybackPlan {
            kind: EngineKind::Embedded,
            url: embed.to_string(),
            source_url,
            extracted: false,
        })
    }
}

fn kind_for_direct(url: &str) -> EngineKind {
    if MediaType::from_url(url) == MediaType::Adaptive {
        EngineKind::Adaptive
    } else {
        EngineKind::Progressive
    }
}
