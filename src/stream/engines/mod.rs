//! Engine implementations and the factory that wires them to the host's
//! surfaces.

pub mod adaptive;
pub mod embedded;
pub mod native_hls;
pub mod progressive;

use std::sync::Arc;

pub use adaptive::{
    AdaptiveClient, AdaptiveEngine, ClientError, ErrorClass, ManifestSummary, Progress,
    RecoveryAction, RecoveryPolicy,
};
pub use embedded::{EmbedSettings, EmbeddedEngine, HttpFrameProbe};
pub use native_hls::NativeHlsClient;
pub use progressive::ProgressiveEngine;

use crate::config::PlayerConfig;
use crate::http_client::MediaClient;
use crate::stream::engine::{Engine, EngineEvents, EngineFactory, EngineKind};
use crate::stream::selector::PlaybackPlan;
use crate::stream::surface::{FrameSurface, MediaSurface, SandboxPolicy};
use crate::suppress::Suppressor;

/// Factory over one media surface and one frame surface.
pub struct StandardEngineFactory {
    client: MediaClient,
    media: MediaSurface,
    frame: Arc<dyn FrameSurface>,
    suppressor: Arc<Suppressor>,
    config: PlayerConfig,
}

impl StandardEngineFactory {
    pub fn new(
        client: MediaClient,
        media: MediaSurface,
        frame: Arc<dyn FrameSurface>,
        suppressor: Arc<Suppressor>,
        config: PlayerConfig,
    ) -> Self {
        Self {
            client,
            media,
            frame,
            suppressor,
            config,
        }
    }

    fn embed_settings(&self, plan: &PlaybackPlan) -> EmbedSettings {
        let (window, on_timeout) = self.config.embed.window(self.config.device);
        let same_origin = self
            .config
            .suppression
            .own_origin
            .as_deref()
            .is_some_and(|own| same_host(own, &plan.url));

        EmbedSettings {
            sandbox: if same_origin {
                SandboxPolicy::same_origin()
            } else {
                SandboxPolicy::third_party()
            },
            window,
            on_timeout,
            reload_delay: self.config.fullscreen.reload_delay(),
        }
    }
}

impl EngineFactory for StandardEngineFactory {
    fn attach(&self, plan: &PlaybackPlan, events: EngineEvents) -> Box<dyn Engine> {
        match plan.kind {
            EngineKind::Adaptive => {
                let lease = self.media.claim(events.generation());
                let client =
                    NativeHlsClient::new(self.client.clone(), self.config.buffer.clone(), lease.clone());
                Box::new(AdaptiveEngine::attach(client, &plan.url, lease, events))
            }
            EngineKind::Progressive => {
                let lease = self.media.claim(events.generation());
                Box::new(ProgressiveEngine::attach(
                    self.client.clone(),
                    &plan.url,
                    lease,
                    events,
                ))
            }
            EngineKind::Embedded => Box::new(EmbeddedEngine::attach(
                self.frame.clone(),
                &plan.url,
                self.embed_settings(plan),
                self.suppressor.clone(),
                events,
            )),
        }
    }
}

fn same_host(a: &str, b: &str) -> bool {
    let host = |raw: &str| url::Url::parse(raw).ok().and_then(|u| u.host_str().map(str::to_string));
    matches!((host(a), host(b)), (Some(x), Some(y)) if x == y)
}
