//! `livefeed` - adaptive live-stream playback
//!
//! # Features
//!
//! - **Strategy selection**: adaptive manifests, progressive files or framed embeds
//! - **Embed extraction**: recover direct streams from third-party pages via relays
//! - **Lifecycle**: bounded retries, watchdog, escape hatches for the viewer
//! - **Suppression**: popup guard, message filter and link policy for framed players
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use livefeed::stream::{StrategySelector, StreamDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let selector = Arc::new(StrategySelector::new());
//!     let descriptor = StreamDescriptor::direct("match-1", "https://cdn.example/live/master.m3u8");
//!     let plan = selector.resolve(&descriptor).await?;
//!     println!("{} -> {}", plan.kind, plan.url);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod fullscreen;
pub mod http_client;
pub mod stream;
pub mod suppress;

pub use config::{DeviceClass, PlayerConfig};
pub use error::{DescriptorError, FaultKind};
pub use fingerprint::{profile_for, random_profile, BrowserProfile, RequestKind};
pub use fullscreen::{FullscreenCoordinator, FullscreenVendor, Orientation};
pub use http_client::MediaClient;
pub use stream::{
    EngineKind, PlaybackPlan, PlaybackSurface, StrategySelector, StreamDescriptor, SurfaceEvent,
    SurfaceHandle,
};
pub use suppress::Suppressor;

/// Version of livefeed
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
