//! Live stream playback.
//!
//! A [`StreamDescriptor`] goes in, the [`StrategySelector`] picks an engine
//! (adaptive manifest, progressive file or framed embed), and the
//! [`PlaybackSurface`] drives that engine through the lifecycle with
//! bounded retries and a watchdog.

pub mod descriptor;
pub mod engine;
pub mod engines;
pub mod extractor;
pub mod lifecycle;
pub mod player;
pub mod selector;
pub mod surface;

pub use descriptor::{ExtractedStream, MediaType, StreamDescriptor};
pub use engine::{Engine, EngineEvent, EngineEvents, EngineFactory, EngineKind, EngineSignal};
pub use engines::StandardEngineFactory;
pub use extractor::StreamExtractor;
pub use lifecycle::{Lifecycle, Phase, PlayerState, Verdict};
pub use player::{EscapeHatch, PlaybackSurface, SurfaceEvent, SurfaceHandle, SurfaceSnapshot, SwitchObserver};
pub use selector::{PlaybackPlan, StrategySelector};
pub use surface::{FrameSurface, MediaSink, MediaSurface, SandboxPolicy, WriterSink};
