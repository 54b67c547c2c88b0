//! Playback engine contract.
//!
//! Three engines ([`Adaptive`](EngineKind::Adaptive),
//! [`Progressive`](EngineKind::Progressive), [`Embedded`](EngineKind::Embedded))
//! sit behind one event contract so the lifecycle never needs to know which
//! one is attached. Engines classify faults locally and only report
//! [`EngineEvent::Failed`] once their own recovery is exhausted.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::error;

use crate::error::FaultKind;
use crate::stream::selector::PlaybackPlan;

/// Playback strategy chosen for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Segmented adaptive-bitrate client on the media surface.
    Adaptive,
    /// Progressive file on the media surface.
    Progressive,
    /// Third-party player in an isolated frame.
    Embedded,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Adaptive => "adaptive",
            Self::Progressive => "progressive",
            Self::Embedded => "embedded",
        })
    }
}

/// Events every engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Manifest parsed, first data received, or frame loaded.
    Ready,
    /// Media is flowing.
    Playing,
    /// A fault the engine is recovering from on its own. Informational.
    Recovering(FaultKind),
    /// Local recovery is exhausted; the engine has stopped.
    Failed(FaultKind),
    /// The embed liveness window expired and policy says that is a failure.
    TimedOut,
    /// The source finished: a playlist with an end marker was fully
    /// delivered, or a progressive file was read to the end.
    Ended,
}

/// An [`EngineEvent`] stamped with the attach generation that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSignal {
    pub generation: u64,
    pub event: EngineEvent,
}

/// Sending half handed to an engine on attach.
///
/// Every event carries the generation the engine was attached under, so the
/// surface can drop anything still in flight from an engine it already
/// disposed.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<EngineSignal>,
}

impl EngineEvents {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<EngineSignal>) -> Self {
        Self { generation, tx }
    }

    /// Events plus the receiving end, for hosts driving an engine directly.
    pub fn channel(generation: u64) -> (Self, mpsc::UnboundedReceiver<EngineSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(generation, tx), rx)
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: EngineEvent) {
        // Closed receiver means the surface is gone; nobody is listening
        let _ = self.tx.send(EngineSignal {
            generation: self.generation,
            event,
        });
    }
}

/// Drive an engine's background task, reporting a panic inside it as
/// `Failed(Unknown)`.
pub async fn contain_panics<F>(task: F, events: EngineEvents)
where
    F: Future<Output = ()>,
{
    if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        error!(generation = events.generation(), %message, "Engine task panicked");
        events.emit(EngineEvent::Failed(FaultKind::Unknown));
    }
}

/// A live engine attached to a surface.
///
/// Dropping an engine disposes it.
pub trait Engine: Send {
    fn kind(&self) -> EngineKind;

    /// Stop all internal work, cancel timers and give the surface back.
    /// Calling it twice is harmless.
    fn dispose(&mut self);

    /// Clear and restore the frame source. Only meaningful for the embedded
    /// engine.
    fn reload_frame(&mut self) {}
}

/// Builds engines for resolved plans.
pub trait EngineFactory: Send + Sync {
    fn attach(&self, plan: &PlaybackPlan, events: EngineEvents) -> Box<dyn Engine>;
}
