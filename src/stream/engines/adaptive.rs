//! Adaptive engine: supervises an [`AdaptiveClient`] and turns its errors into
//! recovery actions.
//!
//! Recovery escalates per error class. The first fatal network error restarts
//! loading with the buffer kept; the first media error re-initializes the
//! decode pipeline. A second consecutive error of the same class stops the
//! engine with a classified fault, as does an unplayable stream. Alternating
//! classes get [`MAX_STALLED_RECOVERIES`] recoveries until a segment lands.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::error::FaultKind;
use crate::stream::engine::{contain_panics, Engine, EngineEvent, EngineEvents, EngineKind};
use crate::stream::surface::SurfaceLease;

/// Error family reported by an adaptive client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Manifest or segment transport failure.
    Network,
    /// Payload the decode pipeline could not take.
    Media,
    /// Encrypted or otherwise unplayable stream.
    Unsupported,
    Other,
}

impl ErrorClass {
    #[must_use]
    pub fn fault(self) -> FaultKind {
        match self {
            Self::Network => FaultKind::Network,
            Self::Media => FaultKind::Media,
            Self::Unsupported => FaultKind::Unsupported,
            Self::Other => FaultKind::Unknown,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.fault(), f)
    }
}

/// Fatal error from an adaptive client. The client has already done its own
/// internal retrying by the time one of these surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class} error: {detail}")]
pub struct ClientError {
    pub class: ErrorClass,
    pub detail: String,
}

impl ClientError {
    pub fn network(detail: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Network,
            detail: detail.into(),
        }
    }

    pub fn media(detail: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Media,
            detail: detail.into(),
        }
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Unsupported,
            detail: detail.into(),
        }
    }
}

/// What a loaded manifest looks like.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSummary {
    pub variants: usize,
    pub live: bool,
    pub target_duration: f64,
}

/// Forward progress from [`AdaptiveClient::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A segment reached the media surface.
    Delivered { sequence: u64, bytes: usize },
    /// The playlist ended and everything was delivered.
    Ended,
}

/// Segmented streaming client driven by the adaptive engine.
#[async_trait]
pub trait AdaptiveClient: Send {
    /// Fetch the manifest, pick a rendition and position at the live edge.
    async fn load_source(&mut self, manifest_url: &str) -> Result<ManifestSummary, ClientError>;

    /// Deliver the next segment, waiting for a playlist refresh if needed.
    async fn next(&mut self) -> Result<Progress, ClientError>;

    /// Restart loading from the current position. Buffered data is kept.
    async fn start_load(&mut self);

    /// Re-initialize the decode pipeline without a full reload.
    async fn recover_media_error(&mut self);

    /// Release everything the client holds.
    async fn destroy(&mut self);
}

/// Local recovery decision for a client error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Reload,
    RecoverMedia,
    Fail(FaultKind),
}

/// Recoveries allowed between two delivered segments.
pub const MAX_STALLED_RECOVERIES: u32 = 3;

/// Tracks consecutive errors and escalates repeats.
#[derive(Debug, Default)]
pub struct RecoveryPolicy {
    last: Option<ErrorClass>,
    stalled: u32,
}

impl RecoveryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_error(&mut self, class: ErrorClass) -> RecoveryAction {
        let repeated = self.last == Some(class);
        self.last = Some(class);
        self.stalled += 1;

        match class {
            _ if repeated || self.stalled > MAX_STALLED_RECOVERIES => {
                RecoveryAction::Fail(class.fault())
            }
            ErrorClass::Network => RecoveryAction::Reload,
            ErrorClass::Media => RecoveryAction::RecoverMedia,
            ErrorClass::Unsupported | ErrorClass::Other => RecoveryAction::Fail(class.fault()),
        }
    }

    /// Forward progress clears the escalation.
    pub fn progress(&mut self) {
        self.last = None;
        self.stalled = 0;
    }
}

/// Engine driving an adaptive client on the media surface.
pub struct AdaptiveEngine {
    task: JoinHandle<()>,
    lease: SurfaceLease,
}

impl AdaptiveEngine {
    pub fn attach<C>(client: C, manifest_url: &str, lease: SurfaceLease, events: EngineEvents) -> Self
    where
        C: AdaptiveClient + 'static,
    {
        let span = tracing::info_span!("adaptive", generation = events.generation());
        let supervisor = supervise(client, manifest_url.to_string(), lease.clone(), events.clone());
        let task = tokio::spawn(contain_panics(supervisor, events).instrument(span));
        Self { task, lease }
    }
}

impl Engine for AdaptiveEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Adaptive
    }

    fn dispose(&mut self) {
        self.task.abort();
        self.lease.release();
    }
}

impl Drop for AdaptiveEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn supervise<C: AdaptiveClient>(
    mut client: C,
    manifest_url: String,
    lease: SurfaceLease,
    events: EngineEvents,
) {
    let mut policy = RecoveryPolicy::new();

    loop {
        match client.load_source(&manifest_url).await {
            Ok(summary) => {
                info!(
                    variants = summary.variants,
                    live = summary.live,
                    target_duration = summary.target_duration,
                    "Manifest parsed"
                );
                break;
            }
            Err(e) => {
                if !recover(&mut client, &mut policy, &events, &e).await {
                    return;
                }
            }
        }
    }
    events.emit(EngineEvent::Ready);

    // Autoplay refusal is never fatal; the host shows a play control
    if let Err(rejection) = lease.play().await {
        debug!("play() rejected: {rejection}");
    }

    let mut playing = false;
    loop {
        match client.next().await {
            Ok(Progress::Delivered { sequence, bytes }) => {
                debug!(sequence, bytes, "Segment delivered");
                policy.progress();
                if !playing {
                    playing = true;
                    events.emit(EngineEvent::Playing);
                }
            }
            Ok(Progress::Ended) => {
                info!("Stream ended");
                client.destroy().await;
                events.emit(EngineEvent::Ended);
                return;
            }
            Err(e) => {
                if !recover(&mut client, &mut policy, &events, &e).await {
                    return;
                }
            }
        }
    }
}

/// Apply the recovery action for `error`. Returns false once the engine has
/// given up.
async fn recover<C: AdaptiveClient>(
    client: &mut C,
    policy: &mut RecoveryPolicy,
    events: &EngineEvents,
    error: &ClientError,
) -> bool {
    match policy.on_error(error.class) {
        RecoveryAction::Reload => {
            warn!("Network error, restarting load: {error}");
            events.emit(EngineEvent::Recovering(FaultKind::Network));
            client.start_load().await;
            true
        }
        RecoveryAction::RecoverMedia => {
            warn!("Media error, recovering decode pipeline: {error}");
            events.emit(EngineEvent::Recovering(FaultKind::Media));
            client.recover_media_error().await;
            true
        }
        RecoveryAction::Fail(kind) => {
            warn!(%kind, "Adaptive playback failed: {error}");
            client.destroy().await;
            events.emit(EngineEvent::Failed(kind));
            false
        }
    }
}
