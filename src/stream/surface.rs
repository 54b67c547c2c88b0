//! Render surfaces engines attach to.
//!
//! The host owns one media surface and one frame surface. At most one engine
//! owns each at a time: a [`MediaSurface`] hands out [`SurfaceLease`]s stamped
//! with the attach generation, and a lease stops working the moment a newer
//! engine claims the surface.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex};

/// Why a `play()` call did not start playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlayRejection {
    /// Autoplay policy refused unmuted playback.
    #[error("autoplay was blocked by policy")]
    NotAllowed,
    /// A newer load interrupted the call.
    #[error("play() was interrupted by a new load")]
    Aborted,
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("lease for attach {0} is no longer current")]
    Detached(u64),

    #[error("media sink error: {0}")]
    Io(#[from] io::Error),
}

/// The media element: where decoded-ready bytes go.
#[async_trait]
pub trait MediaSink: Send {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Start playback. Hosts with autoplay restrictions may refuse.
    async fn play(&mut self) -> Result<(), PlayRejection> {
        Ok(())
    }

    /// Clear the current source.
    async fn reset(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink over any async writer: stdout, a file, a player's stdin.
pub struct WriterSink<W> {
    writer: W,
    written: u64,
}

impl<W: AsyncWrite + Unpin + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MediaSink for WriterSink<W> {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn reset(&mut self) -> io::Result<()> {
        // A pipe cannot be rewound; flush so the consumer sees a clean cut
        self.writer.flush().await
    }
}

const NO_OWNER: u64 = 0;

/// One media sink shared by successive engines, owned by one at a time.
#[derive(Clone)]
pub struct MediaSurface {
    owner: Arc<AtomicU64>,
    sink: Arc<Mutex<Box<dyn MediaSink>>>,
}

impl MediaSurface {
    pub fn new(sink: impl MediaSink + 'static) -> Self {
        Self {
            owner: Arc::new(AtomicU64::new(NO_OWNER)),
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    /// Hand the surface to the engine attached under `generation`. Any older
    /// lease is invalidated.
    #[must_use]
    pub fn claim(&self, generation: u64) -> SurfaceLease {
        self.owner.store(generation, Ordering::SeqCst);
        SurfaceLease {
            generation,
            owner: self.owner.clone(),
            sink: self.sink.clone(),
        }
    }

    /// Generation of the current owner, if any.
    #[must_use]
    pub fn owner(&self) -> Option<u64> {
        match self.owner.load(Ordering::SeqCst) {
            NO_OWNER => None,
            generation => Some(generation),
        }
    }
}

/// Write access to a [`MediaSurface`] for one attach generation.
#[derive(Clone)]
pub struct SurfaceLease {
    generation: u64,
    owner: Arc<AtomicU64>,
    sink: Arc<Mutex<Box<dyn MediaSink>>>,
}

impl SurfaceLease {
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_current(&self) -> bool {
        self.owner.load(Ordering::SeqCst) == self.generation
    }

    pub async fn write(&self, chunk: &[u8]) -> Result<(), SurfaceError> {
        let mut sink = self.sink.lock().await;
        if !self.is_current() {
            return Err(SurfaceError::Detached(self.generation));
        }
        sink.write(chunk).await?;
        Ok(())
    }

    pub async fn play(&self) -> Result<(), PlayRejection> {
        let mut sink = self.sink.lock().await;
        if !self.is_current() {
            return Err(PlayRejection::Aborted);
        }
        sink.play().await
    }

    pub async fn reset(&self) -> Result<(), SurfaceError> {
        let mut sink = self.sink.lock().await;
        if !self.is_current() {
            return Err(SurfaceError::Detached(self.generation));
        }
        sink.reset().await?;
        Ok(())
    }

    /// Give the surface back if this lease still owns it.
    pub fn release(&self) {
        let _ = self.owner.compare_exchange(
            self.generation,
            NO_OWNER,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// Sandbox and permission attributes for a third-party frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    sandbox: Vec<&'static str>,
    allow: Vec<&'static str>,
}

impl SandboxPolicy {
    /// Minimum needed for a third-party player: scripts, its own origin
    /// storage, presentation and fullscreen. No popups, no top navigation.
    #[must_use]
    pub fn third_party() -> Self {
        Self {
            sandbox: vec![
                "allow-scripts",
                "allow-same-origin",
                "allow-presentation",
            ],
            allow: vec!["autoplay", "fullscreen", "encrypted-media", "picture-in-picture"],
        }
    }

    /// Same-origin content may navigate the top window, but only in response
    /// to a user gesture.
    #[must_use]
    pub fn same_origin() -> Self {
        let mut policy = Self::third_party();
        policy.sandbox.push("allow-top-navigation-by-user-activation");
        policy
    }

    #[must_use]
    pub fn permits(&self, token: &str) -> bool {
        self.sandbox.contains(&token)
    }

    /// Value for the frame's `sandbox` attribute.
    #[must_use]
    pub fn sandbox_attribute(&self) -> String {
        self.sandbox.join(" ")
    }

    /// Value for the frame's `allow` attribute.
    #[must_use]
    pub fn allow_attribute(&self) -> String {
        self.allow.join("; ")
    }
}

/// Result of loading a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Loaded,
    Failed(FrameFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameFailure {
    #[error("embed returned HTTP {0}")]
    Status(u16),
    /// The page refuses to be framed. No retry can fix this.
    #[error("embed refuses framing: {0}")]
    FramingBlocked(String),
    #[error("embed unreachable: {0}")]
    Unreachable(String),
}

/// Things the framed content tried to do, as observed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameActivity {
    /// Cross-frame `postMessage` payload.
    Message(String),
    /// `window.open` attempt.
    OpenRequest(String),
    /// Click on an anchor inside the document hosting the frame.
    LinkClick { href: String, target: Option<String> },
}

/// The isolated frame the embedded engine renders into.
#[async_trait]
pub trait FrameSurface: Send + Sync {
    /// Point the frame at `url`. Resolves on the frame's load or error
    /// event; a frame that reports neither never resolves.
    async fn load(&self, url: &str, sandbox: &SandboxPolicy) -> FrameOutcome;

    /// Clear the frame source.
    fn clear(&self);

    /// Activity feed for the suppression layer, if the host can observe it.
    fn subscribe(&self) -> Option<broadcast::Receiver<FrameActivity>> {
        None
    }

    /// Cancel activity the suppression layer refused: prevent the click's
    /// navigation, drop the message before it reaches the page, deny the
    /// window. Only called for items that came through [`subscribe`].
    ///
    /// [`subscribe`]: FrameSurface::subscribe
    fn block(&self, activity: &FrameActivity);
}
