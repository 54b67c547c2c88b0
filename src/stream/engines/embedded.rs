//! Embedded engine: render a third-party player in an isolated frame.
//!
//! The host page cannot see inside the frame, so the only liveness signals
//! are the frame's load and error events. Many providers suppress those, so a
//! load window decides what silence means: on desktop it is assumed to be a
//! load, on mobile it is a timeout and the viewer gets a fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_SECURITY_POLICY, X_FRAME_OPTIONS};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::config::TimeoutPolicy;
use crate::error::FaultKind;
use crate::fingerprint::RequestKind;
use crate::http_client::MediaClient;
use crate::stream::engine::{Engine, EngineEvent, EngineEvents, EngineKind};
use crate::stream::surface::{FrameActivity, FrameFailure, FrameOutcome, FrameSurface, SandboxPolicy};
use crate::suppress::Suppressor;

/// How an embed is rendered.
#[derive(Debug, Clone)]
pub struct EmbedSettings {
    pub sandbox: SandboxPolicy,
    pub window: Duration,
    pub on_timeout: TimeoutPolicy,
    pub reload_delay: Duration,
}

pub struct EmbeddedEngine {
    frame: Arc<dyn FrameSurface>,
    url: String,
    settings: EmbedSettings,
    events: EngineEvents,
    load: JoinHandle<()>,
    monitor: Option<JoinHandle<()>>,
    reload: Option<JoinHandle<()>>,
}

impl EmbeddedEngine {
    pub fn attach(
        frame: Arc<dyn FrameSurface>,
        url: &str,
        settings: EmbedSettings,
        suppressor: Arc<Suppressor>,
        events: EngineEvents,
    ) -> Self {
        let span = tracing::info_span!("embedded", generation = events.generation());

        let monitor = frame.subscribe().map(|mut activity| {
            let frame = frame.clone();
            tokio::spawn(
                async move {
                    loop {
                        match activity.recv().await {
                            Ok(item) => {
                                if !suppressor.permits(&item) {
                                    frame.block(&item);
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                debug!(skipped = n, "Frame activity lagged");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
                .instrument(span.clone()),
            )
        });

        let deadline = Instant::now() + settings.window;
        let load = tokio::spawn(
            watch_load(frame.clone(), url.to_string(), settings.clone(), deadline, events.clone())
                .instrument(span),
        );

        Self {
            frame,
            url: url.to_string(),
            settings,
            events,
            load,
            monitor,
            reload: None,
        }
    }
}

impl Engine for EmbeddedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Embedded
    }

    fn dispose(&mut self) {
        self.load.abort();
        if let Some(task) = self.monitor.take() {
            task.abort();
        }
        if let Some(task) = self.reload.take() {
            task.abort();
        }
        self.frame.clear();
    }

    fn reload_frame(&mut self) {
        if let Some(task) = self.reload.take() {
            task.abort();
        }

        info!(url = %self.url, "Reloading embed");
        self.frame.clear();

        let frame = self.frame.clone();
        let url = self.url.clone();
        let sandbox = self.settings.sandbox.clone();
        let delay = self.settings.reload_delay;
        let events = self.events.clone();
        let restore_at = Instant::now() + delay;
        self.reload = Some(tokio::spawn(async move {
            tokio::time::sleep_until(restore_at).await;
            if let FrameOutcome::Failed(failure) = frame.load(&url, &sandbox).await {
                warn!("Embed reload failed: {failure}");
                events.emit(EngineEvent::Failed(fault_for(&failure)));
            }
        }));
    }
}

impl Drop for EmbeddedEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn watch_load(
    frame: Arc<dyn FrameSurface>,
    url: String,
    settings: EmbedSettings,
    deadline: Instant,
    events: EngineEvents,
) {
    tokio::select! {
        outcome = frame.load(&url, &settings.sandbox) => match outcome {
            FrameOutcome::Loaded => {
                info!("Embed loaded");
                events.emit(EngineEvent::Ready);
                events.emit(EngineEvent::Playing);
            }
            FrameOutcome::Failed(failure) => {
                warn!("Embed failed: {failure}");
                events.emit(EngineEvent::Failed(fault_for(&failure)));
            }
        },
        () = tokio::time::sleep_until(deadline) => match settings.on_timeout {
            TimeoutPolicy::AssumeLoaded => {
                info!(window = ?settings.window, "No load event from embed, assuming loaded");
                events.emit(EngineEvent::Ready);
                events.emit(EngineEvent::Playing);
            }
            TimeoutPolicy::Fail => {
                warn!(window = ?settings.window, "Embed load timed out");
                events.emit(EngineEvent::TimedOut);
            }
        },
    }
}

fn fault_for(failure: &FrameFailure) -> FaultKind {
    match failure {
        FrameFailure::Status(_) | FrameFailure::Unreachable(_) => FaultKind::Network,
        FrameFailure::FramingBlocked(_) => FaultKind::Unsupported,
    }
}

/// Frame surface for hosts without a real frame: fetches the embed page the
/// way a browser frame would and reports whether it would render.
pub struct HttpFrameProbe {
    client: MediaClient,
}

impl HttpFrameProbe {
    pub fn new(client: MediaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FrameSurface for HttpFrameProbe {
    async fn load(&self, url: &str, sandbox: &SandboxPolicy) -> FrameOutcome {
        debug!(url, sandbox = %sandbox.sandbox_attribute(), "Probing embed");

        let response = match self.client.get(url, RequestKind::Document).send().await {
            Ok(response) => response,
            Err(e) => return FrameOutcome::Failed(FrameFailure::Unreachable(e.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            return FrameOutcome::Failed(FrameFailure::Status(status.as_u16()));
        }

        match framing_block(response.headers()) {
            Some(reason) => FrameOutcome::Failed(FrameFailure::FramingBlocked(reason)),
            None => FrameOutcome::Loaded,
        }
    }

    fn clear(&self) {}

    // No activity feed, so nothing is ever handed back to block
    fn block(&self, _activity: &FrameActivity) {}
}

/// Reason a response refuses to be framed by another origin, if it does.
#[must_use]
pub fn framing_block(headers: &HeaderMap) -> Option<String> {
    if let Some(xfo) = headers.get(X_FRAME_OPTIONS).and_then(|v| v.to_str().ok()) {
        let xfo = xfo.trim();
        if xfo.eq_ignore_ascii_case("deny") || xfo.eq_ignore_ascii_case("sameorigin") {
            return Some(format!("X-Frame-Options: {xfo}"));
        }
    }

    let csp = headers.get(CONTENT_SECURITY_POLICY).and_then(|v| v.to_str().ok())?;
    csp.split(';')
        .map(str::trim)
        .find(|directive| {
            let mut parts = directive.split_whitespace();
            parts
                .next()
                .is_some_and(|name| name.eq_ignore_ascii_case("frame-ancestors"))
                && matches!(parts.next(), Some("'none'" | "'self'"))
                && parts.next().is_none()
        })
        .map(|directive| format!("Content-Security-Policy: {directive}"))
}
