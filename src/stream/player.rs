//! The playback surface: the one component hosts talk to.
//!
//! Hosts hand it a descriptor (or `None`) and listen for [`SurfaceEvent`]s.
//! Which engine ends up attached is internal. Everything runs on a single
//! actor task; engine signals, watchdog and retry timers, resolve results and
//! host commands are all handled in one `select!` loop, so no two
//! transitions ever interleave.
//!
//! Each attach gets a new generation number. Signals from an older
//! generation are dropped, and the previous engine is always disposed before
//! the next one attaches.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::config::{LifecycleConfig, PlayerConfig};
use crate::error::{DescriptorError, FaultKind};
use crate::fullscreen::{FrameAction, FullscreenCoordinator, FullscreenVendor, Orientation};
use crate::stream::descriptor::StreamDescriptor;
use crate::stream::engine::{Engine, EngineEvent, EngineEvents, EngineFactory, EngineKind, EngineSignal};
use crate::stream::lifecycle::{Lifecycle, Phase, PlayerState, Verdict};
use crate::stream::selector::{PlaybackPlan, StrategySelector};

/// The two ways out offered with every user-visible failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscapeHatch {
    pub can_retry: bool,
    /// Source to open directly in a new context.
    pub open_url: Option<String>,
}

/// What the host hears from the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    Ready {
        descriptor_id: String,
        engine: EngineKind,
    },
    Playing {
        descriptor_id: String,
    },
    /// The source finished on its own. The engine has been released.
    Ended {
        descriptor_id: String,
    },
    /// An automatic retry is scheduled.
    Retrying {
        attempt: u32,
        after: Duration,
    },
    /// Terminal error that retrying automatically will not fix.
    Error {
        kind: FaultKind,
        escape: EscapeHatch,
    },
    /// Nothing arrived in time. The stream may still be coming up.
    TimedOut {
        escape: EscapeHatch,
    },
    /// The automatic retry budget is spent.
    RetryExhausted {
        kind: FaultKind,
        escape: EscapeHatch,
    },
    /// The descriptor was invalid and never reached the selector.
    Rejected {
        reason: DescriptorError,
    },
}

/// Point-in-time view of the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceSnapshot {
    pub descriptor_id: Option<String>,
    pub state: PlayerState,
    pub engine: Option<EngineKind>,
    pub generation: u64,
    pub fullscreen: bool,
    pub retry_pending: bool,
    /// The source reached its end during the current attempt.
    pub ended: bool,
}

/// Fire-and-forget notification on stream switches.
pub trait SwitchObserver: Send + Sync {
    fn stream_switched(&self, from: Option<&StreamDescriptor>, to: Option<&StreamDescriptor>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("playback surface has been unmounted")]
pub struct SurfaceClosed;

enum Command {
    SetDescriptor(Option<StreamDescriptor>),
    Retry,
    Fullscreen {
        vendor: FullscreenVendor,
        active: bool,
    },
    Orientation(Orientation),
    Snapshot(oneshot::Sender<SurfaceSnapshot>),
    Unmount,
}

/// Cheap handle to a running surface.
#[derive(Clone)]
pub struct SurfaceHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SurfaceHandle {
    /// Replace the active descriptor. `None` stops playback.
    pub fn set_descriptor(&self, descriptor: Option<StreamDescriptor>) -> Result<(), SurfaceClosed> {
        self.send(Command::SetDescriptor(descriptor))
    }

    /// Viewer-initiated retry after an error or timeout. It counts against
    /// the same budget as automatic retries; once that is spent, or after an
    /// unsupported fault, the call is ignored.
    pub fn retry(&self) -> Result<(), SurfaceClosed> {
        self.send(Command::Retry)
    }

    pub fn fullscreen_changed(&self, vendor: FullscreenVendor, active: bool) -> Result<(), SurfaceClosed> {
        self.send(Command::Fullscreen { vendor, active })
    }

    pub fn orientation_changed(&self, orientation: Orientation) -> Result<(), SurfaceClosed> {
        self.send(Command::Orientation(orientation))
    }

    pub async fn snapshot(&self) -> Result<SurfaceSnapshot, SurfaceClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        rx.await.map_err(|_| SurfaceClosed)
    }

    /// Dispose the engine, cancel timers and stop the surface.
    pub fn unmount(&self) -> Result<(), SurfaceClosed> {
        self.send(Command::Unmount)
    }

    fn send(&self, command: Command) -> Result<(), SurfaceClosed> {
        self.tx.send(command).map_err(|_| SurfaceClosed)
    }
}

/// Builder for the surface actor.
pub struct PlaybackSurface {
    selector: Arc<StrategySelector>,
    factory: Arc<dyn EngineFactory>,
    lifecycle: LifecycleConfig,
    coordinator: FullscreenCoordinator,
    observer: Option<Arc<dyn SwitchObserver>>,
}

impl PlaybackSurface {
    pub fn new(
        selector: Arc<StrategySelector>,
        factory: Arc<dyn EngineFactory>,
        config: &PlayerConfig,
    ) -> Self {
        Self {
            selector,
            factory,
            lifecycle: config.lifecycle.clone(),
            coordinator: FullscreenCoordinator::new(config.device),
            observer: None,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SwitchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Start the actor. Must be called inside a Tokio runtime.
    pub fn spawn(self) -> (SurfaceHandle, mpsc::UnboundedReceiver<SurfaceEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            lifecycle: Lifecycle::new(&self.lifecycle),
            config: self.lifecycle,
            selector: self.selector,
            factory: self.factory,
            coordinator: self.coordinator,
            observer: self.observer,
            descriptor: None,
            plan: None,
            engine: None,
            generation: 0,
            retry_at: None,
            resolving: None,
            ended: false,
            signal_tx,
            resolved_tx,
            events: event_tx,
        };

        tokio::spawn(
            actor
                .run(command_rx, signal_rx, resolved_rx)
                .instrument(tracing::info_span!("surface")),
        );

        (SurfaceHandle { tx: command_tx }, event_rx)
    }
}

struct Resolved {
    generation: u64,
    plan: Result<PlaybackPlan, DescriptorError>,
}

struct Actor {
    selector: Arc<StrategySelector>,
    factory: Arc<dyn EngineFactory>,
    config: LifecycleConfig,
    lifecycle: Lifecycle,
    coordinator: FullscreenCoordinator,
    observer: Option<Arc<dyn SwitchObserver>>,
    descriptor: Option<StreamDescriptor>,
    plan: Option<PlaybackPlan>,
    engine: Option<Box<dyn Engine>>,
    generation: u64,
    retry_at: Option<Instant>,
    resolving: Option<JoinHandle<()>>,
    ended: bool,
    signal_tx: mpsc::UnboundedSender<EngineSignal>,
    resolved_tx: mpsc::UnboundedSender<Resolved>,
    events: mpsc::UnboundedSender<SurfaceEvent>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<EngineSignal>,
        mut resolved: mpsc::UnboundedReceiver<Resolved>,
    ) {
        loop {
            let watchdog = self.lifecycle.watchdog_deadline();
            let retry_at = self.retry_at;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Unmount) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(signal) = signals.recv() => self.on_signal(signal),
                Some(result) = resolved.recv() => self.on_resolved(result),
                () = wait_until(watchdog) => self.on_watchdog(),
                () = wait_until(retry_at) => self.on_retry_due(),
            }
        }

        self.stop();
        info!("Playback surface unmounted");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::SetDescriptor(next) => self.switch(next),
            Command::Retry => self.manual_retry(),
            Command::Fullscreen { vendor, active } => {
                let action = self.coordinator.on_change(vendor, active);
                self.apply(action);
            }
            Command::Orientation(orientation) => {
                let action = self.coordinator.on_orientation(orientation);
                self.apply(action);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Unmount => self.stop(),
        }
    }

    fn switch(&mut self, next: Option<StreamDescriptor>) {
        if next == self.descriptor {
            debug!("Descriptor unchanged");
            return;
        }

        self.stop();
        if let Some(observer) = &self.observer {
            observer.stream_switched(self.descriptor.as_ref(), next.as_ref());
        }
        self.descriptor = next;

        let Some(descriptor) = &self.descriptor else {
            info!("Playback cleared");
            return;
        };

        if let Err(reason) = descriptor.validate() {
            warn!("Rejected descriptor: {reason}");
            self.emit(SurfaceEvent::Rejected { reason });
            return;
        }

        info!(id = %descriptor.id, source = %descriptor.label(), "Stream switched");
        if let Err(e) = self.lifecycle.begin(Instant::now()) {
            warn!("Cannot start playback: {e}");
            return;
        }
        self.start_attempt(false);
    }

    fn manual_retry(&mut self) {
        let state = self.lifecycle.state();
        if self.descriptor.is_none() || !self.lifecycle.can_retry() {
            debug!(phase = %state.phase, retries = state.retry_count, "Retry ignored");
            return;
        }

        info!(retry = state.retry_count + 1, "Manual retry");
        self.halt();
        if let Err(e) = self.lifecycle.retry(Instant::now()) {
            warn!("Cannot restart playback: {e}");
            return;
        }
        self.start_attempt(true);
    }

    /// Resolve the descriptor in the background. `fresh` discards any cached
    /// extraction first.
    fn start_attempt(&mut self, fresh: bool) {
        let Some(descriptor) = self.descriptor.clone() else {
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        let attempt_id = Uuid::new_v4();
        info!(
            id = %descriptor.id,
            generation,
            %attempt_id,
            retry = self.lifecycle.state().retry_count,
            "Starting playback attempt"
        );

        let selector = self.selector.clone();
        let tx = self.resolved_tx.clone();
        let span = tracing::info_span!("attempt", %attempt_id);
        self.resolving = Some(tokio::spawn(
            async move {
                if fresh {
                    if let (Some(extractor), Some(embed)) =
                        (selector.extractor(), descriptor.embed_url.as_deref())
                    {
                        extractor.invalidate(embed).await;
                    }
                }
                let plan = selector.resolve(&descriptor).await;
                let _ = tx.send(Resolved { generation, plan });
            }
            .instrument(span),
        ));
    }

    fn on_resolved(&mut self, resolved: Resolved) {
        if resolved.generation != self.generation {
            debug!(generation = resolved.generation, "Stale resolve result dropped");
            return;
        }
        self.resolving = None;

        match resolved.plan {
            Ok(plan) => self.attach(plan),
            Err(reason) => {
                warn!("Descriptor failed resolution: {reason}");
                if self.lifecycle.fault(FaultKind::Unsupported).is_ok() {
                    self.after_failure();
                }
            }
        }
    }

    fn attach(&mut self, plan: PlaybackPlan) {
        self.detach();

        let events = EngineEvents::new(self.generation, self.signal_tx.clone());
        let engine = self.factory.attach(&plan, events);
        info!(kind = %plan.kind, url = %plan.url, generation = self.generation, "Engine attached");

        self.coordinator
            .set_embedded_active(plan.kind == EngineKind::Embedded);
        self.engine = Some(engine);
        self.plan = Some(plan);
    }

    fn detach(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            debug!(kind = %engine.kind(), "Disposing engine");
            engine.dispose();
        }
        self.coordinator.set_embedded_active(false);
    }

    /// Dispose the engine and cancel every timer and background task. The
    /// lifecycle is left as it is.
    fn halt(&mut self) {
        self.detach();
        if let Some(task) = self.resolving.take() {
            task.abort();
        }
        self.retry_at = None;
        self.plan = None;
        self.ended = false;
    }

    /// Halt and return to idle with a fresh retry budget.
    fn stop(&mut self) {
        self.halt();
        self.lifecycle.reset();
    }

    fn on_signal(&mut self, signal: EngineSignal) {
        let engine = match &self.engine {
            Some(engine) if signal.generation == self.generation => engine.kind(),
            _ => {
                debug!(generation = signal.generation, event = ?signal.event, "Stale engine signal dropped");
                return;
            }
        };

        match signal.event {
            EngineEvent::Ready => {
                if self.lifecycle.ready().is_ok() {
                    info!(%engine, "Ready");
                    self.emit(SurfaceEvent::Ready {
                        descriptor_id: self.descriptor_id(),
                        engine,
                    });
                }
            }
            EngineEvent::Playing => {
                if self.lifecycle.playing().is_ok() {
                    info!("Playing");
                    self.emit(SurfaceEvent::Playing {
                        descriptor_id: self.descriptor_id(),
                    });
                }
            }
            EngineEvent::Recovering(kind) => debug!(%kind, "Engine recovering"),
            EngineEvent::Failed(kind) => {
                // The engine has stopped either way
                self.detach();
                match self.lifecycle.fault(kind) {
                    Ok(()) => {
                        warn!(%kind, "Engine failed");
                        self.after_failure();
                    }
                    Err(e) => debug!(%kind, "Engine failed after the attempt settled: {e}"),
                }
            }
            EngineEvent::Ended => {
                let phase = self.lifecycle.phase();
                if matches!(phase, Phase::Ready | Phase::Playing) {
                    info!("Stream ended");
                    self.detach();
                    self.ended = true;
                    self.emit(SurfaceEvent::Ended {
                        descriptor_id: self.descriptor_id(),
                    });
                } else {
                    debug!(%phase, "End of stream ignored");
                }
            }
            EngineEvent::TimedOut => {
                if self.lifecycle.timed_out().is_ok() {
                    warn!("Engine timed out");
                    self.emit(SurfaceEvent::TimedOut {
                        escape: self.escape(),
                    });
                }
            }
        }
    }

    fn on_watchdog(&mut self) {
        if self.lifecycle.watchdog_fired(Instant::now()) {
            warn!(generation = self.generation, "No ready signal before watchdog");
            self.emit(SurfaceEvent::TimedOut {
                escape: self.escape(),
            });
        }
    }

    fn on_retry_due(&mut self) {
        self.retry_at = None;
        match self.lifecycle.retry(Instant::now()) {
            Ok(()) => self.start_attempt(false),
            Err(e) => warn!("Retry refused: {e}"),
        }
    }

    fn after_failure(&mut self) {
        let state = self.lifecycle.state();
        let kind = state.last_fault.unwrap_or(FaultKind::Unknown);

        match self.lifecycle.verdict() {
            Some(Verdict::AutoRetry) => {
                let attempt = state.retry_count + 1;
                let after = self.config.backoff(attempt);
                info!(attempt, ?after, %kind, "Scheduling retry");
                self.retry_at = Some(Instant::now() + after);
                self.emit(SurfaceEvent::Retrying { attempt, after });
            }
            Some(Verdict::Terminal { exhausted: true }) => {
                warn!(%kind, retries = state.retry_count, "Retries exhausted");
                self.emit(SurfaceEvent::RetryExhausted {
                    kind,
                    escape: self.escape(),
                });
            }
            Some(Verdict::Terminal { exhausted: false }) => {
                self.emit(SurfaceEvent::Error {
                    kind,
                    escape: self.escape(),
                });
            }
            Some(Verdict::AwaitUser) | None => {}
        }
    }

    fn apply(&mut self, action: Option<FrameAction>) {
        match (action, self.engine.as_mut()) {
            (Some(FrameAction::Reload), Some(engine)) => engine.reload_frame(),
            (Some(FrameAction::Reload), None) => debug!("No engine to reload"),
            (None, _) => {}
        }
    }

    fn escape(&self) -> EscapeHatch {
        let open_url = self
            .plan
            .as_ref()
            .map(|p| p.source_url.clone())
            .or_else(|| {
                self.descriptor
                    .as_ref()
                    .and_then(|d| d.source_url().map(str::to_string))
            });
        EscapeHatch {
            can_retry: self.lifecycle.can_retry(),
            open_url,
        }
    }

    fn descriptor_id(&self) -> String {
        self.descriptor
            .as_ref()
            .map(|d| d.id.clone())
            .unwrap_or_default()
    }

    fn snapshot(&self) -> SurfaceSnapshot {
        SurfaceSnapshot {
            descriptor_id: self.descriptor.as_ref().map(|d| d.id.clone()),
            state: self.lifecycle.state(),
            engine: self.engine.as_ref().map(|e| e.kind()),
            generation: self.generation,
            fullscreen: self.coordinator.is_fullscreen(),
            retry_pending: self.retry_at.is_some(),
            ended: self.ended,
        }
    }

    fn emit(&self, event: SurfaceEvent) {
        // Host stopped listening; keep running until unmounted
        let _ = self.events.send(event);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
