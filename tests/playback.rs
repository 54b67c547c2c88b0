//! End-to-end playback scenarios against the surface actor.
//!
//! Engines are scripted through a recording factory: each attach hands the
//! test the plan and the engine's event sender, so the test plays the engine.
//! Time is paused; timers fire as soon as every task is idle.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use livefeed::config::{DeviceClass, PlayerConfig};
use livefeed::fullscreen::FullscreenVendor;
use livefeed::stream::extractor::PageRelay;
use livefeed::stream::player::{EscapeHatch, SwitchObserver};
use livefeed::stream::surface::{FrameActivity, FrameOutcome, MediaSink};
use livefeed::stream::{
    Engine, EngineEvent, EngineEvents, EngineFactory, EngineKind, FrameSurface, MediaSurface, Phase,
    PlaybackPlan, SandboxPolicy, StandardEngineFactory, StreamExtractor,
};
use livefeed::{
    FaultKind, MediaClient, PlaybackSurface, StrategySelector, StreamDescriptor, Suppressor,
    SurfaceEvent, SurfaceHandle,
};

const MANIFEST: &str = "https://cdn.example/live/master.m3u8";
const EMBED: &str = "https://provider.example/embed/42";

// ─── Recording factory ───────────────────────────────────────────────────────

struct Attached {
    plan: PlaybackPlan,
    events: EngineEvents,
}

#[derive(Clone, Default)]
struct Counters {
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    reloads: Arc<AtomicUsize>,
}

struct RecordingFactory {
    attached: mpsc::UnboundedSender<Attached>,
    counters: Counters,
}

impl EngineFactory for RecordingFactory {
    fn attach(&self, plan: &PlaybackPlan, events: EngineEvents) -> Box<dyn Engine> {
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);
        let _ = self.attached.send(Attached {
            plan: plan.clone(),
            events,
        });
        Box::new(ScriptedEngine {
            kind: plan.kind,
            counters: self.counters.clone(),
            disposed: false,
        })
    }
}

struct ScriptedEngine {
    kind: EngineKind,
    counters: Counters,
    disposed: bool,
}

impl Engine for ScriptedEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn reload_frame(&mut self) {
        self.counters.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct Harness {
    handle: SurfaceHandle,
    events: mpsc::UnboundedReceiver<SurfaceEvent>,
    attached: mpsc::UnboundedReceiver<Attached>,
    counters: Counters,
}

impl Harness {
    fn new(config: &PlayerConfig) -> Self {
        Self::build(config, StrategySelector::new(), None)
    }

    fn build(
        config: &PlayerConfig,
        selector: StrategySelector,
        observer: Option<Arc<dyn SwitchObserver>>,
    ) -> Self {
        let (tx, attached) = mpsc::unbounded_channel();
        let counters = Counters::default();
        let factory = RecordingFactory {
            attached: tx,
            counters: counters.clone(),
        };

        let mut surface =
            PlaybackSurface::new(Arc::new(selector), Arc::new(factory), config);
        if let Some(observer) = observer {
            surface = surface.with_observer(observer);
        }
        let (handle, events) = surface.spawn();

        Self {
            handle,
            events,
            attached,
            counters,
        }
    }

    async fn event(&mut self) -> SurfaceEvent {
        self.events.recv().await.expect("surface closed")
    }

    async fn attached(&mut self) -> Attached {
        self.attached.recv().await.expect("factory dropped")
    }

    fn play(&self, descriptor: StreamDescriptor) {
        self.handle.set_descriptor(Some(descriptor)).unwrap();
    }
}

/// Let the surface drain engine signals before the next command goes in.
async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn double_switch_leaves_one_engine() {
    let mut h = Harness::new(&PlayerConfig::default());

    h.play(StreamDescriptor::direct("a", MANIFEST));
    h.play(StreamDescriptor::direct("b", "https://cdn.example/other/index.m3u8"));

    loop {
        let attached = h.attached().await;
        if attached.plan.url.contains("/other/") {
            break;
        }
    }

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.descriptor_id.as_deref(), Some("b"));
    assert_eq!(snapshot.engine, Some(EngineKind::Adaptive));
    assert_eq!(h.counters.live.load(Ordering::SeqCst), 1);
    assert_eq!(h.counters.max_live.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn recovered_network_fault_keeps_playing() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::direct("a", MANIFEST));

    let engine = h.attached().await;
    assert_eq!(engine.plan.kind, EngineKind::Adaptive);

    engine.events.emit(EngineEvent::Ready);
    assert_eq!(
        h.event().await,
        SurfaceEvent::Ready {
            descriptor_id: "a".into(),
            engine: EngineKind::Adaptive
        }
    );

    engine.events.emit(EngineEvent::Recovering(FaultKind::Network));
    engine.events.emit(EngineEvent::Playing);
    assert_eq!(
        h.event().await,
        SurfaceEvent::Playing {
            descriptor_id: "a".into()
        }
    );

    let state = h.handle.snapshot().await.unwrap().state;
    assert_eq!(state.phase, Phase::Playing);
    assert!(state.retry_count <= 1);
}

#[tokio::test(start_paused = true)]
async fn failed_attempt_is_retried_with_new_engine() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::direct("a", MANIFEST));

    let first = h.attached().await;
    first.events.emit(EngineEvent::Failed(FaultKind::Network));
    assert_eq!(
        h.event().await,
        SurfaceEvent::Retrying {
            attempt: 1,
            after: Duration::from_secs(1)
        }
    );

    let second = h.attached().await;
    assert!(second.events.generation() > first.events.generation());
    assert_eq!(h.counters.max_live.load(Ordering::SeqCst), 1);

    second.events.emit(EngineEvent::Playing);
    assert!(matches!(h.event().await, SurfaceEvent::Playing { .. }));

    let state = h.handle.snapshot().await.unwrap().state;
    assert_eq!(state.phase, Phase::Playing);
    assert_eq!(state.retry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn three_media_faults_exhaust_retries() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::direct("a", MANIFEST));

    for attempt in 1..=2 {
        h.attached().await.events.emit(EngineEvent::Failed(FaultKind::Media));
        assert_eq!(
            h.event().await,
            SurfaceEvent::Retrying {
                attempt,
                after: Duration::from_secs(u64::from(attempt))
            }
        );
    }

    h.attached().await.events.emit(EngineEvent::Failed(FaultKind::Media));
    assert_eq!(
        h.event().await,
        SurfaceEvent::RetryExhausted {
            kind: FaultKind::Media,
            escape: EscapeHatch {
                can_retry: false,
                open_url: Some(MANIFEST.into())
            }
        }
    );

    // The budget is spent for manual retries too
    h.handle.retry().unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.attached.try_recv().is_err(), "no fourth attempt");

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state.phase, Phase::Error);
    assert_eq!(snapshot.state.retry_count, 2);
    assert_eq!(snapshot.engine, None);
}

#[tokio::test(start_paused = true)]
async fn unsupported_fault_is_not_retried() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::direct("a", "https://cdn.example/live/stream.mpd"));

    h.attached().await.events.emit(EngineEvent::Failed(FaultKind::Unsupported));
    match h.event().await {
        SurfaceEvent::Error { kind, escape } => {
            assert_eq!(kind, FaultKind::Unsupported);
            assert!(!escape.can_retry);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn watchdog_times_out_silent_engine() {
    let mut h = Harness::new(&PlayerConfig::default());
    let started = Instant::now();
    h.play(StreamDescriptor::direct("a", MANIFEST));

    let engine = h.attached().await;
    assert_eq!(
        h.event().await,
        SurfaceEvent::TimedOut {
            escape: EscapeHatch {
                can_retry: true,
                open_url: Some(MANIFEST.into())
            }
        }
    );
    assert!(started.elapsed() >= Duration::from_secs(15));

    // A late ready does not revive a timed-out attempt
    engine.events.emit(EngineEvent::Ready);
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state.phase, Phase::TimedOut);
    assert_eq!(snapshot.engine, Some(EngineKind::Adaptive));
}

#[tokio::test(start_paused = true)]
async fn manual_retry_ignores_previous_engine() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::direct("a", MANIFEST));

    let old = h.attached().await;
    assert!(matches!(h.event().await, SurfaceEvent::TimedOut { .. }));

    h.handle.retry().unwrap();
    let fresh = h.attached().await;
    assert!(fresh.events.generation() > old.events.generation());
    assert_eq!(h.counters.live.load(Ordering::SeqCst), 1);

    old.events.emit(EngineEvent::Ready);
    fresh.events.emit(EngineEvent::Ready);
    assert!(matches!(h.event().await, SurfaceEvent::Ready { .. }));

    let state = h.handle.snapshot().await.unwrap().state;
    assert_eq!(state.phase, Phase::Ready);
    assert_eq!(state.retry_count, 1);
    assert_eq!(state.last_fault, None);
}

#[tokio::test(start_paused = true)]
async fn manual_retries_of_timeouts_share_the_budget() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::direct("a", MANIFEST));

    for retry in 1..=2 {
        h.attached().await;
        match h.event().await {
            SurfaceEvent::TimedOut { escape } => assert!(escape.can_retry),
            other => panic!("unexpected {other:?}"),
        }
        h.handle.retry().unwrap();
        assert_eq!(h.handle.snapshot().await.unwrap().state.retry_count, retry);
    }

    h.attached().await;
    assert_eq!(
        h.event().await,
        SurfaceEvent::TimedOut {
            escape: EscapeHatch {
                can_retry: false,
                open_url: Some(MANIFEST.into())
            }
        }
    );

    h.handle.retry().unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state.phase, Phase::TimedOut);
    assert_eq!(snapshot.state.retry_count, 2);
    assert!(h.attached.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn failure_after_timeout_releases_engine() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::direct("a", MANIFEST));

    let engine = h.attached().await;
    assert!(matches!(h.event().await, SurfaceEvent::TimedOut { .. }));

    engine.events.emit(EngineEvent::Failed(FaultKind::Network));
    settle().await;
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state.phase, Phase::TimedOut);
    assert_eq!(snapshot.engine, None);
    assert!(!snapshot.retry_pending);
    assert_eq!(h.counters.live.load(Ordering::SeqCst), 0);
    assert!(h.events.try_recv().is_err(), "no event for a settled attempt");
}

#[tokio::test(start_paused = true)]
async fn end_of_stream_is_reported_once() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::direct("a", "https://cdn.example/event/index.m3u8"));

    let engine = h.attached().await;
    engine.events.emit(EngineEvent::Ready);
    engine.events.emit(EngineEvent::Playing);
    engine.events.emit(EngineEvent::Ended);
    assert!(matches!(h.event().await, SurfaceEvent::Ready { .. }));
    assert!(matches!(h.event().await, SurfaceEvent::Playing { .. }));
    assert_eq!(
        h.event().await,
        SurfaceEvent::Ended {
            descriptor_id: "a".into()
        }
    );

    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(snapshot.ended);
    assert_eq!(snapshot.engine, None);
    assert_eq!(h.counters.live.load(Ordering::SeqCst), 0);

    // Released engine: its late signals are stale
    engine.events.emit(EngineEvent::Ended);
    h.handle.snapshot().await.unwrap();
    assert!(h.events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn end_before_ready_is_ignored() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::direct("a", MANIFEST));

    h.attached().await.events.emit(EngineEvent::Ended);
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(!snapshot.ended);
    assert_eq!(snapshot.state.phase, Phase::Loading);
    assert_eq!(snapshot.engine, Some(EngineKind::Adaptive));
}

/// Relay serving an embed page with a manifest in its player setup.
struct CountingRelay {
    fetches: Arc<AtomicUsize>,
}

#[async_trait]
impl PageRelay for CountingRelay {
    fn name(&self) -> &str {
        "counting"
    }

    async fn fetch_page(&self, _url: &str) -> anyhow::Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(r#"<script>player.setup({ file: "https://cdn.example/hidden/index.m3u8" })</script>"#.into())
    }
}

#[tokio::test(start_paused = true)]
async fn manual_retry_discards_cached_extraction() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let relay = CountingRelay {
        fetches: fetches.clone(),
    };
    let extractor = StreamExtractor::with_ttl(vec![Box::new(relay)], Duration::from_secs(600));
    let selector = StrategySelector::new().with_extractor(Arc::new(extractor));
    let mut h = Harness::build(&PlayerConfig::default(), selector, None);
    h.play(StreamDescriptor::embed("e", EMBED));

    let first = h.attached().await;
    assert_eq!(first.plan.kind, EngineKind::Adaptive);
    assert_eq!(first.plan.url, "https://cdn.example/hidden/index.m3u8");
    assert!(first.plan.extracted);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    // Automatic retries reuse the cached extraction
    first.events.emit(EngineEvent::Failed(FaultKind::Network));
    assert!(matches!(h.event().await, SurfaceEvent::Retrying { .. }));
    let second = h.attached().await;
    assert_eq!(second.plan.url, first.plan.url);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    assert!(matches!(h.event().await, SurfaceEvent::TimedOut { .. }));
    h.handle.retry().unwrap();
    let third = h.attached().await;
    assert_eq!(third.plan.kind, EngineKind::Adaptive);
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(h.handle.snapshot().await.unwrap().state.retry_count, 2);
}

#[tokio::test(start_paused = true)]
async fn retry_is_ignored_while_loading() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::direct("a", MANIFEST));
    let engine = h.attached().await;

    h.handle.retry().unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.generation, engine.events.generation());
    assert_eq!(snapshot.state.phase, Phase::Loading);
}

#[tokio::test(start_paused = true)]
async fn embed_only_never_uses_media_engines() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::embed("e", EMBED));

    let first = h.attached().await;
    assert_eq!(first.plan.kind, EngineKind::Embedded);
    first.events.emit(EngineEvent::Failed(FaultKind::Network));
    assert!(matches!(h.event().await, SurfaceEvent::Retrying { .. }));

    let second = h.attached().await;
    assert_eq!(second.plan.kind, EngineKind::Embedded);
    assert_eq!(second.plan.url, EMBED);
}

#[tokio::test(start_paused = true)]
async fn invalid_descriptor_is_rejected() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::direct("bad", "ftp://cdn.example/live.m3u8"));

    assert!(matches!(h.event().await, SurfaceEvent::Rejected { .. }));
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state.phase, Phase::Idle);
    assert!(h.attached.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn clearing_descriptor_disposes_engine() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::direct("a", MANIFEST));
    h.attached().await;

    h.handle.set_descriptor(None).unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.descriptor_id, None);
    assert_eq!(snapshot.engine, None);
    assert_eq!(snapshot.state.phase, Phase::Idle);
    assert_eq!(h.counters.live.load(Ordering::SeqCst), 0);
}

#[derive(Default)]
struct SwitchLog(Mutex<Vec<(Option<String>, Option<String>)>>);

impl SwitchObserver for SwitchLog {
    fn stream_switched(&self, from: Option<&StreamDescriptor>, to: Option<&StreamDescriptor>) {
        self.0
            .lock()
            .unwrap()
            .push((from.map(|d| d.id.clone()), to.map(|d| d.id.clone())));
    }
}

#[tokio::test(start_paused = true)]
async fn observer_hears_each_real_switch() {
    let log = Arc::new(SwitchLog::default());
    let h = Harness::build(&PlayerConfig::default(), StrategySelector::new(), Some(log.clone()));

    let a = StreamDescriptor::direct("a", MANIFEST);
    h.play(a.clone());
    h.play(a);
    h.play(StreamDescriptor::embed("b", EMBED));
    h.handle.snapshot().await.unwrap();

    assert_eq!(
        *log.0.lock().unwrap(),
        vec![
            (None, Some("a".to_string())),
            (Some("a".to_string()), Some("b".to_string())),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn mobile_fullscreen_exit_reloads_embed() {
    let config = PlayerConfig {
        device: DeviceClass::Mobile,
        ..PlayerConfig::default()
    };
    let mut h = Harness::new(&config);
    h.play(StreamDescriptor::embed("e", EMBED));
    h.attached().await;

    h.handle
        .fullscreen_changed(FullscreenVendor::Webkit, true)
        .unwrap();
    assert!(h.handle.snapshot().await.unwrap().fullscreen);

    h.handle
        .fullscreen_changed(FullscreenVendor::Webkit, false)
        .unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(!snapshot.fullscreen);
    assert_eq!(h.counters.reloads.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn unmount_disposes_and_closes_events() {
    let mut h = Harness::new(&PlayerConfig::default());
    h.play(StreamDescriptor::direct("a", MANIFEST));
    h.attached().await;

    h.handle.unmount().unwrap();
    while h.events.recv().await.is_some() {}

    assert_eq!(h.counters.live.load(Ordering::SeqCst), 0);
    assert!(h.handle.snapshot().await.is_err());
}

// ─── Real embedded engine ────────────────────────────────────────────────────

/// Frame whose provider never reports a load.
struct SilentFrame {
    loads: AtomicUsize,
}

#[async_trait]
impl FrameSurface for SilentFrame {
    async fn load(&self, _url: &str, _sandbox: &SandboxPolicy) -> FrameOutcome {
        self.loads.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    fn clear(&self) {}

    fn block(&self, _activity: &FrameActivity) {}
}

struct NullSink;

#[async_trait]
impl MediaSink for NullSink {
    async fn write(&mut self, _chunk: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn mobile_embed_timeout_offers_source() {
    let config = PlayerConfig {
        device: DeviceClass::Mobile,
        ..PlayerConfig::default()
    };
    let frame = Arc::new(SilentFrame {
        loads: AtomicUsize::new(0),
    });
    let factory = StandardEngineFactory::new(
        MediaClient::new(config.device).unwrap(),
        MediaSurface::new(NullSink),
        frame.clone(),
        Arc::new(Suppressor::from_config(&config.suppression).unwrap()),
        config.clone(),
    );
    let surface = PlaybackSurface::new(Arc::new(StrategySelector::new()), Arc::new(factory), &config);
    let (handle, mut events) = surface.spawn();

    let started = Instant::now();
    handle
        .set_descriptor(Some(StreamDescriptor::embed("e", EMBED)))
        .unwrap();

    assert_eq!(
        events.recv().await,
        Some(SurfaceEvent::TimedOut {
            escape: EscapeHatch {
                can_retry: true,
                open_url: Some(EMBED.into())
            }
        })
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(15));
    assert_eq!(frame.loads.load(Ordering::SeqCst), 1);

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state.phase, Phase::TimedOut);
    assert_eq!(snapshot.engine, Some(EngineKind::Embedded));
}
