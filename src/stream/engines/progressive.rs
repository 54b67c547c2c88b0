//! Progressive engine: stream a single media file into the media surface.
//!
//! No segment-level recovery. A failed load is retried once by reassigning
//! the source; a second failure is reported as an unclassified fault.

use anyhow::{anyhow, Result};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::error::FaultKind;
use crate::fingerprint::RequestKind;
use crate::http_client::MediaClient;
use crate::stream::engine::{contain_panics, Engine, EngineEvent, EngineEvents, EngineKind};
use crate::stream::surface::{SurfaceError, SurfaceLease};

const SOURCE_ASSIGNMENTS: u32 = 2;

pub struct ProgressiveEngine {
    task: JoinHandle<()>,
    lease: SurfaceLease,
}

impl ProgressiveEngine {
    pub fn attach(client: MediaClient, url: &str, lease: SurfaceLease, events: EngineEvents) -> Self {
        let span = tracing::info_span!("progressive", generation = events.generation());
        let body = run(client, url.to_string(), lease.clone(), events.clone());
        let task = tokio::spawn(contain_panics(body, events).instrument(span));
        Self { task, lease }
    }
}

impl Engine for ProgressiveEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Progressive
    }

    fn dispose(&mut self) {
        self.task.abort();
        self.lease.release();
    }
}

impl Drop for ProgressiveEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run(client: MediaClient, url: String, lease: SurfaceLease, events: EngineEvents) {
    let mut started = false;

    for assignment in 1..=SOURCE_ASSIGNMENTS {
        if let Err(e) = lease.reset().await {
            debug!("Surface reset failed: {e}");
        }

        match stream_once(&client, &url, &lease, &events, &mut started).await {
            Ok(bytes) if started => {
                info!(bytes, "Progressive source finished");
                if lease.is_current() {
                    events.emit(EngineEvent::Ended);
                }
                return;
            }
            Ok(_) if !lease.is_current() => return,
            Ok(_) if assignment < SOURCE_ASSIGNMENTS => {
                warn!("Progressive source was empty, reassigning");
                events.emit(EngineEvent::Recovering(FaultKind::Unknown));
            }
            Ok(_) => {
                warn!("Progressive source was empty");
                break;
            }
            Err(e) if lease.is_current() && assignment < SOURCE_ASSIGNMENTS => {
                warn!("Progressive load failed, reassigning source: {e}");
                events.emit(EngineEvent::Recovering(FaultKind::Unknown));
            }
            Err(e) => {
                warn!("Progressive load failed: {e}");
                break;
            }
        }
    }

    if lease.is_current() {
        events.emit(EngineEvent::Failed(FaultKind::Unknown));
    }
}

/// Stream the body once. `started` tracks whether Ready/Playing were already
/// reported across reassignments.
async fn stream_once(
    client: &MediaClient,
    url: &str,
    lease: &SurfaceLease,
    events: &EngineEvents,
    started: &mut bool,
) -> Result<u64> {
    let response = client.fetch(url, RequestKind::Media).await?;

    if let Some(ct) = response.headers().get(reqwest::header::CONTENT_TYPE) {
        let ct = ct.to_str().unwrap_or_default();
        if ct.starts_with("text/html") {
            return Err(anyhow!("expected media, got {ct}"));
        }
    }

    let mut body = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        match lease.write(&chunk).await {
            Ok(()) => {}
            Err(SurfaceError::Detached(_)) => return Ok(written),
            Err(e) => return Err(e.into()),
        }
        written += chunk.len() as u64;

        if !*started {
            *started = true;
            events.emit(EngineEvent::Ready);
            if let Err(rejection) = lease.play().await {
                debug!("play() rejected: {rejection}");
            }
            events.emit(EngineEvent::Playing);
        }
    }

    Ok(written)
}
