//! Native HLS client
//!
//! Fetches playlists and segments and feeds them to the media surface.
//! Supports:
//! - Master playlists (highest-bandwidth rendition)
//! - Live playlists with continuous refresh, starting near the live edge
//! - Catch-up when playback falls too far behind the edge
//! - fMP4 init segments (`#EXT-X-MAP`)
//! - Retry on segment failure
//!
//! Encrypted playlists and DASH manifests are reported as unsupported.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::adaptive::{AdaptiveClient, ClientError, ManifestSummary, Progress};
use crate::config::BufferConfig;
use crate::fingerprint::RequestKind;
use crate::http_client::MediaClient;
use crate::stream::surface::{SurfaceError, SurfaceLease};

const SEGMENT_ATTEMPTS: u32 = 3;
const DEFAULT_TARGET_DURATION: f64 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct HlsVariant {
    pub bandwidth: u64,
    pub height: u32,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HlsSegment {
    pub sequence: u64,
    pub duration: f64,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub segments: Vec<HlsSegment>,
    pub is_live: bool,
    pub target_duration: f64,
    pub init_segment: Option<String>,
}

pub struct NativeHlsClient {
    client: MediaClient,
    buffer: BufferConfig,
    lease: SurfaceLease,
    media_url: Option<String>,
    queue: VecDeque<HlsSegment>,
    last_sequence: Option<u64>,
    is_live: bool,
    next_refresh: Instant,
    init_segment: Option<String>,
    init_sent: bool,
}

impl NativeHlsClient {
    pub fn new(client: MediaClient, buffer: BufferConfig, lease: SurfaceLease) -> Self {
        Self {
            client,
            buffer,
            lease,
            media_url: None,
            queue: VecDeque::new(),
            last_sequence: None,
            is_live: false,
            next_refresh: Instant::now(),
            init_segment: None,
            init_sent: false,
        }
    }

    async fn fetch_playlist(&self, url: &str) -> Result<String, ClientError> {
        let content = self
            .client
            .fetch_text(url, RequestKind::Media)
            .await
            .map_err(|e| ClientError::network(format!("playlist fetch failed: {e}")))?;

        if !content.trim_start().starts_with("#EXTM3U") {
            return Err(ClientError::network(format!("{url} is not an HLS playlist")));
        }
        Ok(content)
    }

    async fn fetch_segment(&self, url: &str) -> Result<Vec<u8>, ClientError> {
        let mut last_error = String::new();

        for attempt in 0..SEGMENT_ATTEMPTS {
            match self.client.fetch(url, RequestKind::Media).await {
                Ok(resp) => match resp.bytes().await {
                    Ok(bytes) if bytes.len() > self.buffer.max_buffer_bytes => {
                        return Err(ClientError::media(format!(
                            "segment of {} bytes exceeds buffer budget",
                            bytes.len()
                        )));
                    }
                    Ok(bytes) => return Ok(bytes.to_vec()),
                    Err(e) => last_error = e.to_string(),
                },
                Err(e) => last_error = e.to_string(),
            }

            if attempt + 1 < SEGMENT_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(500 * (u64::from(attempt) + 1))).await;
            }
        }

        Err(ClientError::network(format!("segment fetch failed: {last_error}")))
    }

    async fn load_media_playlist(&mut self) -> Result<MediaPlaylist, ClientError> {
        let url = self
            .media_url
            .clone()
            .ok_or_else(|| ClientError::network("no media playlist selected"))?;
        let content = self.fetch_playlist(&url).await?;
        parse_media_playlist(&content, &url)
    }

    /// Queue segments newer than the last delivered one.
    async fn refresh(&mut self) -> Result<(), ClientError> {
        let playlist = self.load_media_playlist().await?;
        self.apply(&playlist);

        let before = self.queue.len();
        let last = self.last_sequence;
        let queued_tail = self.queue.back().map(|s| s.sequence).or(last);
        self.queue.extend(
            playlist
                .segments
                .into_iter()
                .filter(|s| queued_tail.map_or(true, |tail| s.sequence > tail)),
        );
        debug!(new = self.queue.len() - before, "Playlist refreshed");

        if self.is_live && trim_to_live_edge(&mut self.queue, &self.buffer) {
            info!("Fell behind the live edge, skipping ahead");
        }
        Ok(())
    }

    fn apply(&mut self, playlist: &MediaPlaylist) {
        self.is_live = playlist.is_live;
        if playlist.init_segment != self.init_segment {
            self.init_segment.clone_from(&playlist.init_segment);
            self.init_sent = false;
        }
        self.next_refresh = Instant::now() + refresh_interval(playlist.target_duration);
    }

    async fn write(&self, data: &[u8]) -> Result<(), ClientError> {
        match self.lease.write(data).await {
            Ok(()) => Ok(()),
            // Another engine owns the surface now; this one is being torn down
            Err(SurfaceError::Detached(generation)) => {
                Err(ClientError::media(format!("surface detached from attach {generation}")))
            }
            Err(SurfaceError::Io(e)) => Err(ClientError::media(format!("sink write failed: {e}"))),
        }
    }
}

#[async_trait]
impl AdaptiveClient for NativeHlsClient {
    async fn load_source(&mut self, manifest_url: &str) -> Result<ManifestSummary, ClientError> {
        if manifest_url.to_ascii_lowercase().contains(".mpd") {
            return Err(ClientError::unsupported("DASH manifests are not supported"));
        }

        let content = self.fetch_playlist(manifest_url).await?;
        let mut variants = 1;

        let media_url = if content.contains("#EXT-X-STREAM-INF:") {
            let renditions = parse_master_playlist(&content, manifest_url);
            variants = renditions.len();
            let best = renditions
                .first()
                .ok_or_else(|| ClientError::media("master playlist lists no renditions"))?;
            info!(height = best.height, bandwidth = best.bandwidth, "Selected rendition");
            best.uri.clone()
        } else {
            manifest_url.to_string()
        };

        let is_master = media_url != manifest_url;
        self.media_url = Some(media_url);
        let playlist = if is_master {
            self.load_media_playlist().await?
        } else {
            parse_media_playlist(&content, manifest_url)?
        };
        self.apply(&playlist);

        let start = if playlist.is_live {
            live_start_index(&playlist.segments, &self.buffer)
        } else {
            0
        };
        self.queue = playlist.segments[start..].iter().cloned().collect();
        self.last_sequence = None;

        Ok(ManifestSummary {
            variants,
            live: playlist.is_live,
            target_duration: playlist.target_duration,
        })
    }

    async fn next(&mut self) -> Result<Progress, ClientError> {
        loop {
            if let Some(segment) = self.queue.front().cloned() {
                if !self.init_sent {
                    if let Some(init) = self.init_segment.clone() {
                        let data = self.fetch_segment(&init).await?;
                        self.write(&data).await?;
                    }
                    self.init_sent = true;
                }

                let data = self.fetch_segment(&segment.uri).await?;
                self.write(&data).await?;
                self.queue.pop_front();
                self.last_sequence = Some(segment.sequence);

                return Ok(Progress::Delivered {
                    sequence: segment.sequence,
                    bytes: data.len(),
                });
            }

            if !self.is_live {
                return Ok(Progress::Ended);
            }

            tokio::time::sleep_until(self.next_refresh).await;
            self.refresh().await?;
        }
    }

    async fn start_load(&mut self) {
        self.next_refresh = Instant::now();
    }

    async fn recover_media_error(&mut self) {
        self.init_sent = false;
        if let Err(e) = self.lease.reset().await {
            warn!("Media surface reset failed: {e}");
        }
    }

    async fn destroy(&mut self) {
        self.queue.clear();
        self.is_live = false;
    }
}

fn refresh_interval(target_duration: f64) -> Duration {
    // Half the target duration is the usual poll rate
    let half = target_duration / 2.0;
    if !half.is_finite() {
        return Duration::from_secs_f64(DEFAULT_TARGET_DURATION / 2.0);
    }
    Duration::from_secs_f64(half.clamp(0.5, 10.0))
}

/// A playlist duration in seconds. `NaN`, infinities and non-positive values
/// parse as `f64` but are not durations.
fn positive_secs(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs > 0.0)
}

/// Index of the first segment to play in a live playlist: no more than
/// `live_sync_segments` and no more than `max_buffer_secs` behind the edge.
#[must_use]
pub fn live_start_index(segments: &[HlsSegment], buffer: &BufferConfig) -> usize {
    let mut taken = 0;
    let mut seconds = 0.0;

    for segment in segments.iter().rev() {
        if taken >= buffer.live_sync_segments.max(1) {
            break;
        }
        if taken > 0 && seconds + segment.duration > buffer.max_buffer_secs {
            break;
        }
        seconds += segment.duration;
        taken += 1;
    }

    segments.len() - taken
}

/// Drop queued segments when the backlog exceeds `max_max_buffer_secs`,
/// rejoining at the live start point. Returns true if anything was dropped.
pub fn trim_to_live_edge(queue: &mut VecDeque<HlsSegment>, buffer: &BufferConfig) -> bool {
    let backlog: f64 = queue.iter().map(|s| s.duration).sum();
    if backlog <= buffer.max_max_buffer_secs {
        return false;
    }

    let segments: Vec<HlsSegment> = queue.drain(..).collect();
    let start = live_start_index(&segments, buffer);
    queue.extend(segments.into_iter().skip(start));
    true
}

/// Parse a master playlist into renditions, best first.
#[must_use]
pub fn parse_master_playlist(content: &str, base_url: &str) -> Vec<HlsVariant> {
    let mut variants = Vec::new();
    let mut lines = content.lines().map(str::trim).peekable();

    while let Some(line) = lines.next() {
        let Some(rest) = line.strip_prefix("#EXT-X-STREAM-INF:") else {
            continue;
        };
        let attrs = parse_attributes(rest);
        let bandwidth = attrs
            .get("BANDWIDTH")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let height = attrs
            .get("RESOLUTION")
            .and_then(|r| r.split('x').nth(1))
            .and_then(|h| h.parse().ok())
            .unwrap_or(0);

        if let Some(uri_line) = lines.next_if(|l| !l.starts_with('#') && !l.is_empty()) {
            if let Some(uri) = resolve_url(base_url, uri_line) {
                variants.push(HlsVariant {
                    bandwidth,
                    height,
                    uri,
                });
            }
        }
    }

    variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
    variants
}

/// Parse a media playlist. Encrypted playlists are rejected.
pub fn parse_media_playlist(content: &str, base_url: &str) -> Result<MediaPlaylist, ClientError> {
    let mut segments = Vec::new();
    let mut is_live = true;
    let mut media_sequence = 0u64;
    let mut target_duration = DEFAULT_TARGET_DURATION;
    let mut current_duration = None;
    let mut init_segment = None;

    for line in content.lines().map(str::trim) {
        if line.starts_with("#EXT-X-ENDLIST") {
            is_live = false;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = rest.parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            target_duration = positive_secs(rest).unwrap_or(DEFAULT_TARGET_DURATION);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-KEY:") {
            let attrs = parse_attributes(rest);
            if attrs.get("METHOD").is_some_and(|m| m != "NONE") {
                return Err(ClientError::unsupported("encrypted HLS is not supported"));
            }
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MAP:") {
            init_segment = parse_attributes(rest)
                .get("URI")
                .and_then(|uri| resolve_url(base_url, uri));
        } else if let Some(rest) = line.strip_prefix("#EXTINF:") {
            current_duration = rest.split(',').next().and_then(positive_secs);
        } else if !line.starts_with('#') && !line.is_empty() {
            let uri = resolve_url(base_url, line)
                .ok_or_else(|| ClientError::media(format!("unresolvable segment URI {line}")))?;
            segments.push(HlsSegment {
                sequence: media_sequence + segments.len() as u64,
                duration: current_duration.take().unwrap_or(target_duration),
                uri,
            });
        }
    }

    if segments.is_empty() && !is_live {
        return Err(ClientError::media("media playlist has no segments"));
    }

    Ok(MediaPlaylist {
        segments,
        is_live,
        target_duration,
        init_segment,
    })
}

fn parse_attributes(attr_str: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut chars = attr_str.chars().peekable();

    while chars.peek().is_some() {
        let key: String = chars.by_ref().take_while(|&c| c != '=').collect();
        if key.is_empty() {
            break;
        }

        let value = if chars.peek() == Some(&'"') {
            chars.next();
            let v: String = chars.by_ref().take_while(|&c| c != '"').collect();
            // trailing comma
            chars.next();
            v
        } else {
            chars.by_ref().take_while(|&c| c != ',').collect()
        };

        attrs.insert(key.trim().to_string(), value.trim().to_string());
    }

    attrs
}

fn resolve_url(base: &str, relative: &str) -> Option<String> {
    match Url::parse(relative) {
        Ok(url) => Some(url.into()),
        Err(_) => Url::parse(base).ok()?.join(relative).ok().map(Into::into),
    }
}
