//! Player configuration loaded from `~/.config/livefeed/config.toml`.
//!
//! Every section is optional; anything missing falls back to the defaults
//! below, which are tuned for live sports feeds.
//!
//! ```toml
//! device = "mobile"
//!
//! [extractor]
//! relays = ["https://api.allorigins.win/raw?url={url}"]
//! cache_ttl_secs = 600
//!
//! [lifecycle]
//! watchdog_secs = 15
//! max_retries = 2
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Viewer device class. Drives the embed timeout policy and the browser
/// profile used for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}

impl DeviceClass {
    /// Best-effort classification from a user agent string.
    #[must_use]
    pub fn from_user_agent(ua: &str) -> Self {
        let ua = ua.to_ascii_lowercase();
        let mobile = ["mobile", "android", "iphone", "ipad", "ipod"]
            .iter()
            .any(|marker| ua.contains(marker));
        if mobile {
            Self::Mobile
        } else {
            Self::Desktop
        }
    }
}

/// What an embed load timeout means when the frame reported neither load nor
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Treat the silence as a load that suppressed its event.
    AssumeLoaded,
    /// Treat the silence as a failure and offer the viewer a fallback.
    Fail,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Relay URL templates; `{url}` is replaced by the encoded embed URL.
    pub relays: Vec<String>,
    pub cache_ttl_secs: u64,
    pub relay_timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            relays: vec![
                "https://api.allorigins.win/raw?url={url}".to_string(),
                "https://corsproxy.io/?url={url}".to_string(),
                "https://api.codetabs.com/v1/proxy?quest={url}".to_string(),
            ],
            cache_ttl_secs: 600,
            relay_timeout_secs: 4,
        }
    }
}

impl ExtractorConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }
}

/// Live-edge buffering for the adaptive engine. Short on purpose: anything
/// buffered far ahead of a live edge is thrown away.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Forward buffer target in seconds.
    pub max_buffer_secs: f64,
    /// Hard ceiling on forward buffer in seconds.
    pub max_max_buffer_secs: f64,
    /// Ceiling on prefetched segment bytes held in memory.
    pub max_buffer_bytes: usize,
    /// How many segments behind the live edge playback starts.
    pub live_sync_segments: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_buffer_secs: 10.0,
            max_max_buffer_secs: 20.0,
            max_buffer_bytes: 30 * 1024 * 1024,
            live_sync_segments: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub watchdog_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            watchdog_secs: 15,
            max_retries: 2,
            retry_backoff_ms: 1000,
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs)
    }

    /// Backoff before automatic retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    pub desktop_timeout_secs: u64,
    pub mobile_timeout_secs: u64,
    pub desktop_policy: TimeoutPolicy,
    pub mobile_policy: TimeoutPolicy,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            desktop_timeout_secs: 8,
            mobile_timeout_secs: 10,
            desktop_policy: TimeoutPolicy::AssumeLoaded,
            mobile_policy: TimeoutPolicy::Fail,
        }
    }
}

impl EmbedConfig {
    /// Load window and timeout outcome for a device class.
    #[must_use]
    pub fn window(&self, device: DeviceClass) -> (Duration, TimeoutPolicy) {
        match device {
            DeviceClass::Desktop => (
                Duration::from_secs(self.desktop_timeout_secs),
                self.desktop_policy,
            ),
            DeviceClass::Mobile => (
                Duration::from_secs(self.mobile_timeout_secs),
                self.mobile_policy,
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FullscreenConfig {
    pub reload_delay_ms: u64,
}

impl Default for FullscreenConfig {
    fn default() -> Self {
        Self {
            reload_delay_ms: 150,
        }
    }
}

impl FullscreenConfig {
    #[must_use]
    pub fn reload_delay(&self) -> Duration {
        Duration::from_millis(self.reload_delay_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SuppressionConfig {
    /// Host of the site itself; links to it are never blocked.
    pub own_origin: Option<String>,
    /// Hosts that `target=_blank` links may open.
    pub allow_list: Vec<String>,
    /// Extra message keywords on top of the built-in list.
    pub extra_keywords: Vec<String>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub device: DeviceClass,
    pub extractor: ExtractorConfig,
    pub buffer: BufferConfig,
    pub lifecycle: LifecycleConfig,
    pub embed: EmbedConfig,
    pub fullscreen: FullscreenConfig,
    pub suppression: SuppressionConfig,
}

impl PlayerConfig {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("invalid TOML in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Return the path to the config file.
#[must_use]
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("livefeed")
        .join("config.toml")
}
