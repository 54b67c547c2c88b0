//! Ad and popup suppression for framed third-party players.
//!
//! Three independent layers:
//! - a process-wide popup guard installed once into the hosting window
//! - a keyword filter for cross-frame messages
//! - a link policy for `target=_blank` clicks leaving the site
//!
//! The frame's sandbox already withholds popups and top navigation; these
//! layers catch what leaks through the host document itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SuppressionConfig;
use crate::stream::surface::FrameActivity;

const BLOCKED_KEYWORDS: &[&str] = &[
    "ad",
    "ads",
    "advert",
    "popup",
    "popunder",
    "redirect",
    "click",
    "clickunder",
    "banner",
    "window.open",
];

/// Window the popup guard is installed into.
pub trait GuardedWindow {
    /// Whether the window's script context is reachable from the host. A
    /// cross-origin frame is not; the sandbox is the only protection there.
    fn is_same_origin(&self) -> bool;

    /// Replace `window.open`. The handler returns whether the call may go
    /// through.
    fn override_open(&self, handler: Box<dyn Fn(&str) -> bool + Send + Sync>);

    /// Turn `alert`/`confirm`/`prompt` into no-ops.
    fn silence_dialogs(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardInstall {
    Installed,
    AlreadyInstalled,
    CrossOrigin,
}

/// Install-once popup guard.
pub struct PopupGuard {
    installed: OnceLock<()>,
}

impl PopupGuard {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            installed: OnceLock::new(),
        }
    }

    pub fn install(&self, window: &dyn GuardedWindow) -> GuardInstall {
        if !window.is_same_origin() {
            debug!("Popup guard skipped for cross-origin window");
            return GuardInstall::CrossOrigin;
        }

        let mut fresh = false;
        self.installed.get_or_init(|| {
            window.override_open(Box::new(|url| {
                warn!(url, "Blocked window.open");
                false
            }));
            window.silence_dialogs();
            fresh = true;
        });

        if fresh {
            info!("Popup guard installed");
            GuardInstall::Installed
        } else {
            GuardInstall::AlreadyInstalled
        }
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.installed.get().is_some()
    }
}

impl Default for PopupGuard {
    fn default() -> Self {
        Self::new()
    }
}

static POPUP_GUARD: PopupGuard = PopupGuard::new();

/// Install the process-wide popup guard. Later calls are no-ops.
pub fn install_popup_guard(window: &dyn GuardedWindow) -> GuardInstall {
    POPUP_GUARD.install(window)
}

/// Keyword filter for cross-frame messages.
#[derive(Debug, Clone)]
pub struct MessageFilter {
    pattern: Regex,
}

impl MessageFilter {
    pub fn new(extra_keywords: &[String]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = BLOCKED_KEYWORDS
            .iter()
            .copied()
            .chain(extra_keywords.iter().map(String::as_str))
            .filter(|k| !k.trim().is_empty())
            .map(|k| regex::escape(k.trim()))
            .collect();

        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))?;
        Ok(Self { pattern })
    }

    /// Whether a message payload may reach the host page.
    #[must_use]
    pub fn allows(&self, payload: &str) -> bool {
        !self.pattern.is_match(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDecision {
    Allow,
    Block,
}

/// Which new-tab links may leave the site.
#[derive(Debug, Clone, Default)]
pub struct LinkPolicy {
    own_host: Option<String>,
    allow_list: Vec<String>,
}

impl LinkPolicy {
    #[must_use]
    pub fn new(own_origin: Option<&str>, allow_list: &[String]) -> Self {
        let own_host = own_origin.map(|origin| {
            Url::parse(origin)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| origin.to_ascii_lowercase())
        });
        Self {
            own_host,
            allow_list: allow_list.iter().map(|h| h.to_ascii_lowercase()).collect(),
        }
    }

    /// Decide a click on `href` opening in `target`. Only `_blank` links are
    /// policed; relative links stay on the site.
    #[must_use]
    pub fn on_click(&self, href: &str, target: Option<&str>) -> LinkDecision {
        if !target.is_some_and(|t| t.eq_ignore_ascii_case("_blank")) {
            return LinkDecision::Allow;
        }

        let Ok(url) = Url::parse(href) else {
            return LinkDecision::Allow;
        };
        let Some(host) = url.host_str() else {
            return LinkDecision::Block;
        };

        let matches = |allowed: &str| host == allowed || host.ends_with(&format!(".{allowed}"));
        if self.own_host.as_deref().is_some_and(matches) || self.allow_list.iter().any(|a| matches(a)) {
            LinkDecision::Allow
        } else {
            LinkDecision::Block
        }
    }
}

/// Blocked-item counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SuppressionStats {
    pub messages: u64,
    pub popups: u64,
    pub links: u64,
}

/// The message filter and link policy behind one counter set.
#[derive(Debug)]
pub struct Suppressor {
    filter: MessageFilter,
    links: LinkPolicy,
    messages: AtomicU64,
    popups: AtomicU64,
    link_blocks: AtomicU64,
}

impl Suppressor {
    pub fn new(filter: MessageFilter, links: LinkPolicy) -> Self {
        Self {
            filter,
            links,
            messages: AtomicU64::new(0),
            popups: AtomicU64::new(0),
            link_blocks: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &SuppressionConfig) -> Result<Self, regex::Error> {
        Ok(Self::new(
            MessageFilter::new(&config.extra_keywords)?,
            LinkPolicy::new(config.own_origin.as_deref(), &config.allow_list),
        ))
    }

    /// Whether the activity may proceed. Blocked activity is counted and
    /// logged.
    pub fn permits(&self, activity: &FrameActivity) -> bool {
        match activity {
            FrameActivity::Message(payload) => {
                let allowed = self.filter.allows(payload);
                if !allowed {
                    self.messages.fetch_add(1, Ordering::Relaxed);
                    debug!(payload = %truncate(payload, 80), "Blocked frame message");
                }
                allowed
            }
            FrameActivity::OpenRequest(url) => {
                self.popups.fetch_add(1, Ordering::Relaxed);
                warn!(url, "Blocked popup from frame");
                false
            }
            FrameActivity::LinkClick { href, target } => {
                let decision = self.links.on_click(href, target.as_deref());
                if decision == LinkDecision::Block {
                    self.link_blocks.fetch_add(1, Ordering::Relaxed);
                    info!(href, "Blocked new-tab link");
                }
                decision == LinkDecision::Allow
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> SuppressionStats {
        SuppressionStats {
            messages: self.messages.load(Ordering::Relaxed),
            popups: self.popups.load(Ordering::Relaxed),
            links: self.link_blocks.load(Ordering::Relaxed),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeWindow {
        cross_origin: bool,
        open_handler: Mutex<Option<Box<dyn Fn(&str) -> bool + Send + Sync>>>,
        overrides: AtomicUsize,
        silenced: AtomicUsize,
    }

    impl GuardedWindow for FakeWindow {
        fn is_same_origin(&self) -> bool {
            !self.cross_origin
        }

        fn override_open(&self, handler: Box<dyn Fn(&str) -> bool + Send + Sync>) {
            self.overrides.fetch_add(1, Ordering::SeqCst);
            *self.open_handler.lock().unwrap() = Some(handler);
        }

        fn silence_dialogs(&self) {
            self.silenced.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn guard_installs_once() {
        let guard = PopupGuard::new();
        let window = FakeWindow::default();

        assert_eq!(guard.install(&window), GuardInstall::Installed);
        assert_eq!(guard.install(&window), GuardInstall::AlreadyInstalled);
        assert_eq!(window.overrides.load(Ordering::SeqCst), 1);
        assert_eq!(window.silenced.load(Ordering::SeqCst), 1);

        let handler = window.open_handler.lock().unwrap();
        assert!(!(handler.as_ref().unwrap())("https://ads.example/pop"));
    }

    #[test]
    fn guard_skips_cross_origin() {
        let guard = PopupGuard::new();
        let window = FakeWindow {
            cross_origin: true,
            ..FakeWindow::default()
        };
        assert_eq!(guard.install(&window), GuardInstall::CrossOrigin);
        assert!(!guard.is_installed());
    }

    // The only test touching the process-wide guard
    #[test]
    fn process_guard_installs_once_per_process() {
        let frame = FakeWindow {
            cross_origin: true,
            ..FakeWindow::default()
        };
        assert_eq!(install_popup_guard(&frame), GuardInstall::CrossOrigin);
        assert!(!POPUP_GUARD.is_installed());

        let host = FakeWindow::default();
        assert_eq!(install_popup_guard(&host), GuardInstall::Installed);
        assert_eq!(install_popup_guard(&host), GuardInstall::AlreadyInstalled);

        let other = FakeWindow::default();
        assert_eq!(install_popup_guard(&other), GuardInstall::AlreadyInstalled);
        assert_eq!(host.overrides.load(Ordering::SeqCst), 1);
        assert_eq!(other.overrides.load(Ordering::SeqCst), 0);
        assert_eq!(other.silenced.load(Ordering::SeqCst), 0);
        assert!(POPUP_GUARD.is_installed());
    }

    #[test]
    fn filter_matches_whole_words_case_insensitively() {
        let filter = MessageFilter::new(&[]).unwrap();
        assert!(!filter.allows(r#"{"type":"AD","slot":3}"#));
        assert!(!filter.allows("show popunder now"));
        assert!(!filter.allows("call window.open(x)"));
        assert!(filter.allows(r#"{"event":"timeupdate","t":12.5}"#));
        // "ad" inside a longer word is fine
        assert!(filter.allows("player loaded and ready"));
    }

    #[test]
    fn filter_takes_extra_keywords() {
        let filter = MessageFilter::new(&["casino".to_string()]).unwrap();
        assert!(!filter.allows("Casino bonus!"));
    }

    #[test]
    fn link_policy() {
        let policy = LinkPolicy::new(
            Some("https://livefeed.example"),
            &["partner.example".to_string()],
        );
        assert_eq!(
            policy.on_click("https://bet.example/promo", Some("_blank")),
            LinkDecision::Block
        );
        assert_eq!(
            policy.on_click("https://www.livefeed.example/match/1", Some("_blank")),
            LinkDecision::Allow
        );
        assert_eq!(
            policy.on_click("https://partner.example/info", Some("_BLANK")),
            LinkDecision::Allow
        );
        assert_eq!(
            policy.on_click("https://bet.example/promo", None),
            LinkDecision::Allow
        );
        assert_eq!(policy.on_click("/match/2", Some("_blank")), LinkDecision::Allow);
    }

    #[test]
    fn suppressor_counts_blocks() {
        let suppressor = Arc::new(Suppressor::from_config(&SuppressionConfig::default()).unwrap());

        assert!(!suppressor.permits(&FrameActivity::Message("ads:refresh".into())));
        assert!(suppressor.permits(&FrameActivity::Message("state:playing".into())));
        assert!(!suppressor.permits(&FrameActivity::OpenRequest("https://pop.example".into())));
        assert!(!suppressor.permits(&FrameActivity::LinkClick {
            href: "https://bet.example".into(),
            target: Some("_blank".into()),
        }));

        assert_eq!(
            suppressor.stats(),
            SuppressionStats {
                messages: 1,
                popups: 1,
                links: 1
            }
        );
    }
}
