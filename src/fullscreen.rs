//! Fullscreen and orientation coordination.
//!
//! Four vendor APIs, one boolean. On mobile, embedded third-party players
//! tend to freeze or mis-layout across a fullscreen exit or an orientation
//! flip, so the coordinator asks for a frame reload in those cases.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::DeviceClass;

/// Fullscreen API family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FullscreenVendor {
    Standard,
    Webkit,
    Moz,
    Ms,
}

impl FullscreenVendor {
    /// Probe order.
    pub const ALL: [Self; 4] = [Self::Standard, Self::Webkit, Self::Moz, Self::Ms];

    #[must_use]
    pub fn change_event(self) -> &'static str {
        match self {
            Self::Standard => "fullscreenchange",
            Self::Webkit => "webkitfullscreenchange",
            Self::Moz => "mozfullscreenchange",
            Self::Ms => "MSFullscreenChange",
        }
    }

    #[must_use]
    pub fn request_method(self) -> &'static str {
        match self {
            Self::Standard => "requestFullscreen",
            Self::Webkit => "webkitRequestFullscreen",
            Self::Moz => "mozRequestFullScreen",
            Self::Ms => "msRequestFullscreen",
        }
    }

    #[must_use]
    pub fn exit_method(self) -> &'static str {
        match self {
            Self::Standard => "exitFullscreen",
            Self::Webkit => "webkitExitFullscreen",
            Self::Moz => "mozCancelFullScreen",
            Self::Ms => "msExitFullscreen",
        }
    }

    /// Vendor for a change event name, if it is one of the four.
    #[must_use]
    pub fn from_event(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.change_event() == name)
    }
}

impl fmt::Display for FullscreenVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.change_event())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FullscreenError {
    #[error("{0} is not available")]
    Unavailable(&'static str),

    #[error("{method} was rejected: {reason}")]
    Rejected { method: &'static str, reason: String },

    #[error("no fullscreen API available")]
    NoApi,
}

/// Host fullscreen capability.
pub trait FullscreenApi {
    fn request(&self, vendor: FullscreenVendor) -> Result<(), FullscreenError>;
    fn exit(&self, vendor: FullscreenVendor) -> Result<(), FullscreenError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

/// Work the coordinator asks of the active engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    /// Clear the frame source and restore it after a short delay.
    Reload,
}

#[derive(Debug, Clone)]
pub struct FullscreenCoordinator {
    device: DeviceClass,
    active: bool,
    orientation: Option<Orientation>,
    embedded_active: bool,
}

impl FullscreenCoordinator {
    #[must_use]
    pub fn new(device: DeviceClass) -> Self {
        Self {
            device,
            active: false,
            orientation: None,
            embedded_active: false,
        }
    }

    #[must_use]
    pub fn is_fullscreen(&self) -> bool {
        self.active
    }

    /// Record whether the embedded engine is the one currently attached.
    pub fn set_embedded_active(&mut self, active: bool) {
        self.embedded_active = active;
    }

    /// Request or exit fullscreen through the first vendor API that works.
    /// State changes only when the change event arrives via
    /// [`on_change`](Self::on_change).
    pub fn toggle(&self, api: &dyn FullscreenApi) -> Result<FullscreenVendor, FullscreenError> {
        toggle(api, self.active)
    }

    /// Normalize a vendor change event.
    pub fn on_change(&mut self, vendor: FullscreenVendor, active: bool) -> Option<FrameAction> {
        let was = self.active;
        self.active = active;
        debug!(%vendor, active, "Fullscreen changed");

        if was && !active && self.reloads_frames() {
            info!("Fullscreen exited on mobile, reloading embed");
            return Some(FrameAction::Reload);
        }
        None
    }

    pub fn on_orientation(&mut self, orientation: Orientation) -> Option<FrameAction> {
        let flipped = self.orientation.is_some_and(|prev| prev != orientation);
        self.orientation = Some(orientation);

        if flipped && self.active && self.reloads_frames() {
            info!(?orientation, "Orientation flipped in fullscreen, reloading embed");
            return Some(FrameAction::Reload);
        }
        None
    }

    fn reloads_frames(&self) -> bool {
        self.device == DeviceClass::Mobile && self.embedded_active
    }
}

/// Try each vendor's request (or exit, when `currently_active`) in order.
pub fn toggle(api: &dyn FullscreenApi, currently_active: bool) -> Result<FullscreenVendor, FullscreenError> {
    let mut last_error = None;

    for vendor in FullscreenVendor::ALL {
        let result = if currently_active {
            api.exit(vendor)
        } else {
            api.request(vendor)
        };
        match result {
            Ok(()) => return Ok(vendor),
            Err(FullscreenError::Unavailable(method)) => debug!(method, "Fullscreen method missing"),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or(FullscreenError::NoApi))
}
