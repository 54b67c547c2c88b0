//! Fault taxonomy shared by engines, the lifecycle state machine and the surface.
//!
//! Engines classify faults locally into a [`FaultKind`]; only the lifecycle
//! decides whether a classified fault is retried or shown to the viewer.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a playback fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    /// Transport failure. Cheap to recover, the buffer survives.
    Network,
    /// Decode pipeline failure. Recoverable in place, moderate cost.
    Media,
    /// Container or codec the running host cannot play. Never retried.
    Unsupported,
    /// Nothing arrived in time. May still resolve on its own.
    Timeout,
    /// Unclassified. Retried once, then treated as fatal.
    Unknown,
}

impl FaultKind {
    /// Whether an automatic retry is allowed after `retries_so_far` retries.
    #[must_use]
    pub fn is_retriable(self, retries_so_far: u32) -> bool {
        match self {
            Self::Network | Self::Media | Self::Timeout => true,
            Self::Unknown => retries_so_far == 0,
            Self::Unsupported => false,
        }
    }

    /// Short message suitable for an on-screen error overlay.
    #[must_use]
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Network => "The stream could not be reached. Check your connection.",
            Self::Media => "The stream sent data that could not be decoded.",
            Self::Unsupported => "This stream format is not supported here.",
            Self::Timeout => "The stream is taking too long to start. It may still be loading.",
            Self::Unknown => "The stream stopped unexpectedly.",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Media => "media",
            Self::Unsupported => "unsupported",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Rejection reasons for a [`StreamDescriptor`](crate::stream::StreamDescriptor).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor {id} has neither a direct URL nor an embed URL")]
    NoSource { id: String },

    #[error("descriptor {id} has an empty {field}")]
    EmptyUrl { id: String, field: &'static str },

    #[error("descriptor {id} has an invalid {field}: {reason}")]
    InvalidUrl {
        id: String,
        field: &'static str,
        reason: String,
    },
}
