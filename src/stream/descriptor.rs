//! Stream descriptors and media-type detection.
//!
//! A [`StreamDescriptor`] is the normalized record the match/channel service
//! hands over for one broadcast candidate. It is immutable once given to the
//! selector: switching streams means passing a new descriptor.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::DescriptorError;

/// One candidate feed for a match or channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    /// Opaque id, stable per candidate.
    pub id: String,
    /// Human label of the origin.
    #[serde(default)]
    pub source_name: String,
    /// Directly fetchable media URL (manifest or progressive file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_url: Option<String>,
    /// Third-party page URL to frame or extract from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_url: Option<String>,
    /// Advisory quality hint, never enforced.
    #[serde(default)]
    pub is_high_definition: bool,
    /// Advisory commentary language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl StreamDescriptor {
    /// Descriptor for a direct media URL.
    pub fn direct(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_name: String::new(),
            direct_url: Some(url.into()),
            embed_url: None,
            is_high_definition: false,
            language: None,
        }
    }

    /// Descriptor for an embed-only candidate.
    pub fn embed(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_name: String::new(),
            direct_url: None,
            embed_url: Some(url.into()),
            is_high_definition: false,
            language: None,
        }
    }

    #[must_use]
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    /// Check the descriptor invariant: at least one usable URL, and every URL
    /// present must be an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.direct_url.is_none() && self.embed_url.is_none() {
            return Err(DescriptorError::NoSource {
                id: self.id.clone(),
            });
        }
        if let Some(url) = &self.direct_url {
            self.check_url("directUrl", url)?;
        }
        if let Some(url) = &self.embed_url {
            self.check_url("embedUrl", url)?;
        }
        Ok(())
    }

    fn check_url(&self, field: &'static str, raw: &str) -> Result<(), DescriptorError> {
        if raw.trim().is_empty() {
            return Err(DescriptorError::EmptyUrl {
                id: self.id.clone(),
                field,
            });
        }
        let parsed = Url::parse(raw.trim()).map_err(|e| DescriptorError::InvalidUrl {
            id: self.id.clone(),
            field,
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(DescriptorError::InvalidUrl {
                id: self.id.clone(),
                field,
                reason: format!("unsupported scheme {other}"),
            }),
        }
    }

    /// URL to offer when the viewer chooses to open the source directly.
    #[must_use]
    pub fn source_url(&self) -> Option<&str> {
        self.embed_url.as_deref().or(self.direct_url.as_deref())
    }

    /// Label used in logs and overlays.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.source_name.is_empty() {
            &self.id
        } else {
            &self.source_name
        }
    }
}

/// Kind of media a URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Segmented adaptive-bitrate manifest.
    Adaptive,
    /// Single progressive file.
    Progressive,
    Unknown,
}

const ADAPTIVE_EXTENSIONS: &[&str] = &["m3u8"];
pub(crate) const PROGRESSIVE_EXTENSIONS: &[&str] =
    &["mp4", "webm", "m4v", "mov", "mkv", "flv", "ts", "ogv"];

impl MediaType {
    /// Classify by path extension, falling back to query-string hints such as
    /// `?type=m3u8` or `format=mp4`.
    #[must_use]
    pub fn from_url(raw: &str) -> Self {
        let (path, query) = match Url::parse(raw) {
            Ok(url) => (url.path().to_ascii_lowercase(), url.query().map(str::to_ascii_lowercase)),
            Err(_) => {
                let lower = raw.to_ascii_lowercase();
                match lower.split_once('?') {
                    Some((p, q)) => (p.to_string(), Some(q.to_string())),
                    None => (lower, None),
                }
            }
        };

        if path.contains(".m3u8") {
            return Self::Adaptive;
        }
        if let Some(ext) = path.rsplit_once('.').map(|(_, ext)| ext) {
            if PROGRESSIVE_EXTENSIONS.contains(&ext) {
                return Self::Progressive;
            }
        }

        let Some(query) = query else {
            return Self::Unknown;
        };
        let hinted = |exts: &[&str]| {
            query.split('&').any(|pair| {
                let value = pair.split_once('=').map_or(pair, |(_, v)| v);
                exts.iter().any(|ext| value == *ext || value.ends_with(&format!(".{ext}")))
            })
        };
        if hinted(ADAPTIVE_EXTENSIONS) {
            Self::Adaptive
        } else if hinted(PROGRESSIVE_EXTENSIONS) {
            Self::Progressive
        } else {
            Self::Unknown
        }
    }
}

/// A direct media URL recovered from an embed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedStream {
    pub url: String,
    pub media_type: MediaType,
}

impl ExtractedStream {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let media_type = MediaType::from_url(&url);
        Self { url, media_type }
    }
}
