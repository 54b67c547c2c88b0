mod fingerprint;
mod play;
mod resolve;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use livefeed::config::{DeviceClass, PlayerConfig};
use livefeed::StreamDescriptor;

pub use fingerprint::cmd_fingerprint;
pub use play::cmd_play;
pub use resolve::{cmd_resolve, cmd_select};

/// Where the descriptor comes from: a URL on the command line or a JSON file.
#[derive(Args)]
pub struct SourceArgs {
    /// Stream URL (direct media URL, or embed page with --embed)
    #[arg(required_unless_present = "descriptor")]
    url: Option<String>,

    /// Treat the URL as a third-party embed page
    #[arg(short, long)]
    embed: bool,

    /// Descriptor id
    #[arg(long, default_value = "cli")]
    id: String,

    /// Read a JSON stream descriptor instead of a URL
    #[arg(long, conflicts_with = "url")]
    descriptor: Option<PathBuf>,
}

impl SourceArgs {
    pub fn descriptor(&self) -> Result<StreamDescriptor> {
        if let Some(path) = &self.descriptor {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            return serde_json::from_str(&raw)
                .with_context(|| format!("invalid descriptor in {}", path.display()));
        }

        let url = self.url.clone().unwrap_or_default();
        Ok(if self.embed {
            StreamDescriptor::embed(&self.id, url)
        } else {
            StreamDescriptor::direct(&self.id, url)
        })
    }
}

pub fn load_config(path: Option<&Path>, mobile: bool) -> Result<PlayerConfig> {
    let mut config = match path {
        Some(path) => PlayerConfig::load_from(path)?,
        None => PlayerConfig::load()?,
    };
    if mobile {
        config.device = DeviceClass::Mobile;
    }
    Ok(config)
}
