//! `livefeed` CLI - resolve and play live streams from the terminal

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cmd::SourceArgs;

#[derive(Parser)]
#[command(name = "livefeed")]
#[command(about = "Adaptive live-stream playback for unreliable third-party feeds")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Behave like a mobile client (fingerprint, embed timeouts)
    #[arg(long, global = true)]
    mobile: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pick an engine from the descriptor alone (no network)
    Select {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Resolve a descriptor to a playback plan, extracting embeds when possible
    Resolve {
        #[command(flatten)]
        source: SourceArgs,

        /// Skip embed extraction
        #[arg(long)]
        no_extract: bool,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Play a stream through the full lifecycle
    Play {
        #[command(flatten)]
        source: SourceArgs,

        /// Output file ("-" for stdout)
        #[arg(short, long, default_value = "-")]
        output: String,

        /// Pipe media into a player (mpv, vlc, ffplay, ...)
        #[arg(short, long)]
        player: Option<String>,

        /// Stop after this long ("90", "30m", "1h30m")
        #[arg(short, long)]
        duration: Option<String>,
    },

    /// Show the browser identity requests go out with
    Fingerprint {
        /// Number of profiles to generate
        #[arg(short, long, default_value = "3")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "livefeed=debug" } else { "livefeed=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = cmd::load_config(cli.config.as_deref(), cli.mobile)?;

    match cli.command {
        Commands::Select { source } => {
            cmd::cmd_select(&source.descriptor()?)?;
        }
        Commands::Resolve { source, no_extract, json } => {
            cmd::cmd_resolve(&source.descriptor()?, &config, !no_extract, json).await?;
        }
        Commands::Play { source, output, player, duration } => {
            cmd::cmd_play(
                source.descriptor()?,
                config,
                &output,
                player.as_deref(),
                duration.as_deref(),
            )
            .await?;
        }
        Commands::Fingerprint { count } => {
            cmd::cmd_fingerprint(count, config.device);
        }
    }

    Ok(())
}
