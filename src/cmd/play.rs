use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Child;
use tokio::time::Instant;

use livefeed::config::PlayerConfig;
use livefeed::stream::engines::HttpFrameProbe;
use livefeed::stream::player::EscapeHatch;
use livefeed::stream::{MediaSurface, StandardEngineFactory, WriterSink};
use livefeed::{MediaClient, PlaybackSurface, StreamDescriptor, Suppressor, SurfaceEvent};

use super::resolve::build_selector;

pub async fn cmd_play(
    descriptor: StreamDescriptor,
    config: PlayerConfig,
    output: &str,
    player: Option<&str>,
    duration: Option<&str>,
) -> Result<()> {
    let deadline = duration
        .map(parse_duration)
        .transpose()?
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let client = MediaClient::new(config.device)?;
    let selector = Arc::new(build_selector(&config)?);
    let suppressor = Suppressor::from_config(&config.suppression)
        .context("invalid suppression keyword")?;

    let (media, mut child) = open_media(output, player).await?;
    let factory = StandardEngineFactory::new(
        client.clone(),
        media,
        Arc::new(HttpFrameProbe::new(client)),
        Arc::new(suppressor),
        config.clone(),
    );

    eprintln!("🎬 Playing: {}", descriptor.label());
    let surface = PlaybackSurface::new(selector, Arc::new(factory), &config);
    let (handle, mut events) = surface.spawn();
    handle.set_descriptor(Some(descriptor))?;

    let mut failure = None;
    loop {
        tokio::select! {
            event = events.recv() => match event.as_ref().map(report) {
                Some(Outcome::Continue) => {}
                Some(Outcome::Finished) | None => break,
                Some(Outcome::Failed(reason)) => {
                    failure = Some(reason);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n⏹  Interrupted");
                break;
            }
            () = sleep_until_opt(deadline) => {
                eprintln!("\n⏱  Duration reached");
                break;
            }
        }
    }

    // Unmount and wait for the surface to drop the sink, closing the player's stdin
    let _ = handle.unmount();
    while events.recv().await.is_some() {}

    if let Some(child) = child.as_mut() {
        child.wait().await?;
    }

    match failure {
        Some(reason) => anyhow::bail!(reason),
        None => {
            eprintln!("✅ Playback finished");
            Ok(())
        }
    }
}

async fn open_media(output: &str, player: Option<&str>) -> Result<(MediaSurface, Option<Child>)> {
    if let Some(player_cmd) = player {
        let path = which::which(player_cmd)
            .map_err(|_| anyhow::anyhow!("{player_cmd} not found in PATH"))?;
        eprintln!("🎬 Piping to: {}", path.display());

        let mut child = tokio::process::Command::new(&path)
            .args(player_stdin_args(player_cmd))
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to spawn {player_cmd}"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("Failed to get stdin for {player_cmd}"))?;

        return Ok((MediaSurface::new(WriterSink::new(stdin)), Some(child)));
    }

    if output == "-" {
        return Ok((MediaSurface::new(WriterSink::new(tokio::io::stdout())), None));
    }

    let file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("Failed to create {output}"))?;
    eprintln!("💾 Writing to: {output}");
    Ok((MediaSurface::new(WriterSink::new(file)), None))
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Continue,
    Finished,
    Failed(String),
}

/// Print an event and say whether playback goes on.
fn report(event: &SurfaceEvent) -> Outcome {
    match event {
        SurfaceEvent::Ready { engine, .. } => {
            eprintln!("✅ Ready ({engine})");
            Outcome::Continue
        }
        SurfaceEvent::Playing { .. } => {
            eprintln!("▶️  Playing");
            Outcome::Continue
        }
        SurfaceEvent::Ended { .. } => {
            eprintln!("🏁 Stream ended");
            Outcome::Finished
        }
        SurfaceEvent::Retrying { attempt, after } => {
            eprintln!("🔁 Retry {attempt} in {:.1}s", after.as_secs_f64());
            Outcome::Continue
        }
        SurfaceEvent::Error { kind, escape } => {
            eprintln!("❌ {}", kind.user_message());
            print_escape(escape);
            Outcome::Failed(format!("playback failed: {kind}"))
        }
        SurfaceEvent::RetryExhausted { kind, escape } => {
            eprintln!("❌ {} Gave up after retrying.", kind.user_message());
            print_escape(escape);
            Outcome::Failed(format!("retries exhausted: {kind}"))
        }
        SurfaceEvent::TimedOut { escape } => {
            eprintln!("⏱  The stream is taking too long to start. It may still be loading.");
            print_escape(escape);
            Outcome::Failed("timed out".to_string())
        }
        SurfaceEvent::Rejected { reason } => {
            eprintln!("🚫 {reason}");
            Outcome::Failed(reason.to_string())
        }
    }
}

fn print_escape(escape: &EscapeHatch) {
    if let Some(url) = &escape.open_url {
        eprintln!("   🔗 Open directly: {url}");
    }
    if escape.can_retry {
        eprintln!("   🔁 Run the command again to retry");
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Get arguments for media players to read from stdin
fn player_stdin_args(player: &str) -> Vec<&'static str> {
    match player {
        "vlc" => vec!["-", "--intf", "dummy", "--play-and-exit"],
        "ffplay" => vec!["-i", "-"],
        "iina" => vec!["--stdin"],
        _ => vec!["-"],
    }
}

/// Parse duration string like "1h", "30m", "1h30m", "90" (seconds)
fn parse_duration(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();

    if let Some(secs) = s.parse::<u64>().ok().filter(|&secs| secs > 0) {
        return Ok(secs);
    }

    let mut total_secs = 0u64;
    let mut current = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            current.push(c);
            continue;
        }
        let num: u64 = current.parse().unwrap_or(0);
        current.clear();
        match c {
            'h' => total_secs += num * 3600,
            'm' => total_secs += num * 60,
            's' => total_secs += num,
            _ => anyhow::bail!("Invalid duration unit '{c}' in {s}"),
        }
    }

    if !current.is_empty() {
        total_secs += current.parse::<u64>().unwrap_or(0);
    }

    if total_secs == 0 {
        anyhow::bail!("Invalid duration: {s}. Use format like '1h', '30m', '1h30m', or seconds.");
    }

    Ok(total_secs)
}
