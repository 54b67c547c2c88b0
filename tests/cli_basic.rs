//! Integration tests for basic CLI behavior.
//!
//! Only offline paths are exercised: help, version, engine selection and
//! resolution without extraction.

#![allow(deprecated)] // cargo_bin deprecation, replacement not yet stable

use assert_cmd::Command;
use predicates::prelude::*;

/// Helper: get a Command for the `livefeed` binary with a config path that
/// does not exist, so defaults apply regardless of the host.
fn livefeed() -> Command {
    let mut cmd = Command::cargo_bin("livefeed").expect("binary 'livefeed' should be built");
    cmd.args(["--config", "/nonexistent/livefeed/config.toml"]);
    cmd
}

// ─── Top-level flags ─────────────────────────────────────────────────────────

#[test]
fn help_flag_shows_usage() {
    livefeed()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: livefeed"))
        .stdout(predicate::str::contains("select"))
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("play"))
        .stdout(predicate::str::contains("fingerprint"));
}

#[test]
fn version_flag_shows_semver() {
    livefeed()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^livefeed \d+\.\d+\.\d+\n$").unwrap());
}

#[test]
fn unknown_subcommand_fails() {
    livefeed().arg("record").assert().failure();
}

#[test]
fn play_help_lists_output_options() {
    livefeed()
        .args(["play", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--player"))
        .stdout(predicate::str::contains("--duration"))
        .stdout(predicate::str::contains("--embed"));
}

// ─── select ──────────────────────────────────────────────────────────────────

#[test]
fn select_manifest_is_adaptive() {
    livefeed()
        .args(["select", "https://cdn.example/live/master.m3u8"])
        .assert()
        .success()
        .stdout("adaptive\n");
}

#[test]
fn select_file_is_progressive() {
    livefeed()
        .args(["select", "https://cdn.example/vod/match.mp4"])
        .assert()
        .success()
        .stdout("progressive\n");
}

#[test]
fn select_embed_is_embedded() {
    livefeed()
        .args(["select", "--embed", "https://provider.example/embed/42"])
        .assert()
        .success()
        .stdout("embedded\n");
}

#[test]
fn select_rejects_bad_scheme() {
    livefeed()
        .args(["select", "ftp://cdn.example/live.m3u8"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported scheme"));
}

#[test]
fn select_requires_a_source() {
    livefeed().arg("select").assert().failure();
}

#[test]
fn select_reads_descriptor_file() {
    let path = std::env::temp_dir().join(format!("livefeed-descriptor-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{"id":"m1","sourceName":"Feed A","embedUrl":"https://provider.example/embed/7"}"#,
    )
    .unwrap();

    livefeed()
        .args(["select", "--descriptor"])
        .arg(&path)
        .assert()
        .success()
        .stdout("embedded\n");

    let _ = std::fs::remove_file(path);
}

// ─── resolve ─────────────────────────────────────────────────────────────────

#[test]
fn resolve_direct_prints_json_plan() {
    livefeed()
        .args([
            "resolve",
            "--no-extract",
            "--json",
            "https://cdn.example/live/master.m3u8",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""kind": "adaptive""#))
        .stdout(predicate::str::contains(r#""extracted": false"#))
        .stdout(predicate::str::contains(r#""sourceUrl": "https://cdn.example/live/master.m3u8""#));
}

#[test]
fn resolve_embed_without_extraction_frames_it() {
    livefeed()
        .args([
            "resolve",
            "--no-extract",
            "--embed",
            "https://provider.example/embed/42",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Engine: embedded"))
        .stdout(predicate::str::contains("URL: https://provider.example/embed/42"));
}

// ─── fingerprint ─────────────────────────────────────────────────────────────

#[test]
fn fingerprint_prints_profiles() {
    livefeed()
        .args(["fingerprint", "--count", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Profile 1:"))
        .stdout(predicate::str::contains("Profile 2:"))
        .stdout(predicate::str::contains("UA: Mozilla/5.0"));
}

#[test]
fn mobile_fingerprint_is_mobile() {
    livefeed()
        .args(["--mobile", "fingerprint", "--count", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Mobile"));
}
