use livefeed::config::DeviceClass;
use livefeed::{profile_for, RequestKind};

pub fn cmd_fingerprint(count: usize, device: DeviceClass) {
    println!("🎭 Generating {count} {device:?} browser fingerprints:\n");

    for i in 0..count {
        let profile = profile_for(device);
        println!("Profile {}:", i + 1);
        println!("   UA: {}", profile.user_agent);
        println!("   Accept-Language: {}", profile.accept_language);
        if !profile.sec_ch_ua.is_empty() {
            println!("   Sec-CH-UA: {}", profile.sec_ch_ua);
        }
        let media = profile.headers_for(RequestKind::Media);
        if let Some(mode) = media.get("sec-fetch-mode").and_then(|v| v.to_str().ok()) {
            println!("   Media fetch mode: {mode}");
        }
        println!();
    }
}
