//! Browser identity profiles
//!
//! Several upstream stream hosts reject manifest and segment requests that do
//! not look like they come from a browser. Every request this crate makes goes
//! out with one of these profiles.

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, USER_AGENT,
};

use crate::config::DeviceClass;

/// Browser profile with realistic identification headers
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub user_agent: String,
    pub accept_language: String,
    pub accept_encoding: String,
    pub sec_ch_ua: String,
    pub sec_ch_ua_mobile: String,
    pub sec_ch_ua_platform: String,
}

/// What a request is for. Browsers send different fetch metadata for a
/// framed page than for a media element pulling segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Embed page loaded into a frame or through a relay.
    Document,
    /// Manifest, segment or progressive file requested by a media element.
    Media,
}

const CHROME_VERSIONS: &[(&str, &str)] = &[
    ("131", "131.0.0.0"),
    ("130", "130.0.0.0"),
    ("129", "129.0.0.0"),
    ("128", "128.0.0.0"),
];

const FIREFOX_VERSIONS: &[&str] = &["133.0", "132.0", "131.0"];

const SAFARI_VERSIONS: &[(&str, &str)] = &[("17.6", "605.1.15"), ("17.5", "605.1.15")];

const ANDROID_DEVICES: &[&str] = &[
    "Linux; Android 14; Pixel 8",
    "Linux; Android 14; SM-S918B",
    "Linux; Android 13; SM-A546B",
];

#[derive(Debug, Clone, Copy)]
enum Platform {
    MacOS,
    Windows,
    Linux,
}

impl Platform {
    fn random() -> Self {
        let roll: f32 = rand::thread_rng().gen();
        // Windows 65%, macOS 20%, Linux 15%
        if roll < 0.65 {
            Platform::Windows
        } else if roll < 0.85 {
            Platform::MacOS
        } else {
            Platform::Linux
        }
    }

    fn os_string(self) -> &'static str {
        match self {
            Platform::MacOS => "Macintosh; Intel Mac OS X 10_15_7",
            Platform::Windows => "Windows NT 10.0; Win64; x64",
            Platform::Linux => "X11; Linux x86_64",
        }
    }

    fn sec_ch_platform(self) -> &'static str {
        match self {
            Platform::MacOS => "\"macOS\"",
            Platform::Windows => "\"Windows\"",
            Platform::Linux => "\"Linux\"",
        }
    }
}

fn pick<'a, T>(items: &'a [T], fallback: &'a T) -> &'a T {
    items.choose(&mut rand::thread_rng()).unwrap_or(fallback)
}

fn chrome_brands(major: &str) -> String {
    format!("\"Google Chrome\";v=\"{major}\", \"Chromium\";v=\"{major}\", \"Not_A Brand\";v=\"24\"")
}

/// Desktop Chrome profile
#[must_use]
pub fn chrome_profile() -> BrowserProfile {
    let platform = Platform::random();
    let (major, full) = pick(CHROME_VERSIONS, &("131", "131.0.0.0"));

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{full} Safari/537.36",
            platform.os_string()
        ),
        accept_language: random_accept_language(),
        accept_encoding: "gzip, deflate, br, zstd".to_string(),
        sec_ch_ua: chrome_brands(major),
        sec_ch_ua_mobile: "?0".to_string(),
        sec_ch_ua_platform: platform.sec_ch_platform().to_string(),
    }
}

/// Desktop Firefox profile
#[must_use]
pub fn firefox_profile() -> BrowserProfile {
    let platform = Platform::random();
    let version = pick(FIREFOX_VERSIONS, &"133.0");

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({}; rv:{version}) Gecko/20100101 Firefox/{version}",
            platform.os_string()
        ),
        accept_language: random_accept_language(),
        accept_encoding: "gzip, deflate, br, zstd".to_string(),
        // Firefox doesn't send client hints
        sec_ch_ua: String::new(),
        sec_ch_ua_mobile: String::new(),
        sec_ch_ua_platform: String::new(),
    }
}

/// Desktop Safari profile
#[must_use]
pub fn safari_profile() -> BrowserProfile {
    let (version, webkit) = pick(SAFARI_VERSIONS, &("17.6", "605.1.15"));

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/{webkit} (KHTML, like Gecko) Version/{version} Safari/{webkit}"
        ),
        accept_language: random_accept_language(),
        accept_encoding: "gzip, deflate, br".to_string(),
        sec_ch_ua: String::new(),
        sec_ch_ua_mobile: String::new(),
        sec_ch_ua_platform: String::new(),
    }
}

/// Chrome on Android
#[must_use]
pub fn mobile_profile() -> BrowserProfile {
    let (major, full) = pick(CHROME_VERSIONS, &("131", "131.0.0.0"));
    let device = pick(ANDROID_DEVICES, &"Linux; Android 14; Pixel 8");

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({device}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{full} Mobile Safari/537.36"
        ),
        accept_language: random_accept_language(),
        accept_encoding: "gzip, deflate, br, zstd".to_string(),
        sec_ch_ua: chrome_brands(major),
        sec_ch_ua_mobile: "?1".to_string(),
        sec_ch_ua_platform: "\"Android\"".to_string(),
    }
}

/// Random desktop profile weighted by market share
#[must_use]
pub fn random_profile() -> BrowserProfile {
    let roll: f32 = rand::thread_rng().gen();
    // Chrome 65%, Safari 20%, Firefox 15%
    if roll < 0.65 {
        chrome_profile()
    } else if roll < 0.85 {
        safari_profile()
    } else {
        firefox_profile()
    }
}

/// Profile matching the viewer's device class.
#[must_use]
pub fn profile_for(device: DeviceClass) -> BrowserProfile {
    match device {
        DeviceClass::Desktop => random_profile(),
        DeviceClass::Mobile => mobile_profile(),
    }
}

fn random_accept_language() -> String {
    let languages = [
        "en-US,en;q=0.9",
        "en-GB,en;q=0.9",
        "en-US,en;q=0.9,es;q=0.8",
        "en-US,en;q=0.9,pt;q=0.8",
        "en-US,en;q=0.9,fr;q=0.8",
        "en-US,en;q=0.9,ar;q=0.8",
    ];
    (*pick(&languages, &"en-US,en;q=0.9")).to_string()
}

fn insert(headers: &mut HeaderMap, name: impl Into<HeaderName>, value: &str) {
    if value.is_empty() {
        return;
    }
    // Generated values are plain ASCII; a value that fails is skipped, not sent broken
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name.into(), value);
    }
}

impl BrowserProfile {
    /// Whether this profile identifies as a mobile browser.
    #[must_use]
    pub fn is_mobile(&self) -> bool {
        self.sec_ch_ua_mobile == "?1" || self.user_agent.contains("Mobile")
    }

    /// Headers a browser would send for a request of the given kind.
    #[must_use]
    pub fn headers_for(&self, kind: RequestKind) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, USER_AGENT, &self.user_agent);
        insert(&mut headers, ACCEPT_LANGUAGE, &self.accept_language);
        insert(&mut headers, ACCEPT_ENCODING, &self.accept_encoding);

        if !self.sec_ch_ua.is_empty() {
            insert(&mut headers, HeaderName::from_static("sec-ch-ua"), &self.sec_ch_ua);
            insert(
                &mut headers,
                HeaderName::from_static("sec-ch-ua-mobile"),
                &self.sec_ch_ua_mobile,
            );
            insert(
                &mut headers,
                HeaderName::from_static("sec-ch-ua-platform"),
                &self.sec_ch_ua_platform,
            );
        }

        let (accept, dest, mode) = match kind {
            RequestKind::Document => (
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                "iframe",
                "navigate",
            ),
            RequestKind::Media => ("*/*", "empty", "cors"),
        };
        insert(&mut headers, ACCEPT, accept);
        insert(&mut headers, HeaderName::from_static("sec-fetch-dest"), dest);
        insert(&mut headers, HeaderName::from_static("sec-fetch-mode"), mode);
        insert(&mut headers, HeaderName::from_static("sec-fetch-site"), "cross-site");

        headers
    }
}
