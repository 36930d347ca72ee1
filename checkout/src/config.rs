//! # Client Configuration & Constants
//!
//! Every timeout and limit the checkout flow relies on lives here. The
//! defaults match what the marketplace services expect from a browser
//! client; the CLI can override the ones that vary per deployment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Source Resolution
// ---------------------------------------------------------------------------

/// How long the PRE driver waits for the agent's best-source ranking before
/// falling back to the creator.
pub const BEST_SOURCE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the chunked driver waits for the registry's full peer list.
/// Unlike best-source, running out of time here fails the purchase.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Push Stream
// ---------------------------------------------------------------------------

/// Number of historical events requested when (re)connecting.
pub const HISTORY_LIMIT: usize = 500;

/// First reconnect delay after the push stream drops.
pub const RECONNECT_BACKOFF_MIN: Duration = Duration::from_secs(1);

/// Ceiling for the doubling reconnect delay.
pub const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Capacity of the channel between the stream supervisor and the consumer.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Ad-Subsidized Sessions
// ---------------------------------------------------------------------------

/// Session length assumed when the advertiser does not declare one.
pub const DEFAULT_AD_SESSION: Duration = Duration::from_millis(15_000);

/// Upper bound on the client-side countdown. An advertiser asking for more
/// than this gets this.
pub const MAX_AD_SESSION: Duration = Duration::from_secs(300);

/// Countdown granularity.
pub const AD_TICK: Duration = Duration::from_secs(1);

/// The status string the advertiser returns when the subsidy went out.
pub const SUBSIDY_SENT_STATUS: &str = "payment_sent";

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Directory on the agent's host where decrypted content is written.
pub const DEFAULT_OUTPUT_DIR: &str = "/tmp";

/// File name used when a listing has none.
pub const FALLBACK_FILE_NAME: &str = "content";

/// Prefix of every output file the client asks the agent to write.
pub const OUTPUT_PREFIX: &str = "decrypted-";

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "wav", "opus", "flac", "aac", "m4a"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov"];
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg"];

// ---------------------------------------------------------------------------
// Client Configuration
// ---------------------------------------------------------------------------

/// Runtime configuration for a checkout client.
///
/// Durations are stored as milliseconds so the struct round-trips through
/// JSON and environment-driven config without custom serde glue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckoutConfig {
    /// Base URL of the local settlement agent.
    pub node_url: String,
    /// Base URL of the content registry.
    pub registry_url: String,
    /// Directory the agent writes decrypted output into.
    pub output_dir: String,
    /// Best-source lookup timeout (ms).
    pub best_source_timeout_ms: u64,
    /// Full discovery timeout (ms).
    pub discovery_timeout_ms: u64,
    /// History backfill size on (re)connect.
    pub history_limit: usize,
    /// Initial reconnect delay (ms).
    pub reconnect_min_ms: u64,
    /// Maximum reconnect delay (ms).
    pub reconnect_max_ms: u64,
    /// Longest ad countdown the client will run (ms).
    pub max_ad_session_ms: u64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            node_url: String::new(),
            registry_url: String::new(),
            output_dir: DEFAULT_OUTPUT_DIR.to_string(),
            best_source_timeout_ms: BEST_SOURCE_TIMEOUT.as_millis() as u64,
            discovery_timeout_ms: DISCOVERY_TIMEOUT.as_millis() as u64,
            history_limit: HISTORY_LIMIT,
            reconnect_min_ms: RECONNECT_BACKOFF_MIN.as_millis() as u64,
            reconnect_max_ms: RECONNECT_BACKOFF_MAX.as_millis() as u64,
            max_ad_session_ms: MAX_AD_SESSION.as_millis() as u64,
        }
    }
}

impl CheckoutConfig {
    /// Config pointing at a specific agent and registry, defaults elsewhere.
    pub fn new(node_url: &str, registry_url: &str) -> Self {
        Self {
            node_url: ensure_http(node_url),
            registry_url: ensure_http(registry_url),
            ..Self::default()
        }
    }

    pub fn best_source_timeout(&self) -> Duration {
        Duration::from_millis(self.best_source_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn max_ad_session(&self) -> Duration {
        Duration::from_millis(self.max_ad_session_ms)
    }
}

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Normalize a bare `host:port` into an HTTP base URL.
///
/// Empty input stays empty so callers can still detect "not configured".
/// Trailing slashes are stripped so paths can be appended with `format!`.
pub fn ensure_http(addr: &str) -> String {
    let addr = addr.trim();
    if addr.is_empty() {
        return String::new();
    }
    let base = if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    };
    base.trim_end_matches('/').to_string()
}

/// Human-readable byte size, e.g. `1.5 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_http_adds_scheme_once() {
        assert_eq!(ensure_http("10.0.0.1:3000"), "http://10.0.0.1:3000");
        assert_eq!(ensure_http("https://creator.example/"), "https://creator.example");
        assert_eq!(ensure_http("  "), "");
    }

    #[test]
    fn format_size_picks_sensible_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn timing_constants_sanity() {
        // Best-source is the soft lookup; it should never outwait discovery.
        assert!(BEST_SOURCE_TIMEOUT <= DISCOVERY_TIMEOUT);
        assert!(RECONNECT_BACKOFF_MIN < RECONNECT_BACKOFF_MAX);
        assert!(DEFAULT_AD_SESSION <= MAX_AD_SESSION);
        assert!(AD_TICK.as_millis() > 0);
    }

    #[test]
    fn config_round_trips_through_json_with_defaults() {
        let cfg: CheckoutConfig =
            serde_json::from_str(r#"{"node_url":"http://127.0.0.1:3000"}"#).unwrap();
        assert_eq!(cfg.node_url, "http://127.0.0.1:3000");
        assert_eq!(cfg.history_limit, HISTORY_LIMIT);
        assert_eq!(cfg.best_source_timeout(), BEST_SOURCE_TIMEOUT);
    }
}
