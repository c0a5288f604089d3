// crates/client/src/config.rs
use std::time::Duration;

pub const SERVER_URL_ENV: &str = "NANOCAS_SERVER_URL";
pub const CHANNEL_URL_ENV: &str = "NANOCAS_CHANNEL_URL";

pub const DEFAULT_SERVER_URL: &str = "http://localhost:5007";
pub const DEFAULT_CHANNEL_URL: &str = "ws://localhost:5007/ws";

/// Period of the coverage/metadata/readiness pull cycle.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10_000);
/// How long a confirmed removal waits for `analysis_removed`.
pub const REMOVAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause between a successful removal and the redirect.
pub const REDIRECT_DELAY: Duration = Duration::from_secs(1);
/// Where the user lands after a removal.
pub const REDIRECT_PATH: &str = "/analysis";

/// Configuration for a session view and the clients it drives.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the HTTP pull endpoints.
    pub server_url: String,
    /// WebSocket URL of the shared event channel.
    pub channel_url: String,
    pub poll_interval: Duration,
    pub removal_timeout: Duration,
    pub redirect_delay: Duration,
    pub redirect_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: env_or(SERVER_URL_ENV, DEFAULT_SERVER_URL),
            channel_url: env_or(CHANNEL_URL_ENV, DEFAULT_CHANNEL_URL),
            poll_interval: POLL_INTERVAL,
            removal_timeout: REMOVAL_TIMEOUT,
            redirect_delay: REDIRECT_DELAY,
            redirect_path: REDIRECT_PATH.to_owned(),
        }
    }
}

impl ClientConfig {
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    pub fn with_channel_url(mut self, url: impl Into<String>) -> Self {
        self.channel_url = url.into();
        self
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_owned())
}
