//! Client configuration loaded from environment.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Client configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket endpoint speaking STOMP (e.g. `ws://127.0.0.1:8080/ws`).
    pub ws_url: String,
    /// Value of the STOMP `host` header. Defaults to the host part of `ws_url`.
    pub stomp_host: String,
    /// Heartbeat interval requested in both directions.
    pub heartbeat_ms: u64,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Consecutive transport errors tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// How long to wait for `CONNECTED` after the socket opens.
    pub handshake_timeout_ms: u64,
    /// Maximum number of notifications kept in the log.
    pub store_capacity: usize,
    /// How long a toast stays visible.
    pub toast_duration_ms: u64,
    /// Seconds shown on the forced-logout countdown.
    pub logout_countdown_secs: u32,
    /// Sentinel the server sends when the user's role changed.
    pub privilege_sentinel: String,
    /// Persisted session file (identity source, cleared on forced logout).
    pub session_file: PathBuf,
    /// Where the user is sent after a forced logout.
    pub login_url: String,
    /// How often the binary re-reads the session file.
    pub identity_poll_ms: u64,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let ws_url = "ws://127.0.0.1:8080/ws".to_string();
        Self {
            stomp_host: host_of(&ws_url).unwrap_or_else(|_| "localhost".to_string()),
            ws_url,
            heartbeat_ms: 10_000,
            reconnect_delay_ms: 5_000,
            max_reconnect_attempts: 10,
            handshake_timeout_ms: 10_000,
            store_capacity: 50,
            toast_duration_ms: 5_000,
            logout_countdown_secs: 10,
            privilege_sentinel: "CAMBIO_ROL".to_string(),
            session_file: PathBuf::from("session.json"),
            login_url: "/login".to_string(),
            identity_poll_ms: 2_000,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let defaults = Self::default();

        let ws_url = std::env::var("NOTIF_WS_URL").unwrap_or(defaults.ws_url);
        let default_host = host_of(&ws_url)?;
        let stomp_host = std::env::var("NOTIF_STOMP_HOST").unwrap_or(default_host);

        Ok(Self {
            ws_url,
            stomp_host,
            heartbeat_ms: env_number("NOTIF_HEARTBEAT_MS", defaults.heartbeat_ms)?,
            reconnect_delay_ms: env_number("NOTIF_RECONNECT_DELAY_MS", defaults.reconnect_delay_ms)?,
            max_reconnect_attempts: env_number(
                "NOTIF_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            )?,
            handshake_timeout_ms: env_number(
                "NOTIF_HANDSHAKE_TIMEOUT_MS",
                defaults.handshake_timeout_ms,
            )?,
            store_capacity: env_number("NOTIF_STORE_CAPACITY", defaults.store_capacity)?,
            toast_duration_ms: env_number("NOTIF_TOAST_DURATION_MS", defaults.toast_duration_ms)?,
            logout_countdown_secs: env_number(
                "NOTIF_LOGOUT_COUNTDOWN_SECS",
                defaults.logout_countdown_secs,
            )?,
            privilege_sentinel: std::env::var("NOTIF_PRIVILEGE_SENTINEL")
                .unwrap_or(defaults.privilege_sentinel),
            session_file: std::env::var("NOTIF_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_file),
            login_url: std::env::var("NOTIF_LOGIN_URL").unwrap_or(defaults.login_url),
            identity_poll_ms: env_number("NOTIF_IDENTITY_POLL_MS", defaults.identity_poll_ms)?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.toast_duration_ms)
    }
}

fn env_number<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigLoadError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::InvalidNumber(var)),
        Err(_) => Ok(default),
    }
}

/// Host of a `ws://` / `wss://` URL, without port or credentials.
pub(crate) fn host_of(ws_url: &str) -> Result<String, ConfigLoadError> {
    let url = Url::parse(ws_url).map_err(|e| ConfigLoadError::InvalidWsUrl(e.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConfigLoadError::InvalidWsUrl(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigLoadError::InvalidWsUrl("missing host".to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid NOTIF_WS_URL (expected ws:// or wss://): {0}")]
    InvalidWsUrl(String),
    #[error("Invalid number in {0}")]
    InvalidNumber(&'static str),
}
