use std::time::Duration;

pub const DEFAULT_TYPING_DEBOUNCE: Duration = Duration::from_millis(1000);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SOCKET_PATH: &str = "/socket";
pub const DEFAULT_TIME_FORMAT: &str = "%b %-d, %H:%M";

/// How a session tries to get back online after its channel drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// One immediate attempt per disconnect, no backoff.
    pub fn fire_once() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt number `attempt` (1-based): `initial_delay`
    /// doubled per previous attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial_delay.min(self.max_delay);
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base `http(s)://` URL of the chat API; the socket URL is derived from it.
    pub server_url: String,
    pub socket_path: String,
    pub typing_debounce: Duration,
    pub handshake_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// `None` mirrors the peer's last typing event indefinitely.
    pub peer_typing_timeout: Option<Duration>,
    /// chrono format string; timestamps are rendered in UTC.
    pub time_format: String,
}

impl SessionConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            socket_path: DEFAULT_SOCKET_PATH.into(),
            typing_debounce: DEFAULT_TYPING_DEBOUNCE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            peer_typing_timeout: None,
            time_format: DEFAULT_TIME_FORMAT.into(),
        }
    }
}
