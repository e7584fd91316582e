use std::{fs, io, path::Path, time::Duration};

use anyhow::Context;
use client_core::{ReconnectPolicy, SessionConfig};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "chat.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub socket_path: String,
    pub cache_database_url: String,
    pub typing_debounce_ms: u64,
    pub handshake_timeout_secs: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub peer_typing_timeout_ms: Option<u64>,
    pub time_format: String,
}

impl Default for Settings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            server_url: session.server_url,
            socket_path: session.socket_path,
            cache_database_url: "sqlite://./data/chat_cache.db".into(),
            typing_debounce_ms: duration_ms(session.typing_debounce),
            handshake_timeout_secs: session.handshake_timeout.as_secs(),
            reconnect_max_attempts: session.reconnect.max_attempts,
            reconnect_initial_delay_ms: duration_ms(session.reconnect.initial_delay),
            reconnect_max_delay_ms: duration_ms(session.reconnect.max_delay),
            peer_typing_timeout_ms: None,
            time_format: session.time_format,
        }
    }
}

impl Settings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            server_url: self.server_url.clone(),
            socket_path: self.socket_path.clone(),
            typing_debounce: Duration::from_millis(self.typing_debounce_ms),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            reconnect: ReconnectPolicy {
                max_attempts: self.reconnect_max_attempts,
                initial_delay: Duration::from_millis(self.reconnect_initial_delay_ms),
                max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            },
            peer_typing_timeout: self.peer_typing_timeout_ms.map(Duration::from_millis),
            time_format: self.time_format.clone(),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    server_url: Option<String>,
    socket_path: Option<String>,
    cache_database_url: Option<String>,
    typing_debounce_ms: Option<u64>,
    handshake_timeout_secs: Option<u64>,
    reconnect_max_attempts: Option<u32>,
    reconnect_initial_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    peer_typing_timeout_ms: Option<u64>,
    time_format: Option<String>,
}

/// Defaults, then the TOML file, then the environment. A missing file is only
/// an error when its path was given explicitly.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    match fs::read_to_string(path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound && config_path.is_none() => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file.socket_path {
        settings.socket_path = v;
    }
    if let Some(v) = file.cache_database_url {
        settings.cache_database_url = v;
    }
    if let Some(v) = file.typing_debounce_ms {
        settings.typing_debounce_ms = v;
    }
    if let Some(v) = file.handshake_timeout_secs {
        settings.handshake_timeout_secs = v;
    }
    if let Some(v) = file.reconnect_max_attempts {
        settings.reconnect_max_attempts = v;
    }
    if let Some(v) = file.reconnect_initial_delay_ms {
        settings.reconnect_initial_delay_ms = v;
    }
    if let Some(v) = file.reconnect_max_delay_ms {
        settings.reconnect_max_delay_ms = v;
    }
    if file.peer_typing_timeout_ms.is_some() {
        settings.peer_typing_timeout_ms = file.peer_typing_timeout_ms;
    }
    if let Some(v) = file.time_format {
        settings.time_format = v;
    }
    Ok(())
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = var("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = var("APP__SOCKET_PATH") {
        settings.socket_path = v;
    }

    if let Some(v) = var("CHAT_CACHE_DATABASE_URL") {
        settings.cache_database_url = v;
    }
    if let Some(v) = var("APP__CACHE_DATABASE_URL") {
        settings.cache_database_url = v;
    }

    if let Some(parsed) = parsed_var(&var, "APP__TYPING_DEBOUNCE_MS") {
        settings.typing_debounce_ms = parsed;
    }
    if let Some(parsed) = parsed_var(&var, "APP__HANDSHAKE_TIMEOUT_SECS") {
        settings.handshake_timeout_secs = parsed;
    }
    if let Some(parsed) = parsed_var(&var, "APP__RECONNECT_MAX_ATTEMPTS") {
        settings.reconnect_max_attempts = parsed;
    }
    if let Some(parsed) = parsed_var(&var, "APP__RECONNECT_INITIAL_DELAY_MS") {
        settings.reconnect_initial_delay_ms = parsed;
    }
    if let Some(parsed) = parsed_var(&var, "APP__RECONNECT_MAX_DELAY_MS") {
        settings.reconnect_max_delay_ms = parsed;
    }
    if let Some(parsed) = parsed_var(&var, "APP__PEER_TYPING_TIMEOUT_MS") {
        settings.peer_typing_timeout_ms = Some(parsed);
    }

    if let Some(v) = var("APP__TIME_FORMAT") {
        settings.time_format = v;
    }
}

fn parsed_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

/// Accepts plain file paths as well as `sqlite:` URLs and returns the
/// `sqlite://` form the cache expects.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().cache_database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite://") {
        return sqlite_url_for_path(path);
    }

    if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return sqlite_url_for_path(path);
    }

    sqlite_url_for_path(raw_database_url)
}

fn sqlite_url_for_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    if is_windows_drive_path(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

fn is_windows_drive_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
