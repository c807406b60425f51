use std::time::Duration;

use crate::error::{Result, SyncError};

/// Timing knobs for a chat session. Every field can be overridden through a
/// `DUET_*` environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How often presence is re-asserted while the session is open.
    pub heartbeat_interval: Duration,
    /// Idle time after the last keystroke before typing is cleared.
    pub typing_debounce: Duration,
    /// A typing timestamp older than this is stale.
    pub typing_stale_after: Duration,
    /// Tolerated clock skew for typing timestamps from the future.
    pub typing_clock_skew: Duration,
    /// Interval of the poll that re-evaluates typing staleness.
    pub typing_poll_interval: Duration,
    /// Capacity of the view channel handed to the presentation layer.
    pub view_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            typing_debounce: Duration::from_millis(2000),
            typing_stale_after: Duration::from_millis(4000),
            typing_clock_skew: Duration::from_millis(1000),
            typing_poll_interval: Duration::from_millis(1000),
            view_buffer: 64,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            heartbeat_interval: env_secs("DUET_HEARTBEAT_SECS", defaults.heartbeat_interval)?,
            typing_debounce: env_millis("DUET_TYPING_DEBOUNCE_MS", defaults.typing_debounce)?,
            typing_stale_after: env_millis("DUET_TYPING_STALE_MS", defaults.typing_stale_after)?,
            typing_clock_skew: env_millis("DUET_TYPING_SKEW_MS", defaults.typing_clock_skew)?,
            typing_poll_interval: env_millis("DUET_TYPING_POLL_MS", defaults.typing_poll_interval)?,
            view_buffer: env_parse("DUET_VIEW_BUFFER", defaults.view_buffer)?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| SyncError::Config(format!("{} must be a number, got {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &str, default: Duration) -> Result<Duration> {
    env_parse(name, default.as_secs()).map(Duration::from_secs)
}

fn env_millis(name: &str, default: Duration) -> Result<Duration> {
    env_parse(name, default.as_millis() as u64).map(Duration::from_millis)
}
