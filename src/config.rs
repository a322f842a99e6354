//! Configuration for the runaway state directory and stop behavior.
//!
//! Settings live in `config.toml` inside the state directory. Every key is
//! optional; the defaults are part of the tool's contract (a task gets 10
//! seconds to exit after SIGTERM before SIGKILL is sent).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable overriding the state directory location.
pub const STATE_DIR_ENV: &str = "RUNAWAY_STATE_DIR";

const DEFAULT_STOP_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Raw `config.toml` contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    /// How long to wait for a task to exit gracefully before escalating (ms).
    pub stop_timeout_ms: Option<u64>,
    /// Liveness poll cadence while waiting for a task to stop (ms).
    pub poll_interval_ms: Option<u64>,
    /// Signal sent first by `stop` (default: TERM).
    pub graceful_signal: Option<Signal>,
    /// Signal sent after the graceful timeout expires (default: KILL).
    pub force_signal: Option<Signal>,
}

/// Resolved settings with defaults applied.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub stop_timeout: Duration,
    pub poll_interval: Duration,
    pub graceful_signal: Signal,
    pub force_signal: Signal,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            graceful_signal: Signal::Term,
            force_signal: Signal::Kill,
        }
    }
}

impl Settings {
    fn from_file(file: ConfigFile) -> Self {
        let defaults = Settings::default();
        Self {
            stop_timeout: file
                .stop_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.stop_timeout),
            poll_interval: file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            graceful_signal: file.graceful_signal.unwrap_or(defaults.graceful_signal),
            force_signal: file.force_signal.unwrap_or(defaults.force_signal),
        }
    }
}

/// Signals a user may configure for stop escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Hup,
    Int,
    Quit,
    Term,
    Usr1,
    Usr2,
    Kill,
}

impl Signal {
    /// The OS signal number.
    pub fn number(self) -> i32 {
        match self {
            Signal::Hup => libc::SIGHUP,
            Signal::Int => libc::SIGINT,
            Signal::Quit => libc::SIGQUIT,
            Signal::Term => libc::SIGTERM,
            Signal::Usr1 => libc::SIGUSR1,
            Signal::Usr2 => libc::SIGUSR2,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Resolves the state directory: `$RUNAWAY_STATE_DIR`, else `~/.runaway`.
pub fn state_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(STATE_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home.join(".runaway"))
}

/// Loads settings from `config.toml` under the state directory.
///
/// A missing file yields the defaults; a malformed one is an error rather
/// than silently ignored configuration.
pub fn load_settings(state_dir: &Path) -> Result<Settings> {
    let path = state_dir.join("config.toml");
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Settings::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let file: ConfigFile = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(Settings::from_file(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(dir.path()).unwrap();
        assert_eq!(settings.stop_timeout, Duration::from_millis(10_000));
        assert_eq!(settings.poll_interval, Duration::from_millis(100));
        assert_eq!(settings.graceful_signal, Signal::Term);
        assert_eq!(settings.force_signal, Signal::Kill);
    }

    #[test]
    fn parses_optional_fields() {
        let raw = r#"
stop_timeout_ms = 2500
poll_interval_ms = 50
graceful_signal = "INT"
force_signal = "KILL"
"#;
        let file: ConfigFile = toml::from_str(raw).unwrap();
        let settings = Settings::from_file(file);
        assert_eq!(settings.stop_timeout, Duration::from_millis(2500));
        assert_eq!(settings.poll_interval, Duration::from_millis(50));
        assert_eq!(settings.graceful_signal, Signal::Int);
        assert_eq!(settings.force_signal, Signal::Kill);
    }

    #[test]
    fn rejects_unknown_signal_names() {
        let err = toml::from_str::<ConfigFile>(r#"graceful_signal = "SEGV""#);
        assert!(err.is_err());
    }

    #[test]
    fn signal_numbers_match_libc() {
        assert_eq!(Signal::Term.number(), libc::SIGTERM);
        assert_eq!(Signal::Kill.number(), libc::SIGKILL);
    }
}
