//! Persisted task records and derived status.
//!
//! A `TaskRecord` is the unit of on-disk state: one JSON file per task under
//! the state directory. Status is never stored; it is derived on every read
//! by probing the live process table (see `probe`).

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One user-launched background command tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Positive, unique, monotonically allocated; never reused.
    pub id: u64,
    /// Optional user-supplied name, unique among registered tasks.
    pub name: Option<String>,
    /// The exact argument vector as given on the command line; executed via
    /// `/bin/sh -c` on the shell-joined form.
    pub command: Vec<String>,
    /// Directory the task runs in.
    pub working_dir: PathBuf,
    /// Unix seconds at registration. Immutable.
    pub created_at: u64,
    /// Unix seconds of the most recent (re)launch. Uptime derives from this.
    pub started_at: u64,
    /// PID of the launched process, if one has been recorded.
    pub pid: Option<u32>,
    /// Process start time in ticks since boot, read from the process table at
    /// launch. Together with `pid` this disambiguates against PID reuse.
    pub starttime: Option<u64>,
    /// Log file receiving the task's stdout.
    pub stdout_path: PathBuf,
    /// Log file receiving the task's stderr.
    pub stderr_path: PathBuf,
}

/// Derived liveness of a task, computed from the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The recorded PID exists and its start-time fingerprint matches.
    Running,
    /// No matching process: never launched, exited, or the PID was recycled
    /// by an unrelated process.
    Stopped,
}

impl TaskRecord {
    /// Uptime in whole seconds, relative to the last launch.
    pub fn uptime_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.started_at)
    }

    /// The command in shell form, as it was handed to `/bin/sh -c`.
    pub fn command_line(&self) -> String {
        shell_words::join(&self.command)
    }
}

/// Current unix time in whole seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        TaskRecord {
            id: 3,
            name: Some("web".into()),
            command: vec!["sleep".into(), "100".into()],
            working_dir: PathBuf::from("/tmp"),
            created_at: 1_000,
            started_at: 1_000,
            pid: Some(4242),
            starttime: Some(987_654),
            stdout_path: PathBuf::from("/tmp/out.log"),
            stderr_path: PathBuf::from("/tmp/err.log"),
        }
    }

    #[test]
    fn uptime_is_relative_to_last_launch() {
        let mut rec = record();
        rec.started_at = 2_000;
        assert_eq!(rec.uptime_secs(2_065), 65);
        // Clock skew must not underflow.
        assert_eq!(rec.uptime_secs(1_500), 0);
    }

    #[test]
    fn command_line_is_shell_quoted() {
        let mut rec = record();
        rec.command = vec!["echo".into(), "hello world".into()];
        assert_eq!(rec.command_line(), "echo 'hello world'");
    }

    #[test]
    fn record_roundtrips_through_json() {
        let rec = record();
        let json = serde_json::to_string(&rec).unwrap();
        let back: TaskRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, rec.id);
        assert_eq!(back.name, rec.name);
        assert_eq!(back.pid, rec.pid);
        assert_eq!(back.starttime, rec.starttime);
    }
}
