//! Error taxonomy for registry and lifecycle operations.
//!
//! Every user-facing failure is a variant here so the CLI can map it to a
//! stable exit code. Messages carry the follow-up command where one exists.

use std::path::PathBuf;

/// Errors surfaced by the task registry and lifecycle controller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The given reference matched no registered task.
    #[error("no task with {kind} {reference}")]
    NotFound {
        /// "ID" or "name", depending on how the reference was parsed.
        kind: &'static str,
        reference: String,
    },

    /// Reserved for future partial matching; exact-match resolution cannot
    /// produce this today.
    #[error("reference {reference} matches more than one task")]
    Ambiguous { reference: String },

    /// Task names are restricted so they can never be mistaken for a
    /// numeric ID.
    #[error("invalid task name {name:?}: only letters and underscore are allowed")]
    InvalidName { name: String },

    /// A task with this name already exists.
    #[error("{}", duplicate_name_message(.name, *.running))]
    DuplicateName { name: String, running: bool },

    /// Spawning the process or capturing its start-time fingerprint failed.
    /// Never leaves a half-registered record behind.
    #[error("failed to launch task: {reason}")]
    Launch { reason: String },

    /// `rm` refused because the task's process is alive.
    #[error(
        "cannot remove task {reference} while it's running\nTo stop it, run:\nrunaway stop {reference}"
    )]
    StillRunning { reference: String },

    /// Graceful and forceful signals both failed to produce a stopped
    /// observation within the configured bounds.
    #[error("task {reference} (pid {pid}) did not stop within {waited_ms} ms")]
    StopTimeout {
        reference: String,
        pid: u32,
        waited_ms: u64,
    },

    /// `start` refused because the task's process is already alive.
    #[error("task {reference} is already running with PID {pid}")]
    AlreadyRunning { reference: String, pid: u32 },

    /// Disk-level failure (permissions, full disk, unreadable record).
    /// Surfaced verbatim.
    #[error("storage error on {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Exit code for scripting use: 0 is success, the distinguished failure
    /// classes get stable non-zero codes.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotFound { .. } => 2,
            Error::StillRunning { .. } => 3,
            Error::StopTimeout { .. } => 4,
            _ => 1,
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fn duplicate_name_message(name: &str, running: bool) -> String {
    if running {
        format!("task {name} already exists and is running\nTo stop it, run:\nrunaway stop {name}")
    } else {
        format!("task {name} already exists\nTo remove it, run:\nrunaway rm {name}")
    }
}
