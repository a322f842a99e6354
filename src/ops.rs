//! Lifecycle controller: the state machine behind `run`, `start`, `stop`,
//! `rm`, `ls`, and `logs`.
//!
//! Every operation reconstructs the world from the store plus a live process
//! table probe; nothing is trusted from a previous invocation. Mutating
//! operations hold the task's advisory lock for their duration; `ls` and
//! `logs` are lock-free and read the latest atomically renamed snapshot.

use std::time::{Duration, Instant};

use regex::Regex;
use tracing::debug;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::launch;
use crate::probe;
use crate::store::Store;
use crate::task::{unix_now, TaskRecord, TaskStatus};

/// Orchestrates registry and process operations for one CLI invocation.
pub struct Controller {
    store: Store,
    settings: Settings,
}

/// What `stop` observed and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The task was already stopped; no signal was sent.
    AlreadyStopped,
    /// The task exited after the graceful signal.
    Stopped,
    /// The task ignored the graceful signal and was force-killed.
    ForceStopped,
}

impl Controller {
    pub fn new(store: Store, settings: Settings) -> Self {
        Self { store, settings }
    }

    /// Registers and launches a new detached task.
    ///
    /// The record write is the commit point: the task directory and log
    /// files are created first, the process is spawned, and only then is
    /// `task.json` written. Any failure after the spawn kills the child and
    /// removes the directory, so the registry never holds a ghost entry.
    pub fn run(&self, name: Option<&str>, command: &[String]) -> Result<TaskRecord> {
        // The name lock spans the duplicate check and the record commit
        // below; without it two concurrent registrations both pass the
        // check and both claim the name.
        let _names_guard = match name {
            Some(name) => {
                validate_name(name)?;
                let guard = self.store.lock_names()?;
                if let Some(existing) = self.store.find_by_name(name)? {
                    let running = probe::probe(&existing) == TaskStatus::Running;
                    return Err(Error::DuplicateName {
                        name: name.to_string(),
                        running,
                    });
                }
                Some(guard)
            }
            None => None,
        };

        let working_dir = std::env::current_dir()
            .map_err(|e| Error::storage(std::path::PathBuf::from("."), e))?;
        let id = self.store.next_id()?;
        let paths = self.store.create_task_dir(id)?;
        let _guard = self.store.lock_task(id)?;

        let cmdline = shell_words::join(command);
        let launched =
            match launch::launch_detached(&cmdline, &working_dir, &paths.stdout, &paths.stderr) {
                Ok(launched) => launched,
                Err(err) => {
                    let _ = self.store.delete(id);
                    return Err(err);
                }
            };

        let now = unix_now();
        let record = TaskRecord {
            id,
            name: name.map(Into::into),
            command: command.to_vec(),
            working_dir,
            created_at: now,
            started_at: now,
            pid: Some(launched.pid),
            starttime: Some(launched.starttime),
            stdout_path: paths.stdout,
            stderr_path: paths.stderr,
        };
        if let Err(err) = self.store.write(&record) {
            kill_quietly(launched.pid, libc::SIGKILL);
            let _ = self.store.delete(id);
            return Err(err);
        }
        Ok(record)
    }

    /// Relaunches a stopped task with its stored command and working
    /// directory, appending to the same log files.
    pub fn start(&self, reference: &str) -> Result<TaskRecord> {
        let id = self.store.resolve(reference)?.into_record().id;
        let _guard = self.store.lock_task(id)?;

        // Re-read under the lock; the record may have changed while we waited.
        let mut record = self.store.read(id)?;
        if probe::probe(&record) == TaskStatus::Running {
            return Err(Error::AlreadyRunning {
                reference: reference.to_string(),
                pid: record.pid.unwrap_or(0),
            });
        }

        let launched = launch::launch_detached(
            &record.command_line(),
            &record.working_dir,
            &record.stdout_path,
            &record.stderr_path,
        )?;
        record.pid = Some(launched.pid);
        record.starttime = Some(launched.starttime);
        record.started_at = unix_now();
        self.store.write(&record)?;
        Ok(record)
    }

    /// Stops a task: graceful signal, bounded poll, forced escalation.
    ///
    /// Idempotent: stopping an already-stopped task succeeds without sending
    /// any signal.
    pub fn stop(&self, reference: &str) -> Result<StopOutcome> {
        let resolved = self.store.resolve(reference)?;
        if probe::probe(resolved.record()) == TaskStatus::Stopped {
            return Ok(StopOutcome::AlreadyStopped);
        }
        let id = resolved.record().id;
        let _guard = self.store.lock_task(id)?;

        let record = self.store.read(id)?;
        if probe::probe(&record) == TaskStatus::Stopped {
            // Lost the race to another stop; still a success.
            return Ok(StopOutcome::AlreadyStopped);
        }
        let Some(pid) = record.pid else {
            return Ok(StopOutcome::AlreadyStopped);
        };

        debug!(
            id,
            pid,
            signal = self.settings.graceful_signal.number(),
            "sending graceful signal"
        );
        kill_quietly(pid, self.settings.graceful_signal.number());
        if self.wait_until_stopped(&record) {
            return Ok(StopOutcome::Stopped);
        }

        debug!(
            id,
            pid,
            signal = self.settings.force_signal.number(),
            "graceful timeout expired, escalating"
        );
        kill_quietly(pid, self.settings.force_signal.number());
        if self.wait_until_stopped(&record) {
            return Ok(StopOutcome::ForceStopped);
        }

        Err(Error::StopTimeout {
            reference: reference.to_string(),
            pid,
            waited_ms: 2 * self.settings.stop_timeout.as_millis() as u64,
        })
    }

    /// Removes a stopped task's record and log files.
    ///
    /// Liveness is re-probed under the lock first; stored state is never
    /// trusted for this decision.
    pub fn rm(&self, reference: &str) -> Result<TaskRecord> {
        let id = self.store.resolve(reference)?.into_record().id;
        let _guard = self.store.lock_task(id)?;

        let record = self.store.read(id)?;
        if probe::probe(&record) == TaskStatus::Running {
            return Err(Error::StillRunning {
                reference: reference.to_string(),
            });
        }
        self.store.delete(id)?;
        Ok(record)
    }

    /// All records with freshly derived status, sorted by ID.
    pub fn ls(&self) -> Result<Vec<(TaskRecord, TaskStatus)>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .map(|record| {
                let status = probe::probe(&record);
                (record, status)
            })
            .collect())
    }

    /// The record whose log files should be shown.
    pub fn logs(&self, reference: &str) -> Result<TaskRecord> {
        Ok(self.store.resolve(reference)?.into_record())
    }

    /// Polls the prober until the task reads as stopped or the configured
    /// timeout elapses. Returns whether it stopped.
    fn wait_until_stopped(&self, record: &TaskRecord) -> bool {
        let deadline = Instant::now() + self.settings.stop_timeout;
        loop {
            if probe::probe(record) == TaskStatus::Stopped {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(self.settings.poll_interval.min(Duration::from_millis(250)));
        }
    }
}

/// Task names may not look like IDs, so the two reference namespaces stay
/// disjoint.
fn validate_name(name: &str) -> Result<()> {
    let pattern = Regex::new("^[A-Za-z_]+$").expect("static regex");
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidName {
            name: name.to_string(),
        })
    }
}

fn kill_quietly(pid: u32, signal: i32) {
    // The task is a session leader (setsid at launch), so its children share
    // its process group: signal the group, then the leader directly in case
    // it moved itself to another group. ESRCH just means the process beat us
    // to exiting.
    unsafe {
        libc::kill(-(pid as i32), signal);
        libc::kill(pid as i32, signal);
    }
}
