//! Process launching: session-detached background tasks and attached
//! foreground runs.
//!
//! Detached tasks must survive the CLI's own exit, so they are made session
//! leaders (`setsid`) rather than plain children: a plain child would keep
//! the invoking shell's terminal/session semantics and could be taken down
//! by its SIGHUP. Stdio is redirected to the task's log files before exec.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

use crate::error::Error;
use crate::probe;

/// Successful detached launch: the PID and its start-time fingerprint,
/// captured before any possibility of PID reuse.
#[derive(Debug, Clone, Copy)]
pub struct Launched {
    pub pid: u32,
    pub starttime: u64,
}

/// Spawns `cmdline` under `/bin/sh -c` as a detached session leader with
/// stdout/stderr appended to the given log files.
///
/// The fingerprint is captured immediately after the spawn. If it cannot be
/// read the child is killed and reaped before the error returns, so no
/// untracked process is left behind.
pub fn launch_detached(
    cmdline: &str,
    working_dir: &Path,
    stdout_path: &Path,
    stderr_path: &Path,
) -> Result<Launched, Error> {
    let stdout = open_log(stdout_path)?;
    let stderr = open_log(stderr_path)?;

    let mut command = Command::new("/bin/sh");
    command
        .arg("-c")
        .arg(cmdline)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = command.spawn().map_err(|err| Error::Launch {
        reason: format!("failed to spawn /bin/sh: {err}"),
    })?;
    let pid = child.id();

    let Some(starttime) = probe::fingerprint(pid) else {
        // Without a fingerprint the process would be unsupervisable; kill it
        // rather than leave an untracked orphan.
        let _ = child.kill();
        let _ = child.wait();
        return Err(Error::Launch {
            reason: format!("could not read process table entry for pid {pid}"),
        });
    };

    Ok(Launched { pid, starttime })
}

fn open_log(path: &Path) -> Result<std::fs::File, Error> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::storage(path, e))
}

/// Runs `cmdline` attached to the current terminal, forwarding SIGINT and
/// SIGTERM to the child, and returns its exit code.
///
/// Attached runs are not registered in the store: the process dies with the
/// CLI, so a registry entry would be stale the moment it was written.
pub fn run_attached(cmdline: &str, working_dir: &Path) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime for attached run")?;
    runtime.block_on(run_attached_inner(cmdline, working_dir))
}

async fn run_attached_inner(cmdline: &str, working_dir: &Path) -> Result<i32> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut child = tokio::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(cmdline)
        .current_dir(working_dir)
        .spawn()
        .with_context(|| format!("failed to spawn {cmdline}"))?;
    let pid = child.id();

    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.context("failed to wait for attached child")?;
                return Ok(status.code().unwrap_or(1));
            }
            _ = sigint.recv() => forward_signal(pid, libc::SIGINT),
            _ = sigterm.recv() => forward_signal(pid, libc::SIGTERM),
        }
    }
}

fn forward_signal(pid: Option<u32>, signal: i32) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(pid as i32, signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskRecord, TaskStatus};
    use std::time::Duration;

    fn record_for(launched: Launched, dir: &Path) -> TaskRecord {
        TaskRecord {
            id: 1,
            name: None,
            command: vec![],
            working_dir: dir.to_path_buf(),
            created_at: 0,
            started_at: 0,
            pid: Some(launched.pid),
            starttime: Some(launched.starttime),
            stdout_path: dir.join("out.log"),
            stderr_path: dir.join("err.log"),
        }
    }

    fn wait_until_stopped(record: &TaskRecord) {
        for _ in 0..100 {
            if probe::probe(record) == TaskStatus::Stopped {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("process never observed as stopped");
    }

    #[test]
    fn detached_child_probes_running_then_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let launched = launch_detached(
            "sleep 30",
            dir.path(),
            &dir.path().join("out.log"),
            &dir.path().join("err.log"),
        )
        .unwrap();
        let record = record_for(launched, dir.path());
        assert_eq!(probe::probe(&record), TaskStatus::Running);

        unsafe {
            libc::kill(launched.pid as i32, libc::SIGKILL);
        }
        wait_until_stopped(&record);
    }

    #[test]
    fn detached_output_lands_in_log_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.log");
        let err = dir.path().join("err.log");
        let launched = launch_detached("echo hello; echo oops >&2", dir.path(), &out, &err).unwrap();
        let record = record_for(launched, dir.path());
        wait_until_stopped(&record);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello\n");
        assert_eq!(std::fs::read_to_string(&err).unwrap(), "oops\n");
    }

    #[test]
    fn fast_exit_still_yields_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let launched = launch_detached(
            "true",
            dir.path(),
            &dir.path().join("out.log"),
            &dir.path().join("err.log"),
        )
        .unwrap();
        assert!(launched.starttime > 0);
    }

    #[test]
    fn attached_run_propagates_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(run_attached("exit 3", dir.path()).unwrap(), 3);
        assert_eq!(run_attached("true", dir.path()).unwrap(), 0);
    }
}
