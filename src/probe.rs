//! Liveness probing against the OS process table.
//!
//! A PID-existence check alone is unsound: once a task has run long enough
//! for PID wraparound, its recorded PID may belong to an unrelated process.
//! Every probe therefore compares a second factor, the process start time
//! read from `/proc/<pid>/stat` at launch, against the recorded fingerprint.
//! Any transient read race (process exiting between checks) is reported as
//! `Stopped`, never as an error.

use crate::task::{TaskRecord, TaskStatus};

/// Reads the start-time fingerprint (ticks since boot) for a PID.
///
/// Zombies are included: at launch time the child may already have exited
/// before being reaped, and its stat line still carries the true start time.
/// While the zombie occupies the slot, the PID cannot have been reused.
pub fn fingerprint(pid: u32) -> Option<u64> {
    read_stat(pid).map(|(_, starttime)| starttime)
}

/// Probes whether the recorded task is still the process it launched.
pub fn probe(record: &TaskRecord) -> TaskStatus {
    let (Some(pid), Some(recorded)) = (record.pid, record.starttime) else {
        return TaskStatus::Stopped;
    };
    match read_stat(pid) {
        // A zombie is dead for supervision purposes even though it still
        // occupies a process table slot.
        Some((state, starttime)) if state != 'Z' && starttime == recorded => TaskStatus::Running,
        // Absent, unreadable, or a different process wearing a recycled PID.
        _ => TaskStatus::Stopped,
    }
}

/// Reads the state character and starttime out of `/proc/<pid>/stat`.
///
/// The comm field (2) is parenthesized and may itself contain spaces and
/// parentheses, so fields are counted from after the last `)`. Field 3 is
/// the state character and field 22 the starttime in clock ticks.
fn read_stat(pid: u32) -> Option<(char, u64)> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_stat(&stat)
}

fn parse_stat(stat: &str) -> Option<(char, u64)> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    // state is field 3; starttime is field 22.
    let starttime = fields.nth(22 - 4)?.parse().ok()?;
    Some((state, starttime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(pid: Option<u32>, starttime: Option<u64>) -> TaskRecord {
        TaskRecord {
            id: 1,
            name: None,
            command: vec!["sleep".into(), "60".into()],
            working_dir: PathBuf::from("/"),
            created_at: 0,
            started_at: 0,
            pid,
            starttime,
            stdout_path: PathBuf::from("/dev/null"),
            stderr_path: PathBuf::from("/dev/null"),
        }
    }

    #[test]
    fn parses_stat_with_hostile_comm() {
        // comm containing spaces and a closing paren
        let stat = "1234 (a) b) c) S 1 1234 1234 0 -1 4194304 100 0 0 0 \
                    5 3 0 0 20 0 1 0 7654321 1000000 100 18446744073709551615";
        assert_eq!(parse_stat(stat), Some(('S', 7_654_321)));
    }

    #[test]
    fn zombie_starttime_still_parses() {
        let stat = "1234 (dead) Z 1 1234 1234 0 -1 4194304 100 0 0 0 \
                    5 3 0 0 20 0 1 0 7654321 0 0 18446744073709551615";
        assert_eq!(parse_stat(stat), Some(('Z', 7_654_321)));
    }

    #[test]
    fn own_process_probes_running() {
        let pid = std::process::id();
        let live = fingerprint(pid).expect("own stat must be readable");
        assert_eq!(probe(&record(Some(pid), Some(live))), TaskStatus::Running);
    }

    #[test]
    fn mismatched_fingerprint_probes_stopped() {
        let pid = std::process::id();
        let live = fingerprint(pid).unwrap();
        // Simulated PID reuse: same PID, different start time.
        assert_eq!(
            probe(&record(Some(pid), Some(live + 1))),
            TaskStatus::Stopped
        );
    }

    #[test]
    fn unreaped_child_probes_stopped() {
        // Spawn something that exits immediately but do not reap it yet: the
        // zombie must read as stopped despite a matching fingerprint.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        let live = loop {
            match read_stat(pid) {
                Some(('Z', starttime)) => break starttime,
                Some(_) => std::thread::sleep(std::time::Duration::from_millis(10)),
                None => panic!("child vanished before being reaped"),
            }
        };
        assert_eq!(probe(&record(Some(pid), Some(live))), TaskStatus::Stopped);
        child.wait().unwrap();
    }

    #[test]
    fn reaped_child_probes_stopped() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert_eq!(probe(&record(Some(pid), Some(1))), TaskStatus::Stopped);
    }

    #[test]
    fn record_without_pid_probes_stopped() {
        assert_eq!(probe(&record(None, None)), TaskStatus::Stopped);
    }
}
