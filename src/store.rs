//! Directory-backed task record store.
//!
//! Each task owns one directory under `<state>/tasks/<id>/` holding its
//! `task.json` record, its two log files, and a lock file. Record writes go
//! through a write-to-temporary-then-rename so a reader never observes a
//! partial record, even if the writer is killed mid-write. There is no
//! resident process: concurrent CLI invocations serialize on per-task flock
//! advisory locks, and ID allocation on a separate, short-held lock around
//! the high-water-mark file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};
use crate::task::TaskRecord;

const RECORD_FILE: &str = "task.json";
const STDOUT_FILE: &str = "out.log";
const STDERR_FILE: &str = "err.log";
const LOCK_FILE: &str = "lock";
const SEQ_FILE: &str = "seq";
const SEQ_LOCK_FILE: &str = "seq.lock";
const NAMES_LOCK_FILE: &str = "names.lock";

/// Handle to the state directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

/// Filesystem locations belonging to one task.
#[derive(Debug, Clone)]
pub struct TaskPaths {
    pub dir: PathBuf,
    pub record: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub lock: PathBuf,
}

/// How a user-supplied reference resolved.
#[derive(Debug)]
pub enum Resolved {
    ById(TaskRecord),
    ByName(TaskRecord),
}

impl Resolved {
    pub fn into_record(self) -> TaskRecord {
        match self {
            Resolved::ById(rec) | Resolved::ByName(rec) => rec,
        }
    }

    pub fn record(&self) -> &TaskRecord {
        match self {
            Resolved::ById(rec) | Resolved::ByName(rec) => rec,
        }
    }
}

/// Exclusive advisory lock, released on drop.
///
/// flock is per open file description, so this excludes other invocations of
/// the tool as well as other threads of this one.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
}

impl LockGuard {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| Error::storage(path, e))?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(Error::storage(path, std::io::Error::last_os_error()));
        }
        Ok(Self { file })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

impl Store {
    /// Opens (creating if necessary) the store under the given state dir.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let tasks = root.join("tasks");
        fs::create_dir_all(&tasks).map_err(|e| Error::storage(&tasks, e))?;
        Ok(Self { root })
    }

    fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    /// Filesystem locations for a task ID (whether or not it exists yet).
    pub fn paths(&self, id: u64) -> TaskPaths {
        let dir = self.tasks_dir().join(id.to_string());
        TaskPaths {
            record: dir.join(RECORD_FILE),
            stdout: dir.join(STDOUT_FILE),
            stderr: dir.join(STDERR_FILE),
            lock: dir.join(LOCK_FILE),
            dir,
        }
    }

    /// Creates the task directory so log files and the lock can exist before
    /// the record is committed.
    pub fn create_task_dir(&self, id: u64) -> Result<TaskPaths> {
        let paths = self.paths(id);
        fs::create_dir_all(&paths.dir).map_err(|e| Error::storage(&paths.dir, e))?;
        Ok(paths)
    }

    /// Takes the per-task exclusive lock. Held by mutating operations for
    /// their full duration.
    pub fn lock_task(&self, id: u64) -> Result<LockGuard> {
        let paths = self.create_task_dir(id)?;
        LockGuard::acquire(&paths.lock)
    }

    /// Takes the store-wide name registration lock.
    ///
    /// Name uniqueness cannot be enforced by the per-task lock: two
    /// registrations race on different task IDs. The caller holds this from
    /// the duplicate-name check through the record commit.
    pub fn lock_names(&self) -> Result<LockGuard> {
        LockGuard::acquire(&self.root.join(NAMES_LOCK_FILE))
    }

    /// Persists a record atomically: the previous complete record or the new
    /// one is visible, never a partial write.
    pub fn write(&self, record: &TaskRecord) -> Result<()> {
        let paths = self.create_task_dir(record.id)?;
        let tmp = paths.dir.join(format!("{RECORD_FILE}.tmp"));
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::storage(&paths.record, e.into()))?;
        write_atomic(&tmp, &paths.record, &json)
    }

    /// Reads one record by ID.
    pub fn read(&self, id: u64) -> Result<TaskRecord> {
        let paths = self.paths(id);
        let raw = match fs::read(&paths.record) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    kind: "ID",
                    reference: id.to_string(),
                });
            }
            Err(err) => return Err(Error::storage(&paths.record, err)),
        };
        serde_json::from_slice(&raw).map_err(|e| Error::storage(&paths.record, e.into()))
    }

    /// Lists all readable records, sorted by ID.
    ///
    /// Malformed or mid-creation entries are skipped with a warning so one
    /// bad record cannot take down the whole listing.
    pub fn list(&self) -> Result<Vec<TaskRecord>> {
        let dir = self.tasks_dir();
        let entries = fs::read_dir(&dir).map_err(|e| Error::storage(&dir, e))?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("skipping unreadable store entry: {err}");
                    continue;
                }
            };
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            else {
                continue;
            };
            match self.read(id) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(id, "skipping corrupt task record: {err}");
                }
            }
        }
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    /// Removes a record directory, including its log files.
    pub fn delete(&self, id: u64) -> Result<()> {
        let paths = self.paths(id);
        match fs::remove_dir_all(&paths.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound {
                kind: "ID",
                reference: id.to_string(),
            }),
            Err(err) => Err(Error::storage(&paths.dir, err)),
        }
    }

    /// Finds a record by exact name.
    ///
    /// Name uniqueness is enforced at registration, but the state directory
    /// is plain files; two records claiming one name is reported rather
    /// than silently picking either.
    pub fn find_by_name(&self, name: &str) -> Result<Option<TaskRecord>> {
        let mut matches = self
            .list()?
            .into_iter()
            .filter(|rec| rec.name.as_deref() == Some(name));
        let first = matches.next();
        if matches.next().is_some() {
            return Err(Error::Ambiguous {
                reference: name.to_string(),
            });
        }
        Ok(first)
    }

    /// Allocates the next task ID.
    ///
    /// The high-water mark in `seq` is advanced under its own lock, held
    /// only around this read/write pair so allocation stays cheap. Taking
    /// the max against existing IDs keeps allocation monotonic even if the
    /// `seq` file is lost.
    pub fn next_id(&self) -> Result<u64> {
        let lock_path = self.root.join(SEQ_LOCK_FILE);
        let _guard = LockGuard::acquire(&lock_path)?;

        let seq_path = self.root.join(SEQ_FILE);
        let persisted = match fs::read_to_string(&seq_path) {
            Ok(raw) => raw.trim().parse::<u64>().unwrap_or(0),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => return Err(Error::storage(&seq_path, err)),
        };
        let max_existing = self.list()?.iter().map(|r| r.id).max().unwrap_or(0);
        let id = persisted.max(max_existing) + 1;

        let tmp = self.root.join(format!("{SEQ_FILE}.tmp"));
        write_atomic(&tmp, &seq_path, id.to_string().as_bytes())?;
        Ok(id)
    }

    /// Resolves a user-supplied reference: all digits is an ID, anything
    /// else an exact name. Name validation forbids digit-only names, so the
    /// two namespaces cannot collide.
    pub fn resolve(&self, reference: &str) -> Result<Resolved> {
        if let Ok(id) = reference.parse::<u64>() {
            return self.read(id).map(Resolved::ById).map_err(|err| match err {
                Error::NotFound { .. } => Error::NotFound {
                    kind: "ID",
                    reference: reference.to_string(),
                },
                other => other,
            });
        }
        match self.find_by_name(reference)? {
            Some(record) => Ok(Resolved::ByName(record)),
            None => Err(Error::NotFound {
                kind: "name",
                reference: reference.to_string(),
            }),
        }
    }
}

/// Writes bytes to `tmp`, fsyncs, then renames over `dest`.
fn write_atomic(tmp: &Path, dest: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(tmp).map_err(|e| Error::storage(tmp, e))?;
    file.write_all(bytes).map_err(|e| Error::storage(tmp, e))?;
    file.sync_all().map_err(|e| Error::storage(tmp, e))?;
    drop(file);
    fs::rename(tmp, dest).map_err(|e| Error::storage(dest, e))
}
