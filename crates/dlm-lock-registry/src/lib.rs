//! In-memory table of locks this host currently holds, kept in sync
//! with the on-disk Record File.
//!
//! `Registry` is the single type that is allowed to touch both the
//! in-memory list and the Record File, so it is also the type that
//! enforces the locking order between them: **file mutex before list
//! mutex**, never the reverse. Callers never see a `RecordFile`
//! directly.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dlm_lock_core::{Error, LockMode, LockRecord, LockStatus, Result};
use dlm_lock_recordfile::RecordFile;
use libc::pid_t;

/// Synchronizes an in-memory `Vec<LockRecord>` with the on-disk
/// Record File backing it.
///
/// The list mutex guards structural edits (`insert`/`remove`/`find`);
/// the file mutex guards the open `File` handle used for in-place
/// slot writes. They are never acquired nested list-then-file; when
/// an operation needs both (`take_matching` callers that also persist
/// the release, or `reinitialize`), the file mutex is taken first.
pub struct Registry {
    list: Mutex<Vec<LockRecord>>,
    file: Mutex<File>,
    path: PathBuf,
}

impl Registry {
    /// Creates the Record File at `path` from `records` (typically
    /// produced by the Recovery Engine) and opens it for subsequent
    /// slot writes.
    pub fn initialize(path: &Path, records: Vec<LockRecord>) -> Result<Self> {
        RecordFile::initialize(path, &records)?;
        let file = RecordFile::open_read_write(path)?;
        Ok(Self {
            list: Mutex::new(records),
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Adds a new record to the list, returning a clone -- the
    /// Registry keeps the authoritative copy.
    pub fn insert(&self, name: String, mode: LockMode, kernel_lock_id: u32, pid: pid_t) -> LockRecord {
        let record = LockRecord::new(name, mode, kernel_lock_id, pid);
        self.list.lock().unwrap().push(record.clone());
        record
    }

    /// Removes the record with the given kernel lock id, if present.
    pub fn remove(&self, kernel_lock_id: u32) -> Option<LockRecord> {
        let mut list = self.list.lock().unwrap();
        let pos = list.iter().position(|r| r.kernel_lock_id == kernel_lock_id)?;
        Some(list.remove(pos))
    }

    /// Linear scan for the record matching `(pid, name, mode)`.
    pub fn find(&self, pid: pid_t, name: &str, mode: LockMode) -> Option<LockRecord> {
        let list = self.list.lock().unwrap();
        list.iter().find(|r| r.matches(pid, name, mode)).cloned()
    }

    /// Atomically finds and removes the record matching
    /// `(pid, name, mode)` under a single critical section, so a
    /// concurrent `release` on the same resource cannot observe the
    /// entry between the find and the remove.
    pub fn take_matching(&self, pid: pid_t, name: &str, mode: LockMode) -> Option<LockRecord> {
        let mut list = self.list.lock().unwrap();
        let pos = list.iter().position(|r| r.matches(pid, name, mode))?;
        Some(list.remove(pos))
    }

    /// Writes `record`'s slot as `Held`.
    pub fn persist_held(&self, record: &LockRecord) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        RecordFile::write_slot(&mut file, record, LockStatus::Held)
    }

    /// Writes `record`'s slot as `Released`.
    pub fn persist_released(&self, record: &LockRecord) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        RecordFile::write_slot(&mut file, record, LockStatus::Released)
    }

    /// Rewrites the Record File from `records`, replacing both the
    /// on-disk contents and the in-memory list. Used once by the
    /// Recovery Engine after adoption/purge has settled on the final
    /// set of held locks.
    pub fn reinitialize(&self, records: Vec<LockRecord>) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        RecordFile::initialize(&self.path, &records)?;
        *file = RecordFile::open_read_write(&self.path).map_err(|err| {
            Error::FatalInit(format!("unable to reopen record file after recovery: {err}"))
        })?;
        drop(file);

        let mut list = self.list.lock().unwrap();
        *list = records;
        Ok(())
    }

    /// Snapshot of all records currently tracked; used by tests and
    /// by the Recovery Engine's re-initialization step.
    pub fn snapshot(&self) -> Vec<LockRecord> {
        self.list.lock().unwrap().clone()
    }
}
