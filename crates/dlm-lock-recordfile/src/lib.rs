//! Fixed-width, slot-addressed persistence for held DLM locks.
//!
//! The Record File is a plain text file: one header line, then one
//! 93-byte line per kernel lock id, used as a sparse array so a single
//! lock's status can be flipped in place with a `seek` + `write`
//! instead of rewriting the whole file. See the module-level
//! constants for the exact layout.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;

use dlm_lock_core::{Error, LockMode, LockRecord, LockStatus, Result, RESOURCE_NAME_LEN};

/// Width of the `STATUS` column.
pub const STATUS_WIDTH: usize = 6;
/// Width of the `RESOURCE_NAME` column; equal to
/// [`dlm_lock_core::RESOURCE_NAME_LEN`].
pub const NAME_WIDTH: usize = RESOURCE_NAME_LEN;
/// Width of the `LOCK_MODE` column (fits `PRMODE`/`EXMODE`).
pub const MODE_WIDTH: usize = 9;
/// Width of the `VM_PID` column.
pub const PID_WIDTH: usize = 10;

/// Length in bytes of one data line, including the trailing newline:
/// `6 + 1 + 64 + 1 + 9 + 1 + 10 + 1`.
pub const RECORD_LEN: u64 = (STATUS_WIDTH + 1 + NAME_WIDTH + 1 + MODE_WIDTH + 1 + PID_WIDTH + 1) as u64;

/// Length in bytes of the header line. The header happens to use the
/// same four column widths as a data line, so it is exactly
/// [`RECORD_LEN`] bytes too -- which is what lets slot addressing use
/// a single constant offset.
pub const HEADER_LEN: u64 = RECORD_LEN;

/// The byte offset of the slot belonging to `kernel_lock_id`.
pub fn slot_offset(kernel_lock_id: u32) -> u64 {
    HEADER_LEN + RECORD_LEN * kernel_lock_id as u64
}

fn format_header() -> String {
    format!(
        "{:>sw$} {:>nw$} {:>mw$} {:>pw$}\n",
        "STATUS",
        "RESOURCE_NAME",
        "LOCK_MODE",
        "VM_PID",
        sw = STATUS_WIDTH,
        nw = NAME_WIDTH,
        mw = MODE_WIDTH,
        pw = PID_WIDTH,
    )
}

fn format_line(record: &LockRecord, status: LockStatus) -> Result<String> {
    if record.name.len() > NAME_WIDTH {
        return Err(Error::InternalError(format!(
            "resource name `{}` exceeds the {NAME_WIDTH}-byte slot width",
            record.name
        )));
    }

    let line = format!(
        "{:>sw$} {:>nw$} {:>mw$} {:>pw$}\n",
        status.as_code(),
        record.name,
        record.mode.as_token(),
        record.owner_pid,
        sw = STATUS_WIDTH,
        nw = NAME_WIDTH,
        mw = MODE_WIDTH,
        pw = PID_WIDTH,
    );
    debug_assert_eq!(line.len() as u64, RECORD_LEN);
    Ok(line)
}

/// One line parsed out of the Record File during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// A well-formed, `Held` data line -- a candidate for adoption.
    Candidate {
        /// The already-hashed resource name.
        name: String,
        /// The mode the lock was held in before the crash.
        mode: LockMode,
        /// The pid of the VM that held it.
        owner_pid: libc::pid_t,
    },
    /// A line that was either `Released` or failed to parse. Dropped
    /// silently by recovery; kept here only so tests can assert on
    /// what got skipped and why.
    Skip,
}

fn parse_line(line: &str) -> ParsedLine {
    let mut fields = line.split_whitespace();
    let (Some(status), Some(name), Some(mode), Some(pid), None) = (
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
    ) else {
        return ParsedLine::Skip;
    };

    let Ok(status) = status.parse::<i32>() else {
        return ParsedLine::Skip;
    };
    let Some(LockStatus::Held) = LockStatus::from_code(status) else {
        return ParsedLine::Skip;
    };
    let Some(mode) = LockMode::from_token(mode) else {
        return ParsedLine::Skip;
    };
    let Ok(pid) = pid.parse::<libc::pid_t>() else {
        return ParsedLine::Skip;
    };
    if pid <= 0 {
        return ParsedLine::Skip;
    }

    ParsedLine::Candidate {
        name: name.to_string(),
        mode,
        owner_pid: pid,
    }
}

/// Operations on the on-disk Record File. This type carries no state
/// of its own -- every method takes the path or an already-open
/// handle explicitly, leaving serialization of concurrent access to
/// the caller (the Lock Registry's file mutex).
pub struct RecordFile;

impl RecordFile {
    /// Truncates `path`, writes the header, then appends one `Held`
    /// line per record, and `fdatasync`s before returning.
    pub fn initialize(path: &Path, records: &[LockRecord]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|err| Error::FatalInit(format!("unable to open `{}`: {err}", path.display())))?;

        file.write_all(format_header().as_bytes())?;
        for record in records {
            file.write_all(format_line(record, LockStatus::Held)?.as_bytes())?;
        }
        file.sync_data()?;
        Ok(())
    }

    /// Opens the Record File for in-place slot updates.
    pub fn open_read_write(path: &Path) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| {
                Error::Transient(std::io::Error::new(
                    err.kind(),
                    format!("unable to open `{}`: {err}", path.display()),
                ))
            })
    }

    /// Writes `record`'s slot with the given `status`, syncing data
    /// before returning. `file` must already be positioned for
    /// writes (any prior position is overridden by the internal
    /// seek).
    pub fn write_slot(file: &mut File, record: &LockRecord, status: LockStatus) -> Result<()> {
        let line = format_line(record, status)?;
        file.seek(SeekFrom::Start(slot_offset(record.kernel_lock_id)))?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Scans `path` line by line, skipping the header. Returns an
    /// empty vector (not an error) if `path` does not exist -- there
    /// is nothing to recover on a first run.
    pub fn scan(path: &Path) -> Result<Vec<ParsedLine>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::Transient(err)),
        };

        let mut lines = BufReader::new(file).lines();
        // Skip the header line; a missing header (empty file) is
        // simply an empty scan.
        if lines.next().is_none() {
            return Ok(Vec::new());
        }

        let mut parsed = Vec::new();
        for line in lines {
            let line = line?;
            parsed.push(parse_line(&line));
        }
        Ok(parsed)
    }
}
