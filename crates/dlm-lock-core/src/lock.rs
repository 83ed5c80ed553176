use libc::pid_t;

/// Width in bytes of the fixed `RESOURCE_NAME` token in a record-file
/// slot. Callers hash variable-length resource names down to this
/// width before handing them to `add_resource`.
pub const RESOURCE_NAME_LEN: usize = 64;

/// The DLM lock mode a held resource is granted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// `PRMODE` — protected read, other shared readers allowed.
    Shared,
    /// `EXMODE` — exclusive.
    Exclusive,
}

impl LockMode {
    /// Token written into the `LOCK_MODE` column of a record-file line.
    pub fn as_token(self) -> &'static str {
        match self {
            LockMode::Shared => "PRMODE",
            LockMode::Exclusive => "EXMODE",
        }
    }

    /// Parses a record-file `LOCK_MODE` token, returning `None` for
    /// anything other than the two recognized tokens.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "PRMODE" => Some(LockMode::Shared),
            "EXMODE" => Some(LockMode::Exclusive),
            _ => None,
        }
    }
}

/// Whether a record-file slot describes a currently held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// The slot's data is live; a Registry entry should exist for it.
    Held,
    /// The slot has been released; the row is inert filler.
    Released,
}

impl LockStatus {
    /// The integer written into the `STATUS` column.
    pub fn as_code(self) -> i32 {
        match self {
            LockStatus::Held => 1,
            LockStatus::Released => 0,
        }
    }

    /// Parses a `STATUS` column value.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(LockStatus::Held),
            0 => Some(LockStatus::Released),
            _ => None,
        }
    }
}

/// One lock held (or formerly held) by this host, as tracked by the
/// Lock Registry and mirrored in the Record File.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Fixed-width, already-hashed resource name.
    pub name: String,
    /// The mode the lock is held in.
    pub mode: LockMode,
    /// The DLM-assigned lock id; opaque to us beyond using it to
    /// unlock/convert and to index the Record File.
    pub kernel_lock_id: u32,
    /// The pid of the VM process this lock was acquired for.
    pub owner_pid: pid_t,
}

impl LockRecord {
    /// Creates a new record. `name` is truncated/validated by the
    /// caller; this constructor does not itself enforce
    /// [`RESOURCE_NAME_LEN`] so record-file encoding can decide how to
    /// pad or reject an oversized name.
    pub fn new(name: impl Into<String>, mode: LockMode, kernel_lock_id: u32, owner_pid: pid_t) -> Self {
        Self {
            name: name.into(),
            mode,
            kernel_lock_id,
            owner_pid,
        }
    }

    /// True if `pid`, `name`, and `mode` all match this record -- the
    /// key `release` uses to find the Registry entry for a resource.
    pub fn matches(&self, pid: pid_t, name: &str, mode: LockMode) -> bool {
        self.owner_pid == pid && self.name == name && self.mode == mode
    }
}
