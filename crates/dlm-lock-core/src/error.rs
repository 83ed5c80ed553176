use thiserror::Error;

/// Errors surfaced by the lock manager plugin.
///
/// Variants line up with the error kinds the plugin surface must
/// distinguish: configuration mistakes, missing preconditions, lock
/// contention the caller can retry, transient I/O failures that
/// trigger a rollback, and unrecoverable initialization failures.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed config, missing required session params, or an
    /// unknown resource type.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A precondition the plugin requires was not met (not root, DLM
    /// not running, lockspace already closed).
    #[error("precondition not met: {0}")]
    Precondition(String),

    /// The DLM refused to grant a lock on `resource` (`EAGAIN`). The
    /// caller may retry.
    #[error("lock on `{resource}` could not be granted")]
    Contention {
        /// The resource name (already hashed/fixed-width) that was contended.
        resource: String,
    },

    /// An I/O failure occurred mid-acquire or mid-release; any
    /// partial progress has been rolled back.
    #[error("transient I/O failure: {0}")]
    Transient(#[from] std::io::Error),

    /// Initialization cannot proceed (lockspace could not be opened
    /// or created, record file could not be created).
    #[error("fatal initialization error: {0}")]
    FatalInit(String),

    /// A state the plugin should never reach if callers respect the
    /// session state machine and the lockspace lifecycle.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Convenience alias used throughout the plugin crates.
pub type Result<T> = std::result::Result<T, Error>;
