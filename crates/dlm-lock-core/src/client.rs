use libc::pid_t;

use crate::error::Result;
use crate::lock::LockMode;

/// The seam between the Session Manager / Recovery Engine and the
/// kernel DLM.
///
/// The real implementation (`dlm-lock-dlm::DlmAdapter`) binds this to
/// `libdlm` over FFI; tests bind it to [`crate::testing::FakeDlm`]
/// so crash/adopt/purge scenarios can run without a real cluster.
pub trait DlmClient: Send + Sync {
    /// Synchronous, blocking lock request. `no_queue` maps to
    /// `LKF_NOQUEUE` -- the DLM refuses immediately instead of
    /// queuing when the lock is contended. Returns
    /// `(kernel_lock_id, sb_status)`; `sb_status != 0` (commonly
    /// `EAGAIN`) means the request was refused, not a call failure.
    fn lock_wait(&self, mode: LockMode, no_queue: bool, name: &str) -> Result<(u32, i32)>;

    /// Converts an existing lock (by kernel lock id) to `new_mode`.
    /// Used with `LockMode` meaning `LKM_NLMODE` (null) during release
    /// to strip adopt-time callback pointers before unlocking.
    fn convert_wait(&self, kernel_lock_id: u32, new_mode: Option<LockMode>, name: &str) -> Result<i32>;

    /// Unlocks a held lock by kernel lock id.
    fn unlock_wait(&self, kernel_lock_id: u32) -> Result<i32>;

    /// Attempts to adopt an orphaned lock left by a prior instance.
    /// Returns `(kernel_lock_id, sb_status)` on success. `EAGAIN`
    /// (incompatible orphan) and `ENOENT` (no orphan) are reported as
    /// `Error::Contention` / `Error::InternalError` respectively by
    /// the implementation, not folded into `sb_status`.
    fn adopt(&self, mode: LockMode, name: &str) -> Result<(u32, i32)>;

    /// Purges orphan locks owned by `node_id`. `pid == 0` means all
    /// pids on that node.
    fn purge(&self, node_id: u32, pid: pid_t) -> Result<()>;

    /// Closes the lockspace handle. One-way: every method above must
    /// fail with `Error::InternalError` afterward.
    fn close(&self) -> Result<()>;

    /// Checks that the lockspace handle is still open, without
    /// touching any lock. `Session::acquire`/`release` call this
    /// unconditionally before doing anything else, so a session whose
    /// resource list happens to be empty (or whose `acquire` is
    /// `REGISTER_ONLY`) still observes a prior `RESTRICT`-closed
    /// lockspace as `Error::InternalError("lockspace is not opened")`
    /// instead of silently succeeding.
    fn ensure_open(&self) -> Result<()>;

    /// Starts the background thread that receives DLM notifications
    /// (lock completion callbacks for adopted/orphaned locks).
    fn start_notification_thread(&self) -> Result<()>;
}

/// The seam between plugin init and the cluster membership service,
/// used only to learn the local node id for `purge`.
pub trait ClusterClient: Send + Sync {
    /// Returns this host's node id within the cluster.
    fn local_node_id(&self) -> Result<u32>;
}
