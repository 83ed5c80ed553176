//! In-memory test doubles for [`crate::DlmClient`] and
//! [`crate::ClusterClient`], enabled by the `testing` feature.
//!
//! These model just enough of the real DLM/CPG semantics to drive the
//! end-to-end scenarios the plugin crate's integration tests exercise:
//! granting/refusing locks, orphaning them across a simulated
//! "restart", adopting, and purging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use libc::pid_t;

use crate::client::{ClusterClient, DlmClient};
use crate::error::{Error, Result};
use crate::lock::LockMode;

#[derive(Debug, Clone)]
struct FakeLock {
    mode: LockMode,
    name: String,
    /// `None` once orphaned by `FakeDlm::simulate_crash`.
    owner_pid: Option<pid_t>,
}

/// An in-memory stand-in for the kernel DLM.
///
/// Held locks live in a table keyed by kernel lock id. Calling
/// [`FakeDlm::simulate_crash`] clears the "owned" marker on every
/// lock without actually releasing it, modeling what happens to
/// `PERSISTENT` locks when the process holding them dies: the lock
/// survives in the kernel as an orphan, waiting to be adopted.
#[derive(Default)]
pub struct FakeDlm {
    locks: Mutex<HashMap<u32, FakeLock>>,
    next_id: AtomicU32,
    closed: AtomicBool,
    /// Names that will be refused with `EAGAIN` on the next
    /// `lock_wait`/`adopt` call, simulating contention.
    contended: Mutex<Vec<String>>,
}

impl FakeDlm {
    /// Creates an empty fake lockspace.
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::InternalError("lockspace is not opened".to_string()));
        }
        Ok(())
    }

    /// Marks `name` as contended: the next attempt to lock or adopt it
    /// is refused with `EAGAIN` semantics.
    pub fn mark_contended(&self, name: &str) {
        self.contended.lock().unwrap().push(name.to_string());
    }

    fn take_contended(&self, name: &str) -> bool {
        let mut contended = self.contended.lock().unwrap();
        if let Some(pos) = contended.iter().position(|n| n == name) {
            contended.remove(pos);
            true
        } else {
            false
        }
    }

    /// Simulates the host process crashing: every currently-held lock
    /// becomes an orphan (still present in the kernel, but with no
    /// live owner), the way `PERSISTENT` locks behave when libdlm's
    /// owning process dies.
    pub fn simulate_crash(&self) {
        let mut locks = self.locks.lock().unwrap();
        for lock in locks.values_mut() {
            lock.owner_pid = None;
        }
    }

    /// Number of locks still tracked by the fake (held or orphaned).
    pub fn live_lock_count(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

impl DlmClient for FakeDlm {
    fn lock_wait(&self, mode: LockMode, _no_queue: bool, name: &str) -> Result<(u32, i32)> {
        self.check_open()?;
        if self.take_contended(name) {
            return Ok((0, libc::EAGAIN));
        }

        let mut locks = self.locks.lock().unwrap();
        if locks.values().any(|l| l.name == name && l.owner_pid.is_some()) {
            return Ok((0, libc::EAGAIN));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        locks.insert(
            id,
            FakeLock {
                mode,
                name: name.to_string(),
                owner_pid: Some(0),
            },
        );
        Ok((id, 0))
    }

    fn convert_wait(&self, kernel_lock_id: u32, new_mode: Option<LockMode>, _name: &str) -> Result<i32> {
        self.check_open()?;
        let mut locks = self.locks.lock().unwrap();
        match locks.get_mut(&kernel_lock_id) {
            Some(lock) => {
                if let Some(mode) = new_mode {
                    lock.mode = mode;
                }
                Ok(0)
            }
            None => Err(Error::InternalError(format!(
                "no such lock id {kernel_lock_id}"
            ))),
        }
    }

    fn unlock_wait(&self, kernel_lock_id: u32) -> Result<i32> {
        self.check_open()?;
        let mut locks = self.locks.lock().unwrap();
        locks.remove(&kernel_lock_id);
        Ok(0)
    }

    fn adopt(&self, mode: LockMode, name: &str) -> Result<(u32, i32)> {
        self.check_open()?;
        if self.take_contended(name) {
            return Err(Error::Contention {
                resource: name.to_string(),
            });
        }

        let mut locks = self.locks.lock().unwrap();
        let existing = locks.iter_mut().find(|(_, l)| l.name == name && l.owner_pid.is_none());
        match existing {
            Some((id, lock)) => {
                if lock.mode != mode {
                    return Err(Error::Contention {
                        resource: name.to_string(),
                    });
                }
                lock.owner_pid = Some(0);
                Ok((*id, 0))
            }
            None => Err(Error::InternalError(format!("no orphan for `{name}`"))),
        }
    }

    fn purge(&self, _node_id: u32, pid: pid_t) -> Result<()> {
        self.check_open()?;
        // This fake doesn't track which pid originally held an
        // orphaned lock, so a targeted (`pid != 0`) purge is a no-op
        // here; only the broad `pid == 0` "all orphans on this node"
        // purge the end-to-end scenarios actually exercise is modeled.
        let mut locks = self.locks.lock().unwrap();
        locks.retain(|_, lock| match lock.owner_pid {
            Some(_) => true,
            None => pid != 0,
        });
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        self.check_open()
    }

    fn start_notification_thread(&self) -> Result<()> {
        self.check_open()
    }
}

/// An in-memory stand-in for the CPG membership service, always
/// reporting a fixed node id.
pub struct FakeCluster {
    node_id: u32,
}

impl FakeCluster {
    /// Creates a fake cluster adapter that reports `node_id` as the
    /// local node.
    pub fn new(node_id: u32) -> Self {
        Self { node_id }
    }
}

impl ClusterClient for FakeCluster {
    fn local_node_id(&self) -> Result<u32> {
        Ok(self.node_id)
    }
}
