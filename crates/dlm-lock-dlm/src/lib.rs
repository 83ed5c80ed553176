//! Safe facade over the kernel Distributed Lock Manager (`libdlm`).
//!
//! [`DlmAdapter`] is the only type in this crate other code should
//! touch; it owns the raw lockspace handle and translates between
//! [`dlm_lock_core::LockMode`] and the kernel's `LKM_*`/`LKF_*`
//! constants, classifying `EAGAIN`/`ENOENT` into the plugin's
//! [`dlm_lock_core::Error`] taxonomy the way [`sys`] callers must not
//! be trusted to do correctly by hand each time.

mod sys;

use std::ffi::CString;
use std::os::raw::c_void;
use std::sync::RwLock;

use dlm_lock_core::{DlmClient, Error, LockMode, Result};
use libc::pid_t;

use sys::{DlmLksb, DlmLsHandle};

/// Mode used for `0600`-style lockspace creation permissions.
const DLM_LOCKSPACE_MODE: libc::mode_t = 0o600;

/// Placeholder callback/bast/param pointer the kernel refuses to
/// accept as null on `adopt`. Never dereferenced; see the design
/// notes on orphan-adopt callback pointers.
const ADOPT_PLACEHOLDER: *mut c_void = 1 as *mut c_void;

fn mode_to_lkm(mode: LockMode) -> u32 {
    match mode {
        LockMode::Shared => sys::LKM_PRMODE,
        LockMode::Exclusive => sys::LKM_EXMODE,
    }
}

/// An opened or newly-created DLM lockspace handle. `Send`/`Sync`
/// because concurrent calls into `libdlm` on the same handle are
/// safe per that library's own contract; Rust cannot see that
/// guarantee in the raw pointer type, so it is asserted here.
struct LockspaceHandle(DlmLsHandle);
unsafe impl Send for LockspaceHandle {}
unsafe impl Sync for LockspaceHandle {}

/// Safe wrapper around a `libdlm` lockspace.
pub struct DlmAdapter {
    handle: RwLock<Option<LockspaceHandle>>,
}

impl DlmAdapter {
    /// Opens `name`, creating it if it does not already exist.
    ///
    /// Returns the adapter plus whether the lockspace had to be
    /// created -- the Recovery Engine uses this to skip
    /// scan/adopt/purge when the node has never held locks here.
    pub fn open_or_create_lockspace(name: &str) -> Result<(Self, bool)> {
        let c_name = CString::new(name)
            .map_err(|_| Error::Configuration("lockspace name contains a NUL byte".to_string()))?;

        // SAFETY: `c_name` stays alive for the duration of the call;
        // `dlm_open_lockspace` returns null on failure rather than
        // setting `errno` to a value we can distinguish "not found"
        // from other errors with, so we fall back to create on any
        // null return, matching the original plugin's behavior.
        let handle = unsafe { sys::dlm_open_lockspace(c_name.as_ptr()) };
        if !handle.is_null() {
            return Ok((
                Self {
                    handle: RwLock::new(Some(LockspaceHandle(handle))),
                },
                false,
            ));
        }

        // SAFETY: see above.
        let handle = unsafe { sys::dlm_create_lockspace(c_name.as_ptr(), DLM_LOCKSPACE_MODE) };
        if handle.is_null() {
            return Err(Error::FatalInit(format!(
                "unable to open or create DLM lockspace `{name}`"
            )));
        }

        Ok((
            Self {
                handle: RwLock::new(Some(LockspaceHandle(handle))),
            },
            true,
        ))
    }

    fn with_handle<T>(&self, f: impl FnOnce(DlmLsHandle) -> Result<T>) -> Result<T> {
        let guard = self.handle.read().unwrap();
        match &*guard {
            Some(handle) => f(handle.0),
            None => Err(Error::InternalError(
                "lockspace is not opened".to_string(),
            )),
        }
    }

    fn pack_name(name: &str) -> Vec<u8> {
        name.as_bytes().to_vec()
    }
}

impl DlmClient for DlmAdapter {
    fn lock_wait(&self, mode: LockMode, no_queue: bool, name: &str) -> Result<(u32, i32)> {
        self.with_handle(|handle| {
            let bytes = Self::pack_name(name);
            let mut lksb = DlmLksb::default();
            let mut flags = sys::LKF_PERSISTENT;
            if no_queue {
                flags |= sys::LKF_NOQUEUE;
            }

            // SAFETY: `bytes` outlives the call; `lksb` is valid for
            // writes of its full size; the callback pointers are
            // unused for a plain (non-orphan) lock so are passed as
            // null, which `dlm_ls_lock_wait` (unlike adopt) accepts.
            let rv = unsafe {
                sys::dlm_ls_lock_wait(
                    handle,
                    mode_to_lkm(mode),
                    &mut lksb,
                    flags,
                    bytes.as_ptr() as *const c_void,
                    bytes.len() as i32,
                    0,
                    std::ptr::null(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            };

            if rv != 0 {
                return Err(Error::Transient(std::io::Error::last_os_error()));
            }
            Ok((lksb.sb_lkid, lksb.sb_status))
        })
    }

    fn convert_wait(&self, kernel_lock_id: u32, new_mode: Option<LockMode>, name: &str) -> Result<i32> {
        self.with_handle(|handle| {
            let bytes = Self::pack_name(name);
            let mut lksb = DlmLksb {
                sb_lkid: kernel_lock_id,
                ..Default::default()
            };
            let mode = new_mode.map(mode_to_lkm).unwrap_or(sys::LKM_NLMODE);

            // SAFETY: see `lock_wait`.
            let rv = unsafe {
                sys::dlm_ls_lock_wait(
                    handle,
                    mode,
                    &mut lksb,
                    sys::LKF_CONVERT,
                    bytes.as_ptr() as *const c_void,
                    bytes.len() as i32,
                    0,
                    std::ptr::null(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            };

            if rv != 0 {
                return Err(Error::Transient(std::io::Error::last_os_error()));
            }
            Ok(lksb.sb_status)
        })
    }

    fn unlock_wait(&self, kernel_lock_id: u32) -> Result<i32> {
        self.with_handle(|handle| {
            let mut lksb = DlmLksb::default();

            // SAFETY: `lksb` is valid for writes of its full size.
            let rv = unsafe { sys::dlm_ls_unlock_wait(handle, kernel_lock_id, 0, &mut lksb) };

            if rv != 0 {
                return Err(Error::Transient(std::io::Error::last_os_error()));
            }
            Ok(lksb.sb_status)
        })
    }

    fn adopt(&self, mode: LockMode, name: &str) -> Result<(u32, i32)> {
        self.with_handle(|handle| {
            let bytes = Self::pack_name(name);
            let mut lksb = DlmLksb::default();

            // SAFETY: `bytes` outlives the call; the kernel rejects
            // null ast/bast/param pointers on an orphan-adopt, so the
            // never-dereferenced placeholder is passed instead. See
            // the design notes on orphan-adopt callback pointers.
            let rv = unsafe {
                sys::dlm_ls_lockx(
                    handle,
                    mode_to_lkm(mode),
                    &mut lksb,
                    sys::LKF_PERSISTENT | sys::LKF_ORPHAN,
                    bytes.as_ptr() as *const c_void,
                    bytes.len() as i32,
                    0,
                    ADOPT_PLACEHOLDER,
                    ADOPT_PLACEHOLDER,
                    ADOPT_PLACEHOLDER,
                    std::ptr::null_mut(),
                    std::ptr::null(),
                )
            };

            if rv != 0 {
                let errno = std::io::Error::last_os_error()
                    .raw_os_error()
                    .unwrap_or(0);
                return match errno {
                    libc::EAGAIN => Err(Error::Contention {
                        resource: name.to_string(),
                    }),
                    libc::ENOENT => Err(Error::InternalError(format!("no orphan for `{name}`"))),
                    _ => Err(Error::Transient(std::io::Error::last_os_error())),
                };
            }
            Ok((lksb.sb_lkid, lksb.sb_status))
        })
    }

    fn purge(&self, node_id: u32, pid: pid_t) -> Result<()> {
        self.with_handle(|handle| {
            // SAFETY: no pointers cross the FFI boundary here besides
            // the handle itself.
            let rv = unsafe { sys::dlm_ls_purge(handle, node_id as i32, pid) };
            if rv != 0 {
                return Err(Error::Transient(std::io::Error::last_os_error()));
            }
            Ok(())
        })
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.handle.write().unwrap();
        if let Some(handle) = guard.take() {
            // SAFETY: `handle.0` was returned by `dlm_{open,create}_lockspace`
            // and has not yet been closed (we just took it out of the
            // `Option`, so no other call can race this one).
            let rv = unsafe { sys::dlm_close_lockspace(handle.0) };
            if rv != 0 {
                log::warn!("dlm_close_lockspace returned {rv}");
            }
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        self.with_handle(|_| Ok(()))
    }

    fn start_notification_thread(&self) -> Result<()> {
        self.with_handle(|handle| {
            // SAFETY: `handle` is a live lockspace handle.
            let rv = unsafe { sys::dlm_ls_pthread_init(handle) };
            if rv != 0 {
                let errno = std::io::Error::last_os_error()
                    .raw_os_error()
                    .unwrap_or(0);
                if errno != libc::EEXIST {
                    return Err(Error::FatalInit(
                        "unable to initialize DLM notification thread".to_string(),
                    ));
                }
            }
            Ok(())
        })
    }
}
