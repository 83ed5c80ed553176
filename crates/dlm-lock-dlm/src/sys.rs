//! Raw `extern "C"` bindings to `libdlm`.
//!
//! This mirrors the handful of entry points `<libdlm.h>` exposes for
//! lockspace management and synchronous (`_wait`) lock operations.
//! Nothing here is safe to call directly; [`crate::DlmAdapter`] is the
//! safe wrapper everything else in this workspace uses.

use std::os::raw::{c_char, c_int, c_void};

use libc::{mode_t, pid_t};

/// Opaque lockspace handle (`dlm_lshandle_t` in `<libdlm.h>`).
pub type DlmLsHandle = *mut c_void;

/// Status block filled in by `dlm_ls_*` calls (`struct dlm_lksb`).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct DlmLksb {
    pub sb_status: c_int,
    pub sb_lkid: u32,
    pub sb_flags: c_char,
    pub sb_lvbptr: *mut c_char,
}

// Lock modes, matching `<libdlm.h>`'s `LKM_*MODE` constants.
pub const LKM_NLMODE: u32 = 0;
pub const LKM_PRMODE: u32 = 3;
pub const LKM_EXMODE: u32 = 5;

// Lock flags, matching `<libdlm.h>`'s `LKF_*` constants.
pub const LKF_NOQUEUE: u32 = 0x0000_0001;
pub const LKF_CONVERT: u32 = 0x0000_0004;
pub const LKF_PERSISTENT: u32 = 0x0000_0080;
pub const LKF_ORPHAN: u32 = 0x0004_0000;

#[link(name = "dlm")]
extern "C" {
    pub fn dlm_create_lockspace(name: *const c_char, mode: mode_t) -> DlmLsHandle;
    pub fn dlm_open_lockspace(name: *const c_char) -> DlmLsHandle;
    pub fn dlm_close_lockspace(ls: DlmLsHandle) -> c_int;
    pub fn dlm_ls_pthread_init(ls: DlmLsHandle) -> c_int;

    pub fn dlm_ls_lock_wait(
        ls: DlmLsHandle,
        mode: u32,
        lksb: *mut DlmLksb,
        flags: u32,
        name: *const c_void,
        namelen: c_int,
        parent: u32,
        xid: *const c_char,
        bastarg: *mut c_void,
        bastaddr: *mut c_void,
    ) -> c_int;

    pub fn dlm_ls_lockx(
        ls: DlmLsHandle,
        mode: u32,
        lksb: *mut DlmLksb,
        flags: u32,
        name: *const c_void,
        namelen: c_int,
        parent: u32,
        astarg: *mut c_void,
        astaddr: *mut c_void,
        bastaddr: *mut c_void,
        range: *mut c_void,
        xid: *const c_char,
    ) -> c_int;

    pub fn dlm_ls_unlock_wait(ls: DlmLsHandle, lkid: u32, flags: u32, lksb: *mut DlmLksb) -> c_int;

    pub fn dlm_ls_purge(ls: DlmLsHandle, nodeid: c_int, pid: pid_t) -> c_int;
}
