//! Raw `extern "C"` bindings to `libcpg` (Closed Process Group), the
//! corosync membership service this plugin uses only to learn the
//! local node id.

use std::os::raw::{c_int, c_void};

/// Opaque CPG connection handle (`cpg_handle_t`).
pub type CpgHandle = u64;

/// `CS_OK` from `<corosync/corotypes.h>`; any other value is an error.
pub const CS_OK: c_int = 1;

/// `CPG_MODEL_V1` from `<corosync/cpg.h>`.
pub const CPG_MODEL_V1: c_int = 1;

#[link(name = "cpg")]
extern "C" {
    pub fn cpg_model_initialize(
        handle: *mut CpgHandle,
        model: c_int,
        model_data: *const c_void,
        context: *mut c_void,
    ) -> c_int;

    pub fn cpg_local_get(handle: CpgHandle, local_nodeid: *mut u32) -> c_int;

    pub fn cpg_finalize(handle: CpgHandle) -> c_int;
}
