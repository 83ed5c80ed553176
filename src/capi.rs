//! `extern "C"` shim mirroring the function-pointer table
//! (`virLockDriverImpl`) the original C plugin registered with its
//! host daemon. Additive: the safe Rust API in the crate root is the
//! primary, tested surface; this module is a thin translation layer
//! (opaque handles, integer status codes) for hosts that can only
//! load a dynamic library.
//!
//! Gated behind the non-default `capi` feature and
//! `crate-type = ["cdylib", "rlib"]`.

use std::ffi::{c_char, CStr};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use dlm_lock_core::{AcquireFlags, ObjectType, ResourceFlags, ResourceType};

use crate::{PluginState, Session, SessionParams};

/// Status codes returned across the FFI boundary. Negative values are
/// errors; `0` is success.
pub const DLM_PLUGIN_OK: i32 = 0;
pub const DLM_PLUGIN_ERR_PRECONDITION: i32 = -1;
pub const DLM_PLUGIN_ERR_CONFIGURATION: i32 = -2;
pub const DLM_PLUGIN_ERR_CONTENTION: i32 = -3;
pub const DLM_PLUGIN_ERR_INTERNAL: i32 = -4;
/// Catch-all for anything that does not map to a more specific code,
/// including a panic caught at the boundary.
pub const DLM_PLUGIN_ERR_OTHER: i32 = -5;

/// Process-wide handle for the free-function C entry points. The safe
/// Rust API never uses a static; this one exists only because the C
/// ABI has no parameter slot to carry one, mirroring the file-scope
/// statics the original C plugin used for the same reason.
static STATE: OnceLock<Mutex<Option<Arc<PluginState>>>> = OnceLock::new();

fn state_cell() -> &'static Mutex<Option<Arc<PluginState>>> {
    STATE.get_or_init(|| Mutex::new(None))
}

fn status_of(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<dlm_lock_core::Error>() {
        Some(dlm_lock_core::Error::Precondition(_)) => DLM_PLUGIN_ERR_PRECONDITION,
        Some(dlm_lock_core::Error::Configuration(_)) => DLM_PLUGIN_ERR_CONFIGURATION,
        Some(dlm_lock_core::Error::Contention { .. }) => DLM_PLUGIN_ERR_CONTENTION,
        Some(dlm_lock_core::Error::InternalError(_)) => DLM_PLUGIN_ERR_INTERNAL,
        Some(_) => DLM_PLUGIN_ERR_OTHER,
        None => DLM_PLUGIN_ERR_OTHER,
    }
}

/// # Safety
/// `config_path` must be a valid, NUL-terminated C string for the
/// duration of this call.
#[no_mangle]
pub unsafe extern "C" fn dlm_plugin_init(version: u32, config_path: *const c_char, flags: u32) -> i32 {
    crate::init_logging();

    let mut guard = state_cell().lock().unwrap();
    if guard.is_some() {
        log::debug!("dlm_plugin_init called again; already initialized");
        return DLM_PLUGIN_OK;
    }

    if config_path.is_null() {
        return DLM_PLUGIN_ERR_CONFIGURATION;
    }
    // SAFETY: caller's contract, documented above.
    let config_path = match unsafe { CStr::from_ptr(config_path) }.to_str() {
        Ok(s) => s,
        Err(_) => return DLM_PLUGIN_ERR_CONFIGURATION,
    };

    match PluginState::init(version, Path::new(config_path), flags) {
        Ok(state) => {
            *guard = Some(state);
            DLM_PLUGIN_OK
        }
        Err(err) => {
            log::error!("dlm_plugin_init failed: {err:#}");
            status_of(&err)
        }
    }
}

#[no_mangle]
pub extern "C" fn dlm_plugin_deinit() -> i32 {
    let mut guard = state_cell().lock().unwrap();
    match guard.take() {
        Some(state) => match state.deinit() {
            Ok(()) => DLM_PLUGIN_OK,
            Err(err) => {
                log::error!("dlm_plugin_deinit failed: {err:#}");
                status_of(&err)
            }
        },
        None => DLM_PLUGIN_OK,
    }
}

/// Opaque session handle returned to the host. Ownership transfers to
/// the caller, who must eventually pass it to `dlm_plugin_free`.
pub struct DlmPluginSession(Session);

/// # Safety
/// `uuid` must point to 16 readable bytes. `name` must be a valid,
/// NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn dlm_plugin_new_session(
    uuid: *const u8,
    name: *const c_char,
    id: i32,
    pid: libc::pid_t,
    out_session: *mut *mut DlmPluginSession,
) -> i32 {
    let guard = state_cell().lock().unwrap();
    let Some(state) = guard.as_ref() else {
        return DLM_PLUGIN_ERR_PRECONDITION;
    };

    if uuid.is_null() || name.is_null() || out_session.is_null() {
        return DLM_PLUGIN_ERR_CONFIGURATION;
    }

    // SAFETY: caller's contract, documented above.
    let uuid_bytes = unsafe { std::slice::from_raw_parts(uuid, 16) };
    let mut uuid_array = [0u8; 16];
    uuid_array.copy_from_slice(uuid_bytes);

    // SAFETY: caller's contract, documented above.
    let name = match unsafe { CStr::from_ptr(name) }.to_str() {
        Ok(s) => s.to_string(),
        Err(_) => return DLM_PLUGIN_ERR_CONFIGURATION,
    };

    let params = SessionParams {
        uuid: Some(uuid_array),
        name: Some(name),
        id: Some(id),
        pid: Some(pid),
    };

    match state.new_session(ObjectType::Domain, params) {
        Ok(session) => {
            let boxed = Box::new(DlmPluginSession(session));
            // SAFETY: `out_session` is non-null per the check above.
            unsafe { *out_session = Box::into_raw(boxed) };
            DLM_PLUGIN_OK
        }
        Err(err) => {
            log::error!("dlm_plugin_new_session failed: {err:#}");
            status_of(&err)
        }
    }
}

/// # Safety
/// `session` must be a live pointer returned by
/// `dlm_plugin_new_session`. `name` must be a valid, NUL-terminated C
/// string.
#[no_mangle]
pub unsafe extern "C" fn dlm_plugin_add_resource(
    session: *mut DlmPluginSession,
    resource_type: u32,
    name: *const c_char,
    flags: u32,
) -> i32 {
    let Some(session) = (unsafe { session.as_mut() }) else {
        return DLM_PLUGIN_ERR_INTERNAL;
    };
    if name.is_null() {
        return DLM_PLUGIN_ERR_CONFIGURATION;
    }
    // SAFETY: caller's contract, documented above.
    let name = match unsafe { CStr::from_ptr(name) }.to_str() {
        Ok(s) => s,
        Err(_) => return DLM_PLUGIN_ERR_CONFIGURATION,
    };

    let ty = match resource_type {
        0 => ResourceType::Disk,
        1 => ResourceType::Lease,
        _ => return DLM_PLUGIN_ERR_CONFIGURATION,
    };
    let flags = ResourceFlags::from_bits_truncate(flags);

    match session.0.add_resource(ty, name, flags) {
        Ok(()) => DLM_PLUGIN_OK,
        Err(err) => status_of(&anyhow::Error::from(err)),
    }
}

/// # Safety
/// `session` must be a live pointer returned by `dlm_plugin_new_session`.
#[no_mangle]
pub unsafe extern "C" fn dlm_plugin_acquire(session: *mut DlmPluginSession, flags: u32) -> i32 {
    let Some(session) = (unsafe { session.as_mut() }) else {
        return DLM_PLUGIN_ERR_INTERNAL;
    };
    let flags = AcquireFlags::from_bits_truncate(flags);
    match session.0.acquire(flags) {
        Ok(()) => DLM_PLUGIN_OK,
        Err(err) => status_of(&anyhow::Error::from(err)),
    }
}

/// # Safety
/// `session` must be a live pointer returned by `dlm_plugin_new_session`.
#[no_mangle]
pub unsafe extern "C" fn dlm_plugin_release(session: *mut DlmPluginSession) -> i32 {
    let Some(session) = (unsafe { session.as_mut() }) else {
        return DLM_PLUGIN_ERR_INTERNAL;
    };
    match session.0.release() {
        Ok(()) => DLM_PLUGIN_OK,
        Err(err) => status_of(&anyhow::Error::from(err)),
    }
}

/// Always reports "no inquiry data" -- out parameters are left
/// untouched and `0` is returned.
///
/// # Safety
/// `session` must be a live pointer returned by `dlm_plugin_new_session`.
#[no_mangle]
pub unsafe extern "C" fn dlm_plugin_inquire(session: *const DlmPluginSession) -> i32 {
    let Some(session) = (unsafe { session.as_ref() }) else {
        return DLM_PLUGIN_ERR_INTERNAL;
    };
    debug_assert!(session.0.inquire().is_none());
    DLM_PLUGIN_OK
}

/// Consumes and frees the session handle.
///
/// # Safety
/// `session` must be a live pointer returned by `dlm_plugin_new_session`,
/// not previously freed.
#[no_mangle]
pub unsafe extern "C" fn dlm_plugin_free(session: *mut DlmPluginSession) -> i32 {
    if session.is_null() {
        return DLM_PLUGIN_OK;
    }
    // SAFETY: caller's contract, documented above.
    let boxed = unsafe { Box::from_raw(session) };
    boxed.0.free();
    DLM_PLUGIN_OK
}
