//! Safe facade over the CPG cluster-membership service.
//!
//! The plugin only ever needs one fact from the cluster: the local
//! node id, used to scope the orphan purge in the Recovery Engine to
//! "this node". [`ClusterAdapter`] opens a CPG connection, reads that
//! id, and finalizes the connection again before returning, the same
//! scoped-acquisition shape [`dlm_lock_dlm::DlmAdapter`]'s callers use
//! for the lockspace, just shorter-lived.

mod sys;

use dlm_lock_core::{ClusterClient, Error, Result};

use sys::CpgHandle;

/// RAII guard that finalizes the CPG handle on drop, so a failure
/// partway through `local_node_id` still releases the connection --
/// mirroring the original `cleanup:`-label pattern in the C source
/// without needing a `goto`.
struct CpgGuard(CpgHandle);

impl Drop for CpgGuard {
    fn drop(&mut self) {
        // SAFETY: `self.0` was initialized by `cpg_model_initialize`.
        let rv = unsafe { sys::cpg_finalize(self.0) };
        if rv != sys::CS_OK {
            log::warn!("unable to finalize the CPG service (rv={rv})");
        }
    }
}

/// Safe facade over `libcpg`.
#[derive(Debug, Default)]
pub struct ClusterAdapter;

impl ClusterAdapter {
    /// Creates a new adapter. Construction itself does not touch the
    /// cluster; each call to [`ClusterClient::local_node_id`] opens
    /// and closes its own CPG connection.
    pub fn new() -> Self {
        Self
    }
}

impl ClusterClient for ClusterAdapter {
    fn local_node_id(&self) -> Result<u32> {
        let mut handle: CpgHandle = 0;

        // SAFETY: `handle` is a valid out-pointer; `model_data` and
        // `context` are unused by the `CPG_MODEL_V1` model so null is
        // correct.
        let rv = unsafe {
            sys::cpg_model_initialize(
                &mut handle,
                sys::CPG_MODEL_V1,
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        if rv != sys::CS_OK {
            return Err(Error::FatalInit(
                "unable to create a new connection to the CPG service".to_string(),
            ));
        }

        let guard = CpgGuard(handle);

        let mut node_id: u32 = 0;
        // SAFETY: `guard.0` is the handle just initialized above;
        // `node_id` is a valid out-pointer.
        let rv = unsafe { sys::cpg_local_get(guard.0, &mut node_id) };
        if rv != sys::CS_OK {
            return Err(Error::FatalInit(
                "unable to get the local node id by the CPG service".to_string(),
            ));
        }

        log::debug!("the local nodeid={node_id}");
        Ok(node_id)
    }
}
