//! Cluster-wide VM disk/lease lock manager plugin.
//!
//! This is the Plugin Surface: the boundary the host virtualization
//! daemon actually calls into. It wires together the five lower
//! layers -- DLM Adapter, Cluster Adapter, Record File, Lock Registry,
//! Recovery Engine -- behind a single [`PluginState`] handle, and
//! hosts the per-VM [`Session`] lifecycle on top of it.
//!
//! Everywhere below this boundary returns
//! [`dlm_lock_core::Error`]/[`dlm_lock_core::Result`]; this crate is
//! where those get wrapped in [`anyhow::Result`] for the host daemon,
//! the same split `cargo-component`'s CLI binary makes over
//! `cargo-component-core`'s typed errors.

#[cfg(feature = "capi")]
pub mod capi;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{bail, ensure, Context, Result};

use dlm_lock_cluster::ClusterAdapter;
use dlm_lock_core::{ClusterClient, DlmClient, PluginConfig};
pub use dlm_lock_core::{AcquireFlags, Error, LockMode, ObjectType, PluginConfig as Config, ResourceFlags, ResourceType};
use dlm_lock_dlm::DlmAdapter;
use dlm_lock_registry::Registry;
pub use dlm_lock_session::{Session, SessionParams, SessionState};

/// Path whose existence gates plugin init: presence means
/// `dlm_controld` has joined this node to a DLM cluster.
const DLM_CLUSTER_NAME_PATH: &str = "/sys/kernel/config/dlm/cluster/cluster_name";

/// Environment variable consulted by [`init_logging`] when the plugin
/// is used standalone (outside a host daemon that installs its own
/// `log` subscriber first).
pub const LOG_ENV_VAR: &str = "DLM_LOCK_LOG";

/// Installs an [`env_logger`] subscriber reading [`LOG_ENV_VAR`].
/// Safe to call more than once; only the first call has any effect.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::new().filter_or(LOG_ENV_VAR, "warn")).try_init();
}

/// Process-wide record of the currently-initialized [`PluginState`],
/// used only to make [`PluginState::init`] idempotent. This is the one
/// place the safe API keeps a `static`, for the same reason the
/// `capi` shim needs one: the host daemon is expected to call `init`
/// more than once (once per plugin load) and a second call must
/// return the existing state without rerunning setup, not silently
/// clobber it by running recovery and rewriting the Record File out
/// from under sessions still using the first instance.
static PROCESS_STATE: OnceLock<Mutex<Option<Arc<PluginState>>>> = OnceLock::new();

fn process_state() -> &'static Mutex<Option<Arc<PluginState>>> {
    PROCESS_STATE.get_or_init(|| Mutex::new(None))
}

/// Process-wide plugin state: the opened lockspace, the loaded
/// config, and the Lock Registry recovery populated. Held by the host
/// daemon as an `Arc` and passed to every session operation; modeled
/// as an explicit value rather than a `static` (see DESIGN.md for the
/// Open Question this resolves).
pub struct PluginState {
    config: Arc<PluginConfig>,
    dlm: Arc<dyn DlmClient>,
    registry: Arc<Registry>,
}

impl PluginState {
    /// Initializes the plugin: checks preconditions, loads
    /// configuration, opens or creates the DLM lockspace, starts the
    /// notification thread, and runs the Recovery Engine.
    ///
    /// Idempotent: a second call returns the existing state without
    /// rerunning any of that setup, since the locks acquired under the
    /// first call are still live (not orphaned) and rerunning recovery
    /// would see no adoptable orphans for them and rewrite the Record
    /// File with those slots missing, corrupting it out from under any
    /// `Session`s still using the first call's state.
    ///
    /// `flags` is reserved by the host ABI and must be `0`.
    pub fn init(version: u32, config_path: &Path, flags: u32) -> Result<Arc<Self>> {
        log::debug!("initializing dlm-lock-plugin (host API version {version})");
        ensure!(flags == 0, "init does not accept any flags (got {flags})");

        let mut guard = process_state().lock().unwrap();
        if let Some(existing) = guard.as_ref() {
            log::debug!("dlm-lock-plugin already initialized; returning existing state");
            return Ok(Arc::clone(existing));
        }

        // SAFETY: `geteuid` takes no arguments and has no preconditions.
        let euid = unsafe { libc::geteuid() };
        if euid != 0 {
            bail!(Error::Precondition(
                "the DLM lock manager plugin must run as uid 0".to_string()
            ));
        }

        if !Path::new(DLM_CLUSTER_NAME_PATH).exists() {
            bail!(Error::FatalInit(format!(
                "{DLM_CLUSTER_NAME_PATH} does not exist; is dlm_controld running?"
            )));
        }

        let config = PluginConfig::load(config_path)
            .with_context(|| format!("loading configuration from {}", config_path.display()))?;

        let (dlm, lockspace_fresh) = DlmAdapter::open_or_create_lockspace(&config.lockspace_name)
            .context("opening or creating the DLM lockspace")?;
        dlm.start_notification_thread()
            .context("starting the DLM notification thread")?;

        let cluster = ClusterAdapter::new();
        let state = Self::init_with(config, Arc::new(dlm), &cluster, lockspace_fresh)?;
        *guard = Some(Arc::clone(&state));
        Ok(state)
    }

    /// The shared logic behind [`Self::init`], parameterized over the
    /// DLM/cluster adapters so the integration tests in `tests/` can
    /// exercise it against [`dlm_lock_core::testing::FakeDlm`] and
    /// [`dlm_lock_core::testing::FakeCluster`] without a real kernel.
    pub fn init_with(
        config: PluginConfig,
        dlm: Arc<dyn DlmClient>,
        cluster: &dyn ClusterClient,
        lockspace_fresh: bool,
    ) -> Result<Arc<Self>> {
        let record_file_path = PathBuf::from(&config.lock_record_file_path);
        let registry = dlm_lock_recovery::recover(&record_file_path, lockspace_fresh, &config, dlm.as_ref(), cluster)
            .context("running startup recovery")?;

        Ok(Arc::new(Self {
            config: Arc::new(config),
            dlm,
            registry: Arc::new(registry),
        }))
    }

    /// Closes the lockspace. Outstanding locks are deliberately left
    /// as orphans -- they are adopted on the next `init` rather than
    /// unlocked here, since unlocking would release cluster-wide
    /// mutual exclusion a still-running VM elsewhere may depend on.
    ///
    /// Clears the idempotency guard [`Self::init`] set, if it still
    /// points at this instance, so a later `init` call actually reruns
    /// setup instead of handing back a now-closed state.
    pub fn deinit(&self) -> Result<()> {
        self.dlm.close().context("closing the DLM lockspace")?;

        let mut guard = process_state().lock().unwrap();
        if matches!(guard.as_ref(), Some(state) if std::ptr::eq(state.as_ref(), self)) {
            guard.take();
        }
        Ok(())
    }

    /// Creates a new per-VM session. Only `ObjectType::Domain` is
    /// supported by this plugin.
    pub fn new_session(&self, object_type: ObjectType, params: SessionParams) -> Result<Session> {
        Ok(Session::create(
            object_type,
            params,
            Arc::clone(&self.registry),
            Arc::clone(&self.dlm),
            Arc::clone(&self.config),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlm_lock_core::testing::{FakeCluster, FakeDlm};

    #[test]
    fn init_with_fresh_lockspace_skips_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PluginConfig::default();
        config.lock_record_file_path = dir.path().join("records").to_string_lossy().into_owned();

        let state = PluginState::init_with(config, Arc::new(FakeDlm::new()), &FakeCluster::new(1), true).unwrap();
        state.deinit().unwrap();
    }

    #[test]
    fn rejects_nonzero_flags() {
        let dir = tempfile::tempdir().unwrap();
        let err = PluginState::init(1, &dir.path().join("config"), 7).unwrap_err();
        assert!(err.to_string().contains("flags"));
    }

    #[test]
    fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PluginConfig::default();
        config.lock_record_file_path = dir.path().join("records").to_string_lossy().into_owned();

        let seeded = PluginState::init_with(config, Arc::new(FakeDlm::new()), &FakeCluster::new(1), true).unwrap();
        *process_state().lock().unwrap() = Some(Arc::clone(&seeded));

        let returned = PluginState::init(1, &dir.path().join("config"), 0).unwrap();
        assert!(Arc::ptr_eq(&seeded, &returned));

        process_state().lock().unwrap().take();
    }
}
