//! Per-VM session objects: the lifecycle that turns a VM's declared
//! resources into DLM lock acquisitions and back.
//!
//! A `Session` walks a small state machine --
//! `New -> Resourced -> Acquired -> Released -> Freed` -- checked at
//! the top of every method. Violating the order (calling `acquire`
//! twice, `release` before `acquire`, ...) is a caller bug, reported
//! as `Error::InternalError` rather than panicking, since the caller
//! is a host daemon we do not control.

use std::sync::Arc;

use dlm_lock_core::{
    AcquireFlags, DlmClient, Error, LockMode, ObjectType, PluginConfig, Resource, ResourceFlags,
    ResourceType, Result,
};
use dlm_lock_registry::Registry;
use libc::pid_t;

/// Identifying parameters for a new session. Each field is `Option`
/// because the host daemon may omit one, which must be rejected with
/// a specific message rather than silently defaulted.
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    /// 16-byte VM UUID.
    pub uuid: Option<[u8; 16]>,
    /// VM name, used only for diagnostics -- locking keys off resource
    /// name and pid, not this.
    pub name: Option<String>,
    /// Host-daemon-assigned numeric domain id.
    pub id: Option<i32>,
    /// Pid of the VM process the locks are acquired on behalf of.
    pub pid: Option<pid_t>,
}

/// The session lifecycle state, checked at the top of every `Session`
/// method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Just created; no resources declared yet.
    New,
    /// At least one resource declared via `add_resource`.
    Resourced,
    /// `acquire` has run successfully.
    Acquired,
    /// `release` has run successfully.
    Released,
    /// `free` has run; the session must not be used again.
    Freed,
}

/// Transient per-VM lock context. Created by the Plugin Surface for
/// each VM the host daemon starts, mutated through its lifecycle, and
/// dropped once the VM stops.
pub struct Session {
    uuid: [u8; 16],
    #[allow(dead_code)] // kept for parity with the host ABI; unused by locking logic
    name: String,
    #[allow(dead_code)]
    id: i32,
    pid: pid_t,
    state: SessionState,
    resources: Vec<Resource>,
    has_rw_disks: bool,
    registry: Arc<Registry>,
    dlm: Arc<dyn DlmClient>,
    config: Arc<PluginConfig>,
}

impl Session {
    /// Validates `params` and `object_type`, then creates a new
    /// session in [`SessionState::New`].
    pub fn create(
        object_type: ObjectType,
        params: SessionParams,
        registry: Arc<Registry>,
        dlm: Arc<dyn DlmClient>,
        config: Arc<PluginConfig>,
    ) -> Result<Self> {
        let ObjectType::Domain = object_type;

        let uuid = params
            .uuid
            .ok_or_else(|| Error::Configuration("session requires a uuid".to_string()))?;
        let name = params
            .name
            .ok_or_else(|| Error::Configuration("session requires a name".to_string()))?;
        let id = params
            .id
            .ok_or_else(|| Error::Configuration("session requires a domain id".to_string()))?;
        let pid = params
            .pid
            .ok_or_else(|| Error::Configuration("session requires a pid".to_string()))?;

        Ok(Self {
            uuid,
            name,
            id,
            pid,
            state: SessionState::New,
            resources: Vec::new(),
            has_rw_disks: false,
            registry,
            dlm,
            config,
        })
    }

    /// The VM's uuid, as supplied at creation.
    pub fn uuid(&self) -> [u8; 16] {
        self.uuid
    }

    fn require_state(&self, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InternalError(format!(
                "session method not valid in state {:?}",
                self.state
            )))
        }
    }

    /// Declares a resource the VM needs locked (or explicitly does
    /// not need locked, for a read-only disk).
    ///
    /// `name` is already a caller-hashed, fixed-width token; this
    /// method never hashes it itself.
    pub fn add_resource(&mut self, ty: ResourceType, name: &str, flags: ResourceFlags) -> Result<()> {
        self.require_state(&[SessionState::New, SessionState::Resourced])?;

        let mode = if flags.contains(ResourceFlags::SHARED) {
            LockMode::Shared
        } else {
            LockMode::Exclusive
        };

        match ty {
            ResourceType::Disk if flags.contains(ResourceFlags::READONLY) => {
                // Read-only disks need no cross-host exclusion.
            }
            ResourceType::Disk if !self.config.auto_disk_leases => {
                self.has_rw_disks = true;
            }
            ResourceType::Disk | ResourceType::Lease => {
                self.resources.push(Resource {
                    name: name.to_string(),
                    mode,
                });
            }
        }

        self.state = SessionState::Resourced;
        Ok(())
    }

    /// Acquires every declared resource's lock, in declaration order,
    /// rolling back everything this call acquired if any step fails.
    pub fn acquire(&mut self, flags: AcquireFlags) -> Result<()> {
        self.require_state(&[SessionState::New, SessionState::Resourced])?;
        self.dlm.ensure_open()?;

        if self.resources.is_empty() && self.has_rw_disks && self.config.require_lease_for_disks {
            return Err(Error::Configuration(
                "VM has read-write disks but no leases, and require_lease_for_disks is set"
                    .to_string(),
            ));
        }

        if flags.contains(AcquireFlags::REGISTER_ONLY) {
            log::debug!("register-only acquire: attaching to already-adopted locks");
            self.state = SessionState::Acquired;
            return Ok(());
        }

        let mut acquired = Vec::with_capacity(self.resources.len());
        for resource in &self.resources {
            match self.dlm.lock_wait(resource.mode, true, &resource.name) {
                Ok((kernel_lock_id, sb_status)) if sb_status == 0 => {
                    let record =
                        self.registry
                            .insert(resource.name.clone(), resource.mode, kernel_lock_id, self.pid);
                    if let Err(err) = self.registry.persist_held(&record) {
                        self.registry.remove(kernel_lock_id);
                        self.rollback(&acquired);
                        return Err(err);
                    }
                    acquired.push(record);
                }
                Ok((_, sb_status)) => {
                    let err = Self::classify_sb_status(sb_status, &resource.name);
                    self.rollback(&acquired);
                    return Err(err);
                }
                Err(err) => {
                    self.rollback(&acquired);
                    return Err(err);
                }
            }
        }

        if flags.contains(AcquireFlags::RESTRICT) {
            self.dlm.close()?;
        }

        self.state = SessionState::Acquired;
        Ok(())
    }

    fn classify_sb_status(sb_status: i32, resource: &str) -> Error {
        if sb_status == libc::EAGAIN {
            Error::Contention {
                resource: resource.to_string(),
            }
        } else {
            Error::Transient(std::io::Error::from_raw_os_error(sb_status))
        }
    }

    /// Unwinds everything acquired so far in this `acquire` call, in
    /// reverse order, on a best-effort basis -- failures here are
    /// logged, not propagated, since we're already on an error path.
    fn rollback(&self, acquired: &[dlm_lock_core::LockRecord]) {
        for record in acquired.iter().rev() {
            if let Err(err) = self.registry.persist_released(record) {
                log::warn!("rollback: failed to mark `{}` released: {err}", record.name);
            }
            self.registry.remove(record.kernel_lock_id);
            if let Err(err) = self.dlm.unlock_wait(record.kernel_lock_id) {
                log::warn!("rollback: failed to unlock `{}`: {err}", record.name);
            }
        }
    }

    /// Releases every declared resource's lock. A resource with no
    /// matching Registry entry is skipped silently -- it may have
    /// been adopted by a later instance and already lost.
    pub fn release(&mut self) -> Result<()> {
        self.require_state(&[SessionState::Acquired])?;
        self.dlm.ensure_open()?;

        for resource in &self.resources {
            let Some(record) = self
                .registry
                .take_matching(self.pid, &resource.name, resource.mode)
            else {
                continue;
            };

            self.dlm.convert_wait(record.kernel_lock_id, None, &resource.name)?;
            self.registry.persist_released(&record)?;
            self.dlm.unlock_wait(record.kernel_lock_id)?;
        }

        self.state = SessionState::Released;
        Ok(())
    }

    /// Always `None`: this plugin does not serialize lock state for
    /// migration.
    pub fn inquire(&self) -> Option<Vec<u8>> {
        None
    }

    /// Releases owned memory. Does not touch the Registry -- any
    /// locks still held by this session are left exactly where
    /// `release` left them (or, if `release` was never called, still
    /// held as orphans to be adopted on next start).
    pub fn free(mut self) {
        self.state = SessionState::Freed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlm_lock_core::testing::{FakeCluster, FakeDlm};
    use dlm_lock_core::PluginConfig;

    fn params() -> SessionParams {
        SessionParams {
            uuid: Some([1; 16]),
            name: Some("test-vm".to_string()),
            id: Some(1),
            pid: Some(4242),
        }
    }

    fn new_session(dlm: Arc<FakeDlm>, config: PluginConfig) -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::initialize(&dir.path().join("records"), Vec::new()).unwrap());
        let session = Session::create(ObjectType::Domain, params(), registry, dlm, Arc::new(config)).unwrap();
        (dir, session)
    }

    #[test]
    fn missing_pid_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::initialize(&dir.path().join("records"), Vec::new()).unwrap());
        let mut bad_params = params();
        bad_params.pid = None;

        let err = Session::create(
            ObjectType::Domain,
            bad_params,
            registry,
            Arc::new(FakeDlm::new()),
            Arc::new(PluginConfig::default()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn acquire_then_release_round_trips_clean() {
        let dlm = Arc::new(FakeDlm::new());
        let (_dir, mut session) = new_session(dlm.clone(), PluginConfig::default());

        session
            .add_resource(ResourceType::Disk, "disk1", ResourceFlags::empty())
            .unwrap();
        session.acquire(AcquireFlags::empty()).unwrap();
        assert_eq!(dlm.live_lock_count(), 1);

        session.release().unwrap();
        assert_eq!(dlm.live_lock_count(), 0);
        session.free();
    }

    #[test]
    fn readonly_disk_never_locks() {
        let dlm = Arc::new(FakeDlm::new());
        let (_dir, mut session) = new_session(dlm.clone(), PluginConfig::default());

        session
            .add_resource(ResourceType::Disk, "disk1", ResourceFlags::READONLY)
            .unwrap();
        session.acquire(AcquireFlags::empty()).unwrap();
        assert_eq!(dlm.live_lock_count(), 0);
    }

    #[test]
    fn rw_disk_without_lease_rejected_when_required() {
        let mut config = PluginConfig::default();
        config.auto_disk_leases = false;
        config.require_lease_for_disks = true;
        let dlm = Arc::new(FakeDlm::new());
        let (_dir, mut session) = new_session(dlm, config);

        session
            .add_resource(ResourceType::Disk, "disk1", ResourceFlags::empty())
            .unwrap();
        let err = session.acquire(AcquireFlags::empty()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn contention_rolls_back_earlier_acquisitions() {
        let dlm = Arc::new(FakeDlm::new());
        let (_dir, mut session) = new_session(dlm.clone(), PluginConfig::default());

        session
            .add_resource(ResourceType::Disk, "disk1", ResourceFlags::empty())
            .unwrap();
        session
            .add_resource(ResourceType::Disk, "disk2", ResourceFlags::empty())
            .unwrap();
        dlm.mark_contended("disk2");

        let err = session.acquire(AcquireFlags::empty()).unwrap_err();
        assert!(matches!(err, Error::Contention { .. }));
        assert_eq!(dlm.live_lock_count(), 0);
    }

    #[test]
    fn register_only_skips_acquisition() {
        let dlm = Arc::new(FakeDlm::new());
        let (_dir, mut session) = new_session(dlm.clone(), PluginConfig::default());

        session
            .add_resource(ResourceType::Disk, "disk1", ResourceFlags::empty())
            .unwrap();
        session.acquire(AcquireFlags::REGISTER_ONLY).unwrap();
        assert_eq!(dlm.live_lock_count(), 0);
    }

    #[test]
    fn restrict_closes_lockspace_after_acquire() {
        let dlm = Arc::new(FakeDlm::new());
        let (_dir, mut session) = new_session(dlm.clone(), PluginConfig::default());

        session
            .add_resource(ResourceType::Disk, "disk1", ResourceFlags::empty())
            .unwrap();
        session.acquire(AcquireFlags::RESTRICT).unwrap();

        let err = dlm.lock_wait(LockMode::Exclusive, true, "disk2").unwrap_err();
        assert!(matches!(err, Error::InternalError(_)));
    }

    #[test]
    fn register_only_acquire_fails_if_lockspace_already_closed() {
        let dlm = Arc::new(FakeDlm::new());
        let (_dir_a, mut restricting) = new_session(dlm.clone(), PluginConfig::default());
        restricting
            .add_resource(ResourceType::Disk, "restrict-disk", ResourceFlags::empty())
            .unwrap();
        restricting.acquire(AcquireFlags::RESTRICT).unwrap();

        let (_dir_b, mut reattaching) = new_session(dlm.clone(), PluginConfig::default());
        reattaching
            .add_resource(ResourceType::Disk, "already-adopted-disk", ResourceFlags::empty())
            .unwrap();
        let err = reattaching.acquire(AcquireFlags::REGISTER_ONLY).unwrap_err();
        assert!(matches!(err, Error::InternalError(_)));
    }

    #[test]
    fn release_with_no_resources_still_checks_lockspace_is_open() {
        let dlm = Arc::new(FakeDlm::new());
        let (_dir_a, mut readonly_session) = new_session(dlm.clone(), PluginConfig::default());
        readonly_session
            .add_resource(ResourceType::Disk, "readonly-disk", ResourceFlags::READONLY)
            .unwrap();
        readonly_session.acquire(AcquireFlags::empty()).unwrap();

        let (_dir_b, mut restricting) = new_session(dlm.clone(), PluginConfig::default());
        restricting
            .add_resource(ResourceType::Disk, "restrict-disk", ResourceFlags::empty())
            .unwrap();
        restricting.acquire(AcquireFlags::RESTRICT).unwrap();

        let err = readonly_session.release().unwrap_err();
        assert!(matches!(err, Error::InternalError(_)));
    }
}
