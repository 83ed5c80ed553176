//! End-to-end scenarios for the lock manager plugin, driven against
//! [`dlm_lock_core::testing::FakeDlm`]/`FakeCluster` since a real
//! kernel DLM/CPG pair is not available in a test environment.

use std::path::PathBuf;
use std::sync::Arc;

use dlm_lock_core::testing::{FakeCluster, FakeDlm};
use dlm_lock_core::{Error, PluginConfig};
use dlm_lock_plugin::{AcquireFlags, ObjectType, PluginState, ResourceFlags, ResourceType, SessionParams};

fn config_with_records_path(path: PathBuf) -> PluginConfig {
    let mut config = PluginConfig::default();
    config.lock_record_file_path = path.to_string_lossy().into_owned();
    config
}

fn session_params(pid: libc::pid_t) -> SessionParams {
    SessionParams {
        uuid: Some([7; 16]),
        name: Some("scenario-vm".to_string()),
        id: Some(1),
        pid: Some(pid),
    }
}

/// Scenario 1: cold start, one VM, two disks.
#[test]
fn cold_start_one_vm_two_disks() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_records_path(dir.path().join("records"));
    let dlm = Arc::new(FakeDlm::new());

    let state = PluginState::init_with(config, dlm.clone(), &FakeCluster::new(1), true).unwrap();

    let mut session = state.new_session(ObjectType::Domain, session_params(1000)).unwrap();
    session
        .add_resource(ResourceType::Disk, "disk-a", ResourceFlags::empty())
        .unwrap();
    session
        .add_resource(ResourceType::Disk, "disk-b", ResourceFlags::empty())
        .unwrap();
    session.acquire(AcquireFlags::empty()).unwrap();
    assert_eq!(dlm.live_lock_count(), 2);

    session.release().unwrap();
    assert_eq!(dlm.live_lock_count(), 0);
    session.free();
}

/// Scenario 2: contention between two sessions on the same node.
#[test]
fn contention_between_two_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_records_path(dir.path().join("records"));
    let dlm = Arc::new(FakeDlm::new());
    let state = PluginState::init_with(config, dlm.clone(), &FakeCluster::new(1), true).unwrap();

    let mut first = state.new_session(ObjectType::Domain, session_params(1001)).unwrap();
    first
        .add_resource(ResourceType::Disk, "shared-disk", ResourceFlags::empty())
        .unwrap();
    first.acquire(AcquireFlags::empty()).unwrap();

    let mut second = state.new_session(ObjectType::Domain, session_params(1002)).unwrap();
    second
        .add_resource(ResourceType::Disk, "shared-disk", ResourceFlags::empty())
        .unwrap();
    let err = second.acquire(AcquireFlags::empty()).unwrap_err();
    assert!(matches!(err, Error::Contention { .. }));

    first.release().unwrap();
    first.free();
}

/// Scenario 3: crash and adopt.
#[test]
fn crash_and_adopt() {
    let dir = tempfile::tempdir().unwrap();
    let records_path = dir.path().join("records");
    let config = config_with_records_path(records_path.clone());
    let dlm = Arc::new(FakeDlm::new());

    // First instance: acquire a lock, then "crash" without releasing.
    {
        let state = PluginState::init_with(config.clone(), dlm.clone(), &FakeCluster::new(1), true).unwrap();
        let mut session = state.new_session(ObjectType::Domain, session_params(2000)).unwrap();
        session
            .add_resource(ResourceType::Disk, "crash-disk", ResourceFlags::empty())
            .unwrap();
        session.acquire(AcquireFlags::empty()).unwrap();
        assert_eq!(dlm.live_lock_count(), 1);
        dlm.simulate_crash();
    }

    // Second instance, same Record File, not a fresh lockspace: the
    // lock should be adopted back into the Registry.
    let mut config = config;
    config.purge_lockspace = false;
    let state = PluginState::init_with(config, dlm.clone(), &FakeCluster::new(1), false).unwrap();
    assert_eq!(dlm.live_lock_count(), 1);
    state.deinit().unwrap();
}

/// Scenario 4: purge of dead-pid orphans.
#[test]
fn purge_of_dead_pid_orphans() {
    let dir = tempfile::tempdir().unwrap();
    let records_path = dir.path().join("records");
    let config = config_with_records_path(records_path.clone());
    let dlm = Arc::new(FakeDlm::new());

    {
        let state = PluginState::init_with(config.clone(), dlm.clone(), &FakeCluster::new(1), true).unwrap();
        let mut session = state.new_session(ObjectType::Domain, session_params(3000)).unwrap();
        session
            .add_resource(ResourceType::Disk, "abandoned-disk", ResourceFlags::empty())
            .unwrap();
        session.acquire(AcquireFlags::empty()).unwrap();
        dlm.simulate_crash();
    }

    // Mark the orphan unadoptable (simulating a name no surviving VM
    // declares) so recovery falls through to the broad purge.
    dlm.mark_contended("abandoned-disk");

    let mut config = config;
    config.purge_lockspace = true;
    let state = PluginState::init_with(config, dlm.clone(), &FakeCluster::new(9), false).unwrap();
    assert_eq!(dlm.live_lock_count(), 0);
    state.deinit().unwrap();
}

/// Scenario 5: register-only with adoption.
#[test]
fn register_only_with_adoption() {
    let dir = tempfile::tempdir().unwrap();
    let records_path = dir.path().join("records");
    let config = config_with_records_path(records_path.clone());
    let dlm = Arc::new(FakeDlm::new());

    {
        let state = PluginState::init_with(config.clone(), dlm.clone(), &FakeCluster::new(1), true).unwrap();
        let mut session = state.new_session(ObjectType::Domain, session_params(4000)).unwrap();
        session
            .add_resource(ResourceType::Disk, "reattach-disk", ResourceFlags::empty())
            .unwrap();
        session.acquire(AcquireFlags::empty()).unwrap();
        dlm.simulate_crash();
    }

    let mut config = config;
    config.purge_lockspace = false;
    let state = PluginState::init_with(config, dlm.clone(), &FakeCluster::new(1), false).unwrap();

    // The surviving VM reattaches without re-acquiring.
    let mut session = state.new_session(ObjectType::Domain, session_params(4000)).unwrap();
    session
        .add_resource(ResourceType::Disk, "reattach-disk", ResourceFlags::empty())
        .unwrap();
    session.acquire(AcquireFlags::REGISTER_ONLY).unwrap();
    assert_eq!(dlm.live_lock_count(), 1);
}

/// Scenario 6: restrict after acquire.
#[test]
fn restrict_after_acquire() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_records_path(dir.path().join("records"));
    let dlm = Arc::new(FakeDlm::new());
    let state = PluginState::init_with(config, dlm.clone(), &FakeCluster::new(1), true).unwrap();

    let mut session = state.new_session(ObjectType::Domain, session_params(5000)).unwrap();
    session
        .add_resource(ResourceType::Disk, "restrict-disk", ResourceFlags::empty())
        .unwrap();
    session.acquire(AcquireFlags::RESTRICT).unwrap();

    // The lockspace handle is now closed; any further DLM call fails.
    let mut other = state.new_session(ObjectType::Domain, session_params(5001)).unwrap();
    other
        .add_resource(ResourceType::Disk, "other-disk", ResourceFlags::empty())
        .unwrap();
    let err = other.acquire(AcquireFlags::empty()).unwrap_err();
    assert!(matches!(err, Error::InternalError(_)));
}
