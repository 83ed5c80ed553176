//! Startup recovery: adopt orphan locks left by a prior instance,
//! purge what nothing can reclaim, and rebuild the Record File from
//! whatever survives.
//!
//! Runs once, after the lockspace is open but before the plugin
//! accepts any session work. A record the kernel no longer recognizes
//! must never wedge startup, so every per-record failure here is
//! logged and dropped rather than propagated -- the one exception is
//! the cluster lookup and the final file rewrite, which are fatal
//! since without them the Registry would not reflect reality at all.

use std::path::Path;

use dlm_lock_core::{ClusterClient, DlmClient, Error, LockRecord, PluginConfig, Result};
use dlm_lock_recordfile::{ParsedLine, RecordFile};
use dlm_lock_registry::Registry;

/// Runs the recovery algorithm and returns the `Registry` it
/// produced, ready for session work.
///
/// `lockspace_freshly_created` comes from
/// `DlmAdapter::open_or_create_lockspace`: when true, this node has
/// never held locks in this lockspace before, so scan/adopt/purge are
/// skipped entirely and an empty Record File is written.
pub fn recover(
    record_file_path: &Path,
    lockspace_freshly_created: bool,
    config: &PluginConfig,
    dlm: &dyn DlmClient,
    cluster: &dyn ClusterClient,
) -> Result<Registry> {
    if lockspace_freshly_created {
        log::info!("lockspace was freshly created; nothing to recover");
        return Registry::initialize(record_file_path, Vec::new());
    }

    let recovered = adopt_surviving_locks(record_file_path, dlm)?;

    if config.purge_lockspace {
        let node_id = cluster.local_node_id()?;
        dlm.purge(node_id, 0)?;
        log::info!("purged orphan locks on node {node_id} not reclaimed by adoption");
    }

    Registry::initialize(record_file_path, recovered)
}

fn adopt_surviving_locks(record_file_path: &Path, dlm: &dyn DlmClient) -> Result<Vec<LockRecord>> {
    let lines = RecordFile::scan(record_file_path)?;
    let mut recovered = Vec::with_capacity(lines.len());

    for line in lines {
        let ParsedLine::Candidate { name, mode, owner_pid } = line else {
            continue;
        };

        match dlm.adopt(mode, &name) {
            Ok((kernel_lock_id, sb_status)) if sb_status == 0 => {
                recovered.push(LockRecord::new(name, mode, kernel_lock_id, owner_pid));
            }
            Ok((_, sb_status)) => {
                log::warn!("adopt of `{name}` returned sb_status={sb_status}; dropping");
            }
            Err(Error::Contention { resource }) => {
                log::warn!("adopt of `{resource}` refused: incompatible orphan exists; dropping");
            }
            Err(err) => {
                log::info!("adopt of `{name}` failed ({err}); dropping");
            }
        }
    }

    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlm_lock_core::testing::{FakeCluster, FakeDlm};
    use dlm_lock_core::LockMode;

    #[test]
    fn fresh_lockspace_skips_scan_and_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records");
        let dlm = FakeDlm::new();
        let cluster = FakeCluster::new(1);
        let config = PluginConfig::default();

        let registry = recover(&path, true, &config, &dlm, &cluster).unwrap();
        assert!(registry.snapshot().is_empty());
        assert!(RecordFile::scan(&path).unwrap().is_empty());
    }

    #[test]
    fn adopts_surviving_orphans_and_purges_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records");

        // Seed a prior instance's Record File with two held locks,
        // then simulate a crash so both become orphans.
        let seed_dlm = FakeDlm::new();
        let (id1, _) = seed_dlm.lock_wait(LockMode::Exclusive, true, "disk1").unwrap();
        let (id2, _) = seed_dlm.lock_wait(LockMode::Shared, true, "disk2").unwrap();
        RecordFile::initialize(
            &path,
            &[
                LockRecord::new("disk1".to_string(), LockMode::Exclusive, id1, 1234),
                LockRecord::new("disk2".to_string(), LockMode::Shared, id2, 1234),
            ],
        )
        .unwrap();
        seed_dlm.simulate_crash();

        let cluster = FakeCluster::new(7);
        let mut config = PluginConfig::default();
        config.purge_lockspace = false;

        let registry = recover(&path, false, &config, &seed_dlm, &cluster).unwrap();
        assert_eq!(registry.snapshot().len(), 2);
        assert_eq!(seed_dlm.live_lock_count(), 2);
    }

    #[test]
    fn incompatible_orphan_is_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records");

        let dlm = FakeDlm::new();
        let (id, _) = dlm.lock_wait(LockMode::Exclusive, true, "disk1").unwrap();
        RecordFile::initialize(
            &path,
            &[LockRecord::new("disk1".to_string(), LockMode::Exclusive, id, 42)],
        )
        .unwrap();
        dlm.simulate_crash();
        dlm.mark_contended("disk1");

        let cluster = FakeCluster::new(1);
        let mut config = PluginConfig::default();
        config.purge_lockspace = false;

        let registry = recover(&path, false, &config, &dlm, &cluster).unwrap();
        assert!(registry.snapshot().is_empty());
    }
}
