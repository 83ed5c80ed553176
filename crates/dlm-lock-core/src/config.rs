use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Default DLM lockspace name, matching the original plugin's
/// `DLM_LOCKSPACE_NAME`.
pub const DEFAULT_LOCKSPACE_NAME: &str = "libvirt";

/// Default path for the Record File.
///
/// Under `/tmp` by default, which only survives a process crash, not a
/// reboot -- implementers preferring reboot-safe recovery semantics
/// should point this at a persistent directory instead (see
/// DESIGN.md).
pub const DEFAULT_RECORD_FILE_PATH: &str = "/tmp/libvirtd-dlm-file";

/// Parsed, defaulted plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    /// If true, disks get implicit leases; if false, only explicit
    /// leases are locked.
    pub auto_disk_leases: bool,
    /// If true, refuse to acquire for a VM with RW disks and no
    /// leases.
    pub require_lease_for_disks: bool,
    /// Run the node-wide orphan purge during recovery.
    pub purge_lockspace: bool,
    /// DLM lockspace identifier.
    pub lockspace_name: String,
    /// Path to the Record File.
    pub lock_record_file_path: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        let auto_disk_leases = true;
        Self {
            auto_disk_leases,
            require_lease_for_disks: !auto_disk_leases,
            purge_lockspace: true,
            lockspace_name: DEFAULT_LOCKSPACE_NAME.to_string(),
            lock_record_file_path: DEFAULT_RECORD_FILE_PATH.to_string(),
        }
    }
}

impl PluginConfig {
    /// Loads configuration from `path`, overlaying the defaults.
    ///
    /// A missing file is not an error -- the defaults are used, the
    /// same behavior as the original config loader when
    /// `access(configFile, R_OK)` returns `ENOENT`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::default();

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(config),
            Err(err) => {
                return Err(Error::Configuration(format!(
                    "unable to access config file {}: {err}",
                    path.display()
                )))
            }
        };

        // `require_lease_for_disks` defaults off of whatever
        // `auto_disk_leases` is set to *before* its own key is read,
        // so an explicit `require_lease_for_disks` line always wins
        // even if it appears before `auto_disk_leases` in the file.
        let mut require_lease_for_disks_explicit = None;

        for (line_no, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::Configuration(format!(
                    "{}:{}: expected `key = value`",
                    path.display(),
                    line_no + 1
                ))
            })?;
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "auto_disk_leases" => config.auto_disk_leases = parse_bool(path, line_no, value)?,
                "require_lease_for_disks" => {
                    let parsed = parse_bool(path, line_no, value)?;
                    require_lease_for_disks_explicit = Some(parsed);
                }
                "purge_lockspace" => config.purge_lockspace = parse_bool(path, line_no, value)?,
                "lockspace_name" => config.lockspace_name = value.to_string(),
                "lock_record_file_path" => config.lock_record_file_path = value.to_string(),
                unknown => {
                    log::warn!(
                        "{}:{}: ignoring unknown configuration key `{unknown}`",
                        path.display(),
                        line_no + 1
                    );
                }
            }
        }

        config.require_lease_for_disks =
            require_lease_for_disks_explicit.unwrap_or(!config.auto_disk_leases);

        Ok(config)
    }
}

fn parse_bool(path: &Path, line_no: usize, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Configuration(format!(
            "{}:{}: `{other}` is not a valid boolean",
            path.display(),
            line_no + 1
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_file_missing() {
        let config = PluginConfig::load(Path::new("/nonexistent/path/to/config")).unwrap();
        assert_eq!(config, PluginConfig::default());
    }

    #[test]
    fn parses_overrides() {
        let mut file = tempfile_with_contents(
            "auto_disk_leases = false\n\
             purge_lockspace = false\n\
             lockspace_name = mycluster\n\
             lock_record_file_path = /var/lib/dlm-lock-plugin/records\n",
        );
        let config = PluginConfig::load(file.path()).unwrap();
        assert!(!config.auto_disk_leases);
        assert!(config.require_lease_for_disks);
        assert!(!config.purge_lockspace);
        assert_eq!(config.lockspace_name, "mycluster");
        assert_eq!(
            config.lock_record_file_path,
            "/var/lib/dlm-lock-plugin/records"
        );
        drop(file.as_file_mut());
    }

    #[test]
    fn require_lease_explicit_overrides_inferred_default() {
        let file = tempfile_with_contents(
            "auto_disk_leases = true\n\
             require_lease_for_disks = true\n",
        );
        let config = PluginConfig::load(file.path()).unwrap();
        assert!(config.auto_disk_leases);
        assert!(config.require_lease_for_disks);
    }

    #[test]
    fn rejects_malformed_boolean() {
        let file = tempfile_with_contents("purge_lockspace = maybe\n");
        let err = PluginConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    fn tempfile_with_contents(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }
}
