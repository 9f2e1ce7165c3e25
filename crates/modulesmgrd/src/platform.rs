//! Platform discovery: independent module mode and port count.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{info, warn};

use crate::config::PlatformConfig;
use crate::error::{ModulesMgmtError, Result};

/// SAI profile key enabling software-controlled module bring-up.
pub const SAI_INDEP_MODULE_MODE: &str = "SAI_INDEPENDENT_MODULE_MODE";

const SAI_INDEP_MODULE_MODE_DELIMITER: char = '=';

/// Reads the SAI profile and returns true when independent module mode is on.
///
/// A missing profile means legacy mode.
pub fn detect_independent_mode(profile: impl AsRef<Path>) -> Result<bool> {
    let profile = profile.as_ref();
    let content = match fs::read_to_string(profile) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(path = %profile.display(), "SAI profile not found, system stays in legacy mode");
            return Ok(false);
        }
        Err(e) => return Err(ModulesMgmtError::Io(e)),
    };

    let Some(value) = content.lines().find_map(|line| {
        let (key, value) = line.split_once(SAI_INDEP_MODULE_MODE_DELIMITER)?;
        key.contains(SAI_INDEP_MODULE_MODE).then_some(value)
    }) else {
        info!(path = %profile.display(), "No independent mode setting, system stays in legacy mode");
        return Ok(false);
    };

    match value.trim().parse::<i64>() {
        Ok(v) => {
            let enabled = v == 1;
            info!(path = %profile.display(), value = v, enabled, "Independent module mode setting found");
            Ok(enabled)
        }
        Err(_) => {
            warn!(
                path = %profile.display(),
                value = value.trim(),
                "Unparsable independent mode value, system stays in legacy mode"
            );
            Ok(false)
        }
    }
}

/// Returns the number of physical ports.
///
/// Uses the configured override when present, otherwise counts the
/// `module<N>` directories under the sysfs root.
pub fn discover_port_count(platform: &PlatformConfig) -> Result<usize> {
    if let Some(count) = platform.port_count {
        return Ok(count);
    }

    let entries = fs::read_dir(&platform.sysfs_root).map_err(|e| {
        ModulesMgmtError::Config(format!(
            "Cannot enumerate modules under {}: {}",
            platform.sysfs_root.display(),
            e
        ))
    })?;

    let count = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()?
                .strip_prefix("module")?
                .parse::<usize>()
                .ok()
        })
        .count();

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_profile(content: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sai.profile");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_independent_mode_enabled() {
        let (_dir, path) =
            write_profile("SAI_INIT_CONFIG_FILE=/usr/share/sonic/hwsku/sai.xml\nSAI_INDEPENDENT_MODULE_MODE=1\n");
        assert!(detect_independent_mode(&path).unwrap());
    }

    #[test]
    fn test_independent_mode_disabled() {
        let (_dir, path) = write_profile("SAI_INDEPENDENT_MODULE_MODE=0\n");
        assert!(!detect_independent_mode(&path).unwrap());
    }

    #[test]
    fn test_independent_mode_absent_key() {
        let (_dir, path) = write_profile("SAI_INIT_CONFIG_FILE=/etc/sai.xml\n");
        assert!(!detect_independent_mode(&path).unwrap());
    }

    #[test]
    fn test_independent_mode_garbage_value() {
        let (_dir, path) = write_profile("SAI_INDEPENDENT_MODULE_MODE=yes\n");
        assert!(!detect_independent_mode(&path).unwrap());
    }

    #[test]
    fn test_missing_profile_is_legacy() {
        assert!(!detect_independent_mode("/nonexistent/sai.profile").unwrap());
    }

    #[test]
    fn test_port_count_override() {
        let platform = PlatformConfig {
            port_count: Some(64),
            ..PlatformConfig::default()
        };
        assert_eq!(discover_port_count(&platform).unwrap(), 64);
    }

    #[test]
    fn test_port_count_from_sysfs() {
        let dir = TempDir::new().unwrap();
        for name in ["module0", "module1", "module2", "temperature", "module_x"] {
            fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("module9"), "not a dir").unwrap();

        let platform = PlatformConfig {
            sysfs_root: dir.path().to_path_buf(),
            ..PlatformConfig::default()
        };
        assert_eq!(discover_port_count(&platform).unwrap(), 3);
    }
}
