//! Hardware attribute accessor.
//!
//! Every module cage exposes a handful of single-value attribute files
//! (presence, power good, power on, reset, ...). This module resolves their
//! paths from the configured templates and reads/writes them.
//!
//! Attribute files follow sysfs semantics: a read returns the whole value
//! terminated by a newline, a write replaces it.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use crate::config::{AttributeTemplates, PlatformConfig};
use crate::error::{ModulesMgmtError, Result};

/// Per-port hardware attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Presence as seen by firmware (legacy mode).
    LegacyPresence,
    /// Presence in independent module mode.
    Presence,
    /// Module power rail is good.
    PowerGood,
    /// Module power enable.
    PowerOn,
    /// Module hardware reset line.
    HwReset,
    /// Cage power budget.
    PowerLimit,
    /// Control ownership (0 = firmware).
    Control,
    /// Management interface clock (0 = up to 400KHz, 1 = up to 1MHz).
    Frequency,
}

impl Attribute {
    pub fn name(&self) -> &'static str {
        match self {
            Attribute::LegacyPresence => "present",
            Attribute::Presence => "hw_present",
            Attribute::PowerGood => "power_good",
            Attribute::PowerOn => "power_on",
            Attribute::HwReset => "hw_reset",
            Attribute::PowerLimit => "power_limit",
            Attribute::Control => "control",
            Attribute::Frequency => "frequency",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Expands `{port}` and `{eth}` placeholders of an attribute template.
pub fn expand_template(template: &str, port: usize, breakout: usize) -> String {
    template
        .replace("{port}", &port.to_string())
        .replace("{eth}", &(port * breakout).to_string())
}

fn parse_int(path: &Path, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ModulesMgmtError::attribute_parse(path, raw.trim()))
}

/// Resolves and accesses per-port attribute files.
#[derive(Debug, Clone)]
pub struct SysfsAttributes {
    root: PathBuf,
    breakout: usize,
    templates: AttributeTemplates,
}

impl SysfsAttributes {
    /// Creates an accessor rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, breakout: usize, templates: AttributeTemplates) -> Self {
        Self {
            root: root.into(),
            breakout,
            templates,
        }
    }

    /// Creates an accessor from the platform configuration.
    pub fn from_config(platform: &PlatformConfig, templates: &AttributeTemplates) -> Self {
        Self::new(
            platform.sysfs_root.clone(),
            platform.port_breakout,
            templates.clone(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn template(&self, attr: Attribute) -> &str {
        let t = &self.templates;
        match attr {
            Attribute::LegacyPresence => &t.legacy_presence,
            Attribute::Presence => &t.presence,
            Attribute::PowerGood => &t.power_good,
            Attribute::PowerOn => &t.power_on,
            Attribute::HwReset => &t.hw_reset,
            Attribute::PowerLimit => &t.power_limit,
            Attribute::Control => &t.control,
            Attribute::Frequency => &t.frequency,
        }
    }

    /// Returns the attribute file path for a port.
    pub fn path(&self, port: usize, attr: Attribute) -> PathBuf {
        self.root
            .join(expand_template(self.template(attr), port, self.breakout))
    }

    /// Returns the EEPROM page directory for a port.
    pub fn eeprom_pages(&self, port: usize) -> PathBuf {
        self.root.join(expand_template(
            &self.templates.eeprom_pages,
            port,
            self.breakout,
        ))
    }

    /// Returns true if the attribute file exists.
    pub fn exists(&self, port: usize, attr: Attribute) -> bool {
        self.path(port, attr).is_file()
    }

    /// Reads an integer attribute.
    pub fn read_int(&self, port: usize, attr: Attribute) -> Result<i64> {
        let path = self.path(port, attr);
        let raw =
            fs::read_to_string(&path).map_err(|e| ModulesMgmtError::attribute_io(&path, e))?;
        parse_int(&path, &raw)
    }

    /// Writes a value to an attribute.
    ///
    /// Attribute writes are idempotent: re-issuing the same value leaves the
    /// hardware unchanged.
    pub fn write_value(&self, port: usize, attr: Attribute, value: impl fmt::Display) -> Result<()> {
        let path = self.path(port, attr);
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ModulesMgmtError::attribute_io(&path, e))?;
        file.write_all(value.to_string().as_bytes())
            .map_err(|e| ModulesMgmtError::attribute_io(&path, e))
    }

    /// Opens a long-lived handle on an attribute for edge notification.
    pub fn open(&self, port: usize, attr: Attribute) -> Result<AttributeHandle> {
        AttributeHandle::open(attr, self.path(port, attr))
    }
}

/// An open attribute file kept for readiness notification.
///
/// Dropping the handle closes the file. The owner must unregister it from
/// the multiplexer first.
#[derive(Debug)]
pub struct AttributeHandle {
    attr: Attribute,
    path: PathBuf,
    file: File,
}

impl AttributeHandle {
    pub fn open(attr: Attribute, path: PathBuf) -> Result<Self> {
        let file = File::open(&path).map_err(|e| ModulesMgmtError::attribute_io(&path, e))?;
        Ok(Self { attr, path, file })
    }

    pub fn attribute(&self) -> Attribute {
        self.attr
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current value from offset 0.
    ///
    /// A full read is also what clears a pending priority edge, so this must
    /// be called once for every readiness event. Returns `None` when the
    /// file is empty.
    pub fn read_value(&mut self) -> Result<Option<i64>> {
        let mut raw = String::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut raw))
            .map_err(|e| ModulesMgmtError::attribute_io(&self.path, e))?;

        if raw.trim().is_empty() {
            return Ok(None);
        }
        parse_int(&self.path, &raw).map(Some)
    }
}

impl AsRawFd for AttributeHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SysfsAttributes) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("module2")).unwrap();
        let attrs = SysfsAttributes::new(dir.path(), 1, AttributeTemplates::default());
        (dir, attrs)
    }

    #[test]
    fn test_expand_template() {
        assert_eq!(expand_template("module{port}/present", 3, 4), "module3/present");
        assert_eq!(expand_template("Ethernet{eth}/present", 3, 4), "Ethernet12/present");
    }

    #[test]
    fn test_paths() {
        let (dir, attrs) = setup();
        assert_eq!(
            attrs.path(2, Attribute::Presence),
            dir.path().join("module2/hw_present")
        );
        assert_eq!(
            attrs.path(2, Attribute::LegacyPresence),
            dir.path().join("module2/present")
        );
        assert_eq!(attrs.eeprom_pages(2), dir.path().join("module2/eeprom/pages"));
    }

    #[test]
    fn test_read_int_trims_newline() {
        let (dir, attrs) = setup();
        fs::write(dir.path().join("module2/power_good"), "1\n").unwrap();
        assert!(attrs.exists(2, Attribute::PowerGood));
        assert_eq!(attrs.read_int(2, Attribute::PowerGood).unwrap(), 1);
    }

    #[test]
    fn test_read_missing_and_garbage() {
        let (dir, attrs) = setup();
        let err = attrs.read_int(2, Attribute::PowerOn).unwrap_err();
        assert!(err.is_not_found());

        fs::write(dir.path().join("module2/power_on"), "on").unwrap();
        let err = attrs.read_int(2, Attribute::PowerOn).unwrap_err();
        assert!(matches!(err, ModulesMgmtError::AttributeParse { .. }));
    }

    #[test]
    fn test_write_value_replaces_content() {
        let (dir, attrs) = setup();
        fs::write(dir.path().join("module2/hw_reset"), "1\n").unwrap();
        attrs.write_value(2, Attribute::HwReset, 0).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("module2/hw_reset")).unwrap(), "0");
        // Re-issuing the same write is harmless
        attrs.write_value(2, Attribute::HwReset, 0).unwrap();
        assert_eq!(attrs.read_int(2, Attribute::HwReset).unwrap(), 0);
    }

    #[test]
    fn test_write_missing_attribute_fails() {
        let (_dir, attrs) = setup();
        assert!(attrs.write_value(2, Attribute::Frequency, 1).is_err());
    }

    #[test]
    fn test_handle_rereads_from_start() {
        let (dir, attrs) = setup();
        let path = dir.path().join("module2/hw_present");
        fs::write(&path, "1\n").unwrap();

        let mut handle = attrs.open(2, Attribute::Presence).unwrap();
        assert_eq!(handle.attribute(), Attribute::Presence);
        assert_eq!(handle.read_value().unwrap(), Some(1));

        fs::write(&path, "0\n").unwrap();
        assert_eq!(handle.read_value().unwrap(), Some(0));

        fs::write(&path, "").unwrap();
        assert_eq!(handle.read_value().unwrap(), None);
    }
}
