//! Module register reader.
//!
//! The engine only needs four things from a module's memory map: the
//! identifier byte, the max-power byte, the management clock capability
//! bits and whether the module is a flat-memory device. The
//! [`ModuleEepromReader`] trait is the seam to whatever decodes module
//! memory on the platform; [`SysfsEepromReader`] reads the pages the
//! kernel driver exposes under each module directory.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use tracing::debug;

use crate::sysfs::SysfsAttributes;

/// Lower page file relative to the module's page directory.
const LOWER_PAGE_DATA: &str = "0/i2c-0x50/data";

/// Byte 2 of the lower page: flat memory flag and MCI clock capability.
pub const CHARACTERISTICS_OFFSET: usize = 2;

const FLAT_MEM_MASK: u8 = 0b1000_0000;
const MCI_SPEED_MASK: u8 = 0b0000_1100;
const MCI_SPEED_SHIFT: u8 = 2;

/// Fields of the module memory map the engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromField {
    /// SFF-8024 identifier.
    Identifier,
    /// Maximum module power consumption.
    MaxPower,
}

impl EepromField {
    pub fn offset(&self) -> usize {
        match self {
            EepromField::Identifier => 0,
            EepromField::MaxPower => 201,
        }
    }

    pub fn size(&self) -> usize {
        1
    }

    pub fn name(&self) -> &'static str {
        match self {
            EepromField::Identifier => "identifier",
            EepromField::MaxPower => "max_power",
        }
    }
}

/// Decodes a big-endian field.
pub fn decode_be(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Extracts the management interface clock setting from byte 2.
///
/// 0 means the module supports up to 400KHz, 1 up to 1MHz.
pub fn mci_frequency(characteristics: u8) -> u8 {
    (characteristics & MCI_SPEED_MASK) >> MCI_SPEED_SHIFT
}

/// Access to one module's memory map.
pub trait ModuleApi: Send {
    /// Reads a decoded field. `None` when the read came back empty, which
    /// happens while firmware still blocks upper page access after power-on.
    fn read_field(&self, field: EepromField) -> Option<Vec<u8>>;

    /// Reads `len` raw bytes at `offset`.
    fn read_raw(&self, offset: usize, len: usize) -> Option<Vec<u8>>;

    /// Returns true if the module only implements the lower page.
    fn is_flat_memory(&self) -> bool;
}

/// Factory for per-port module APIs.
pub trait ModuleEepromReader: Send + Sync {
    /// Returns the module API for a port, or `None` if the module memory
    /// is not accessible yet.
    fn open(&self, port: usize) -> Option<Box<dyn ModuleApi>>;

    /// Drops any cached state for a port so the next `open` starts fresh.
    fn reinit(&self, port: usize);
}

/// Reads module memory from the driver's page files.
#[derive(Debug, Clone)]
pub struct SysfsEepromReader {
    attrs: SysfsAttributes,
}

impl SysfsEepromReader {
    pub fn new(attrs: SysfsAttributes) -> Self {
        Self { attrs }
    }

    fn lower_page(&self, port: usize) -> PathBuf {
        self.attrs.eeprom_pages(port).join(LOWER_PAGE_DATA)
    }
}

impl ModuleEepromReader for SysfsEepromReader {
    fn open(&self, port: usize) -> Option<Box<dyn ModuleApi>> {
        let path = self.lower_page(port);
        if !path.is_file() {
            debug!(port, path = %path.display(), "Module memory not exposed");
            return None;
        }
        Some(Box::new(PageFileApi { path }))
    }

    fn reinit(&self, port: usize) {
        // Pages are read straight from the driver, nothing is cached.
        debug!(port, "Module memory reader reinitialized");
    }
}

/// Module API backed by a page file.
#[derive(Debug)]
struct PageFileApi {
    path: PathBuf,
}

impl ModuleApi for PageFileApi {
    fn read_field(&self, field: EepromField) -> Option<Vec<u8>> {
        self.read_raw(field.offset(), field.size())
    }

    fn read_raw(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let mut file = File::open(&self.path).ok()?;
        file.seek(SeekFrom::Start(offset as u64)).ok()?;
        let mut buf = vec![0u8; len];
        match file.read_exact(&mut buf) {
            Ok(()) => Some(buf),
            Err(e) => {
                debug!(path = %self.path.display(), offset, len, error = %e, "Short module memory read");
                None
            }
        }
    }

    fn is_flat_memory(&self) -> bool {
        self.read_raw(CHARACTERISTICS_OFFSET, 1)
            .map(|b| b[0] & FLAT_MEM_MASK != 0)
            .unwrap_or(false)
    }
}
