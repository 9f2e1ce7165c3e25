//! Module states and the per-port state record.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::sysfs::AttributeHandle;

/// Bring-up states of a module cage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
    /// Initial state; also the outcome for an empty or unreadable cage.
    HwNotPresent,
    /// A module is plugged into the cage.
    HwPresent,
    /// Module present and its power is good.
    ModuleAvailable,
    /// Module power is not loaded yet.
    NotPowered,
    /// Module power is loaded.
    Powered,
    /// Firmware manages the module.
    FwControl,
    /// Software manages the module.
    SwControl,
    /// Read/write failure or exhausted retries.
    Error,
    /// The cage cannot supply the power the module asks for.
    PowerLimitError,
}

impl ModuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleState::HwNotPresent => "HW_NOT_PRESENT",
            ModuleState::HwPresent => "HW_PRESENT",
            ModuleState::ModuleAvailable => "MODULE_AVAILABLE",
            ModuleState::NotPowered => "NOT_POWERED",
            ModuleState::Powered => "POWERED",
            ModuleState::FwControl => "FW_CONTROL",
            ModuleState::SwControl => "SW_CONTROL",
            ModuleState::Error => "ERROR",
            ModuleState::PowerLimitError => "POWER_LIMIT_ERROR",
        }
    }

    /// Error sinks have no handler: they are final on entry.
    pub fn is_sink(&self) -> bool {
        matches!(self, ModuleState::Error | ModuleState::PowerLimitError)
    }

    /// Value published on the change channel for a port that finalized here.
    pub fn change_value(&self) -> &'static str {
        match self {
            ModuleState::HwNotPresent | ModuleState::Error | ModuleState::PowerLimitError => "0",
            _ => "1",
        }
    }

    /// Control type persisted for this final state, if any.
    pub fn control_type(&self) -> Option<ControlType> {
        match self {
            ModuleState::FwControl => Some(ControlType::Firmware),
            ModuleState::SwControl => Some(ControlType::Software),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finalized ownership of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    Firmware,
    Software,
}

impl ControlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlType::Firmware => "FW_CONTROL",
            ControlType::Software => "SW_CONTROL",
        }
    }
}

/// Mutable state of one port.
///
/// Shared between the driver loop and the settle timer through
/// [`PortTable`]; every read-modify-write of the state triple
/// (`current_state`, `next_state`, `awaiting_power_settle`) happens under
/// the port's lock.
#[derive(Debug)]
pub struct ModulePort {
    index: usize,
    current_state: ModuleState,
    next_state: ModuleState,
    final_state: Option<ModuleState>,
    uses_independent_mode: bool,
    presence: Option<AttributeHandle>,
    power_good: Option<AttributeHandle>,
    awaiting_power_settle: bool,
    settle_start: Option<Instant>,
    eeprom_retries: u32,
}

impl ModulePort {
    pub fn new(index: usize, uses_independent_mode: bool) -> Self {
        Self {
            index,
            current_state: ModuleState::HwNotPresent,
            next_state: ModuleState::HwNotPresent,
            final_state: None,
            uses_independent_mode,
            presence: None,
            power_good: None,
            awaiting_power_settle: false,
            settle_start: None,
            eeprom_retries: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current_state(&self) -> ModuleState {
        self.current_state
    }

    pub fn next_state(&self) -> ModuleState {
        self.next_state
    }

    pub fn final_state(&self) -> Option<ModuleState> {
        self.final_state
    }

    pub fn uses_independent_mode(&self) -> bool {
        self.uses_independent_mode
    }

    pub fn awaiting_power_settle(&self) -> bool {
        self.awaiting_power_settle
    }

    pub fn eeprom_retries(&self) -> u32 {
        self.eeprom_retries
    }

    pub fn set_next_state(&mut self, state: ModuleState) {
        self.next_state = state;
    }

    /// Makes the staged state current.
    pub fn advance_state(&mut self) {
        self.current_state = self.next_state;
    }

    /// Records the final outcome. Only the first call has an effect.
    pub fn finalize(&mut self, state: ModuleState) -> bool {
        if self.final_state.is_some() {
            return false;
        }
        self.final_state = Some(state);
        true
    }

    /// Parks the port until the settle timer releases it.
    pub fn begin_settle(&mut self, now: Instant) {
        self.settle_start = Some(now);
        self.awaiting_power_settle = true;
    }

    /// Time spent parked, `None` when not parked.
    pub fn settle_elapsed(&self, now: Instant) -> Option<Duration> {
        if !self.awaiting_power_settle {
            return None;
        }
        self.settle_start
            .map(|start| now.saturating_duration_since(start))
    }

    /// Releases a parked port into `POWERED`.
    pub fn complete_settle(&mut self) {
        self.set_next_state(ModuleState::Powered);
        self.advance_state();
        self.awaiting_power_settle = false;
        self.settle_start = None;
    }

    pub fn record_eeprom_retry(&mut self) {
        self.eeprom_retries += 1;
    }

    /// Returns the port to its initial state. Handles stay open.
    pub fn reset(&mut self) {
        self.current_state = ModuleState::HwNotPresent;
        self.next_state = ModuleState::HwNotPresent;
        self.final_state = None;
        self.awaiting_power_settle = false;
        self.settle_start = None;
        self.eeprom_retries = 0;
    }

    pub fn presence(&self) -> Option<&AttributeHandle> {
        self.presence.as_ref()
    }

    pub fn presence_mut(&mut self) -> Option<&mut AttributeHandle> {
        self.presence.as_mut()
    }

    /// Installs a presence handle, returning the one it replaces.
    pub fn replace_presence(&mut self, handle: Option<AttributeHandle>) -> Option<AttributeHandle> {
        std::mem::replace(&mut self.presence, handle)
    }

    pub fn power_good(&self) -> Option<&AttributeHandle> {
        self.power_good.as_ref()
    }

    pub fn power_good_mut(&mut self) -> Option<&mut AttributeHandle> {
        self.power_good.as_mut()
    }

    /// Installs a power-good handle, returning the one it replaces.
    pub fn replace_power_good(
        &mut self,
        handle: Option<AttributeHandle>,
    ) -> Option<AttributeHandle> {
        std::mem::replace(&mut self.power_good, handle)
    }
}

/// Arena of port records, one lock per port.
#[derive(Debug)]
pub struct PortTable {
    ports: Vec<Mutex<ModulePort>>,
}

impl PortTable {
    pub fn new(ports: Vec<ModulePort>) -> Self {
        Self {
            ports: ports.into_iter().map(Mutex::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Locks a port for the lifetime of the returned guard.
    ///
    /// Panics if `index` is not a port of this table.
    pub fn lock(&self, index: usize) -> MutexGuard<'_, ModulePort> {
        self.ports[index].lock()
    }
}
