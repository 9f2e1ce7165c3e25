//! Module state machine engine.
//!
//! [`ModulesMgmtTask`] drives every port from `HW_NOT_PRESENT` to a terminal
//! state and keeps re-running ports whose hardware changes afterwards.
//!
//! The driver runs in two phases:
//!
//! 1. Static detection sweeps the active ports, in port order, until every
//!    one of them is terminal. Ports parked in `NOT_POWERED` are released
//!    by the settle timer.
//! 2. Dynamic detection blocks on presence/power-good edges. A finalized
//!    port that sees an edge is reset and swept again.
//!
//! Terminal ports are flushed to the [`ResultPublisher`] after every sweep.
//!
//! A port is always locked across its handler and the state advance, so the
//! settle timer never observes a half-applied transition.

use std::collections::{BTreeSet, HashMap};
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use crate::config::{ModulesMgrConfig, PolicyConfig, TimingConfig};
use crate::eeprom::{decode_be, mci_frequency, EepromField, ModuleEepromReader, CHARACTERISTICS_OFFSET};
use crate::error::{ModulesMgmtError, Result};
use crate::poller::EventMultiplexer;
use crate::production::{ShutdownCoordinator, SystemdNotifier};
use crate::publisher::ResultPublisher;
use crate::state::{ModulePort, ModuleState, PortTable};
use crate::sysfs::{Attribute, AttributeHandle, SysfsAttributes};
use crate::timer::{SettleTimer, WaitingSet};

/// Engine parameters.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Platform runs in independent (software-controlled) module mode.
    pub independent_mode: bool,
    /// Number of physical ports.
    pub port_count: usize,
    pub timing: TimingConfig,
    pub policy: PolicyConfig,
}

impl EngineSettings {
    pub fn from_config(config: &ModulesMgrConfig, independent_mode: bool, port_count: usize) -> Self {
        Self {
            independent_mode,
            port_count,
            timing: config.timing.clone(),
            policy: config.policy.clone(),
        }
    }
}

/// Outcome of one handler call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Stage and advance to a non-terminal state.
    Advance(ModuleState),
    /// Advance to the state and record it as final.
    Finalize(ModuleState),
}

impl Transition {
    pub fn state(&self) -> ModuleState {
        match self {
            Transition::Advance(state) | Transition::Finalize(state) => *state,
        }
    }
}

/// Handles the engine watches for edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchedHandle {
    Presence,
    PowerGood,
}

fn handle_mut(port: &mut ModulePort, slot: WatchedHandle) -> Option<&mut AttributeHandle> {
    match slot {
        WatchedHandle::Presence => port.presence_mut(),
        WatchedHandle::PowerGood => port.power_good_mut(),
    }
}

/// Point-in-time copy of a port record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSnapshot {
    pub current_state: ModuleState,
    pub final_state: Option<ModuleState>,
    pub uses_independent_mode: bool,
    pub awaiting_power_settle: bool,
    pub eeprom_retries: u32,
    pub presence_path: Option<PathBuf>,
    pub power_good_path: Option<PathBuf>,
}

/// The module bring-up task.
pub struct ModulesMgmtTask {
    attrs: SysfsAttributes,
    eeprom: Arc<dyn ModuleEepromReader>,
    multiplexer: Box<dyn EventMultiplexer>,
    publisher: ResultPublisher,
    settings: EngineSettings,

    ports: Arc<PortTable>,
    waiting: Arc<WaitingSet>,
    timer: SettleTimer,

    /// Ports not yet terminal, in sweep order.
    active: BTreeSet<usize>,
    /// Registered handle to (port, handle).
    handle_to_port: HashMap<RawFd, (usize, WatchedHandle)>,
    /// Ports whose persisted row must go on the next flush.
    pending_deletes: BTreeSet<usize>,
    event_counts: HashMap<(usize, WatchedHandle), u64>,
    handles_armed: bool,

    shutdown: ShutdownCoordinator,
    notifier: SystemdNotifier,
}

impl ModulesMgmtTask {
    /// Creates port records and opens their presence handles.
    ///
    /// A port uses independent mode only if the platform does and the
    /// port's independent presence attribute exists.
    pub fn new(
        attrs: SysfsAttributes,
        eeprom: Arc<dyn ModuleEepromReader>,
        multiplexer: Box<dyn EventMultiplexer>,
        publisher: ResultPublisher,
        settings: EngineSettings,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        let ports: Vec<ModulePort> = (0..settings.port_count)
            .map(|index| {
                let independent =
                    settings.independent_mode && attrs.exists(index, Attribute::Presence);
                let attr = if independent {
                    Attribute::Presence
                } else {
                    Attribute::LegacyPresence
                };

                let mut port = ModulePort::new(index, independent);
                match attrs.open(index, attr) {
                    Ok(handle) => {
                        port.replace_presence(Some(handle));
                    }
                    Err(e) => debug!(port = index, attr = %attr, error = %e, "No presence handle"),
                }
                port
            })
            .collect();

        let ports = Arc::new(PortTable::new(ports));
        let waiting = Arc::new(WaitingSet::new());
        let timer = SettleTimer::new(
            Arc::clone(&ports),
            Arc::clone(&waiting),
            &settings.timing,
            shutdown.clone(),
        );

        Self {
            attrs,
            eeprom,
            multiplexer,
            publisher,
            active: (0..settings.port_count).collect(),
            settings,
            ports,
            waiting,
            timer,
            handle_to_port: HashMap::new(),
            pending_deletes: BTreeSet::new(),
            event_counts: HashMap::new(),
            handles_armed: false,
            shutdown,
            notifier: SystemdNotifier::disabled(),
        }
    }

    /// Reports readiness to systemd through `notifier` once static
    /// detection is done.
    pub fn with_notifier(mut self, notifier: SystemdNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Runs static detection, then dynamic detection until shutdown.
    pub fn run(&mut self) {
        info!(
            ports = self.ports.len(),
            independent_mode = self.settings.independent_mode,
            "Starting module detection"
        );

        self.run_static_detection();

        if !self.shutdown.should_shutdown() {
            let status = format!("Static detection done, {} ports classified", self.ports.len());
            info!("{}", status);
            if let Err(e) = self.notifier.notify_ready() {
                warn!(error = %e, "Failed to notify systemd");
            }
            if let Err(e) = self.notifier.notify_status(&status) {
                warn!(error = %e, "Failed to send status to systemd");
            }
        }

        while !self.shutdown.should_shutdown() {
            if let Err(e) = self.dynamic_iteration() {
                error!(error = %e, "Dynamic detection iteration failed");
                thread::sleep(self.settings.timing.poll_timeout());
            }
        }

        self.stop();
    }

    /// Sweeps until every port is terminal or shutdown is requested.
    pub fn run_static_detection(&mut self) {
        while !self.shutdown.should_shutdown() && !self.active.is_empty() {
            let finalized = self.tick();
            if finalized == 0 && self.waiting.len() == self.active.len() {
                thread::sleep(self.settings.timing.idle_sleep());
            }
        }
        debug!(remaining = self.active.len(), "Static detection finished");
    }

    /// One sweep over the active ports followed by a flush.
    ///
    /// Returns the number of ports that became terminal.
    pub fn tick(&mut self) -> usize {
        let finalized = self.sweep();
        let count = finalized.len();
        self.flush(finalized);
        count
    }

    /// One dynamic-phase iteration: wait for edges, reset finalized ports
    /// that changed, sweep and flush.
    ///
    /// Edge notification only fires after a handle has been read once, so
    /// the first iteration reads every registered handle before waiting.
    pub fn dynamic_iteration(&mut self) -> Result<()> {
        if !self.handles_armed {
            self.dummy_read_all();
            self.handles_armed = true;
        }

        let ready = self.multiplexer.wait(self.settings.timing.poll_timeout())?;
        for fd in ready {
            self.handle_event(fd);
        }

        self.tick();
        Ok(())
    }

    /// Stops the timer and closes every handle.
    pub fn stop(&mut self) {
        self.shutdown.request_shutdown();
        self.timer.join();
        self.close_handles();
        info!("Module detection stopped");
    }

    fn sweep(&mut self) -> Vec<usize> {
        let ports = Arc::clone(&self.ports);
        let mut finalized = Vec::new();

        let order: Vec<usize> = self.active.iter().copied().collect();
        for index in order {
            let mut port = ports.lock(index);
            if self.step_port(&mut port) {
                finalized.push(index);
            }
        }

        self.timer.ensure_running();
        finalized
    }

    /// Runs the handler of the port's current state and applies its result.
    ///
    /// Returns true if the port became terminal.
    fn step_port(&mut self, port: &mut ModulePort) -> bool {
        if port.final_state().is_some() {
            return false;
        }

        let state = port.current_state();
        // Only the settle timer moves a parked port.
        if state == ModuleState::NotPowered && port.awaiting_power_settle() {
            return false;
        }

        let transition = if state.is_sink() {
            Transition::Finalize(state)
        } else {
            match self.dispatch(port) {
                Ok(transition) => transition,
                Err(e) => {
                    warn!(port = port.index(), state = %state, error = %e, "Handler failed");
                    Transition::Finalize(ModuleState::Error)
                }
            }
        };

        let next = transition.state();
        port.set_next_state(next);
        port.advance_state();
        if next != state {
            debug!(port = port.index(), from = %state, to = %next, "STATE_LOG transition");
        }

        match transition {
            Transition::Advance(_) => false,
            Transition::Finalize(final_state) => {
                port.finalize(final_state);
                self.watch(port, WatchedHandle::Presence);
                info!(port = port.index(), state = %final_state, "Port finalized");
                true
            }
        }
    }

    /// Never called for error sinks, `step_port` finalizes those first.
    fn dispatch(&mut self, port: &mut ModulePort) -> Result<Transition> {
        match port.current_state() {
            ModuleState::HwNotPresent => self.detect_presence(port),
            ModuleState::HwPresent => self.check_power_good(port),
            ModuleState::ModuleAvailable => self.check_power_on(port),
            ModuleState::NotPowered => self.power_on(port),
            ModuleState::Powered => self.classify_module(port),
            ModuleState::FwControl | ModuleState::SwControl => self.save_control_type(port),
            state @ (ModuleState::Error | ModuleState::PowerLimitError) => {
                Ok(Transition::Finalize(state))
            }
        }
    }

    #[instrument(level = "debug", skip(self, port), fields(port = port.index()))]
    fn detect_presence(&mut self, port: &mut ModulePort) -> Result<Transition> {
        let attr = if port.uses_independent_mode() {
            Attribute::Presence
        } else {
            Attribute::LegacyPresence
        };

        let present = match self.attrs.read_int(port.index(), attr) {
            Ok(value) => value,
            Err(e) if e.is_not_found() => {
                debug!(error = %e, "Presence attribute missing");
                return Ok(Transition::Finalize(ModuleState::HwNotPresent));
            }
            Err(e) => return Err(e),
        };

        if present == 0 {
            debug!("Module not present");
            return Ok(Transition::Finalize(ModuleState::HwNotPresent));
        }

        if port.uses_independent_mode() {
            Ok(Transition::Advance(ModuleState::HwPresent))
        } else {
            // Firmware owns legacy ports, there is nothing more to classify.
            Ok(Transition::Finalize(ModuleState::HwPresent))
        }
    }

    #[instrument(level = "debug", skip(self, port), fields(port = port.index()))]
    fn check_power_good(&mut self, port: &mut ModulePort) -> Result<Transition> {
        let index = port.index();
        if port.power_good().is_none() {
            match self.attrs.open(index, Attribute::PowerGood) {
                Ok(handle) => {
                    port.replace_power_good(Some(handle));
                }
                Err(e) => {
                    debug!(error = %e, "No power good attribute");
                    return Ok(Transition::Finalize(ModuleState::HwNotPresent));
                }
            }
        }

        // Registered whatever the value, so a later change raises an edge.
        self.watch(port, WatchedHandle::PowerGood);

        let value = match port.power_good_mut() {
            Some(handle) => handle.read_value(),
            None => return Ok(Transition::Finalize(ModuleState::HwNotPresent)),
        };
        match value {
            Ok(Some(0)) => {
                info!(port = index, "Module power is not good");
                Ok(Transition::Finalize(ModuleState::HwNotPresent))
            }
            Ok(Some(_)) => Ok(Transition::Advance(ModuleState::ModuleAvailable)),
            Ok(None) => Ok(Transition::Finalize(ModuleState::HwNotPresent)),
            Err(e) => {
                warn!(port = index, error = %e, "Failed to read power good");
                Ok(Transition::Finalize(ModuleState::HwNotPresent))
            }
        }
    }

    #[instrument(level = "debug", skip(self, port), fields(port = port.index()))]
    fn check_power_on(&mut self, port: &mut ModulePort) -> Result<Transition> {
        let index = port.index();
        let powered = match self.attrs.read_int(index, Attribute::PowerOn) {
            Ok(value) => value != 0,
            Err(e) => {
                warn!(port = index, error = %e, "Failed to read power on");
                return Ok(Transition::Finalize(ModuleState::HwNotPresent));
            }
        };

        if !powered {
            return Ok(Transition::Advance(ModuleState::NotPowered));
        }

        let in_reset = matches!(self.attrs.read_int(index, Attribute::HwReset), Ok(1));
        if !port.awaiting_power_settle() && in_reset {
            info!(port = index, "Powered module held in reset, pulsing reset");
            self.attrs.write_value(index, Attribute::HwReset, 0)?;
            self.attrs.write_value(index, Attribute::HwReset, 1)?;
            self.park(port);
            return Ok(Transition::Advance(ModuleState::NotPowered));
        }

        Ok(Transition::Advance(ModuleState::Powered))
    }

    #[instrument(level = "debug", skip(self, port), fields(port = port.index()))]
    fn power_on(&mut self, port: &mut ModulePort) -> Result<Transition> {
        if port.awaiting_power_settle() {
            return Ok(Transition::Advance(ModuleState::NotPowered));
        }

        let index = port.index();
        let powered = self
            .write_if_present(index, Attribute::PowerOn, 1)
            .and_then(|_| self.write_if_present(index, Attribute::HwReset, 0));
        if let Err(e) = powered {
            warn!(port = index, error = %e, "Failed to power on module");
            return Ok(Transition::Finalize(ModuleState::HwNotPresent));
        }

        info!(port = index, "Module powered on, waiting for it to settle");
        self.park(port);
        Ok(Transition::Advance(ModuleState::NotPowered))
    }

    #[instrument(level = "debug", skip(self, port), fields(port = port.index()))]
    fn classify_module(&mut self, port: &mut ModulePort) -> Result<Transition> {
        let index = port.index();
        let Some(api) = self.eeprom.open(index) else {
            info!(port = index, "Module memory unavailable, leaving module to firmware");
            self.eeprom.reinit(index);
            return Ok(Transition::Advance(ModuleState::FwControl));
        };

        let Some(identifier) = api.read_field(EepromField::Identifier) else {
            return self.retry_blocked_eeprom(port);
        };
        let module_id = decode_be(&identifier);
        let supported = self
            .settings
            .policy
            .supported_module_ids
            .iter()
            .any(|id| u64::from(*id) == module_id);

        if !supported {
            info!(port = index, module_id, "Module type not software controlled");
            return Ok(Transition::Advance(ModuleState::FwControl));
        }
        if api.is_flat_memory() {
            info!(port = index, module_id, "Flat memory module, leaving it to firmware");
            return Ok(Transition::Advance(ModuleState::FwControl));
        }

        let max_power = api
            .read_field(EepromField::MaxPower)
            .map(|bytes| decode_be(&bytes))
            .ok_or(ModulesMgmtError::Eeprom {
                port: index,
                field: EepromField::MaxPower.name(),
            })?;
        let power_limit = self.attrs.read_int(index, Attribute::PowerLimit)?;
        if i128::from(max_power) > i128::from(power_limit) {
            warn!(port = index, max_power, power_limit, "Module exceeds cage power limit");
            return Ok(Transition::Finalize(ModuleState::PowerLimitError));
        }

        let characteristics = api
            .read_raw(CHARACTERISTICS_OFFSET, 1)
            .and_then(|bytes| bytes.first().copied())
            .ok_or(ModulesMgmtError::Eeprom {
                port: index,
                field: "characteristics",
            })?;
        let frequency = mci_frequency(characteristics);
        self.attrs.write_value(index, Attribute::Frequency, frequency)?;
        debug!(port = index, module_id, max_power, frequency, "Module is software controlled");

        Ok(Transition::Advance(ModuleState::SwControl))
    }

    /// Firmware may block upper page access for a while after power-on, so
    /// an empty identifier read is retried with a reset pulse.
    fn retry_blocked_eeprom(&mut self, port: &mut ModulePort) -> Result<Transition> {
        let index = port.index();
        let max_retries = self.settings.policy.max_eeprom_retries;
        if port.eeprom_retries() >= max_retries {
            warn!(port = index, retries = port.eeprom_retries(), "Module identifier unreadable, giving up");
            return Ok(Transition::Finalize(ModuleState::Error));
        }

        info!(port = index, retry = port.eeprom_retries() + 1, max_retries, "Module identifier unreadable, resetting module");
        self.attrs.write_value(index, Attribute::HwReset, 1)?;
        self.attrs.write_value(index, Attribute::HwReset, 0)?;
        self.park(port);
        port.record_eeprom_retry();
        Ok(Transition::Advance(ModuleState::NotPowered))
    }

    #[instrument(level = "debug", skip(self, port), fields(port = port.index()))]
    fn save_control_type(&mut self, port: &mut ModulePort) -> Result<Transition> {
        let state = port.current_state();
        if state == ModuleState::FwControl {
            self.attrs.write_value(port.index(), Attribute::Control, 0)?;
            self.swap_presence(port, Attribute::LegacyPresence);
        }
        Ok(Transition::Finalize(state))
    }

    fn write_if_present(&self, index: usize, attr: Attribute, value: u8) -> Result<()> {
        if !self.attrs.exists(index, attr) {
            debug!(port = index, attr = %attr, "Attribute missing, skipping write");
            return Ok(());
        }
        self.attrs.write_value(index, attr, value)
    }

    /// Starts the settle wait. Caller holds the port lock.
    fn park(&self, port: &mut ModulePort) {
        port.begin_settle(Instant::now());
        self.waiting.insert(port.index());
    }

    /// Replaces the presence handle with one on `attr`, closing the old
    /// handle first.
    fn swap_presence(&mut self, port: &mut ModulePort, attr: Attribute) {
        let index = port.index();
        let path = self.attrs.path(index, attr);
        if port.presence().is_some_and(|handle| handle.path() == path) {
            return;
        }
        if !path.is_file() {
            warn!(port = index, path = %path.display(), "Presence attribute missing, keeping current handle");
            return;
        }

        if let Some(old) = port.replace_presence(None) {
            self.unwatch(old.as_raw_fd());
        }
        match AttributeHandle::open(attr, path) {
            Ok(handle) => {
                debug!(port = index, path = %handle.path().display(), "Presence handle replaced");
                port.replace_presence(Some(handle));
            }
            Err(e) => warn!(port = index, error = %e, "Failed to open presence handle"),
        }
    }

    /// Registers a port handle for edges. Registered handles are read once
    /// to clear a stale edge.
    fn watch(&mut self, port: &mut ModulePort, slot: WatchedHandle) {
        let index = port.index();
        let Some(handle) = handle_mut(port, slot) else {
            return;
        };
        let fd = handle.as_raw_fd();
        if self.handle_to_port.contains_key(&fd) {
            return;
        }

        if let Err(e) = self.multiplexer.register(fd) {
            warn!(port = index, handle = ?slot, error = %e, "Failed to register handle");
            return;
        }
        if let Err(e) = handle.read_value() {
            debug!(port = index, handle = ?slot, error = %e, "Initial handle read failed");
        }
        self.handle_to_port.insert(fd, (index, slot));
    }

    /// Unregisters a handle. Must run before the handle is closed.
    fn unwatch(&mut self, fd: RawFd) {
        self.multiplexer.unregister(fd);
        self.handle_to_port.remove(&fd);
    }

    fn dummy_read_all(&mut self) {
        let ports = Arc::clone(&self.ports);
        let watched: Vec<(RawFd, usize, WatchedHandle)> = self
            .handle_to_port
            .iter()
            .map(|(fd, (index, slot))| (*fd, *index, *slot))
            .collect();

        for (fd, index, slot) in watched {
            let mut port = ports.lock(index);
            if let Some(handle) = handle_mut(&mut port, slot) {
                if handle.as_raw_fd() == fd {
                    if let Err(e) = handle.read_value() {
                        debug!(port = index, handle = ?slot, error = %e, "Dummy read failed");
                    }
                }
            }
        }
        debug!(handles = self.handle_to_port.len(), "Armed edge notification");
    }

    fn handle_event(&mut self, fd: RawFd) {
        let Some(&(index, slot)) = self.handle_to_port.get(&fd) else {
            debug!(fd, "Event on unknown handle");
            return;
        };

        let count = {
            let count = self.event_counts.entry((index, slot)).or_default();
            *count += 1;
            *count
        };

        let ports = Arc::clone(&self.ports);
        let mut port = ports.lock(index);

        // The read also clears the edge.
        let value = match handle_mut(&mut port, slot) {
            Some(handle) if handle.as_raw_fd() == fd => handle.read_value(),
            _ => {
                warn!(port = index, handle = ?slot, fd, "Event on stale handle");
                self.unwatch(fd);
                return;
            }
        };
        debug!(port = index, handle = ?slot, value = ?value.as_ref().ok(), count, "Handle event");

        if self.active.contains(&index) {
            return;
        }

        info!(port = index, handle = ?slot, "Module changed, restarting detection");
        port.reset();
        self.waiting.remove(index);
        if port.uses_independent_mode() {
            self.swap_presence(&mut port, Attribute::Presence);
        }
        self.active.insert(index);
        self.pending_deletes.insert(index);
    }

    fn flush(&mut self, finalized: Vec<usize>) {
        if !self.pending_deletes.is_empty() {
            let deletes: Vec<usize> = std::mem::take(&mut self.pending_deletes)
                .into_iter()
                .collect();
            self.publisher.delete_rows(&deletes);
        }

        if finalized.is_empty() {
            return;
        }

        for index in finalized {
            let final_state = self.ports.lock(index).final_state();
            self.active.remove(&index);
            if let Some(state) = final_state {
                self.publisher.record_final(index, state);
            }
        }

        if let Err(e) = self.publisher.publish() {
            error!(error = %e, "Failed to publish module changes");
        }
    }

    fn close_handles(&mut self) {
        let ports = Arc::clone(&self.ports);
        for index in 0..ports.len() {
            let mut port = ports.lock(index);
            if let Some(handle) = port.replace_presence(None) {
                self.unwatch(handle.as_raw_fd());
            }
            if let Some(handle) = port.replace_power_good(None) {
                self.unwatch(handle.as_raw_fd());
            }
        }
        self.handle_to_port.clear();
    }

    /// Copy of a port record, `None` for an unknown port.
    pub fn port_snapshot(&self, index: usize) -> Option<PortSnapshot> {
        if index >= self.ports.len() {
            return None;
        }
        let port = self.ports.lock(index);
        Some(PortSnapshot {
            current_state: port.current_state(),
            final_state: port.final_state(),
            uses_independent_mode: port.uses_independent_mode(),
            awaiting_power_settle: port.awaiting_power_settle(),
            eeprom_retries: port.eeprom_retries(),
            presence_path: port.presence().map(|h| h.path().to_path_buf()),
            power_good_path: port.power_good().map(|h| h.path().to_path_buf()),
        })
    }

    pub fn active_ports(&self) -> Vec<usize> {
        self.active.iter().copied().collect()
    }

    pub fn waiting_ports(&self) -> Vec<usize> {
        self.waiting.snapshot()
    }

    /// Registered fd of a port handle.
    pub fn watched_fd(&self, index: usize, slot: WatchedHandle) -> Option<RawFd> {
        self.handle_to_port
            .iter()
            .find(|(_, entry)| **entry == (index, slot))
            .map(|(fd, _)| *fd)
    }

    pub fn watched_count(&self) -> usize {
        self.handle_to_port.len()
    }

    pub fn event_count(&self, index: usize, slot: WatchedHandle) -> u64 {
        self.event_counts.get(&(index, slot)).copied().unwrap_or(0)
    }

    pub fn publisher(&self) -> &ResultPublisher {
        &self.publisher
    }
}
