//! Module bring-up scenarios against a fake sysfs tree.
//!
//! The attribute files live in a temporary directory, module memory is
//! served by a fake reader and edges are injected through a scripted
//! multiplexer.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use sonic_modulesmgrd::config::{AttributeTemplates, PolicyConfig, TimingConfig};
use sonic_modulesmgrd::*;
use tempfile::TempDir;
use tokio::sync::mpsc;

const SETTLE_MS: u64 = 30;

// ============================================================================
// FAKES
// ============================================================================

#[derive(Debug, Clone, Default)]
struct FakeModule {
    identifier: Option<u8>,
    max_power: u8,
    characteristics: u8,
    flat: bool,
}

#[derive(Default)]
struct ModuleBank {
    modules: HashMap<usize, FakeModule>,
    identity_reads: HashMap<usize, u32>,
    reinits: Vec<usize>,
}

struct FakeApi {
    port: usize,
    bank: Arc<Mutex<ModuleBank>>,
}

impl ModuleApi for FakeApi {
    fn read_field(&self, field: EepromField) -> Option<Vec<u8>> {
        let mut bank = self.bank.lock();
        if field == EepromField::Identifier {
            *bank.identity_reads.entry(self.port).or_default() += 1;
        }
        let module = bank.modules.get(&self.port)?;
        match field {
            EepromField::Identifier => module.identifier.map(|id| vec![id]),
            EepromField::MaxPower => Some(vec![module.max_power]),
        }
    }

    fn read_raw(&self, _offset: usize, _len: usize) -> Option<Vec<u8>> {
        let bank = self.bank.lock();
        bank.modules
            .get(&self.port)
            .map(|module| vec![module.characteristics])
    }

    fn is_flat_memory(&self) -> bool {
        let bank = self.bank.lock();
        bank.modules.get(&self.port).is_some_and(|module| module.flat)
    }
}

struct FakeReader {
    bank: Arc<Mutex<ModuleBank>>,
}

impl ModuleEepromReader for FakeReader {
    fn open(&self, port: usize) -> Option<Box<dyn ModuleApi>> {
        if !self.bank.lock().modules.contains_key(&port) {
            return None;
        }
        Some(Box::new(FakeApi {
            port,
            bank: Arc::clone(&self.bank),
        }))
    }

    fn reinit(&self, port: usize) {
        self.bank.lock().reinits.push(port);
    }
}

#[derive(Default)]
struct Script {
    registered: BTreeSet<RawFd>,
    events: VecDeque<Vec<RawFd>>,
}

/// Multiplexer returning queued event batches.
struct ScriptedMultiplexer {
    script: Arc<Mutex<Script>>,
}

impl EventMultiplexer for ScriptedMultiplexer {
    fn register(&mut self, fd: RawFd) -> Result<()> {
        self.script.lock().registered.insert(fd);
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd) {
        self.script.lock().registered.remove(&fd);
    }

    fn wait(&mut self, timeout: Duration) -> Result<Vec<RawFd>> {
        let batch = self.script.lock().events.pop_front();
        match batch {
            Some(ready) => Ok(ready),
            None => {
                thread::sleep(timeout.min(Duration::from_millis(1)));
                Ok(Vec::new())
            }
        }
    }

    fn len(&self) -> usize {
        self.script.lock().registered.len()
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// Attribute values of a cage holding a powered module.
const POWERED_CAGE: &[(&str, &str)] = &[
    ("present", "1"),
    ("hw_present", "1"),
    ("power_good", "1"),
    ("power_on", "1"),
    ("hw_reset", "0"),
    ("power_limit", "10"),
    ("control", "1"),
    ("frequency", "7"),
];

fn cage(dir: &TempDir, port: usize, attrs: &[(&str, &str)]) {
    let module = dir.path().join(format!("module{}", port));
    fs::create_dir_all(&module).unwrap();
    for (name, value) in attrs {
        fs::write(module.join(name), value).unwrap();
    }
}

fn read_attr(dir: &TempDir, port: usize, name: &str) -> String {
    fs::read_to_string(dir.path().join(format!("module{}", port)).join(name)).unwrap()
}

fn sw_module() -> FakeModule {
    FakeModule {
        identifier: Some(24),
        max_power: 5,
        characteristics: 0b0000_0100,
        flat: false,
    }
}

struct Harness {
    dir: TempDir,
    task: ModulesMgmtTask,
    rx: mpsc::Receiver<ModuleChanges>,
    table: Arc<MemoryStateTable>,
    bank: Arc<Mutex<ModuleBank>>,
    script: Arc<Mutex<Script>>,
    shutdown: ShutdownCoordinator,
}

struct HarnessBuilder {
    dir: TempDir,
    port_count: usize,
    independent_mode: bool,
    capacity: usize,
    modules: HashMap<usize, FakeModule>,
}

impl HarnessBuilder {
    fn new(port_count: usize) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            port_count,
            independent_mode: true,
            capacity: 8,
            modules: HashMap::new(),
        }
    }

    fn cage(self, port: usize, attrs: &[(&str, &str)]) -> Self {
        cage(&self.dir, port, attrs);
        self
    }

    fn module(mut self, port: usize, module: FakeModule) -> Self {
        self.modules.insert(port, module);
        self
    }

    fn legacy(mut self) -> Self {
        self.independent_mode = false;
        self
    }

    fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    fn build(self) -> Harness {
        let (tx, rx) = mpsc::channel(self.capacity);
        let table = Arc::new(MemoryStateTable::new());
        let publisher = ResultPublisher::new(
            vec![String::new()],
            Box::new(tx),
            table.clone(),
            Duration::from_millis(20),
        );

        let bank = Arc::new(Mutex::new(ModuleBank {
            modules: self.modules,
            ..ModuleBank::default()
        }));
        let script = Arc::new(Mutex::new(Script::default()));
        let shutdown = ShutdownCoordinator::new();

        let settings = EngineSettings {
            independent_mode: self.independent_mode,
            port_count: self.port_count,
            timing: TimingConfig {
                settle_delay_ms: SETTLE_MS,
                timer_interval_ms: 5,
                poll_timeout_ms: 5,
                idle_sleep_ms: 2,
                publish_timeout_ms: 20,
            },
            policy: PolicyConfig::default(),
        };

        let task = ModulesMgmtTask::new(
            SysfsAttributes::new(self.dir.path(), 1, AttributeTemplates::default()),
            Arc::new(FakeReader {
                bank: Arc::clone(&bank),
            }),
            Box::new(ScriptedMultiplexer {
                script: Arc::clone(&script),
            }),
            publisher,
            settings,
            shutdown.clone(),
        );

        Harness {
            dir: self.dir,
            task,
            rx,
            table,
            bank,
            script,
            shutdown,
        }
    }
}

impl Harness {
    fn snapshot(&self, port: usize) -> PortSnapshot {
        self.task.port_snapshot(port).unwrap()
    }

    /// Ticks until `done` holds, failing after two seconds.
    fn drive_until(&mut self, mut done: impl FnMut(&Harness) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done(self) {
            assert!(Instant::now() < deadline, "port did not reach the expected state");
            self.task.tick();
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn inject(&self, port: usize, slot: WatchedHandle) {
        let fd = self.task.watched_fd(port, slot).unwrap();
        self.script.lock().events.push_back(vec![fd]);
    }

    fn control_type(&self, port: usize) -> Option<String> {
        self.table
            .get_field("", &format!("TRANSCEIVER_MODULES_MGMT|{}", port), "control_type")
    }

    fn changes(&mut self) -> Vec<ModuleChanges> {
        let mut batches = Vec::new();
        while let Ok(batch) = self.rx.try_recv() {
            batches.push(batch);
        }
        batches
    }
}

fn changes(entries: &[(&str, &str)]) -> ModuleChanges {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn test_unpowered_module_settles_to_powered() {
    let mut h = HarnessBuilder::new(1)
        .cage(0, POWERED_CAGE)
        .cage(0, &[("power_on", "0")])
        .module(0, sw_module())
        .build();

    let started = Instant::now();
    h.drive_until(|h| h.task.waiting_ports() == vec![0]);

    let snapshot = h.snapshot(0);
    assert_eq!(snapshot.current_state, ModuleState::NotPowered);
    assert!(snapshot.awaiting_power_settle);
    assert_eq!(read_attr(&h.dir, 0, "power_on"), "1");
    assert_eq!(read_attr(&h.dir, 0, "hw_reset"), "0");

    // No more sweeps: only the settle timer can move the port now
    let deadline = Instant::now() + Duration::from_secs(2);
    while h.snapshot(0).current_state == ModuleState::NotPowered {
        assert!(Instant::now() < deadline, "settle timer never released the port");
        thread::sleep(Duration::from_millis(2));
    }
    assert!(started.elapsed() >= Duration::from_millis(SETTLE_MS));

    let snapshot = h.snapshot(0);
    assert_eq!(snapshot.current_state, ModuleState::Powered);
    assert!(!snapshot.awaiting_power_settle);
    assert!(h.task.waiting_ports().is_empty());
    h.task.stop();
}

#[test]
fn test_supported_module_is_software_controlled() {
    let mut h = HarnessBuilder::new(1)
        .cage(0, POWERED_CAGE)
        .module(0, sw_module())
        .build();

    h.task.run_static_detection();

    let snapshot = h.snapshot(0);
    assert_eq!(snapshot.final_state, Some(ModuleState::SwControl));
    assert_eq!(
        snapshot.presence_path,
        Some(h.dir.path().join("module0/hw_present"))
    );
    assert_eq!(h.control_type(0), Some("SW_CONTROL".to_string()));
    assert_eq!(read_attr(&h.dir, 0, "frequency"), "1");
    assert_eq!(h.changes(), vec![changes(&[("0", "1")])]);
    assert!(h.task.active_ports().is_empty());
    h.task.stop();
}

#[test]
fn test_unsupported_module_is_firmware_controlled() {
    let mut h = HarnessBuilder::new(1)
        .cage(0, POWERED_CAGE)
        .module(
            0,
            FakeModule {
                identifier: Some(81),
                ..sw_module()
            },
        )
        .build();

    h.task.run_static_detection();

    let snapshot = h.snapshot(0);
    assert_eq!(snapshot.final_state, Some(ModuleState::FwControl));
    assert_eq!(
        snapshot.presence_path,
        Some(h.dir.path().join("module0/present"))
    );
    assert_eq!(read_attr(&h.dir, 0, "control"), "0");
    assert_eq!(read_attr(&h.dir, 0, "frequency"), "7");
    assert_eq!(h.control_type(0), Some("FW_CONTROL".to_string()));
    assert_eq!(h.changes(), vec![changes(&[("0", "1")])]);

    // Only the legacy presence handle is watched, next to power good
    assert!(h.task.watched_fd(0, WatchedHandle::Presence).is_some());
    assert_eq!(h.task.watched_count(), 2);
    assert_eq!(h.script.lock().registered.len(), 2);
    h.task.stop();
}

#[test]
fn test_flat_memory_module_is_firmware_controlled() {
    let mut h = HarnessBuilder::new(1)
        .cage(0, POWERED_CAGE)
        .module(
            0,
            FakeModule {
                flat: true,
                ..sw_module()
            },
        )
        .build();

    h.task.run_static_detection();
    assert_eq!(h.snapshot(0).final_state, Some(ModuleState::FwControl));
    assert_eq!(h.control_type(0), Some("FW_CONTROL".to_string()));
    h.task.stop();
}

#[test]
fn test_unavailable_module_memory_reinitializes_reader() {
    let mut h = HarnessBuilder::new(1).cage(0, POWERED_CAGE).build();

    h.task.run_static_detection();
    assert_eq!(h.snapshot(0).final_state, Some(ModuleState::FwControl));
    assert_eq!(h.bank.lock().reinits, vec![0]);
    h.task.stop();
}

#[test]
fn test_unplug_resets_finalized_port() {
    let mut h = HarnessBuilder::new(1)
        .cage(0, POWERED_CAGE)
        .module(0, sw_module())
        .build();

    h.task.run_static_detection();
    assert_eq!(h.control_type(0), Some("SW_CONTROL".to_string()));
    h.changes();

    cage(&h.dir, 0, &[("hw_present", "0")]);
    h.inject(0, WatchedHandle::Presence);
    h.task.dynamic_iteration().unwrap();

    assert_eq!(h.task.event_count(0, WatchedHandle::Presence), 1);
    assert_eq!(h.control_type(0), None);
    assert_eq!(h.snapshot(0).final_state, Some(ModuleState::HwNotPresent));
    assert_eq!(h.changes(), vec![changes(&[("0", "0")])]);
    assert!(h.task.active_ports().is_empty());
    h.task.stop();
}

#[test]
fn test_reset_restores_independent_presence_handle() {
    let mut h = HarnessBuilder::new(1)
        .cage(0, POWERED_CAGE)
        .module(
            0,
            FakeModule {
                identifier: Some(81),
                ..sw_module()
            },
        )
        .build();

    h.task.run_static_detection();
    assert_eq!(
        h.snapshot(0).presence_path,
        Some(h.dir.path().join("module0/present"))
    );

    // Swap the module for a supported one
    h.bank.lock().modules.insert(0, sw_module());
    h.inject(0, WatchedHandle::Presence);

    let deadline = Instant::now() + Duration::from_secs(2);
    while h.snapshot(0).final_state != Some(ModuleState::SwControl) {
        assert!(Instant::now() < deadline, "port was not re-classified");
        h.task.dynamic_iteration().unwrap();
    }
    assert_eq!(
        h.snapshot(0).presence_path,
        Some(h.dir.path().join("module0/hw_present"))
    );
    assert_eq!(h.control_type(0), Some("SW_CONTROL".to_string()));
    h.task.stop();
}

#[test]
fn test_power_limit_exceeded() {
    let mut h = HarnessBuilder::new(1)
        .cage(0, POWERED_CAGE)
        .module(
            0,
            FakeModule {
                max_power: 20,
                ..sw_module()
            },
        )
        .build();

    h.task.run_static_detection();

    assert_eq!(
        h.snapshot(0).final_state,
        Some(ModuleState::PowerLimitError)
    );
    assert!(h.table.is_empty());
    assert_eq!(read_attr(&h.dir, 0, "frequency"), "7");
    assert_eq!(h.changes(), vec![changes(&[("0", "0")])]);
    h.task.stop();
}

#[test]
fn test_blocked_identifier_exhausts_retries() {
    let mut h = HarnessBuilder::new(1)
        .cage(0, POWERED_CAGE)
        .module(
            0,
            FakeModule {
                identifier: None,
                ..sw_module()
            },
        )
        .build();

    h.task.run_static_detection();

    let snapshot = h.snapshot(0);
    assert_eq!(snapshot.final_state, Some(ModuleState::Error));
    assert_eq!(snapshot.eeprom_retries, 4);
    assert_eq!(h.bank.lock().identity_reads.get(&0), Some(&5));
    assert_eq!(read_attr(&h.dir, 0, "hw_reset"), "0");
    assert!(h.table.is_empty());
    assert_eq!(h.changes(), vec![changes(&[("0", "0")])]);
    h.task.stop();
}

#[test]
fn test_identifier_recovers_after_retry() {
    let mut h = HarnessBuilder::new(1)
        .cage(0, POWERED_CAGE)
        .module(
            0,
            FakeModule {
                identifier: None,
                ..sw_module()
            },
        )
        .build();

    h.drive_until(|h| h.snapshot(0).eeprom_retries == 1);
    h.bank.lock().modules.insert(0, sw_module());
    h.task.run_static_detection();

    let snapshot = h.snapshot(0);
    assert_eq!(snapshot.final_state, Some(ModuleState::SwControl));
    assert_eq!(snapshot.eeprom_retries, 1);
    h.task.stop();
}

#[test]
fn test_legacy_platform_reports_present_modules() {
    let mut h = HarnessBuilder::new(2)
        .legacy()
        .cage(0, &[("present", "1")])
        .cage(1, &[("present", "0")])
        .build();

    h.task.run_static_detection();

    let snapshot = h.snapshot(0);
    assert!(!snapshot.uses_independent_mode);
    assert_eq!(snapshot.final_state, Some(ModuleState::HwPresent));
    assert_eq!(
        snapshot.presence_path,
        Some(h.dir.path().join("module0/present"))
    );
    assert_eq!(h.snapshot(1).final_state, Some(ModuleState::HwNotPresent));
    assert!(h.table.is_empty());
    assert_eq!(h.changes(), vec![changes(&[("0", "1"), ("1", "0")])]);
    h.task.stop();
}

#[test]
fn test_legacy_port_without_presence_file_is_not_present() {
    let mut h = HarnessBuilder::new(1).legacy().cage(0, &[]).build();

    h.task.run_static_detection();

    let snapshot = h.snapshot(0);
    assert_eq!(snapshot.final_state, Some(ModuleState::HwNotPresent));
    assert!(h.task.active_ports().is_empty());
    assert!(h.table.is_empty());
    assert_eq!(h.changes(), vec![changes(&[("0", "0")])]);
    h.task.stop();
}

#[test]
fn test_missing_presence_attribute_falls_back_to_legacy() {
    let mut h = HarnessBuilder::new(1)
        .cage(0, &[("present", "1")])
        .build();

    h.task.run_static_detection();
    let snapshot = h.snapshot(0);
    assert!(!snapshot.uses_independent_mode);
    assert_eq!(snapshot.final_state, Some(ModuleState::HwPresent));
    h.task.stop();
}

#[test]
fn test_empty_cage_detects_insertion() {
    let mut h = HarnessBuilder::new(1)
        .cage(0, POWERED_CAGE)
        .cage(0, &[("hw_present", "0")])
        .module(0, sw_module())
        .build();

    h.task.run_static_detection();
    assert_eq!(h.snapshot(0).final_state, Some(ModuleState::HwNotPresent));
    assert!(h.task.watched_fd(0, WatchedHandle::Presence).is_some());
    assert_eq!(h.changes(), vec![changes(&[("0", "0")])]);

    cage(&h.dir, 0, &[("hw_present", "1")]);
    h.inject(0, WatchedHandle::Presence);

    let deadline = Instant::now() + Duration::from_secs(2);
    while h.snapshot(0).final_state != Some(ModuleState::SwControl) {
        assert!(Instant::now() < deadline, "inserted module was not classified");
        h.task.dynamic_iteration().unwrap();
    }
    assert_eq!(h.changes(), vec![changes(&[("0", "1")])]);
    assert_eq!(h.control_type(0), Some("SW_CONTROL".to_string()));
    h.task.stop();
}

#[test]
fn test_power_not_good() {
    let mut h = HarnessBuilder::new(1)
        .cage(0, POWERED_CAGE)
        .cage(0, &[("power_good", "0")])
        .build();

    h.task.run_static_detection();
    assert_eq!(h.snapshot(0).final_state, Some(ModuleState::HwNotPresent));
    // Power good stays watched so recovery is noticed
    assert!(h.task.watched_fd(0, WatchedHandle::PowerGood).is_some());
    h.task.stop();
}

#[test]
fn test_ports_finalize_in_port_order() {
    let mut h = HarnessBuilder::new(3)
        .cage(0, POWERED_CAGE)
        .cage(1, POWERED_CAGE)
        .cage(1, &[("hw_present", "0")])
        .cage(2, POWERED_CAGE)
        .module(0, sw_module())
        .module(2, sw_module())
        .build();

    h.task.run_static_detection();

    assert_eq!(
        h.changes(),
        vec![
            changes(&[("1", "0")]),
            changes(&[("0", "1"), ("2", "1")]),
        ]
    );
    for port in 0..3 {
        assert!(h.snapshot(port).final_state.is_some());
    }
    h.task.stop();
}

#[test]
fn test_full_channel_keeps_changes_for_next_cycle() {
    let mut h = HarnessBuilder::new(2)
        .capacity(1)
        .cage(0, POWERED_CAGE)
        .cage(0, &[("hw_present", "0")])
        .cage(1, POWERED_CAGE)
        .module(1, sw_module())
        .build();

    // Port 0 goes out on the first tick and is never consumed
    h.task.run_static_detection();
    assert_eq!(h.task.publisher().pending(), changes(&[("1", "1")]));

    assert_eq!(h.changes(), vec![changes(&[("0", "0")])]);

    // The next terminal port flushes both
    h.inject(0, WatchedHandle::Presence);
    h.task.dynamic_iteration().unwrap();
    assert_eq!(h.changes(), vec![changes(&[("0", "0"), ("1", "1")])]);
    assert!(h.task.publisher().pending().is_empty());
    h.task.stop();
}

#[test]
fn test_run_stops_on_shutdown() {
    let h = HarnessBuilder::new(1)
        .cage(0, POWERED_CAGE)
        .module(0, sw_module())
        .build();

    let Harness {
        dir: _dir,
        mut task,
        rx: _rx,
        script,
        shutdown,
        ..
    } = h;

    let worker = thread::spawn(move || {
        task.run();
        task
    });

    let deadline = Instant::now() + Duration::from_secs(2);
    while script.lock().registered.len() < 2 {
        assert!(Instant::now() < deadline, "static detection did not finish");
        thread::sleep(Duration::from_millis(2));
    }
    shutdown.request_shutdown();

    let task = worker.join().unwrap();
    assert_eq!(task.watched_count(), 0);
    assert!(script.lock().registered.is_empty());
    assert_eq!(
        task.port_snapshot(0).unwrap().final_state,
        Some(ModuleState::SwControl)
    );
}
