//! Transceiver Modules Management Daemon
//!
//! Brings up pluggable transceiver modules on platforms running in
//! independent module mode: detects presence, powers modules on, waits for
//! them to settle and classifies each one as firmware or software
//! controlled. Results go to a change channel and to the
//! TRANSCEIVER_MODULES_MGMT table of STATE_DB.
//!
//! After the initial pass the daemon watches presence and power-good
//! attributes and re-runs any port whose module is plugged or unplugged.

pub mod config;
pub mod eeprom;
pub mod engine;
pub mod error;
pub mod platform;
pub mod poller;
pub mod production;
pub mod publisher;
pub mod state;
pub mod sysfs;
pub mod tables;
pub mod timer;

pub use config::{ModulesMgrConfig, NamespaceConfig, PolicyConfig, TimingConfig};
pub use eeprom::{EepromField, ModuleApi, ModuleEepromReader, SysfsEepromReader};
pub use engine::{EngineSettings, ModulesMgmtTask, PortSnapshot, Transition, WatchedHandle};
pub use error::*;
pub use platform::{detect_independent_mode, discover_port_count};
pub use poller::{EventMultiplexer, PollMultiplexer};
pub use production::{ShutdownCoordinator, SystemdNotifier};
pub use publisher::{
    ChangeSink, MemoryStateTable, ModuleChanges, RedisStateTable, ResultPublisher, StateTable,
};
pub use state::{ControlType, ModulePort, ModuleState, PortTable};
pub use sysfs::{Attribute, AttributeHandle, SysfsAttributes};
pub use timer::{SettleTimer, WaitingSet};
