//! Result publisher.
//!
//! Terminal outcomes are batched into a change-set (port index string to
//! "0"/"1") and handed to the result channel. FW/SW-controlled ports are
//! also written to the `TRANSCEIVER_MODULES_MGMT` table of every front-end
//! namespace.
//!
//! A change-set is published whole or not at all: on a full channel the
//! batch stays pending and goes out with the next one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use redis::Commands;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::config::NamespaceConfig;
use crate::error::{ModulesMgmtError, Result};
use crate::state::ModuleState;
use crate::tables::{fields, modules_mgmt_key};

/// Port index (as string) to control outcome ("0" or "1").
pub type ModuleChanges = BTreeMap<String, String>;

/// Pause between enqueue attempts on a full channel.
const ENQUEUE_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Consumer side of the published change-sets.
pub trait ChangeSink: Send + Sync {
    /// Enqueues one change-set, waiting at most `timeout` for room.
    fn publish(&self, changes: &ModuleChanges, timeout: Duration) -> Result<()>;
}

impl ChangeSink for mpsc::Sender<ModuleChanges> {
    fn publish(&self, changes: &ModuleChanges, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_send(changes.clone()) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => return Err(ModulesMgmtError::ChannelClosed),
                Err(TrySendError::Full(_)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ModulesMgmtError::ChannelFull {
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                    thread::sleep(ENQUEUE_RETRY_INTERVAL.min(deadline - now));
                }
            }
        }
    }
}

/// Persistent key-value table, one instance per namespace.
pub trait StateTable: Send + Sync {
    /// Sets one field of a row, creating the row if needed.
    fn set_field(&self, namespace: &str, key: &str, field: &str, value: &str) -> Result<()>;

    /// Deletes a row.
    fn delete(&self, namespace: &str, key: &str) -> Result<()>;
}

/// In-memory table backend.
#[derive(Debug, Default)]
pub struct MemoryStateTable {
    rows: Mutex<BTreeMap<(String, String), BTreeMap<String, String>>>,
}

impl MemoryStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns one field of a row.
    pub fn get_field(&self, namespace: &str, key: &str, field: &str) -> Option<String> {
        self.rows
            .lock()
            .get(&(namespace.to_string(), key.to_string()))
            .and_then(|row| row.get(field).cloned())
    }

    /// Returns every field of a row.
    pub fn row(&self, namespace: &str, key: &str) -> Option<BTreeMap<String, String>> {
        self.rows
            .lock()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    /// Total number of rows across namespaces.
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl StateTable for MemoryStateTable {
    fn set_field(&self, namespace: &str, key: &str, field: &str, value: &str) -> Result<()> {
        self.rows
            .lock()
            .entry((namespace.to_string(), key.to_string()))
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        self.rows
            .lock()
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

struct NamespaceConnection {
    client: redis::Client,
    connection: Mutex<Option<redis::Connection>>,
}

/// STATE_DB backend, one lazily connected client per namespace.
///
/// A failed command drops the connection; the next command reconnects.
pub struct RedisStateTable {
    namespaces: HashMap<String, NamespaceConnection>,
    connect_timeout: Duration,
}

impl RedisStateTable {
    /// Connecting runs on the detection thread, so it is bounded by
    /// `connect_timeout`.
    pub fn new(namespaces: &[NamespaceConfig], connect_timeout: Duration) -> Result<Self> {
        let mut clients = HashMap::new();
        for ns in namespaces {
            let client = redis::Client::open(ns.uri())
                .map_err(|e| ModulesMgmtError::database("open", e))?;
            debug!(namespace = %ns.name, uri = %ns.uri(), "STATE_DB client created");
            clients.insert(
                ns.name.clone(),
                NamespaceConnection {
                    client,
                    connection: Mutex::new(None),
                },
            );
        }
        Ok(Self {
            namespaces: clients,
            connect_timeout,
        })
    }

    fn with_connection<T>(
        &self,
        namespace: &str,
        operation: &str,
        command: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T> {
        let entry = self.namespaces.get(namespace).ok_or_else(|| {
            ModulesMgmtError::database(operation, format!("unknown namespace {:?}", namespace))
        })?;

        let mut guard = entry.connection.lock();
        if guard.is_none() {
            let connection = entry
                .client
                .get_connection_with_timeout(self.connect_timeout)
                .map_err(|e| ModulesMgmtError::database(operation, e))?;
            *guard = Some(connection);
        }
        let Some(connection) = guard.as_mut() else {
            return Err(ModulesMgmtError::database(operation, "not connected"));
        };

        match command(connection) {
            Ok(value) => Ok(value),
            Err(e) => {
                *guard = None;
                Err(ModulesMgmtError::database(operation, e))
            }
        }
    }
}

impl StateTable for RedisStateTable {
    fn set_field(&self, namespace: &str, key: &str, field: &str, value: &str) -> Result<()> {
        self.with_connection(namespace, "hset", |conn| conn.hset(key, field, value))
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        self.with_connection(namespace, "del", |conn| conn.del(key))
    }
}

/// Batches terminal outcomes and delivers them.
///
/// The pending change-set lock is the publish-time lock: table writes and
/// the channel enqueue both happen under it.
pub struct ResultPublisher {
    namespaces: Vec<String>,
    sink: Box<dyn ChangeSink>,
    table: Arc<dyn StateTable>,
    publish_timeout: Duration,
    pending: Mutex<ModuleChanges>,
}

impl ResultPublisher {
    pub fn new(
        namespaces: Vec<String>,
        sink: Box<dyn ChangeSink>,
        table: Arc<dyn StateTable>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            namespaces,
            sink,
            table,
            publish_timeout,
            pending: Mutex::new(ModuleChanges::new()),
        }
    }

    /// Adds a finalized port to the pending change-set.
    ///
    /// FW/SW-controlled ports also get their control type written to every
    /// namespace. Table failures are logged and do not affect the batch.
    pub fn record_final(&self, port: usize, state: ModuleState) {
        let mut pending = self.pending.lock();
        pending.insert(port.to_string(), state.change_value().to_string());

        let Some(control_type) = state.control_type() else {
            return;
        };
        let key = modules_mgmt_key(port);
        for namespace in &self.namespaces {
            match self
                .table
                .set_field(namespace, &key, fields::CONTROL_TYPE, control_type.as_str())
            {
                Ok(()) => debug!(
                    port,
                    namespace = %namespace,
                    control_type = control_type.as_str(),
                    "Control type written"
                ),
                Err(e) => warn!(port, namespace = %namespace, error = %e, "Failed to write control type"),
            }
        }
    }

    /// Deletes the persisted rows of ports that were reset.
    pub fn delete_rows(&self, ports: &[usize]) {
        let _pending = self.pending.lock();
        for port in ports {
            let key = modules_mgmt_key(*port);
            for namespace in &self.namespaces {
                match self.table.delete(namespace, &key) {
                    Ok(()) => debug!(port, namespace = %namespace, "Control type row deleted"),
                    Err(e) => warn!(port, namespace = %namespace, error = %e, "Failed to delete control type row"),
                }
            }
        }
    }

    /// Enqueues the pending change-set.
    ///
    /// Returns `Ok(true)` if a batch went out, `Ok(false)` if there was
    /// nothing to send or the channel stayed full (the batch is kept).
    pub fn publish(&self) -> Result<bool> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(false);
        }

        match self.sink.publish(&pending, self.publish_timeout) {
            Ok(()) => {
                info!(changes = ?*pending, "Published module changes");
                pending.clear();
                Ok(true)
            }
            Err(ModulesMgmtError::ChannelFull { timeout_ms }) => {
                warn!(
                    timeout_ms,
                    pending = pending.len(),
                    "Result channel full, keeping changes for the next cycle"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Snapshot of the unpublished change-set.
    pub fn pending(&self) -> ModuleChanges {
        self.pending.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn publisher(
        capacity: usize,
        namespaces: &[&str],
    ) -> (
        ResultPublisher,
        mpsc::Receiver<ModuleChanges>,
        Arc<MemoryStateTable>,
    ) {
        let (tx, rx) = mpsc::channel(capacity);
        let table = Arc::new(MemoryStateTable::new());
        let publisher = ResultPublisher::new(
            namespaces.iter().map(|s| s.to_string()).collect(),
            Box::new(tx),
            table.clone(),
            Duration::from_millis(20),
        );
        (publisher, rx, table)
    }

    fn changes(entries: &[(&str, &str)]) -> ModuleChanges {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_record_and_publish() {
        let (publisher, mut rx, table) = publisher(4, &[""]);
        publisher.record_final(0, ModuleState::SwControl);
        publisher.record_final(1, ModuleState::HwNotPresent);
        publisher.record_final(2, ModuleState::FwControl);

        assert!(publisher.publish().unwrap());
        assert_eq!(
            rx.try_recv().unwrap(),
            changes(&[("0", "1"), ("1", "0"), ("2", "1")])
        );
        assert!(publisher.pending().is_empty());

        assert_eq!(
            table.get_field("", "TRANSCEIVER_MODULES_MGMT|0", "control_type"),
            Some("SW_CONTROL".to_string())
        );
        assert_eq!(
            table.get_field("", "TRANSCEIVER_MODULES_MGMT|2", "control_type"),
            Some("FW_CONTROL".to_string())
        );
        assert_eq!(table.row("", "TRANSCEIVER_MODULES_MGMT|1"), None);
    }

    #[test]
    fn test_error_states_skip_table() {
        let (publisher, _rx, table) = publisher(4, &[""]);
        publisher.record_final(5, ModuleState::PowerLimitError);
        publisher.record_final(6, ModuleState::Error);
        assert!(table.is_empty());
        assert_eq!(publisher.pending(), changes(&[("5", "0"), ("6", "0")]));
    }

    #[test]
    fn test_writes_replicate_across_namespaces() {
        let (publisher, _rx, table) = publisher(4, &["asic0", "asic1"]);
        publisher.record_final(3, ModuleState::SwControl);
        assert_eq!(table.len(), 2);

        publisher.delete_rows(&[3]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_full_channel_keeps_batch() {
        let (publisher, mut rx, _table) = publisher(1, &[""]);
        publisher.record_final(0, ModuleState::SwControl);
        assert!(publisher.publish().unwrap());

        // The consumer has not drained the first batch yet
        publisher.record_final(1, ModuleState::FwControl);
        assert!(!publisher.publish().unwrap());
        assert_eq!(publisher.pending(), changes(&[("1", "1")]));

        publisher.record_final(2, ModuleState::HwNotPresent);
        assert_eq!(rx.try_recv().unwrap(), changes(&[("0", "1")]));
        assert!(publisher.publish().unwrap());
        assert_eq!(rx.try_recv().unwrap(), changes(&[("1", "1"), ("2", "0")]));
    }

    #[test]
    fn test_closed_channel_is_an_error() {
        let (publisher, rx, _table) = publisher(1, &[""]);
        drop(rx);
        publisher.record_final(0, ModuleState::SwControl);
        assert!(matches!(
            publisher.publish(),
            Err(ModulesMgmtError::ChannelClosed)
        ));
        assert_eq!(publisher.pending().len(), 1);
    }

    #[test]
    fn test_nothing_to_publish() {
        let (publisher, mut rx, _table) = publisher(1, &[""]);
        assert!(!publisher.publish().unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_redis_table_unknown_namespace() {
        let table =
            RedisStateTable::new(&[NamespaceConfig::default()], Duration::from_millis(100)).unwrap();
        let err = table.delete("asic9", "TRANSCEIVER_MODULES_MGMT|0").unwrap_err();
        assert!(matches!(err, ModulesMgmtError::Database { .. }));
    }

    #[test]
    fn test_redis_table_unreachable_host_fails_within_timeout() {
        let ns = NamespaceConfig {
            redis_host: "192.0.2.1".to_string(),
            ..NamespaceConfig::default()
        };
        let table = RedisStateTable::new(&[ns], Duration::from_millis(200)).unwrap();

        let started = Instant::now();
        let err = table
            .set_field("", "TRANSCEIVER_MODULES_MGMT|0", "control_type", "SW_CONTROL")
            .unwrap_err();
        assert!(matches!(err, ModulesMgmtError::Database { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
