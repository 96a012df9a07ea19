// ── Rule persistence collaborator ──
//
// Rules are loaded synchronously when a sensor is attached and saved
// fire-and-forget afterwards: the notifier queues writes on an unbounded
// channel drained by a single background task, so evaluation never waits
// on storage.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AlertError;
use crate::model::{AlertRule, AlertType, SensorId};

/// Key-value store for alert rules.
pub trait RulePersistence: Send + Sync {
    fn load_rules(&self, sensor: &SensorId) -> Result<Vec<AlertRule>, AlertError>;

    fn save_rule(&self, sensor: &SensorId, rule: &AlertRule) -> Result<(), AlertError>;

    /// Forget every rule of a sensor that was removed from the system.
    fn remove_sensor(&self, sensor: &SensorId) -> Result<(), AlertError>;
}

fn storage_key(sensor: &SensorId) -> String {
    sensor.primary_key()
}

/// Every key a sensor's rules may sit under, MAC first.
fn identity_keys(sensor: &SensorId) -> impl Iterator<Item = String> {
    sensor.mac_key().into_iter().chain(sensor.luid_key())
}

/// Move a sensor's entry under its primary key when it was saved under
/// another identifier form (a LUID before the MAC was known). Returns
/// whether the document changed.
fn adopt_alias<V>(document: &mut BTreeMap<String, V>, sensor: &SensorId) -> bool {
    let primary = storage_key(sensor);
    if document.contains_key(&primary) {
        return false;
    }
    let found = identity_keys(sensor)
        .filter(|key| *key != primary)
        .find_map(|key| document.remove(&key).map(|value| (key, value)));
    let Some((alias, value)) = found else {
        return false;
    };
    debug!(from = %alias, to = %primary, "rules re-keyed to primary identifier");
    document.insert(primary, value);
    true
}

/// Drop every entry of a sensor, whichever identifier it was saved under.
fn remove_all<V>(document: &mut BTreeMap<String, V>, sensor: &SensorId) -> bool {
    identity_keys(sensor).fold(false, |removed, key| {
        document.remove(&key).is_some() || removed
    })
}

// ── In-memory store ──────────────────────────────────────────────────

/// Volatile store that counts writes. Useful for tests and for running
/// the engine without durable storage.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    rules: Mutex<BTreeMap<String, BTreeMap<AlertType, AlertRule>>>,
    writes: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a sensor's rules without counting a write.
    pub fn seed(&self, sensor: &SensorId, rules: impl IntoIterator<Item = AlertRule>) {
        let mut guard = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = guard.entry(storage_key(sensor)).or_default();
        for rule in rules {
            entry.insert(rule.alert_type(), rule);
        }
    }

    /// Number of `save_rule` calls served so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }

    pub fn saved(&self, sensor: &SensorId, alert: AlertType) -> Option<AlertRule> {
        let guard = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        guard.get(&storage_key(sensor))?.get(&alert).cloned()
    }
}

impl RulePersistence for MemoryPersistence {
    fn load_rules(&self, sensor: &SensorId) -> Result<Vec<AlertRule>, AlertError> {
        let mut guard = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        adopt_alias(&mut guard, sensor);
        Ok(guard
            .get(&storage_key(sensor))
            .map(|rules| rules.values().cloned().collect())
            .unwrap_or_default())
    }

    fn save_rule(&self, sensor: &SensorId, rule: &AlertRule) -> Result<(), AlertError> {
        let mut guard = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .entry(storage_key(sensor))
            .or_default()
            .insert(rule.alert_type(), rule.clone());
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn remove_sensor(&self, sensor: &SensorId) -> Result<(), AlertError> {
        let mut guard = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        remove_all(&mut guard, sensor);
        Ok(())
    }
}

// ── JSON file store ──────────────────────────────────────────────────

type RuleDocument = BTreeMap<String, Vec<AlertRule>>;

/// All rules of all sensors in one JSON document, rewritten atomically
/// (temp file + rename) on every save.
#[derive(Debug)]
pub struct JsonFilePersistence {
    path: PathBuf,
    document: Mutex<RuleDocument>,
}

impl JsonFilePersistence {
    /// Open the document at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AlertError> {
        let path = path.into();
        let document = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => RuleDocument::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RuleDocument::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, document: &RuleDocument) -> Result<(), AlertError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(document)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl RulePersistence for JsonFilePersistence {
    fn load_rules(&self, sensor: &SensorId) -> Result<Vec<AlertRule>, AlertError> {
        let mut guard = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        if adopt_alias(&mut guard, sensor) {
            self.flush(&guard)?;
        }
        Ok(guard.get(&storage_key(sensor)).cloned().unwrap_or_default())
    }

    fn save_rule(&self, sensor: &SensorId, rule: &AlertRule) -> Result<(), AlertError> {
        let mut guard = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        let rules = guard.entry(storage_key(sensor)).or_default();
        match rules.iter_mut().find(|r| r.alert_type() == rule.alert_type()) {
            Some(existing) => *existing = rule.clone(),
            None => rules.push(rule.clone()),
        }
        self.flush(&guard)
    }

    fn remove_sensor(&self, sensor: &SensorId) -> Result<(), AlertError> {
        let mut guard = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        if remove_all(&mut guard, sensor) {
            self.flush(&guard)?;
        }
        Ok(())
    }
}

// ── Write-behind queue ───────────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum PersistOp {
    Save {
        sensor: SensorId,
        rule: AlertRule,
    },
    Remove {
        sensor: SensorId,
        ticket: RemovalTicket,
    },
}

/// Sensors whose removal is queued but not yet written. Stored rules of
/// such a sensor are stale and must not be loaded again.
#[derive(Debug, Default, Clone)]
pub(crate) struct PendingRemovals {
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl PendingRemovals {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark `sensor` as pending until the returned ticket is dropped.
    pub(crate) fn ticket(&self, sensor: &SensorId) -> RemovalTicket {
        let keys: Vec<String> = identity_keys(sensor).collect();
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        for key in &keys {
            *counts.entry(key.clone()).or_default() += 1;
        }
        RemovalTicket {
            pending: self.clone(),
            keys,
        }
    }

    pub(crate) fn contains(&self, sensor: &SensorId) -> bool {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        identity_keys(sensor).any(|key| counts.contains_key(&key))
    }
}

/// Held by a queued `Remove`; clears the pending mark when dropped,
/// which happens once the remove has been applied.
pub(crate) struct RemovalTicket {
    pending: PendingRemovals,
    keys: Vec<String>,
}

impl fmt::Debug for RemovalTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemovalTicket").field(&self.keys).finish()
    }
}

impl Drop for RemovalTicket {
    fn drop(&mut self) {
        let mut counts = self
            .pending
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            if let Some(count) = counts.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(key);
                }
            }
        }
    }
}

pub(crate) fn apply(store: &dyn RulePersistence, op: PersistOp) {
    let result = match &op {
        PersistOp::Save { sensor, rule } => store.save_rule(sensor, rule),
        PersistOp::Remove { sensor, .. } => store.remove_sensor(sensor),
    };
    match result {
        Ok(()) => debug!(?op, "rule persisted"),
        Err(e) => warn!(error = %e, ?op, "rule persistence failed (rule kept in memory)"),
    }
}

/// Single consumer for all persistence writes. On cancellation, whatever
/// is already queued is written before the task exits.
pub(crate) async fn persistence_task(
    store: Arc<dyn RulePersistence>,
    mut rx: mpsc::UnboundedReceiver<PersistOp>,
    cancel: CancellationToken,
) {
    debug!("persistence task started");
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                while let Ok(op) = rx.try_recv() {
                    apply(store.as_ref(), op);
                }
                break;
            }
            op = rx.recv() => {
                let Some(op) = op else { break };
                apply(store.as_ref(), op);
            }
        }
    }
    debug!("persistence task stopped");
}
