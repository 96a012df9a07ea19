// ── Per-sensor registry ──
//
// Concurrent map from sensor identity to that sensor's mutable state.
// Each sensor lives in its own entry, so work on one sensor never waits
// for another beyond `DashMap`'s shard granularity, and work on the same
// sensor is serialized by the entry lock.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::model::SensorId;

/// Storage for per-sensor state `S`, addressable by MAC or LUID.
pub(crate) struct SensorRegistry<S> {
    /// Primary storage: primary key -> state.
    /// The primary key is `mac:<mac>` when the MAC is known, `luid:<luid>` otherwise.
    by_key: DashMap<String, S>,

    /// Every known identifier key -> primary key.
    aliases: DashMap<String, String>,
}

impl<S> SensorRegistry<S> {
    pub(crate) fn new() -> Self {
        Self {
            by_key: DashMap::new(),
            aliases: DashMap::new(),
        }
    }

    /// Insert state for a new sensor. Returns `false` (and drops `state`)
    /// when the sensor is already present under any of its identifiers.
    pub(crate) fn insert(&self, id: &SensorId, state: S) -> bool {
        if self.resolve(id).is_some() {
            return false;
        }
        let key = id.primary_key();
        match self.by_key.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                for alias in [id.mac_key(), id.luid_key()].into_iter().flatten() {
                    self.aliases.insert(alias, key.clone());
                }
                slot.insert(state);
                true
            }
        }
    }

    /// Find the primary key for `id`, preferring its MAC.
    pub(crate) fn resolve(&self, id: &SensorId) -> Option<String> {
        let by_mac = id
            .mac_key()
            .and_then(|k| self.aliases.get(&k).map(|r| r.value().clone()));
        by_mac.or_else(|| {
            id.luid_key()
                .and_then(|k| self.aliases.get(&k).map(|r| r.value().clone()))
        })
    }

    /// Record identifier forms of `id` not yet known for `key`.
    pub(crate) fn learn_aliases(&self, key: &str, id: &SensorId) {
        for alias in [id.mac_key(), id.luid_key()].into_iter().flatten() {
            self.aliases
                .entry(alias)
                .or_insert_with(|| key.to_owned());
        }
    }

    /// Run `f` with exclusive access to the sensor's state.
    pub(crate) fn with_mut<R>(&self, key: &str, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let mut entry = self.by_key.get_mut(key)?;
        Some(f(entry.value_mut()))
    }

    /// Run `f` with shared access to the sensor's state.
    pub(crate) fn with<R>(&self, key: &str, f: impl FnOnce(&S) -> R) -> Option<R> {
        let entry = self.by_key.get(key)?;
        Some(f(entry.value()))
    }

    /// Remove a sensor and every alias pointing at it.
    pub(crate) fn remove(&self, id: &SensorId) -> Option<S> {
        let key = self.resolve(id)?;
        let (_, state) = self.by_key.remove(&key)?;
        self.aliases.retain(|_, target| *target != key);
        Some(state)
    }

    /// All primary keys currently present.
    pub(crate) fn keys(&self) -> Vec<String> {
        self.by_key.iter().map(|r| r.key().clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }
}
