// ── Alert notifier ──
//
// Full lifecycle of per-sensor alert state: attach/remove, record
// ingestion, rule edits, tri-state derivation and publication, and the
// write-behind persistence queue. Cheaply cloneable (`Arc` inner).

mod slot;
mod subscription;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::edit::RuleEdit;
use crate::error::AlertError;
use crate::model::units::unseen_secs;
use crate::model::{
    AlertCondition, AlertKind, AlertRule, AlertStatus, AlertType, BoundEdge, DisplayUnit,
    MeasurementSnapshot, Mutation, SensorId, TriState,
};
use crate::persistence::{PendingRemovals, PersistOp, RulePersistence, apply, persistence_task};
use crate::policy::{FireabilityPolicy, SensorFacts};
use crate::store::{RuleTable, SensorRegistry};
use crate::stream::AlertStream;

pub use slot::AlertCallback;
pub use subscription::Subscription;

use slot::{Listener, Notification, SensorSlot};

// ── Notifier ─────────────────────────────────────────────────────────

/// The alert engine for a set of sensors.
#[derive(Clone)]
pub struct AlertNotifier {
    inner: Arc<NotifierInner>,
}

pub(crate) struct NotifierInner {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    policy: FireabilityPolicy,
    pub(crate) sensors: SensorRegistry<SensorSlot>,
    persistence: Arc<dyn RulePersistence>,
    persist_tx: mpsc::UnboundedSender<PersistOp>,
    persist_rx: Mutex<Option<mpsc::UnboundedReceiver<PersistOp>>>,
    removals: PendingRemovals,
    started: AtomicBool,
    warned_unstarted: AtomicBool,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    next_listener_id: AtomicU64,
}

impl Drop for NotifierInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl AlertNotifier {
    pub fn new(
        config: EngineConfig,
        persistence: Arc<dyn RulePersistence>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = config.sanitized();
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(NotifierInner {
                policy: FireabilityPolicy::new(config.authorized),
                config,
                clock,
                sensors: SensorRegistry::new(),
                persistence,
                persist_tx,
                persist_rx: Mutex::new(Some(persist_rx)),
                removals: PendingRemovals::new(),
                started: AtomicBool::new(false),
                warned_unstarted: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the persistence writer. Required for durable rules: writes
    /// queue up in memory until this runs.
    pub async fn start(&self) {
        let Some(rx) = self.inner.persist_rx.lock().await.take() else {
            debug!("notifier already started");
            return;
        };
        let handle = tokio::spawn(persistence_task(
            Arc::clone(&self.inner.persistence),
            rx,
            self.inner.cancel.clone(),
        ));
        self.inner.task_handles.lock().await.push(handle);
        self.inner.started.store(true, Ordering::Release);
        info!("alert notifier started");
    }

    /// Stop background work, flushing queued rule writes first. Final:
    /// writes issued afterwards are logged and dropped.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("alert notifier stopped");
    }

    // ── Sensor registry ──────────────────────────────────────────────

    /// Start tracking a sensor, loading its rules from persistence.
    /// Returns `Ok(false)` if it was already attached.
    pub fn attach(&self, sensor: &SensorId, facts: SensorFacts) -> Result<bool, AlertError> {
        if self.inner.sensors.resolve(sensor).is_some() {
            return Ok(false);
        }
        // A queued removal means whatever the store holds is already gone.
        let loaded = if self.inner.removals.contains(sensor) {
            debug!(sensor = %sensor, "removal still queued, starting without rules");
            Vec::new()
        } else {
            self.inner.persistence.load_rules(sensor)?
        };
        let count = loaded.len();
        let mut rules = RuleTable::new(self.inner.config.cloud_unseen_default_secs);
        rules.load(loaded);

        let slot = SensorSlot::new(sensor.clone(), facts, rules, self.now());
        if !self.inner.sensors.insert(sensor, slot) {
            return Ok(false);
        }
        info!(
            sensor = %sensor,
            rules = count,
            attached = self.inner.sensors.len(),
            "sensor attached"
        );
        self.reprocess(sensor)?;
        Ok(true)
    }

    /// Remove a sensor from the system, destroying its rules. Open
    /// streams end and subscriptions go quiet.
    pub fn detach(&self, sensor: &SensorId) -> bool {
        let Some(slot) = self.inner.sensors.remove(sensor) else {
            return false;
        };
        self.persist(PersistOp::Remove {
            sensor: slot.storage_id.clone(),
            ticket: self.inner.removals.ticket(&slot.storage_id),
        });
        info!(sensor = %slot.identity, "sensor removed");
        true
    }

    pub fn sensors(&self) -> Vec<SensorId> {
        self.inner
            .sensors
            .keys()
            .iter()
            .filter_map(|key| self.inner.sensors.with(key, |s| s.identity.clone()))
            .collect()
    }

    pub fn is_attached(&self, sensor: &SensorId) -> bool {
        self.inner.sensors.resolve(sensor).is_some()
    }

    // ── Inputs ───────────────────────────────────────────────────────

    /// Feed one measurement record. Records for sensors that are not
    /// attached are dropped; returns whether the record was taken.
    pub fn ingest(&self, sensor: &SensorId, record: MeasurementSnapshot) -> bool {
        let Some(key) = self.inner.sensors.resolve(sensor) else {
            debug!(sensor = %sensor, "dropping record for unattached sensor");
            return false;
        };
        self.inner.sensors.learn_aliases(&key, sensor);
        let now = self.now();
        let policy = &self.inner.policy;
        let notes = self.inner.sensors.with_mut(&key, |slot| {
            slot.identity.merge(sensor);
            let source = record.source;
            if !slot.accept(record) {
                debug!(sensor = %slot.identity, ?source, "stale record ignored");
            }
            slot.reconcile(policy, now)
        });
        let Some(notes) = notes else {
            return false;
        };
        deliver(notes);
        true
    }

    /// Local connection came up or went down.
    pub fn connectivity_changed(
        &self,
        sensor: &SensorId,
        connected: bool,
    ) -> Result<(), AlertError> {
        self.update_facts(sensor, |slot| slot.set_connected(connected))
    }

    /// The sensor became (or stopped being) relayed through the cloud.
    pub fn cloud_mode_changed(
        &self,
        sensor: &SensorId,
        cloud_backed: bool,
    ) -> Result<(), AlertError> {
        self.update_facts(sensor, |slot| {
            let changed = slot.facts.cloud_backed != cloud_backed;
            slot.facts.cloud_backed = cloud_backed;
            changed
        })
    }

    /// The tag started or stopped advertising its notification service.
    pub fn service_channel_changed(&self, sensor: &SensorId, open: bool) -> Result<(), AlertError> {
        self.update_facts(sensor, |slot| {
            let changed = slot.facts.service_channel != open;
            slot.facts.service_channel = open;
            changed
        })
    }

    /// Account session was gained or lost. Every sensor is re-evaluated.
    pub fn authorization_changed(&self, authorized: bool) {
        if !self.inner.policy.set_authorized(authorized) {
            return;
        }
        info!(authorized, "authorization changed");
        for key in self.inner.sensors.keys() {
            self.reconcile_key(&key);
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.inner.policy.is_authorized()
    }

    fn update_facts(
        &self,
        sensor: &SensorId,
        update: impl FnOnce(&mut SensorSlot) -> bool,
    ) -> Result<(), AlertError> {
        let key = self.resolve(sensor)?;
        let now = self.now();
        let policy = &self.inner.policy;
        let notes = self
            .inner
            .sensors
            .with_mut(&key, |slot| {
                if update(slot) {
                    debug!(sensor = %slot.identity, facts = ?slot.facts, "delivery facts changed");
                    slot.reconcile(policy, now)
                } else {
                    Vec::new()
                }
            })
            .ok_or_else(|| unknown(sensor))?;
        deliver(notes);
        Ok(())
    }

    // ── Rule edits ───────────────────────────────────────────────────

    /// Apply one rule edit. Rejected edits leave the stored rule as it
    /// was; accepted changes are re-evaluated, published and queued for
    /// persistence.
    pub fn apply(&self, sensor: &SensorId, edit: RuleEdit) -> Result<Mutation, AlertError> {
        let key = self.resolve(sensor)?;
        let alert = edit.alert_type();
        let now = self.now();
        let policy = &self.inner.policy;

        let outcome = self
            .inner
            .sensors
            .with_mut(&key, |slot| -> Result<_, AlertError> {
                let mutation = apply_edit(slot, &edit, now)?;
                if !mutation.is_changed() {
                    return Ok((mutation, Vec::new(), None));
                }
                let save = slot.rules.get(alert).cloned().map(|rule| PersistOp::Save {
                    sensor: slot.storage_id.clone(),
                    rule,
                });
                Ok((mutation, slot.reconcile(policy, now), save))
            })
            .ok_or_else(|| unknown(sensor))?;

        let (mutation, notes, save) = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(sensor = %sensor, alert = %alert, error = %e, "rule edit rejected");
                return Err(e);
            }
        };
        if let Some(op) = save {
            debug!(sensor = %sensor, alert = %alert, ?edit, "rule updated");
            self.persist(op);
        }
        deliver(notes);
        Ok(mutation)
    }

    pub fn register(&self, sensor: &SensorId, kind: AlertKind) -> Result<Mutation, AlertError> {
        self.apply(sensor, RuleEdit::Register { kind })
    }

    pub fn unregister(&self, sensor: &SensorId, alert: AlertType) -> Result<Mutation, AlertError> {
        self.set_enabled(sensor, alert, false)
    }

    pub fn set_enabled(
        &self,
        sensor: &SensorId,
        alert: AlertType,
        enabled: bool,
    ) -> Result<Mutation, AlertError> {
        self.apply(sensor, RuleEdit::SetEnabled { alert, enabled })
    }

    pub fn set_bound(
        &self,
        sensor: &SensorId,
        alert: AlertType,
        edge: BoundEdge,
        value: f64,
        unit: DisplayUnit,
    ) -> Result<Mutation, AlertError> {
        self.apply(
            sensor,
            RuleEdit::SetBound {
                alert,
                edge,
                value,
                unit,
            },
        )
    }

    pub fn set_lower(
        &self,
        sensor: &SensorId,
        alert: AlertType,
        value: f64,
        unit: DisplayUnit,
    ) -> Result<Mutation, AlertError> {
        self.set_bound(sensor, alert, BoundEdge::Lower, value, unit)
    }

    pub fn set_upper(
        &self,
        sensor: &SensorId,
        alert: AlertType,
        value: f64,
        unit: DisplayUnit,
    ) -> Result<Mutation, AlertError> {
        self.set_bound(sensor, alert, BoundEdge::Upper, value, unit)
    }

    pub fn set_unseen_duration(
        &self,
        sensor: &SensorId,
        value: f64,
        unit: DisplayUnit,
    ) -> Result<Mutation, AlertError> {
        self.apply(sensor, RuleEdit::SetUnseenDuration { value, unit })
    }

    pub fn set_description(
        &self,
        sensor: &SensorId,
        alert: AlertType,
        text: Option<String>,
    ) -> Result<Mutation, AlertError> {
        self.apply(sensor, RuleEdit::SetDescription { alert, text })
    }

    pub fn mute(
        &self,
        sensor: &SensorId,
        alert: AlertType,
        until: DateTime<Utc>,
    ) -> Result<Mutation, AlertError> {
        self.apply(sensor, RuleEdit::Mute { alert, until })
    }

    pub fn unmute(&self, sensor: &SensorId, alert: AlertType) -> Result<Mutation, AlertError> {
        self.apply(sensor, RuleEdit::Unmute { alert })
    }

    // ── Time-driven work ─────────────────────────────────────────────

    /// Clear mute windows that have closed and re-evaluate the sensor,
    /// which also advances cloud-silence rules. Returns the alert types
    /// whose mute was cleared.
    pub fn sweep(&self, sensor: &SensorId) -> Result<Vec<AlertType>, AlertError> {
        let key = self.resolve(sensor)?;
        Ok(self.sweep_key(&key))
    }

    /// Sweep every attached sensor. Returns how many mutes were cleared.
    pub fn sweep_all(&self) -> usize {
        self.inner
            .sensors
            .keys()
            .iter()
            .map(|key| self.sweep_key(key).len())
            .sum()
    }

    fn sweep_key(&self, key: &str) -> Vec<AlertType> {
        let now = self.now();
        let policy = &self.inner.policy;
        let Some((cleared, saves, notes)) = self.inner.sensors.with_mut(key, |slot| {
            let cleared = slot.rules.clear_expired_mutes(now);
            let saves = cleared
                .iter()
                .filter_map(|alert| slot.rules.get(*alert).cloned())
                .map(|rule| PersistOp::Save {
                    sensor: slot.storage_id.clone(),
                    rule,
                })
                .collect::<Vec<_>>();
            if !cleared.is_empty() {
                debug!(sensor = %slot.identity, ?cleared, "mute windows expired");
            }
            (cleared, saves, slot.reconcile(policy, now))
        }) else {
            return Vec::new();
        };
        for op in saves {
            self.persist(op);
        }
        deliver(notes);
        cleared
    }

    /// Re-derive and publish every alert of one sensor.
    pub fn reprocess(&self, sensor: &SensorId) -> Result<(), AlertError> {
        let key = self.resolve(sensor)?;
        self.reconcile_key(&key);
        Ok(())
    }

    fn reconcile_key(&self, key: &str) {
        let now = self.now();
        let policy = &self.inner.policy;
        if let Some(notes) = self
            .inner
            .sensors
            .with_mut(key, |slot| slot.reconcile(policy, now))
        {
            deliver(notes);
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Last published tri-state; `Empty` for unknown sensors.
    pub fn current_state(&self, sensor: &SensorId, alert: AlertType) -> TriState {
        self.status(sensor, alert).state
    }

    pub fn status(&self, sensor: &SensorId, alert: AlertType) -> AlertStatus {
        self.read(sensor, |slot| slot.published(alert))
            .unwrap_or_default()
    }

    pub fn rule(&self, sensor: &SensorId, alert: AlertType) -> Option<AlertRule> {
        self.read(sensor, |slot| slot.rules.get(alert).cloned())
            .flatten()
    }

    pub fn rules(&self, sensor: &SensorId) -> Vec<AlertRule> {
        self.read(sensor, |slot| slot.rules.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_enabled(&self, sensor: &SensorId, alert: AlertType) -> bool {
        self.read(sensor, |slot| slot.rules.is_enabled(alert))
            .unwrap_or(false)
    }

    pub fn snapshot(&self, sensor: &SensorId) -> Option<MeasurementSnapshot> {
        self.read(sensor, |slot| slot.snapshot.clone()).flatten()
    }

    pub fn facts(&self, sensor: &SensorId) -> Option<SensorFacts> {
        self.read(sensor, |slot| slot.facts)
    }

    fn read<R>(&self, sensor: &SensorId, f: impl FnOnce(&SensorSlot) -> R) -> Option<R> {
        let key = self.inner.sensors.resolve(sensor)?;
        self.inner.sensors.with(&key, f)
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Call `callback` on every published change of one alert. The
    /// callback runs on the thread that caused the change, after the
    /// sensor's lock is released. Dropping the handle unsubscribes.
    pub fn subscribe<F>(
        &self,
        sensor: &SensorId,
        alert: AlertType,
        callback: F,
    ) -> Result<Subscription, AlertError>
    where
        F: Fn(TriState, Option<DateTime<Utc>>) + Send + Sync + 'static,
    {
        let key = self.resolve(sensor)?;
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let callback: AlertCallback = Arc::new(callback);
        self.inner
            .sensors
            .with_mut(&key, |slot| {
                slot.add_listener(Listener {
                    id,
                    alert,
                    callback,
                });
            })
            .ok_or_else(|| unknown(sensor))?;
        Ok(Subscription::new(
            Arc::downgrade(&self.inner),
            key,
            alert,
            id,
        ))
    }

    /// Stream of published statuses for one alert, starting with the
    /// current one.
    pub fn watch_alert(
        &self,
        sensor: &SensorId,
        alert: AlertType,
    ) -> Result<AlertStream, AlertError> {
        self.read(sensor, |slot| slot.watch(alert))
            .flatten()
            .map(AlertStream::new)
            .ok_or_else(|| unknown(sensor))
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn resolve(&self, sensor: &SensorId) -> Result<String, AlertError> {
        self.inner
            .sensors
            .resolve(sensor)
            .ok_or_else(|| unknown(sensor))
    }

    fn persist(&self, op: PersistOp) {
        if !self.inner.started.load(Ordering::Acquire)
            && !self.inner.warned_unstarted.swap(true, Ordering::AcqRel)
        {
            warn!("notifier not started, rule writes are held in memory until start()");
        }
        match self.inner.persist_tx.send(op) {
            Ok(()) => {}
            // Removals still go through so a later attach cannot load them.
            Err(e @ mpsc::error::SendError(PersistOp::Remove { .. })) => {
                apply(self.inner.persistence.as_ref(), e.0);
            }
            Err(e) => {
                warn!(op = ?e.0, "persistence writer gone, rule change kept in memory only");
            }
        }
    }
}

fn unknown(sensor: &SensorId) -> AlertError {
    AlertError::UnknownSensor {
        identifier: sensor.to_string(),
    }
}

fn deliver(notes: Vec<Notification>) {
    for note in notes {
        note.deliver();
    }
}

/// Route one edit to the sensor's rule table.
fn apply_edit(
    slot: &mut SensorSlot,
    edit: &RuleEdit,
    now: DateTime<Utc>,
) -> Result<Mutation, AlertError> {
    let counter = slot.snapshot.as_ref().and_then(|s| s.movement_counter);
    let rules = &mut slot.rules;
    match edit {
        RuleEdit::Register { kind } => Ok(rules.register(*kind)),
        RuleEdit::SetEnabled {
            alert,
            enabled: false,
        } => Ok(rules.unregister(*alert)),
        RuleEdit::SetEnabled {
            alert,
            enabled: true,
        } => {
            if rules.is_enabled(*alert) {
                return Ok(Mutation::Unchanged);
            }
            let kind = match (rules.get(*alert).map(|r| *r.kind()), counter) {
                // Movement counts from the counter value at enable time.
                (Some(kind), Some(counter))
                    if matches!(kind.condition(), AlertCondition::Movement { .. }) =>
                {
                    AlertKind::movement(counter)
                }
                (Some(kind), _) => kind,
                (None, counter) => {
                    alert.default_kind(counter.unwrap_or(0), rules.default_unseen_secs())
                }
            };
            Ok(rules.register(kind))
        }
        RuleEdit::SetBound {
            alert,
            edge,
            value,
            unit,
        } => {
            let canonical = alert.to_canonical(*value, *unit)?;
            rules.set_edge(*alert, *edge, canonical)
        }
        RuleEdit::SetUnseenDuration { value, unit } => {
            let secs = unseen_secs(*value, *unit)?;
            rules.set_unseen(AlertType::CloudConnection, secs)
        }
        RuleEdit::SetDescription { alert, text } => rules.set_description(*alert, text.clone()),
        RuleEdit::Mute { alert, until } => Ok(rules.mute_until(*alert, *until, now)),
        RuleEdit::Unmute { alert } => Ok(rules.unmute(*alert)),
    }
}
