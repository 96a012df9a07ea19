// ── Per-sensor evaluation state ──
//
// Everything the notifier knows about one sensor, guarded as a unit by
// the registry entry lock so a rule and the snapshot it is evaluated
// against are never read torn.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use strum::IntoEnumIterator;
use tokio::sync::watch;
use tracing::debug;

use crate::evaluator::{EvaluationInput, evaluate};
use crate::model::{AlertStatus, AlertType, MeasurementSnapshot, SensorId, TriState};
use crate::policy::{FireabilityPolicy, SensorFacts};
use crate::store::RuleTable;

/// Observer callback: receives the new tri-state and the active mute window.
pub type AlertCallback = Arc<dyn Fn(TriState, Option<DateTime<Utc>>) + Send + Sync>;

pub(crate) struct Listener {
    pub(crate) id: u64,
    pub(crate) alert: AlertType,
    pub(crate) callback: AlertCallback,
}

/// A published change plus the callbacks that must hear about it.
/// Delivered after the registry lock is released.
pub(crate) struct Notification {
    pub(crate) status: AlertStatus,
    pub(crate) callbacks: Vec<AlertCallback>,
}

impl Notification {
    pub(crate) fn deliver(self) {
        for callback in self.callbacks {
            callback(self.status.state, self.status.muted_until);
        }
    }
}

pub(crate) struct SensorSlot {
    /// Identity as currently known (grows when records reveal more forms).
    pub(crate) identity: SensorId,
    /// Identity the sensor was attached with; the persistence key.
    pub(crate) storage_id: SensorId,
    pub(crate) rules: RuleTable,
    pub(crate) snapshot: Option<MeasurementSnapshot>,
    pub(crate) facts: SensorFacts,
    pub(crate) previously_connected: bool,
    pub(crate) last_cloud_record: Option<DateTime<Utc>>,
    pub(crate) attached_at: DateTime<Utc>,
    channels: BTreeMap<AlertType, watch::Sender<AlertStatus>>,
    listeners: Vec<Listener>,
}

impl SensorSlot {
    pub(crate) fn new(
        identity: SensorId,
        facts: SensorFacts,
        rules: RuleTable,
        now: DateTime<Utc>,
    ) -> Self {
        let channels = AlertType::iter()
            .map(|alert| (alert, watch::channel(AlertStatus::default()).0))
            .collect();
        Self {
            storage_id: identity.clone(),
            identity,
            rules,
            snapshot: None,
            previously_connected: false,
            facts,
            last_cloud_record: None,
            attached_at: now,
            channels,
            listeners: Vec::new(),
        }
    }

    /// Keep the newest record. Cloud records also refresh the cloud
    /// last-seen time even when they arrive out of order.
    pub(crate) fn accept(&mut self, record: MeasurementSnapshot) -> bool {
        if record.source == crate::model::RecordSource::CloudRelay {
            self.last_cloud_record = Some(
                self.last_cloud_record
                    .map_or(record.timestamp, |seen| seen.max(record.timestamp)),
            );
        }
        let newer = self
            .snapshot
            .as_ref()
            .is_none_or(|current| record.timestamp >= current.timestamp);
        if newer {
            self.snapshot = Some(record);
        }
        newer
    }

    /// Apply a connectivity edge. Returns `false` when nothing changed.
    pub(crate) fn set_connected(&mut self, connected: bool) -> bool {
        if self.facts.connected == connected {
            return false;
        }
        self.previously_connected = self.facts.connected;
        self.facts.connected = connected;
        true
    }

    /// Derive the tri-state of one alert type from the current inputs.
    pub(crate) fn derive(
        &self,
        alert: AlertType,
        policy: &FireabilityPolicy,
        now: DateTime<Utc>,
    ) -> AlertStatus {
        let Some(rule) = self.rules.get(alert) else {
            return AlertStatus::default();
        };
        if !rule.is_enabled() {
            return AlertStatus {
                state: TriState::Empty,
                muted_until: rule.muted_until(),
            };
        }
        let input = EvaluationInput {
            snapshot: self.snapshot.as_ref(),
            connected: self.facts.connected,
            previously_connected: self.previously_connected,
            cloud_seen_at: self.last_cloud_record.unwrap_or(self.attached_at),
            now,
        };
        let firing = !rule.is_muted_at(now)
            && evaluate(rule.kind(), &input)
            && policy.is_fireable(&self.facts);
        AlertStatus {
            state: if firing {
                TriState::Firing
            } else {
                TriState::Registered
            },
            muted_until: rule.muted_until(),
        }
    }

    /// Recompute every alert type and publish the ones whose status moved.
    pub(crate) fn reconcile(
        &mut self,
        policy: &FireabilityPolicy,
        now: DateTime<Utc>,
    ) -> Vec<Notification> {
        let mut notifications = Vec::new();
        for alert in AlertType::iter() {
            let status = self.derive(alert, policy, now);
            let Some(sender) = self.channels.get(&alert) else {
                continue;
            };
            let mut previous = None;
            let changed = sender.send_if_modified(|current| {
                if *current == status {
                    return false;
                }
                previous = Some(current.state);
                *current = status;
                true
            });
            if !changed {
                continue;
            }
            debug!(
                sensor = %self.identity,
                alert = %alert,
                from = ?previous,
                to = %status.state,
                "alert state changed"
            );
            let callbacks = self
                .listeners
                .iter()
                .filter(|l| l.alert == alert)
                .map(|l| Arc::clone(&l.callback))
                .collect::<Vec<_>>();
            if !callbacks.is_empty() {
                notifications.push(Notification { status, callbacks });
            }
        }
        notifications
    }

    pub(crate) fn published(&self, alert: AlertType) -> AlertStatus {
        self.channels
            .get(&alert)
            .map(|s| *s.borrow())
            .unwrap_or_default()
    }

    pub(crate) fn watch(&self, alert: AlertType) -> Option<watch::Receiver<AlertStatus>> {
        self.channels.get(&alert).map(watch::Sender::subscribe)
    }

    pub(crate) fn add_listener(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    pub(crate) fn remove_listener(&mut self, id: u64) {
        self.listeners.retain(|l| l.id != id);
    }
}
