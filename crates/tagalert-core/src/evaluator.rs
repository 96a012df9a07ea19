// ── Threshold evaluation ──
//
// Pure decision of whether a rule's condition is violated by the inputs
// the notifier holds for a sensor. No mute, enable or fireability logic
// lives here.

use chrono::{DateTime, Duration, Utc};

use crate::model::{AlertCondition, AlertKind, MeasurementSnapshot};

/// Everything a condition may look at.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    /// Latest record from any transport.
    pub snapshot: Option<&'a MeasurementSnapshot>,
    /// Live local connection state.
    pub connected: bool,
    /// Connection state before the most recent connectivity change.
    pub previously_connected: bool,
    /// Last cloud-relayed record, or the attach time if none arrived yet.
    pub cloud_seen_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

/// `true` when `kind`'s condition is violated.
///
/// A record that lacks the dimension a range rule watches does not
/// violate it.
pub fn evaluate(kind: &AlertKind, input: &EvaluationInput<'_>) -> bool {
    match *kind.condition() {
        AlertCondition::Range(bounds) => input
            .snapshot
            .and_then(|s| s.value_for(kind.alert_type()))
            .is_some_and(|value| value < bounds.lower || value > bounds.upper),
        AlertCondition::Movement { baseline } => input
            .snapshot
            .and_then(|s| s.movement_counter)
            .is_some_and(|counter| counter != baseline),
        AlertCondition::Connection => input.previously_connected && !input.connected,
        AlertCondition::CloudConnection { unseen_secs } => {
            input.now - input.cloud_seen_at > Duration::seconds(i64::from(unseen_secs))
        }
    }
}
