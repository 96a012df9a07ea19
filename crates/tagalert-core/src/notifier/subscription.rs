use std::sync::Weak;

use crate::model::AlertType;

use super::NotifierInner;

/// Handle for a callback registered with [`AlertNotifier::subscribe`].
/// Dropping it unregisters the callback.
///
/// [`AlertNotifier::subscribe`]: super::AlertNotifier::subscribe
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    notifier: Weak<NotifierInner>,
    key: String,
    alert: AlertType,
    id: u64,
}

impl Subscription {
    pub(super) fn new(notifier: Weak<NotifierInner>, key: String, alert: AlertType, id: u64) -> Self {
        Self {
            notifier,
            key,
            alert,
            id,
        }
    }

    pub fn alert_type(&self) -> AlertType {
        self.alert
    }

    /// Explicit form of dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.notifier.upgrade() {
            inner
                .sensors
                .with_mut(&self.key, |slot| slot.remove_listener(self.id));
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("sensor", &self.key)
            .field("alert", &self.alert)
            .field("id", &self.id)
            .finish()
    }
}
