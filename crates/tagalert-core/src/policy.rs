// ── Fireability ──
//
// A violated rule only escalates to `Firing` when some delivery path can
// carry the notification: the cloud (push/email), a live local
// connection, or an ephemeral service channel advertised by the tag.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Delivery-path facts for one sensor, supplied by the transport and
/// account collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorFacts {
    /// The sensor is claimed in the cloud and relayed through it.
    pub cloud_backed: bool,
    /// A persistent local radio connection is up.
    pub connected: bool,
    /// The tag currently advertises its short-lived notification service.
    pub service_channel: bool,
}

/// Session-wide half of the fireability decision.
///
/// Cloud backing only counts while the account is authorized; the local
/// paths do not depend on the session.
#[derive(Debug)]
pub struct FireabilityPolicy {
    authorized: AtomicBool,
}

impl FireabilityPolicy {
    pub fn new(authorized: bool) -> Self {
        Self {
            authorized: AtomicBool::new(authorized),
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::Acquire)
    }

    /// Returns `true` if the flag changed.
    pub fn set_authorized(&self, authorized: bool) -> bool {
        self.authorized.swap(authorized, Ordering::AcqRel) != authorized
    }

    pub fn is_fireable(&self, facts: &SensorFacts) -> bool {
        (facts.cloud_backed && self.is_authorized()) || facts.connected || facts.service_channel
    }
}

impl Default for FireabilityPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_delivery_path_is_enough() {
        let policy = FireabilityPolicy::new(true);
        let cloud = SensorFacts {
            cloud_backed: true,
            ..SensorFacts::default()
        };
        let local = SensorFacts {
            connected: true,
            ..SensorFacts::default()
        };
        let service = SensorFacts {
            service_channel: true,
            ..SensorFacts::default()
        };
        assert!(policy.is_fireable(&cloud));
        assert!(policy.is_fireable(&local));
        assert!(policy.is_fireable(&service));
        assert!(!policy.is_fireable(&SensorFacts::default()));
    }

    #[test]
    fn cloud_backing_requires_authorization() {
        let policy = FireabilityPolicy::new(false);
        let cloud = SensorFacts {
            cloud_backed: true,
            ..SensorFacts::default()
        };
        assert!(!policy.is_fireable(&cloud));

        assert!(policy.set_authorized(true));
        assert!(!policy.set_authorized(true));
        assert!(policy.is_fireable(&cloud));
    }
}
