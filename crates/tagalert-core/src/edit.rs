// ── Rule edits ──
//
// Every user-facing rule mutation as one serializable value. The
// notifier routes each variant to the rule table; replay scripts and the
// CLI build them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AlertKind, AlertType, BoundEdge, DisplayUnit};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RuleEdit {
    /// Enable with explicit parameters. No-op when already enabled.
    Register { kind: AlertKind },
    /// Enable with the stored parameters (or the type's defaults), or
    /// disable keeping them.
    SetEnabled { alert: AlertType, enabled: bool },
    SetBound {
        alert: AlertType,
        edge: BoundEdge,
        value: f64,
        #[serde(default)]
        unit: DisplayUnit,
    },
    /// CloudConnection only.
    SetUnseenDuration {
        value: f64,
        #[serde(default)]
        unit: DisplayUnit,
    },
    SetDescription {
        alert: AlertType,
        #[serde(default)]
        text: Option<String>,
    },
    Mute {
        alert: AlertType,
        until: DateTime<Utc>,
    },
    Unmute { alert: AlertType },
}

impl RuleEdit {
    pub fn alert_type(&self) -> AlertType {
        match self {
            Self::Register { kind } => kind.alert_type(),
            Self::SetUnseenDuration { .. } => AlertType::CloudConnection,
            Self::SetEnabled { alert, .. }
            | Self::SetBound { alert, .. }
            | Self::SetDescription { alert, .. }
            | Self::Mute { alert, .. }
            | Self::Unmute { alert } => *alert,
        }
    }
}
