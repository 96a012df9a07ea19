// ── Alert rule domain types ──
//
// `AlertType` is the rule key (one rule per sensor per type). `AlertKind`
// pairs a type with the parameters its condition needs. All bounds are
// canonical physical units; display units only exist at the edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::AlertError;

/// Longest accepted free-text description, in characters.
pub const DESCRIPTION_MAX_CHARS: usize = 32;

/// Shortest accepted cloud-silence window.
pub const MIN_CLOUD_UNSEEN_SECS: u32 = 120;

/// Cloud-silence window used when a rule is enabled without one.
pub const DEFAULT_CLOUD_UNSEEN_SECS: u32 = 900;

// ── AlertType ──────────────────────────────────────────────────────

/// One alert category per measurement dimension.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertType {
    Temperature,
    RelativeHumidity,
    Pressure,
    Signal,
    AirQualityIndex,
    CarbonDioxide,
    Pm1,
    Pm25,
    Pm4,
    Pm10,
    Voc,
    Nox,
    SoundInstant,
    Luminosity,
    Movement,
    Connection,
    CloudConnection,
}

impl AlertType {
    /// Types whose condition is a `[lower, upper]` band.
    pub fn is_range(self) -> bool {
        !matches!(
            self,
            Self::Movement | Self::Connection | Self::CloudConnection
        )
    }

    /// Accepted canonical span for range bounds.
    pub fn physical_range(self) -> Option<(f64, f64)> {
        let range = match self {
            Self::Temperature => (-40.0, 85.0),
            Self::RelativeHumidity => (0.0, 1.0),
            Self::Pressure => (500.0, 1155.0),
            Self::Signal => (-105.0, 0.0),
            Self::AirQualityIndex => (0.0, 100.0),
            Self::CarbonDioxide => (350.0, 2500.0),
            Self::Pm1 | Self::Pm25 | Self::Pm4 | Self::Pm10 => (0.0, 250.0),
            Self::Voc | Self::Nox => (0.0, 500.0),
            Self::SoundInstant => (0.0, 127.0),
            Self::Luminosity => (0.0, 144_284.0),
            Self::Movement | Self::Connection | Self::CloudConnection => return None,
        };
        Some(range)
    }

    /// Parameters used when a rule is enabled with nothing stored yet.
    pub fn default_kind(self, movement_baseline: u32, unseen_secs: u32) -> AlertKind {
        let condition = match self {
            Self::Movement => AlertCondition::Movement {
                baseline: movement_baseline,
            },
            Self::Connection => AlertCondition::Connection,
            Self::CloudConnection => AlertCondition::CloudConnection {
                unseen_secs: unseen_secs.max(MIN_CLOUD_UNSEEN_SECS),
            },
            range_type => {
                let (lower, upper) = range_type.physical_range().unwrap_or((0.0, 0.0));
                AlertCondition::Range(Bounds { lower, upper })
            }
        };
        AlertKind {
            alert: self,
            condition,
        }
    }
}

// ── Conditions ─────────────────────────────────────────────────────

/// A closed `[lower, upper]` band in canonical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

/// Which edge of a range a bound edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BoundEdge {
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    Range(Bounds),
    Movement { baseline: u32 },
    Connection,
    CloudConnection { unseen_secs: u32 },
}

// ── AlertKind ──────────────────────────────────────────────────────

/// An alert type together with the parameters of its condition.
///
/// Constructors validate the pairing, so a `Range` condition can only sit
/// under a range type and its bounds are ordered and physically plausible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAlertKind")]
pub struct AlertKind {
    alert: AlertType,
    condition: AlertCondition,
}

#[derive(Deserialize)]
struct RawAlertKind {
    alert: AlertType,
    condition: AlertCondition,
}

impl TryFrom<RawAlertKind> for AlertKind {
    type Error = AlertError;

    fn try_from(raw: RawAlertKind) -> Result<Self, Self::Error> {
        match (raw.alert, raw.condition) {
            (alert, AlertCondition::Range(b)) => Self::range(alert, b.lower, b.upper),
            (AlertType::Movement, AlertCondition::Movement { baseline }) => {
                Ok(Self::movement(baseline))
            }
            (AlertType::Connection, AlertCondition::Connection) => Ok(Self::connection()),
            (AlertType::CloudConnection, AlertCondition::CloudConnection { unseen_secs }) => {
                Self::cloud_connection(unseen_secs)
            }
            (alert, _) => Err(AlertError::validation(
                "condition",
                format!("condition does not match alert type {alert}"),
            )),
        }
    }
}

impl AlertKind {
    pub fn range(alert: AlertType, lower: f64, upper: f64) -> Result<Self, AlertError> {
        if !alert.is_range() {
            return Err(AlertError::NoSuchParameter {
                alert,
                parameter: "range",
            });
        }
        check_in_range(alert, lower)?;
        check_in_range(alert, upper)?;
        if lower > upper {
            return Err(AlertError::InvertedBounds { lower, upper });
        }
        Ok(Self {
            alert,
            condition: AlertCondition::Range(Bounds { lower, upper }),
        })
    }

    pub fn movement(baseline: u32) -> Self {
        Self {
            alert: AlertType::Movement,
            condition: AlertCondition::Movement { baseline },
        }
    }

    pub fn connection() -> Self {
        Self {
            alert: AlertType::Connection,
            condition: AlertCondition::Connection,
        }
    }

    pub fn cloud_connection(unseen_secs: u32) -> Result<Self, AlertError> {
        check_unseen(unseen_secs)?;
        Ok(Self {
            alert: AlertType::CloudConnection,
            condition: AlertCondition::CloudConnection { unseen_secs },
        })
    }

    pub fn alert_type(&self) -> AlertType {
        self.alert
    }

    pub fn condition(&self) -> &AlertCondition {
        &self.condition
    }

    pub fn bounds(&self) -> Option<Bounds> {
        match self.condition {
            AlertCondition::Range(b) => Some(b),
            _ => None,
        }
    }

    /// Replace one edge of a range, keeping the other. Rejects edits that
    /// would cross the opposite edge or leave the physical range.
    pub(crate) fn with_edge(&self, edge: BoundEdge, value: f64) -> Result<Self, AlertError> {
        let Some(current) = self.bounds() else {
            return Err(AlertError::NoSuchParameter {
                alert: self.alert,
                parameter: "range",
            });
        };
        let (lower, upper) = match edge {
            BoundEdge::Lower => (value, current.upper),
            BoundEdge::Upper => (current.lower, value),
        };
        Self::range(self.alert, lower, upper)
    }

    pub(crate) fn with_unseen(&self, unseen_secs: u32) -> Result<Self, AlertError> {
        if self.alert != AlertType::CloudConnection {
            return Err(AlertError::NoSuchParameter {
                alert: self.alert,
                parameter: "unseen duration",
            });
        }
        Self::cloud_connection(unseen_secs)
    }
}

fn check_in_range(alert: AlertType, value: f64) -> Result<(), AlertError> {
    if !value.is_finite() {
        return Err(AlertError::validation(
            alert.to_string(),
            "bound must be a finite number",
        ));
    }
    if let Some((min, max)) = alert.physical_range() {
        if value < min || value > max {
            return Err(AlertError::OutOfRange {
                alert,
                value,
                min,
                max,
            });
        }
    }
    Ok(())
}

fn check_unseen(unseen_secs: u32) -> Result<(), AlertError> {
    if unseen_secs < MIN_CLOUD_UNSEEN_SECS {
        return Err(AlertError::OutOfRange {
            alert: AlertType::CloudConnection,
            value: f64::from(unseen_secs),
            min: f64::from(MIN_CLOUD_UNSEEN_SECS),
            max: f64::from(u32::MAX),
        });
    }
    Ok(())
}

// ── AlertRule ──────────────────────────────────────────────────────

/// A configured condition for one (sensor, alert type) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    kind: AlertKind,
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    muted_until: Option<DateTime<Utc>>,
}

impl AlertRule {
    /// A disabled rule holding `kind`'s parameters.
    pub fn new(kind: AlertKind) -> Self {
        Self {
            kind,
            enabled: false,
            description: None,
            muted_until: None,
        }
    }

    pub fn alert_type(&self) -> AlertType {
        self.kind.alert
    }

    pub fn kind(&self) -> &AlertKind {
        &self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn muted_until(&self) -> Option<DateTime<Utc>> {
        self.muted_until
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.kind.bounds()
    }

    /// Whether a mute window is still open at `now`.
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.muted_until.is_some_and(|until| until > now)
    }

    pub(crate) fn set_kind(&mut self, kind: AlertKind) {
        self.kind = kind;
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn set_description(&mut self, description: Option<String>) {
        self.description = description;
    }

    pub(crate) fn set_muted_until(&mut self, until: Option<DateTime<Utc>>) {
        self.muted_until = until;
    }
}

/// Validate and normalize a description: blank becomes `None`.
pub(crate) fn normalize_description(
    text: Option<String>,
) -> Result<Option<String>, AlertError> {
    let Some(text) = text else { return Ok(None) };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let chars = trimmed.chars().count();
    if chars > DESCRIPTION_MAX_CHARS {
        return Err(AlertError::validation(
            "description",
            format!("{chars} characters exceeds the {DESCRIPTION_MAX_CHARS} character limit"),
        ));
    }
    Ok(Some(trimmed.to_owned()))
}

// ── Derived state ──────────────────────────────────────────────────

/// The three-state indicator consumed by UI and push code.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriState {
    /// Rule disabled or never configured.
    #[default]
    Empty,
    /// Enabled, and either not violated, muted, or without a delivery path.
    Registered,
    /// Enabled, violated, unmuted and fireable.
    Firing,
}

/// What subscribers receive: the tri-state plus the active mute window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertStatus {
    pub state: TriState,
    pub muted_until: Option<DateTime<Utc>>,
}

/// Outcome of an accepted rule mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Changed,
    /// The stored value already matched; nothing was written or re-evaluated.
    Unchanged,
}

impl Mutation {
    pub fn is_changed(self) -> bool {
        matches!(self, Self::Changed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn alert_type_round_trips_through_strings() {
        for alert in AlertType::iter() {
            let parsed: AlertType = alert.to_string().parse().unwrap();
            assert_eq!(parsed, alert);
        }
        assert_eq!(AlertType::Pm25.to_string(), "pm25");
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        let err = AlertKind::range(AlertType::Temperature, 30.0, 0.0).unwrap_err();
        assert!(matches!(err, AlertError::InvertedBounds { .. }));
    }

    #[test]
    fn range_rejects_values_outside_physical_range() {
        let err = AlertKind::range(AlertType::RelativeHumidity, 0.2, 45.0).unwrap_err();
        assert!(matches!(err, AlertError::OutOfRange { .. }));
    }

    #[test]
    fn range_rejects_non_range_types() {
        assert!(AlertKind::range(AlertType::Movement, 0.0, 1.0).is_err());
    }

    #[test]
    fn cloud_connection_enforces_minimum() {
        assert!(AlertKind::cloud_connection(60).is_err());
        assert!(AlertKind::cloud_connection(MIN_CLOUD_UNSEEN_SECS).is_ok());
    }

    #[test]
    fn with_edge_keeps_opposite_edge() {
        let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
        let moved = kind.with_edge(BoundEdge::Lower, 10.0).unwrap();
        assert_eq!(moved.bounds(), Some(Bounds { lower: 10.0, upper: 30.0 }));
        assert!(kind.with_edge(BoundEdge::Upper, -5.0).is_err());
    }

    #[test]
    fn deserialize_validates_condition_pairing() {
        let bad = r#"{"alert":"movement","condition":"connection"}"#;
        assert!(serde_json::from_str::<AlertKind>(bad).is_err());

        let good = r#"{"alert":"temperature","condition":{"range":{"lower":-5.0,"upper":25.0}}}"#;
        let kind: AlertKind = serde_json::from_str(good).unwrap();
        assert_eq!(kind.alert_type(), AlertType::Temperature);
    }

    #[test]
    fn description_is_trimmed_and_limited() {
        assert_eq!(normalize_description(Some("  ".into())).unwrap(), None);
        assert_eq!(
            normalize_description(Some(" fridge ".into())).unwrap().as_deref(),
            Some("fridge")
        );
        assert!(normalize_description(Some("x".repeat(33))).is_err());
    }

    #[test]
    fn default_kind_uses_physical_range() {
        let kind = AlertType::Pressure.default_kind(0, DEFAULT_CLOUD_UNSEEN_SECS);
        assert_eq!(kind.bounds(), Some(Bounds { lower: 500.0, upper: 1155.0 }));
    }
}
