// ── Display unit conversion ──
//
// The only kind-specific part of a rule edit. Values arrive in whatever
// unit the editor shows and are stored canonically:
// °C, fraction of one, hPa, seconds, and native units for the rest.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::alert::AlertType;
use crate::error::AlertError;

/// Units an editor may express a bound in.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DisplayUnit {
    /// Already canonical for the alert type.
    #[default]
    Native,
    Celsius,
    Fahrenheit,
    Kelvin,
    Fraction,
    Percent,
    Hectopascal,
    Pascal,
    MillimetersOfMercury,
    InchesOfMercury,
    Seconds,
    Minutes,
}

const HPA_PER_MMHG: f64 = 1.333_223_684;
const HPA_PER_INHG: f64 = 33.863_886_666_7;

impl AlertType {
    /// The unit rules of this type are stored in.
    pub fn canonical_unit(self) -> DisplayUnit {
        match self {
            Self::Temperature => DisplayUnit::Celsius,
            Self::RelativeHumidity => DisplayUnit::Fraction,
            Self::Pressure => DisplayUnit::Hectopascal,
            Self::CloudConnection => DisplayUnit::Seconds,
            _ => DisplayUnit::Native,
        }
    }

    /// Short unit label of the canonical unit.
    pub fn unit_label(self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::RelativeHumidity => "fraction",
            Self::Pressure => "hPa",
            Self::Signal => "dBm",
            Self::AirQualityIndex => "index",
            Self::CarbonDioxide => "ppm",
            Self::Pm1 | Self::Pm25 | Self::Pm4 | Self::Pm10 => "µg/m³",
            Self::Voc | Self::Nox => "index",
            Self::SoundInstant => "dBA",
            Self::Luminosity => "lx",
            Self::Movement => "count",
            Self::Connection => "-",
            Self::CloudConnection => "s",
        }
    }

    /// Convert `value` expressed in `unit` into this type's canonical unit.
    pub fn to_canonical(self, value: f64, unit: DisplayUnit) -> Result<f64, AlertError> {
        let converted = match (self, unit) {
            (_, DisplayUnit::Native) => value,
            (alert, unit) if alert.canonical_unit() == unit => value,
            (Self::Temperature, DisplayUnit::Fahrenheit) => (value - 32.0) * 5.0 / 9.0,
            (Self::Temperature, DisplayUnit::Kelvin) => value - 273.15,
            (Self::RelativeHumidity, DisplayUnit::Percent) => value / 100.0,
            (Self::Pressure, DisplayUnit::Pascal) => value / 100.0,
            (Self::Pressure, DisplayUnit::MillimetersOfMercury) => value * HPA_PER_MMHG,
            (Self::Pressure, DisplayUnit::InchesOfMercury) => value * HPA_PER_INHG,
            (Self::CloudConnection, DisplayUnit::Minutes) => value * 60.0,
            (alert, unit) => return Err(AlertError::UnsupportedUnit { alert, unit }),
        };
        Ok(converted)
    }

    /// Convert a canonical value back into `unit` for display.
    pub fn from_canonical(self, value: f64, unit: DisplayUnit) -> Result<f64, AlertError> {
        let converted = match (self, unit) {
            (_, DisplayUnit::Native) => value,
            (alert, unit) if alert.canonical_unit() == unit => value,
            (Self::Temperature, DisplayUnit::Fahrenheit) => value * 9.0 / 5.0 + 32.0,
            (Self::Temperature, DisplayUnit::Kelvin) => value + 273.15,
            (Self::RelativeHumidity, DisplayUnit::Percent) => value * 100.0,
            (Self::Pressure, DisplayUnit::Pascal) => value * 100.0,
            (Self::Pressure, DisplayUnit::MillimetersOfMercury) => value / HPA_PER_MMHG,
            (Self::Pressure, DisplayUnit::InchesOfMercury) => value / HPA_PER_INHG,
            (Self::CloudConnection, DisplayUnit::Minutes) => value / 60.0,
            (alert, unit) => return Err(AlertError::UnsupportedUnit { alert, unit }),
        };
        Ok(converted)
    }
}

/// Canonical seconds for an unseen-duration edit, rounded to whole seconds.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
pub(crate) fn unseen_secs(value: f64, unit: DisplayUnit) -> Result<u32, AlertError> {
    let secs = AlertType::CloudConnection.to_canonical(value, unit)?;
    if !secs.is_finite() || secs < 0.0 || secs > f64::from(u32::MAX) {
        return Err(AlertError::validation(
            "unseen_duration",
            format!("{value} {unit} is not a usable duration"),
        ));
    }
    Ok(secs.round() as u32)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn fahrenheit_converts_exactly_for_whole_celsius() {
        let t = AlertType::Temperature;
        assert_eq!(t.to_canonical(50.0, DisplayUnit::Fahrenheit).unwrap(), 10.0);
        assert_eq!(t.to_canonical(68.0, DisplayUnit::Fahrenheit).unwrap(), 20.0);
        assert_eq!(t.from_canonical(20.0, DisplayUnit::Fahrenheit).unwrap(), 68.0);
    }

    #[test]
    fn percent_humidity_becomes_fraction() {
        let h = AlertType::RelativeHumidity;
        assert_eq!(h.to_canonical(45.0, DisplayUnit::Percent).unwrap(), 0.45);
        assert_eq!(h.to_canonical(60.0, DisplayUnit::Percent).unwrap(), 0.60);
    }

    #[test]
    fn pressure_units_land_in_hectopascal() {
        let p = AlertType::Pressure;
        assert_eq!(p.to_canonical(101_325.0, DisplayUnit::Pascal).unwrap(), 1013.25);
        let inhg = p.to_canonical(29.92, DisplayUnit::InchesOfMercury).unwrap();
        assert!((inhg - 1013.21).abs() < 0.01);
    }

    #[test]
    fn mismatched_unit_is_rejected() {
        let err = AlertType::Signal
            .to_canonical(5.0, DisplayUnit::Fahrenheit)
            .unwrap_err();
        assert!(matches!(err, AlertError::UnsupportedUnit { .. }));
    }

    #[test]
    fn unseen_minutes_become_seconds() {
        assert_eq!(unseen_secs(2.0, DisplayUnit::Minutes).unwrap(), 120);
        assert!(unseen_secs(-1.0, DisplayUnit::Seconds).is_err());
    }
}
