// ── Measurement snapshots ──
//
// The most recent record for a sensor, as delivered by any of the three
// transports. Every dimension is optional: tags only report what their
// hardware measures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::alert::AlertType;

/// Which transport delivered a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordSource {
    /// Passive BLE advertisement.
    #[default]
    Advertisement,
    /// Data pushed over a persistent BLE connection.
    Heartbeat,
    /// Record relayed through the cloud.
    CloudRelay,
}

/// One record, values in canonical units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementSnapshot {
    pub source: RecordSource,
    pub timestamp: DateTime<Utc>,
    /// Degrees Celsius.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Relative humidity as a fraction of one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    /// Hectopascals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    /// Received signal strength, dBm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
    /// Reported air-quality index; derived from PM2.5 and CO₂ when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aqi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub co2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm25: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm4: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm10: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nox: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound_instant: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub luminosity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movement_counter: Option<u32>,
}

// Air-quality scale: distance from the clean-air corner of the
// (PM2.5, CO₂) plane, each axis scaled so its limit maps to 100.
const AQI_MAX: f64 = 100.0;
const PM25_MIN: f64 = 0.0;
const PM25_MAX: f64 = 60.0;
const CO2_MIN: f64 = 420.0;
const CO2_MAX: f64 = 2300.0;

impl MeasurementSnapshot {
    pub fn new(source: RecordSource, timestamp: DateTime<Utc>) -> Self {
        Self {
            source,
            timestamp,
            ..Self::default()
        }
    }

    /// The canonical value this record carries for a range alert type.
    ///
    /// Returns `None` for dimensions the record lacks and for the
    /// non-range types.
    pub fn value_for(&self, alert: AlertType) -> Option<f64> {
        match alert {
            AlertType::Temperature => self.temperature,
            AlertType::RelativeHumidity => self.humidity,
            AlertType::Pressure => self.pressure,
            AlertType::Signal => self.rssi,
            AlertType::AirQualityIndex => self.aqi.or_else(|| self.derived_aqi()),
            AlertType::CarbonDioxide => self.co2,
            AlertType::Pm1 => self.pm1,
            AlertType::Pm25 => self.pm25,
            AlertType::Pm4 => self.pm4,
            AlertType::Pm10 => self.pm10,
            AlertType::Voc => self.voc,
            AlertType::Nox => self.nox,
            AlertType::SoundInstant => self.sound_instant,
            AlertType::Luminosity => self.luminosity,
            AlertType::Movement | AlertType::Connection | AlertType::CloudConnection => None,
        }
    }

    fn derived_aqi(&self) -> Option<f64> {
        let pm25 = self.pm25?.clamp(PM25_MIN, PM25_MAX);
        let co2 = self.co2?.clamp(CO2_MIN, CO2_MAX);
        let dx = (pm25 - PM25_MIN) * (AQI_MAX / (PM25_MAX - PM25_MIN));
        let dy = (co2 - CO2_MIN) * (AQI_MAX / (CO2_MAX - CO2_MIN));
        Some((AQI_MAX - dx.hypot(dy)).clamp(0.0, AQI_MAX))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_dimension_reads_as_none() {
        let snap = MeasurementSnapshot {
            temperature: Some(21.5),
            ..MeasurementSnapshot::default()
        };
        assert_eq!(snap.value_for(AlertType::Temperature), Some(21.5));
        assert_eq!(snap.value_for(AlertType::Pressure), None);
    }

    #[test]
    fn aqi_is_derived_from_pm25_and_co2() {
        let clean = MeasurementSnapshot {
            pm25: Some(0.0),
            co2: Some(420.0),
            ..MeasurementSnapshot::default()
        };
        assert_eq!(clean.value_for(AlertType::AirQualityIndex), Some(100.0));

        let dirty = MeasurementSnapshot {
            pm25: Some(60.0),
            co2: Some(2300.0),
            ..MeasurementSnapshot::default()
        };
        assert_eq!(dirty.value_for(AlertType::AirQualityIndex), Some(0.0));
    }

    #[test]
    fn reported_aqi_wins_over_derivation() {
        let snap = MeasurementSnapshot {
            aqi: Some(42.0),
            pm25: Some(0.0),
            co2: Some(420.0),
            ..MeasurementSnapshot::default()
        };
        assert_eq!(snap.value_for(AlertType::AirQualityIndex), Some(42.0));
    }

    #[test]
    fn deserializes_sparse_records() {
        let snap: MeasurementSnapshot = serde_json::from_str(
            r#"{"source":"cloud_relay","timestamp":"2024-05-01T12:00:00Z","humidity":0.5}"#,
        )
        .unwrap();
        assert_eq!(snap.source, RecordSource::CloudRelay);
        assert_eq!(snap.value_for(AlertType::RelativeHumidity), Some(0.5));
    }
}
