// ── Sensor identity ──
//
// A tag is addressable by its local radio identifier (LUID), by its
// hardware MAC, or by both. The MAC is stable across re-pairing, so it
// wins whenever both sides of a lookup carry one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AlertError;

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized MAC address from any common format.
    /// Accepts colon-separated, dash-separated, or bare hex.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let lowered = raw.as_ref().trim().to_lowercase().replace('-', ":");
        let normalized = if lowered.len() == 12 && !lowered.contains(':') {
            lowered
                .as_bytes()
                .chunks(2)
                .map(|pair| String::from_utf8_lossy(pair).into_owned())
                .collect::<Vec<_>>()
                .join(":")
        } else {
            lowered
        };
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

// ── Luid ────────────────────────────────────────────────────────────

/// Local radio identifier assigned by the platform's BLE stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Luid(String);

impl Luid {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Luid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── SensorId ────────────────────────────────────────────────────────

/// Identity of one sensor tag. At least one of the two forms is present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSensorId")]
pub struct SensorId {
    #[serde(skip_serializing_if = "Option::is_none")]
    luid: Option<Luid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mac: Option<MacAddress>,
}

#[derive(Deserialize)]
struct RawSensorId {
    luid: Option<Luid>,
    mac: Option<MacAddress>,
}

impl TryFrom<RawSensorId> for SensorId {
    type Error = AlertError;

    fn try_from(raw: RawSensorId) -> Result<Self, Self::Error> {
        Self::new(raw.luid, raw.mac)
    }
}

impl SensorId {
    pub fn new(luid: Option<Luid>, mac: Option<MacAddress>) -> Result<Self, AlertError> {
        if luid.is_none() && mac.is_none() {
            return Err(AlertError::validation(
                "sensor",
                "either a LUID or a MAC address is required",
            ));
        }
        Ok(Self { luid, mac })
    }

    pub fn from_mac(mac: impl AsRef<str>) -> Self {
        Self {
            luid: None,
            mac: Some(MacAddress::new(mac)),
        }
    }

    pub fn from_luid(luid: impl Into<String>) -> Self {
        Self {
            luid: Some(Luid::new(luid)),
            mac: None,
        }
    }

    pub fn with_mac(mut self, mac: impl AsRef<str>) -> Self {
        self.mac = Some(MacAddress::new(mac));
        self
    }

    pub fn with_luid(mut self, luid: impl Into<String>) -> Self {
        self.luid = Some(Luid::new(luid));
        self
    }

    pub fn mac(&self) -> Option<&MacAddress> {
        self.mac.as_ref()
    }

    pub fn luid(&self) -> Option<&Luid> {
        self.luid.as_ref()
    }

    /// Registry key: the MAC when known, the LUID otherwise.
    pub(crate) fn primary_key(&self) -> String {
        match (&self.mac, &self.luid) {
            (Some(mac), _) => format!("mac:{mac}"),
            (None, Some(luid)) => format!("luid:{luid}"),
            (None, None) => String::new(),
        }
    }

    pub(crate) fn luid_key(&self) -> Option<String> {
        self.luid.as_ref().map(|l| format!("luid:{l}"))
    }

    pub(crate) fn mac_key(&self) -> Option<String> {
        self.mac.as_ref().map(|m| format!("mac:{m}"))
    }

    /// Fill in whichever identifier form `other` knows and `self` lacks.
    pub(crate) fn merge(&mut self, other: &SensorId) -> bool {
        let mut grew = false;
        if self.mac.is_none() && other.mac.is_some() {
            self.mac.clone_from(&other.mac);
            grew = true;
        }
        if self.luid.is_none() && other.luid.is_some() {
            self.luid.clone_from(&other.luid);
            grew = true;
        }
        grew
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.mac, &self.luid) {
            (Some(mac), Some(luid)) => write!(f, "{mac} ({luid})"),
            (Some(mac), None) => write!(f, "{mac}"),
            (None, Some(luid)) => write!(f, "{luid}"),
            (None, None) => write!(f, "<anonymous>"),
        }
    }
}
