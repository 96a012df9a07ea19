// ── Core error types ──
//
// Every failure the engine reports is a rejected mutation or a failed
// collaborator call. Nothing here is fatal: a rejected edit leaves the
// stored rule exactly as it was.

use thiserror::Error;

use crate::model::{AlertType, DisplayUnit};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum AlertError {
    // ── Input validation ─────────────────────────────────────────────
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("{alert} value {value} is outside the accepted range {min}..={max}")]
    OutOfRange {
        alert: AlertType,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Lower bound {lower} is above upper bound {upper}")]
    InvertedBounds { lower: f64, upper: f64 },

    #[error("{alert} does not accept values in {unit}")]
    UnsupportedUnit { alert: AlertType, unit: DisplayUnit },

    #[error("{alert} rules have no {parameter} parameter")]
    NoSuchParameter {
        alert: AlertType,
        parameter: &'static str,
    },

    // ── Registry errors ──────────────────────────────────────────────
    #[error("Sensor not attached: {identifier}")]
    UnknownSensor { identifier: String },

    // ── Collaborator errors ──────────────────────────────────────────
    #[error("Rule persistence failed: {message}")]
    Persistence { message: String },
}

impl AlertError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// `true` when the error came from rejected user input rather than a
    /// missing sensor or a storage failure.
    pub fn is_rejected_input(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::OutOfRange { .. }
                | Self::InvertedBounds { .. }
                | Self::UnsupportedUnit { .. }
                | Self::NoSuchParameter { .. }
        )
    }
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence {
            message: format!("malformed rule document: {err}"),
        }
    }
}

impl From<std::io::Error> for AlertError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence {
            message: err.to_string(),
        }
    }
}
