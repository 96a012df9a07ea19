//! CLI error types with miette diagnostics.
//!
//! Maps `AlertError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use tagalert_config::ConfigError;
use tagalert_core::AlertError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Script ───────────────────────────────────────────────────────
    #[error("Replay script line {line}: {reason}")]
    #[diagnostic(
        code(tagalert::script),
        help(
            "Each line must be one JSON object with an \"event\" field:\n\
             attach, detach, ingest, connectivity, cloud_mode,\n\
             service_channel, authorization, edit, advance or sweep."
        )
    )]
    Script { line: usize, reason: String },

    // ── Sensors ──────────────────────────────────────────────────────
    #[error("Sensor '{identifier}' is not attached")]
    #[diagnostic(
        code(tagalert::unknown_sensor),
        help("Add an attach event for it earlier in the script.")
    )]
    UnknownSensor { identifier: String },

    #[error("Sensor profile '{name}' not found in configuration")]
    #[diagnostic(
        code(tagalert::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Add a [[sensors]] entry to the config file."
        )
    )]
    ProfileNotFound { name: String, available: String },

    // ── Rules ────────────────────────────────────────────────────────
    #[error("Rule edit rejected: {reason}")]
    #[diagnostic(code(tagalert::rejected))]
    Rejected { reason: String },

    #[error("Rule storage failed: {message}")]
    #[diagnostic(
        code(tagalert::persistence),
        help("Check that the rules file is writable and holds valid JSON.")
    )]
    Persistence { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file already exists")]
    #[diagnostic(
        code(tagalert::config_exists),
        help(
            "Use --force to overwrite it.\n\
             Path: {path}"
        )
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(tagalert::config))]
    Config(#[from] ConfigError),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(tagalert::json))]
    Json(#[from] serde_json::Error),

    #[error("YAML rendering failed: {0}")]
    #[diagnostic(code(tagalert::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl From<AlertError> for CliError {
    fn from(err: AlertError) -> Self {
        match err {
            AlertError::UnknownSensor { identifier } => Self::UnknownSensor { identifier },
            AlertError::Persistence { message } => Self::Persistence { message },
            other => Self::Rejected {
                reason: other.to_string(),
            },
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Script { .. } | Self::Rejected { .. } => exit_code::USAGE,
            Self::UnknownSensor { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Config(ConfigError::Validation { .. }) => exit_code::USAGE,
            Self::Persistence { .. }
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Yaml(_) => exit_code::GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagalert_core::AlertType;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let missing: CliError = AlertError::UnknownSensor {
            identifier: "aa:bb".into(),
        }
        .into();
        assert_eq!(missing.exit_code(), exit_code::NOT_FOUND);

        let rejected: CliError = AlertError::InvertedBounds {
            lower: 5.0,
            upper: 1.0,
        }
        .into();
        assert_eq!(rejected.exit_code(), exit_code::USAGE);

        let unsupported: CliError = AlertError::NoSuchParameter {
            alert: AlertType::Movement,
            parameter: "lower",
        }
        .into();
        assert!(matches!(unsupported, CliError::Rejected { .. }));
    }
}
