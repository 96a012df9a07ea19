//! `tagalert types`: the alert catalogue.

use serde::Serialize;
use strum::IntoEnumIterator;
use tabled::Tabled;

use tagalert_core::{AlertType, DisplayUnit};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct TypeInfo {
    alert: AlertType,
    condition: &'static str,
    unit: DisplayUnit,
    unit_label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
}

impl TypeInfo {
    fn of(alert: AlertType) -> Self {
        let range = alert.physical_range();
        Self {
            alert,
            condition: match alert {
                AlertType::Movement => "counter changed",
                AlertType::Connection => "disconnected",
                AlertType::CloudConnection => "cloud silent",
                _ => "outside range",
            },
            unit: alert.canonical_unit(),
            unit_label: alert.unit_label(),
            min: range.map(|(lower, _)| lower),
            max: range.map(|(_, upper)| upper),
        }
    }
}

#[derive(Tabled)]
struct TypeRow {
    #[tabled(rename = "Alert")]
    alert: String,
    #[tabled(rename = "Fires when")]
    condition: &'static str,
    #[tabled(rename = "Unit")]
    unit: &'static str,
    #[tabled(rename = "Min")]
    min: String,
    #[tabled(rename = "Max")]
    max: String,
}

fn bound(value: Option<f64>) -> String {
    value.map_or_else(|| "-".into(), |v| v.to_string())
}

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let types: Vec<TypeInfo> = AlertType::iter().map(TypeInfo::of).collect();
    let out = output::render_list(
        &global.output,
        &types,
        |t| TypeRow {
            alert: t.alert.to_string(),
            condition: t.condition,
            unit: t.unit_label,
            min: bound(t.min),
            max: bound(t.max),
        },
        |t| t.alert.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
