// ── Rule storage ──
//
// `RuleTable` holds one sensor's rules; `SensorRegistry` maps sensor
// identities to per-sensor state without a global lock.

mod registry;
mod rules;

pub(crate) use registry::SensorRegistry;
pub(crate) use rules::RuleTable;
