// ── Domain model ──
//
// Sensor identities, alert rules, measurement snapshots and the unit
// conversion table.

pub mod alert;
pub mod measurement;
pub mod sensor_id;
pub mod units;

pub use alert::{
    AlertCondition, AlertKind, AlertRule, AlertStatus, AlertType, BoundEdge, Bounds,
    DEFAULT_CLOUD_UNSEEN_SECS, DESCRIPTION_MAX_CHARS, MIN_CLOUD_UNSEEN_SECS, Mutation, TriState,
};
pub use measurement::{MeasurementSnapshot, RecordSource};
pub use sensor_id::{Luid, MacAddress, SensorId};
pub use units::DisplayUnit;
