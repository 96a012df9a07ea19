//! Alert rule evaluation and notification state for environmental sensor
//! tags.
//!
//! Each attached sensor carries a set of alert rules, at most one per
//! [`AlertType`]. Incoming measurement records, connectivity edges and
//! the passage of time are folded into a published three-state indicator
//! per rule ([`TriState`]: `Empty` / `Registered` / `Firing`):
//!
//! - **[`AlertNotifier`]**: Central facade. Attaches sensors (loading
//!   their rules through a [`RulePersistence`]), ingests records, applies
//!   [`RuleEdit`]s, and publishes status changes to callbacks
//!   ([`Subscription`]) and [`AlertStream`]s. Rule writes go through a
//!   write-behind queue so evaluation never waits on storage.
//!
//! - **[`evaluate`]**: Pure threshold decision per rule condition.
//!
//! - **[`FireabilityPolicy`]**: Whether a violated rule can reach anyone:
//!   cloud backing with an authorized session, a live local connection, or
//!   the tag's service channel.
//!
//! - **[`SensorSession`]**: Editor-scoped helpers: a [`MuteScheduler`]
//!   that expires mute windows and a [`Debouncer`] per slider edge so a
//!   drag produces one write.
//!
//! - **Domain model** ([`model`]): [`SensorId`] (MAC and/or LUID),
//!   [`AlertKind`] / [`AlertRule`], [`MeasurementSnapshot`] and the
//!   [`DisplayUnit`] conversion table.

pub mod clock;
pub mod config;
pub mod debounce;
pub mod edit;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod mute;
pub mod notifier;
pub mod persistence;
pub mod policy;
pub mod session;
pub mod stream;

mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use debounce::Debouncer;
pub use edit::RuleEdit;
pub use error::AlertError;
pub use evaluator::{EvaluationInput, evaluate};
pub use mute::MuteScheduler;
pub use notifier::{AlertCallback, AlertNotifier, Subscription};
pub use persistence::{JsonFilePersistence, MemoryPersistence, RulePersistence};
pub use policy::{FireabilityPolicy, SensorFacts};
pub use session::SensorSession;
pub use stream::{AlertStream, AlertWatchStream};

pub use model::{
    AlertCondition, AlertKind, AlertRule, AlertStatus, AlertType, BoundEdge, Bounds,
    DisplayUnit, Luid, MacAddress, MeasurementSnapshot, Mutation, RecordSource, SensorId,
    TriState,
};
