// ── Rule editor session ──
//
// Everything a sensor's alert editor needs while it is open: slider
// drags update the displayed bounds immediately and reach the notifier
// once per gesture, and expired mutes flip back while the editor is
// visible. Dropping the session cancels both.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::debounce::Debouncer;
use crate::error::AlertError;
use crate::model::{AlertType, BoundEdge, Bounds, DisplayUnit, SensorId};
use crate::mute::MuteScheduler;
use crate::notifier::AlertNotifier;

type Displayed = Arc<watch::Sender<Option<Bounds>>>;

pub struct SensorSession {
    notifier: AlertNotifier,
    sensor: SensorId,
    delay: Duration,
    scheduler: Option<MuteScheduler>,
    debouncers: DashMap<(AlertType, BoundEdge), Debouncer>,
    displayed: DashMap<AlertType, Displayed>,
}

impl SensorSession {
    /// Open an editor session on an attached sensor and start its mute
    /// sweep. Must be called from within a Tokio runtime.
    pub fn open(notifier: &AlertNotifier, sensor: &SensorId) -> Result<Self, AlertError> {
        if !notifier.is_attached(sensor) {
            return Err(AlertError::UnknownSensor {
                identifier: sensor.to_string(),
            });
        }
        let config = notifier.config();
        let scheduler = MuteScheduler::start(
            notifier.clone(),
            sensor.clone(),
            config.mute_sweep_period,
        );
        debug!(sensor = %sensor, "editor session opened");
        Ok(Self {
            notifier: notifier.clone(),
            sensor: sensor.clone(),
            delay: config.debounce_delay,
            scheduler: Some(scheduler),
            debouncers: DashMap::new(),
            displayed: DashMap::new(),
        })
    }

    pub fn sensor(&self) -> &SensorId {
        &self.sensor
    }

    pub fn notifier(&self) -> &AlertNotifier {
        &self.notifier
    }

    /// One intermediate slider position. The displayed bounds change
    /// now; the rule is written once the drag has been quiet for the
    /// debounce delay. Returns the displayed bounds in canonical units.
    pub fn drag_bound(
        &self,
        alert: AlertType,
        edge: BoundEdge,
        value: f64,
        unit: DisplayUnit,
    ) -> Result<Bounds, AlertError> {
        let Some(base) = self.displayed(alert) else {
            return Err(AlertError::NoSuchParameter {
                alert,
                parameter: match edge {
                    BoundEdge::Lower => "lower",
                    BoundEdge::Upper => "upper",
                },
            });
        };
        let canonical = alert.to_canonical(value, unit)?;
        let shown = match edge {
            BoundEdge::Lower => Bounds {
                lower: canonical,
                ..base
            },
            BoundEdge::Upper => Bounds {
                upper: canonical,
                ..base
            },
        };
        let display = self.display_channel(alert);
        display.send_replace(Some(shown));

        let notifier = self.notifier.clone();
        let sensor = self.sensor.clone();
        self.debouncers
            .entry((alert, edge))
            .or_default()
            .run(self.delay, move || {
                let result =
                    notifier.set_bound(&sensor, alert, edge, canonical, DisplayUnit::Native);
                if let Err(e) = result {
                    debug!(sensor = %sensor, alert = %alert, error = %e, "dragged bound rejected");
                    display.send_replace(notifier.rule(&sensor, alert).and_then(|r| r.bounds()));
                }
            });
        Ok(shown)
    }

    pub fn drag_lower(
        &self,
        alert: AlertType,
        value: f64,
        unit: DisplayUnit,
    ) -> Result<Bounds, AlertError> {
        self.drag_bound(alert, BoundEdge::Lower, value, unit)
    }

    pub fn drag_upper(
        &self,
        alert: AlertType,
        value: f64,
        unit: DisplayUnit,
    ) -> Result<Bounds, AlertError> {
        self.drag_bound(alert, BoundEdge::Upper, value, unit)
    }

    /// Bounds as the editor should show them, in canonical units: the
    /// latest drag position, else the stored rule, else the physical
    /// range. `None` for alert types without bounds.
    pub fn displayed(&self, alert: AlertType) -> Option<Bounds> {
        if let Some(shown) = self.displayed.get(&alert).and_then(|d| *d.borrow()) {
            return Some(shown);
        }
        self.stored_bounds(alert)
    }

    /// [`displayed`](Self::displayed) converted to `unit`.
    pub fn displayed_in(
        &self,
        alert: AlertType,
        unit: DisplayUnit,
    ) -> Result<Option<Bounds>, AlertError> {
        self.displayed(alert)
            .map(|b| {
                Ok(Bounds {
                    lower: alert.from_canonical(b.lower, unit)?,
                    upper: alert.from_canonical(b.upper, unit)?,
                })
            })
            .transpose()
    }

    /// Observe the displayed bounds of one alert type.
    pub fn watch_displayed(&self, alert: AlertType) -> watch::Receiver<Option<Bounds>> {
        self.display_channel(alert).subscribe()
    }

    pub fn has_pending_writes(&self) -> bool {
        self.debouncers.iter().any(|d| d.value().is_pending())
    }

    /// Drop every write still waiting on its debounce delay.
    pub fn cancel_pending(&self) -> usize {
        self.debouncers
            .iter()
            .filter(|d| d.value().cancel())
            .count()
    }

    /// Stop the mute sweep and discard pending writes.
    pub async fn close(mut self) {
        self.cancel_pending();
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop().await;
        }
        debug!(sensor = %self.sensor, "editor session closed");
    }

    fn stored_bounds(&self, alert: AlertType) -> Option<Bounds> {
        if !alert.is_range() {
            return None;
        }
        self.notifier
            .rule(&self.sensor, alert)
            .and_then(|r| r.bounds())
            .or_else(|| {
                alert
                    .physical_range()
                    .map(|(lower, upper)| Bounds { lower, upper })
            })
    }

    fn display_channel(&self, alert: AlertType) -> Displayed {
        Arc::clone(
            self.displayed
                .entry(alert)
                .or_insert_with(|| Arc::new(watch::channel(self.stored_bounds(alert)).0))
                .value(),
        )
    }
}

impl std::fmt::Debug for SensorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSession")
            .field("sensor", &self.sensor)
            .field("delay", &self.delay)
            .field("sweeping", &self.scheduler.is_some())
            .finish_non_exhaustive()
    }
}
