//! `tagalert replay`: drive the engine from a scripted event log.
//!
//! Scripts are JSON lines, one event per line; blank lines and lines
//! starting with `#` are skipped. The wall clock only moves on `advance`
//! events, so a replay is deterministic. Every published state change is
//! collected and rendered once the script has run.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tabled::Tabled;
use tracing::{debug, info, warn};

use tagalert_config::Config;
use tagalert_core::{
    AlertNotifier, AlertType, Clock, JsonFilePersistence, ManualClock, MeasurementSnapshot,
    MemoryPersistence, RuleEdit, RulePersistence, SensorFacts, SensorId, Subscription, TriState,
};

use crate::cli::{GlobalOpts, ReplayArgs};
use crate::error::CliError;
use crate::output;

// ── Script events ────────────────────────────────────────────────────

/// A sensor named by config profile or by identifier object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SensorRef {
    Profile(String),
    Id(SensorId),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ReplayEvent {
    Attach {
        sensor: SensorRef,
        #[serde(default)]
        facts: Option<SensorFacts>,
    },
    Detach {
        sensor: SensorRef,
    },
    /// Records without a timestamp are stamped with the replay clock.
    Ingest {
        sensor: SensorRef,
        record: MeasurementSnapshot,
    },
    Connectivity {
        sensor: SensorRef,
        connected: bool,
    },
    CloudMode {
        sensor: SensorRef,
        cloud_backed: bool,
    },
    ServiceChannel {
        sensor: SensorRef,
        open: bool,
    },
    Authorization {
        authorized: bool,
    },
    Edit {
        sensor: SensorRef,
        edit: RuleEdit,
    },
    Advance {
        secs: u32,
    },
    Sweep,
}

// ── Collected output ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
struct Transition {
    /// Script line that caused the change.
    line: usize,
    at: DateTime<Utc>,
    sensor: String,
    alert: AlertType,
    state: TriState,
    #[serde(skip_serializing_if = "Option::is_none")]
    muted_until: Option<DateTime<Utc>>,
}

#[derive(Tabled)]
struct TransitionRow {
    #[tabled(rename = "Line")]
    line: usize,
    #[tabled(rename = "Time")]
    at: String,
    #[tabled(rename = "Sensor")]
    sensor: String,
    #[tabled(rename = "Alert")]
    alert: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Muted until")]
    muted_until: String,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

// ── Replay driver ────────────────────────────────────────────────────

struct Replay<'a> {
    config: &'a Config,
    notifier: AlertNotifier,
    clock: Arc<ManualClock>,
    line: Arc<AtomicUsize>,
    log: Arc<Mutex<Vec<Transition>>>,
    subscriptions: HashMap<String, Vec<Subscription>>,
    strict: bool,
    rejected: usize,
}

impl<'a> Replay<'a> {
    fn new(
        config: &'a Config,
        notifier: AlertNotifier,
        clock: Arc<ManualClock>,
        strict: bool,
    ) -> Self {
        Self {
            config,
            notifier,
            clock,
            line: Arc::new(AtomicUsize::new(0)),
            log: Arc::new(Mutex::new(Vec::new())),
            subscriptions: HashMap::new(),
            strict,
            rejected: 0,
        }
    }

    fn run(&mut self, script: &str) -> Result<(), CliError> {
        for (idx, raw) in script.lines().enumerate() {
            let line = idx + 1;
            let text = raw.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            let event: ReplayEvent =
                serde_json::from_str(text).map_err(|e| CliError::Script {
                    line,
                    reason: e.to_string(),
                })?;
            self.line.store(line, Ordering::Relaxed);
            debug!(line, ?event, "replaying");
            self.apply(event)?;
        }
        Ok(())
    }

    fn apply(&mut self, event: ReplayEvent) -> Result<(), CliError> {
        match event {
            ReplayEvent::Attach { sensor, facts } => {
                let (id, label, profile_facts) = self.resolve(&sensor)?;
                let facts = facts.or(profile_facts).unwrap_or_default();
                if self.notifier.attach(&id, facts)? {
                    self.watch(&id, &label)?;
                } else {
                    debug!(sensor = %label, "already attached");
                }
            }
            ReplayEvent::Detach { sensor } => {
                let (id, label, _) = self.resolve(&sensor)?;
                if !self.notifier.detach(&id) {
                    return Err(CliError::UnknownSensor { identifier: label });
                }
                self.subscriptions.remove(&label);
            }
            ReplayEvent::Ingest { sensor, mut record } => {
                let (id, label, _) = self.resolve(&sensor)?;
                if record.timestamp == DateTime::<Utc>::UNIX_EPOCH {
                    record.timestamp = self.clock.now();
                }
                if !self.notifier.ingest(&id, record) {
                    warn!(sensor = %label, "record for unattached sensor dropped");
                }
            }
            ReplayEvent::Connectivity { sensor, connected } => {
                let (id, ..) = self.resolve(&sensor)?;
                self.notifier.connectivity_changed(&id, connected)?;
            }
            ReplayEvent::CloudMode {
                sensor,
                cloud_backed,
            } => {
                let (id, ..) = self.resolve(&sensor)?;
                self.notifier.cloud_mode_changed(&id, cloud_backed)?;
            }
            ReplayEvent::ServiceChannel { sensor, open } => {
                let (id, ..) = self.resolve(&sensor)?;
                self.notifier.service_channel_changed(&id, open)?;
            }
            ReplayEvent::Authorization { authorized } => {
                self.notifier.authorization_changed(authorized);
            }
            ReplayEvent::Edit { sensor, edit } => {
                let (id, label, _) = self.resolve(&sensor)?;
                match self.notifier.apply(&id, edit) {
                    Ok(outcome) => debug!(sensor = %label, ?outcome, "edit applied"),
                    Err(e) if e.is_rejected_input() && !self.strict => {
                        warn!(
                            line = self.line.load(Ordering::Relaxed),
                            sensor = %label,
                            error = %e,
                            "edit rejected"
                        );
                        self.rejected += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            ReplayEvent::Advance { secs } => {
                self.clock.advance(Duration::seconds(i64::from(secs)));
            }
            ReplayEvent::Sweep => {
                let cleared = self.notifier.sweep_all();
                debug!(cleared, "sweep");
            }
        }
        Ok(())
    }

    /// Identifier, display label and profile facts for a sensor reference.
    fn resolve(
        &self,
        sensor: &SensorRef,
    ) -> Result<(SensorId, String, Option<SensorFacts>), CliError> {
        match sensor {
            SensorRef::Id(id) => Ok((id.clone(), id.to_string(), None)),
            SensorRef::Profile(name) => {
                let Some(profile) = self.config.sensor(name) else {
                    let names: Vec<&str> =
                        self.config.sensors.iter().map(|s| s.name.as_str()).collect();
                    return Err(CliError::ProfileNotFound {
                        name: name.clone(),
                        available: if names.is_empty() {
                            "(none)".into()
                        } else {
                            names.join(", ")
                        },
                    });
                };
                Ok((profile.sensor_id()?, name.clone(), Some(profile.facts())))
            }
        }
    }

    /// Subscribe to every alert type of a freshly attached sensor and
    /// record the states its persisted rules start in.
    fn watch(&mut self, id: &SensorId, label: &str) -> Result<(), CliError> {
        let mut subs = Vec::new();
        for alert in AlertType::iter() {
            let log = Arc::clone(&self.log);
            let clock = Arc::clone(&self.clock);
            let line = Arc::clone(&self.line);
            let sensor = label.to_owned();
            subs.push(self.notifier.subscribe(id, alert, move |state, muted_until| {
                log.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Transition {
                        line: line.load(Ordering::Relaxed),
                        at: clock.now(),
                        sensor: sensor.clone(),
                        alert,
                        state,
                        muted_until,
                    });
            })?);

            let status = self.notifier.status(id, alert);
            if status.state != TriState::Empty {
                self.log
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Transition {
                        line: self.line.load(Ordering::Relaxed),
                        at: self.clock.now(),
                        sensor: label.to_owned(),
                        alert,
                        state: status.state,
                        muted_until: status.muted_until,
                    });
            }
        }
        self.subscriptions.insert(label.to_owned(), subs);
        Ok(())
    }

    fn into_transitions(self) -> Vec<Transition> {
        drop(self.subscriptions);
        std::mem::take(&mut *self.log.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

fn read_script(path: &Path) -> Result<String, CliError> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    Ok(std::fs::read_to_string(path)?)
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(args: &ReplayArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = tagalert_config::load_config_from(&global.config_path())?;
    let engine = cfg.engine.to_engine_config()?;
    let persistence: Arc<dyn RulePersistence> = match (&args.rules, args.persist) {
        (Some(path), _) => Arc::new(JsonFilePersistence::open(path.clone())?),
        (None, true) => Arc::new(JsonFilePersistence::open(
            cfg.storage.resolved_rules_path(),
        )?),
        (None, false) => Arc::new(MemoryPersistence::new()),
    };
    let script = read_script(&args.script)?;

    let clock = Arc::new(ManualClock::new(args.start));
    let notifier = AlertNotifier::new(
        engine,
        persistence,
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    notifier.start().await;

    let mut replay = Replay::new(&cfg, notifier.clone(), clock, args.strict);
    let result = replay.run(&script);
    let rejected = replay.rejected;
    let transitions = replay.into_transitions();
    notifier.shutdown().await;
    result?;

    info!(transitions = transitions.len(), rejected, "replay finished");

    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &transitions,
        |t| TransitionRow {
            line: t.line,
            at: timestamp(t.at),
            sensor: t.sensor.clone(),
            alert: t.alert.to_string(),
            state: output::paint_state(t.state, color),
            muted_until: t.muted_until.map_or_else(String::new, timestamp),
        },
        |t| format!("{}\t{}\t{}\t{}", t.line, t.sensor, t.alert, t.state),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn events_parse_from_script_lines() {
        let attach: ReplayEvent =
            serde_json::from_str(r#"{"event":"attach","sensor":"freezer"}"#).unwrap();
        assert!(matches!(
            attach,
            ReplayEvent::Attach {
                sensor: SensorRef::Profile(_),
                facts: None
            }
        ));

        let ingest: ReplayEvent = serde_json::from_str(
            r#"{"event":"ingest","sensor":{"mac":"C8:25:2D:8E:9C:2C"},"record":{"temperature":4}}"#,
        )
        .unwrap();
        let ReplayEvent::Ingest { sensor, record } = ingest else {
            panic!("expected ingest");
        };
        assert!(matches!(sensor, SensorRef::Id(_)));
        assert_eq!(record.temperature, Some(4.0));
        assert_eq!(record.timestamp, DateTime::<Utc>::UNIX_EPOCH);

        let sweep: ReplayEvent = serde_json::from_str(r#"{"event":"sweep"}"#).unwrap();
        assert!(matches!(sweep, ReplayEvent::Sweep));
    }

    #[test]
    fn unknown_profile_lists_the_available_ones() {
        let mut config = Config::default();
        config.sensors.push(tagalert_config::SensorProfile {
            name: "attic".into(),
            mac: None,
            luid: Some("a1".into()),
            cloud: false,
        });
        let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
        let notifier = AlertNotifier::new(
            tagalert_core::EngineConfig::default(),
            Arc::new(MemoryPersistence::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        let replay = Replay::new(&config, notifier, clock, false);

        let err = replay
            .resolve(&SensorRef::Profile("cellar".into()))
            .unwrap_err();
        match err {
            CliError::ProfileNotFound { available, .. } => assert_eq!(available, "attic"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
