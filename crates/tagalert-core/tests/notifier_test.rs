#![allow(clippy::unwrap_used)]
// End-to-end behaviour of the alert notifier: state machine, mute
// expiry, debounced edits, fireability and persistence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;

use tagalert_core::{
    AlertError, AlertKind, AlertNotifier, AlertRule, AlertType, DisplayUnit, EngineConfig,
    ManualClock, MeasurementSnapshot, MemoryPersistence, Mutation, RecordSource, SensorFacts,
    SensorId, SensorSession, TriState,
};
use tagalert_core::Clock as _;

// ── Helpers ─────────────────────────────────────────────────────────

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

struct Harness {
    notifier: AlertNotifier,
    store: Arc<MemoryPersistence>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryPersistence::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let notifier = AlertNotifier::new(EngineConfig::default(), store.clone(), clock.clone());
    Harness {
        notifier,
        store,
        clock,
    }
}

fn cloud() -> SensorFacts {
    SensorFacts {
        cloud_backed: true,
        ..SensorFacts::default()
    }
}

fn attach(h: &Harness, facts: SensorFacts) -> SensorId {
    let sensor = SensorId::from_luid("luid-1").with_mac("C8:25:2D:8E:9C:2C");
    assert!(h.notifier.attach(&sensor, facts).unwrap());
    sensor
}

fn temperature(h: &Harness, celsius: f64) -> MeasurementSnapshot {
    MeasurementSnapshot {
        temperature: Some(celsius),
        ..MeasurementSnapshot::new(RecordSource::CloudRelay, h.clock.now())
    }
}

type Events = Arc<Mutex<Vec<(TriState, Option<DateTime<Utc>>)>>>;

fn recorder() -> (Events, impl Fn(TriState, Option<DateTime<Utc>>) + Send + Sync + 'static) {
    let events: Events = Arc::default();
    let sink = Arc::clone(&events);
    (events, move |state, muted| {
        sink.lock().unwrap().push((state, muted));
    })
}

fn states(events: &Events) -> Vec<TriState> {
    events.lock().unwrap().iter().map(|(s, _)| *s).collect()
}

// ── RuleStore semantics ─────────────────────────────────────────────

#[tokio::test]
async fn register_twice_publishes_and_writes_once() {
    let h = harness();
    h.notifier.start().await;
    let sensor = attach(&h, cloud());
    let (events, callback) = recorder();
    let _sub = h
        .notifier
        .subscribe(&sensor, AlertType::Temperature, callback)
        .unwrap();

    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    assert_eq!(h.notifier.register(&sensor, kind).unwrap(), Mutation::Changed);

    let until = t0() + chrono::Duration::hours(1);
    h.notifier
        .mute(&sensor, AlertType::Temperature, until)
        .unwrap();
    assert_eq!(
        h.notifier.register(&sensor, kind).unwrap(),
        Mutation::Unchanged
    );
    assert_eq!(
        h.notifier.status(&sensor, AlertType::Temperature).muted_until,
        Some(until),
        "re-registering must not clear the mute"
    );

    h.notifier.shutdown().await;
    assert_eq!(
        *events.lock().unwrap(),
        vec![(TriState::Registered, None), (TriState::Registered, Some(until))]
    );
    assert_eq!(h.store.writes(), 2);
}

#[tokio::test]
async fn fahrenheit_bounds_are_stored_in_celsius() {
    let h = harness();
    let sensor = attach(&h, cloud());

    h.notifier
        .set_lower(&sensor, AlertType::Temperature, 50.0, DisplayUnit::Fahrenheit)
        .unwrap();
    h.notifier
        .set_upper(&sensor, AlertType::Temperature, 68.0, DisplayUnit::Fahrenheit)
        .unwrap();

    let bounds = h
        .notifier
        .rule(&sensor, AlertType::Temperature)
        .unwrap()
        .bounds()
        .unwrap();
    assert_eq!((bounds.lower, bounds.upper), (10.0, 20.0));
    assert_eq!(
        AlertType::Temperature
            .from_canonical(bounds.lower, DisplayUnit::Fahrenheit)
            .unwrap(),
        50.0
    );
}

#[tokio::test]
async fn rejected_bound_keeps_previous_value() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();

    let inverted = h.notifier.set_lower(
        &sensor,
        AlertType::Temperature,
        40.0,
        DisplayUnit::Celsius,
    );
    assert!(matches!(inverted, Err(AlertError::InvertedBounds { .. })));

    let implausible = h.notifier.set_upper(
        &sensor,
        AlertType::Temperature,
        500.0,
        DisplayUnit::Celsius,
    );
    assert!(matches!(implausible, Err(AlertError::OutOfRange { .. })));

    let bounds = h
        .notifier
        .rule(&sensor, AlertType::Temperature)
        .unwrap()
        .bounds()
        .unwrap();
    assert_eq!((bounds.lower, bounds.upper), (0.0, 30.0));
}

#[tokio::test]
async fn mute_in_the_past_is_an_unmute() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();
    h.notifier
        .mute(&sensor, AlertType::Temperature, t0() + chrono::Duration::minutes(5))
        .unwrap();

    h.notifier
        .mute(&sensor, AlertType::Temperature, t0() - chrono::Duration::minutes(5))
        .unwrap();
    assert_eq!(
        h.notifier.rule(&sensor, AlertType::Temperature).unwrap().muted_until(),
        None
    );
}

#[tokio::test]
async fn persisted_rules_are_loaded_on_attach() {
    let h = harness();
    let sensor = SensorId::from_mac("c8:25:2d:8e:9c:2c");
    let rule: AlertRule = serde_json::from_value(serde_json::json!({
        "kind": {
            "alert": "pressure",
            "condition": { "range": { "lower": 950.0, "upper": 1050.0 } }
        },
        "enabled": true
    }))
    .unwrap();
    h.store.seed(&sensor, [rule]);

    h.notifier.attach(&sensor, cloud()).unwrap();
    assert!(h.notifier.is_enabled(&sensor, AlertType::Pressure));
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Pressure),
        TriState::Registered
    );
}

#[tokio::test]
async fn reattached_sensor_starts_without_destroyed_rules() {
    let h = harness();
    h.notifier.start().await;
    let sensor = attach(&h, cloud());
    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();
    tokio::task::yield_now().await;
    assert!(h.store.saved(&sensor, AlertType::Temperature).is_some());

    assert!(h.notifier.detach(&sensor));
    assert!(h.notifier.attach(&sensor, cloud()).unwrap());
    assert!(h.notifier.rule(&sensor, AlertType::Temperature).is_none());
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Temperature),
        TriState::Empty
    );

    h.notifier.shutdown().await;
    assert!(h.store.saved(&sensor, AlertType::Temperature).is_none());
}

#[tokio::test]
async fn rules_added_after_reattach_survive_the_queued_removal() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();
    h.notifier.detach(&sensor);
    h.notifier.attach(&sensor, cloud()).unwrap();
    let kind = AlertKind::range(AlertType::Pressure, 950.0, 1050.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();

    h.notifier.start().await;
    h.notifier.shutdown().await;
    assert!(h.store.saved(&sensor, AlertType::Temperature).is_none());
    assert!(h.store.saved(&sensor, AlertType::Pressure).is_some());
}

#[tokio::test]
async fn detach_after_shutdown_still_forgets_rules() {
    let h = harness();
    let sensor = SensorId::from_mac("c8:25:2d:8e:9c:2c");
    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    h.store.seed(&sensor, [AlertRule::new(kind)]);
    h.notifier.start().await;
    h.notifier.attach(&sensor, cloud()).unwrap();
    h.notifier.shutdown().await;

    assert!(h.notifier.detach(&sensor));
    assert!(h.store.saved(&sensor, AlertType::Temperature).is_none());
}

#[tokio::test]
async fn luid_keyed_rules_load_once_the_mac_is_known() {
    let store = Arc::new(MemoryPersistence::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let by_luid = SensorId::from_luid("L1");
    {
        let first = AlertNotifier::new(EngineConfig::default(), store.clone(), clock.clone());
        first.start().await;
        first.attach(&by_luid, cloud()).unwrap();
        let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
        first.register(&by_luid, kind).unwrap();
        first.shutdown().await;
    }

    let second = AlertNotifier::new(EngineConfig::default(), store.clone(), clock);
    let both = SensorId::from_luid("L1").with_mac("aa:bb:cc:dd:ee:ff");
    second.attach(&both, cloud()).unwrap();
    assert!(second.is_enabled(&both, AlertType::Temperature));
    assert!(store.saved(&both, AlertType::Temperature).is_some());
}

#[tokio::test]
async fn writes_before_start_are_held_until_start() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();
    tokio::task::yield_now().await;
    assert_eq!(h.store.writes(), 0);

    h.notifier.start().await;
    h.notifier.shutdown().await;
    assert_eq!(h.store.writes(), 1);
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn temperature_rule_fires_recovers_and_clears() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();

    h.notifier.ingest(&sensor, temperature(&h, 35.0));
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Temperature),
        TriState::Firing
    );

    h.notifier.ingest(&sensor, temperature(&h, 25.0));
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Temperature),
        TriState::Registered
    );

    h.notifier
        .unregister(&sensor, AlertType::Temperature)
        .unwrap();
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Temperature),
        TriState::Empty
    );
}

#[tokio::test]
async fn humidity_percent_bounds_are_fractions() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let alert = AlertType::RelativeHumidity;
    h.notifier
        .set_lower(&sensor, alert, 45.0, DisplayUnit::Percent)
        .unwrap();
    h.notifier
        .set_upper(&sensor, alert, 60.0, DisplayUnit::Percent)
        .unwrap();
    h.notifier.set_enabled(&sensor, alert, true).unwrap();

    let bounds = h.notifier.rule(&sensor, alert).unwrap().bounds().unwrap();
    assert_eq!((bounds.lower, bounds.upper), (0.45, 0.60));

    let record = MeasurementSnapshot {
        humidity: Some(0.50),
        ..MeasurementSnapshot::new(RecordSource::Advertisement, h.clock.now())
    };
    h.notifier.ingest(&sensor, record);
    assert_eq!(h.notifier.current_state(&sensor, alert), TriState::Registered);
}

#[tokio::test]
async fn cloud_silence_fires_until_a_record_arrives() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let alert = AlertType::CloudConnection;
    h.notifier
        .set_unseen_duration(&sensor, 2.0, DisplayUnit::Minutes)
        .unwrap();
    h.notifier.set_enabled(&sensor, alert, true).unwrap();
    assert_eq!(h.notifier.current_state(&sensor, alert), TriState::Registered);

    h.clock.advance(chrono::Duration::minutes(3));
    h.notifier.sweep_all();
    assert_eq!(h.notifier.current_state(&sensor, alert), TriState::Firing);

    h.notifier.ingest(&sensor, temperature(&h, 21.0));
    assert_eq!(h.notifier.current_state(&sensor, alert), TriState::Registered);
}

#[tokio::test]
async fn unseen_duration_below_two_minutes_is_rejected() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let result = h
        .notifier
        .set_unseen_duration(&sensor, 90.0, DisplayUnit::Seconds);
    assert!(result.unwrap_err().is_rejected_input());
    assert!(h.notifier.rule(&sensor, AlertType::CloudConnection).is_none());
}

// ── Fireability ─────────────────────────────────────────────────────

#[tokio::test]
async fn no_delivery_path_caps_at_registered() {
    let h = harness();
    let sensor = attach(&h, SensorFacts::default());
    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();

    for _ in 0..10 {
        h.notifier.ingest(&sensor, temperature(&h, 35.0));
        assert_eq!(
            h.notifier.current_state(&sensor, AlertType::Temperature),
            TriState::Registered
        );
    }

    h.notifier.connectivity_changed(&sensor, true).unwrap();
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Temperature),
        TriState::Firing
    );
    h.notifier.connectivity_changed(&sensor, false).unwrap();
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Temperature),
        TriState::Registered
    );
}

#[tokio::test]
async fn losing_authorization_demotes_cloud_only_sensors() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();
    h.notifier.ingest(&sensor, temperature(&h, 35.0));

    h.notifier.authorization_changed(false);
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Temperature),
        TriState::Registered
    );
    h.notifier.service_channel_changed(&sensor, true).unwrap();
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Temperature),
        TriState::Firing
    );
}

#[tokio::test]
async fn disconnect_fires_connection_rule() {
    let h = harness();
    let sensor = attach(&h, cloud());
    h.notifier.connectivity_changed(&sensor, true).unwrap();
    h.notifier
        .set_enabled(&sensor, AlertType::Connection, true)
        .unwrap();
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Connection),
        TriState::Registered
    );

    h.notifier.connectivity_changed(&sensor, false).unwrap();
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Connection),
        TriState::Firing
    );
}

#[tokio::test]
async fn movement_baseline_comes_from_latest_counter() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let record = |counter| MeasurementSnapshot {
        movement_counter: Some(counter),
        ..MeasurementSnapshot::new(RecordSource::Advertisement, h.clock.now())
    };
    h.notifier.ingest(&sensor, record(5));
    h.notifier
        .set_enabled(&sensor, AlertType::Movement, true)
        .unwrap();
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Movement),
        TriState::Registered
    );

    h.notifier.ingest(&sensor, record(6));
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Movement),
        TriState::Firing
    );
}

// ── Identity ────────────────────────────────────────────────────────

#[tokio::test]
async fn records_resolve_by_either_identifier() {
    let h = harness();
    let sensor = SensorId::from_luid("luid-9");
    h.notifier.attach(&sensor, cloud()).unwrap();
    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();

    // First record reveals the MAC alongside the LUID.
    let both = SensorId::from_luid("luid-9").with_mac("aa:bb:cc:dd:ee:01");
    assert!(h.notifier.ingest(&both, temperature(&h, 20.0)));

    let mac_only = SensorId::from_mac("AA-BB-CC-DD-EE-01");
    assert!(h.notifier.ingest(&mac_only, temperature(&h, 40.0)));
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Temperature),
        TriState::Firing
    );

    let stranger = SensorId::from_mac("00:00:00:00:00:01");
    assert!(!h.notifier.ingest(&stranger, temperature(&h, 40.0)));
    assert_eq!(
        h.notifier.current_state(&stranger, AlertType::Temperature),
        TriState::Empty
    );
}

// ── Observation ─────────────────────────────────────────────────────

#[tokio::test]
async fn dropped_subscription_stops_callbacks() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let (events, callback) = recorder();
    let sub = h
        .notifier
        .subscribe(&sensor, AlertType::Temperature, callback)
        .unwrap();

    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();
    sub.unsubscribe();
    h.notifier.ingest(&sensor, temperature(&h, 35.0));

    assert_eq!(states(&events), vec![TriState::Registered]);
}

#[tokio::test]
async fn alert_stream_follows_state_and_ends_on_detach() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let mut stream = h
        .notifier
        .watch_alert(&sensor, AlertType::Temperature)
        .unwrap();
    assert_eq!(stream.state(), TriState::Empty);

    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();
    h.notifier.ingest(&sensor, temperature(&h, 35.0));

    let latest = stream.changed().await.unwrap();
    assert_eq!(latest.state, TriState::Firing);

    assert!(h.notifier.detach(&sensor));
    assert_eq!(stream.changed().await, None);
    assert!(!h.notifier.is_attached(&sensor));
}

// ── Time-driven behaviour ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn expired_mute_fires_on_next_sweep_tick() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let kind = AlertKind::range(AlertType::Temperature, 0.0, 30.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();
    h.notifier.ingest(&sensor, temperature(&h, 35.0));
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Temperature),
        TriState::Firing
    );

    let until = t0() + chrono::Duration::minutes(10);
    h.notifier
        .mute(&sensor, AlertType::Temperature, until)
        .unwrap();
    h.notifier.ingest(&sensor, temperature(&h, 36.0));
    assert_eq!(
        h.notifier.status(&sensor, AlertType::Temperature),
        tagalert_core::AlertStatus {
            state: TriState::Registered,
            muted_until: Some(until),
        }
    );

    let session = SensorSession::open(&h.notifier, &sensor).unwrap();
    h.clock.advance(chrono::Duration::minutes(11));
    assert_eq!(
        h.notifier.current_state(&sensor, AlertType::Temperature),
        TriState::Registered
    );

    tokio::time::sleep(Duration::from_secs(6)).await;
    let status = h.notifier.status(&sensor, AlertType::Temperature);
    assert_eq!(status.state, TriState::Firing);
    assert_eq!(status.muted_until, None);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn slider_drag_collapses_to_one_write() {
    let h = harness();
    h.notifier.start().await;
    let sensor = attach(&h, cloud());
    let kind = AlertKind::range(AlertType::Temperature, -10.0, 40.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();

    let session = SensorSession::open(&h.notifier, &sensor).unwrap();
    let mut last = f64::NAN;
    for step in 0..50 {
        last = -20.0 + f64::from(step) * 0.2;
        let shown = session
            .drag_lower(AlertType::Temperature, last, DisplayUnit::Celsius)
            .unwrap();
        assert_eq!(shown.lower, last);
        assert_eq!(session.displayed(AlertType::Temperature).unwrap().lower, last);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(session.has_pending_writes());
    assert_eq!(
        h.notifier
            .rule(&sensor, AlertType::Temperature)
            .unwrap()
            .bounds()
            .unwrap()
            .lower,
        -10.0
    );

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(!session.has_pending_writes());
    session.close().await;
    h.notifier.shutdown().await;

    let saved = h.store.saved(&sensor, AlertType::Temperature).unwrap();
    assert_eq!(saved.bounds().unwrap().lower, last);
    // One write for the register, one for the whole drag.
    assert_eq!(h.store.writes(), 2);
}

#[tokio::test(start_paused = true)]
async fn closing_the_session_discards_pending_drag() {
    let h = harness();
    let sensor = attach(&h, cloud());
    let kind = AlertKind::range(AlertType::Temperature, -10.0, 40.0).unwrap();
    h.notifier.register(&sensor, kind).unwrap();

    let session = SensorSession::open(&h.notifier, &sensor).unwrap();
    session
        .drag_upper(AlertType::Temperature, 35.0, DisplayUnit::Celsius)
        .unwrap();
    drop(session);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let bounds = h
        .notifier
        .rule(&sensor, AlertType::Temperature)
        .unwrap()
        .bounds()
        .unwrap();
    assert_eq!(bounds.upper, 40.0);
}
