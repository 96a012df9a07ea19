// ── Mute expiry scheduler ──
//
// While a sensor is being looked at, expired mute windows must flip
// back promptly. A periodic task sweeps the sensor; the sweep also
// re-evaluates cloud-silence rules, which only change with time.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AlertError;
use crate::model::SensorId;
use crate::notifier::AlertNotifier;

/// Periodic mute sweep for one sensor. Stops on `stop()`, on drop, or
/// when the sensor is removed.
#[derive(Debug)]
pub struct MuteScheduler {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl MuteScheduler {
    /// Start sweeping `sensor` every `period`. The first sweep runs one
    /// period from now.
    pub fn start(notifier: AlertNotifier, sensor: SensorId, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(mute_sweep_task(notifier, sensor, period, cancel.clone()));
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for MuteScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn mute_sweep_task(
    notifier: AlertNotifier,
    sensor: SensorId,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                match notifier.sweep(&sensor) {
                    Ok(cleared) if !cleared.is_empty() => {
                        debug!(sensor = %sensor, ?cleared, "mute sweep cleared windows");
                    }
                    Ok(_) => {}
                    Err(AlertError::UnknownSensor { .. }) => {
                        debug!(sensor = %sensor, "mute sweep: sensor removed, exiting");
                        break;
                    }
                    Err(e) => debug!(sensor = %sensor, error = %e, "mute sweep failed"),
                }
            }
        }
    }
}
