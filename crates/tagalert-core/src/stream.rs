// ── Alert status streams ──
//
// Reactive view of one alert of one sensor, for consumers that prefer
// awaiting changes over registering callbacks.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::{AlertStatus, TriState};

/// A subscription to one alert's published status.
///
/// Only value changes are published, so consecutive items always differ.
/// The stream ends when the sensor is removed.
pub struct AlertStream {
    current: AlertStatus,
    receiver: watch::Receiver<AlertStatus>,
}

impl AlertStream {
    pub(crate) fn new(receiver: watch::Receiver<AlertStatus>) -> Self {
        let current = *receiver.borrow();
        Self { current, receiver }
    }

    /// Status captured at creation time (or at the last `changed()`).
    pub fn current(&self) -> AlertStatus {
        self.current
    }

    pub fn state(&self) -> TriState {
        self.current.state
    }

    /// Latest published status, which may be newer than `current()`.
    pub fn latest(&self) -> AlertStatus {
        *self.receiver.borrow()
    }

    /// Wait for the next change. `None` once the sensor is gone.
    pub async fn changed(&mut self) -> Option<AlertStatus> {
        self.receiver.changed().await.ok()?;
        let status = *self.receiver.borrow_and_update();
        self.current = status;
        Some(status)
    }

    /// Convert into a `Stream` that yields the current status first.
    pub fn into_stream(self) -> AlertWatchStream {
        AlertWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter over an alert's `watch::Receiver`.
pub struct AlertWatchStream {
    inner: WatchStream<AlertStatus>,
}

impl Stream for AlertWatchStream {
    type Item = AlertStatus;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
