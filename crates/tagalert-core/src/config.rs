// ── Runtime engine configuration ──
//
// Tuning knobs for the notifier and its helpers. Core never reads config
// files: `tagalert-config` (or the embedding app) builds an
// `EngineConfig` and hands it in.

use std::time::Duration;

use crate::model::{DEFAULT_CLOUD_UNSEEN_SECS, MIN_CLOUD_UNSEEN_SECS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How often an active sensor session sweeps expired mute windows.
    pub mute_sweep_period: Duration,
    /// Quiescence required before a dragged bound is written.
    pub debounce_delay: Duration,
    /// Cloud-silence window for CloudConnection rules enabled without one.
    pub cloud_unseen_default_secs: u32,
    /// Whether the account session starts authorized.
    pub authorized: bool,
}

impl EngineConfig {
    /// Clamp values that would make the engine misbehave.
    pub fn sanitized(mut self) -> Self {
        if self.mute_sweep_period.is_zero() {
            self.mute_sweep_period = Self::default().mute_sweep_period;
        }
        self.cloud_unseen_default_secs = self.cloud_unseen_default_secs.max(MIN_CLOUD_UNSEEN_SECS);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mute_sweep_period: Duration::from_secs(5),
            debounce_delay: Duration::from_millis(300),
            cloud_unseen_default_secs: DEFAULT_CLOUD_UNSEEN_SECS,
            authorized: true,
        }
    }
}
