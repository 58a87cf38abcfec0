//! Tunable knobs for the harness and its feeder thread.
//!
//! The teacher carries these as plain constructor arguments
//! (`PlaybackBufferSettings`) rather than a parsed config file; this crate
//! follows the same shape since there is no on-disk configuration surface.

use std::time::Duration;

use crate::constants::{
    DEFAULT_AUDIO_SLOW_THRESHOLD, DEFAULT_LOW_WATER_SECONDS, DEFAULT_LOW_WATER_SLEEP,
    DEFAULT_MAX_QUEUED_AUDIO_SECONDS, SCHEDULER_TICK,
};

/// Runtime configuration for a [`crate::Harness`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarnessConfig {
    /// Target amount of queued audio the feeder thread tries to maintain.
    pub max_queued_audio_duration_seconds: f64,
    /// Below this much queued audio, the feeder backs off instead of
    /// queueing more (hysteresis against thrashing near empty).
    pub low_water_mark_seconds: f64,
    /// How long the feeder sleeps when below the low-water mark.
    pub low_water_sleep: Duration,
    /// Scheduler thread poll interval.
    pub scheduler_tick: Duration,
    /// Consecutive audio-slow `PumpVideoFrame` observations required
    /// before the video timer's playrate factor is retuned.
    pub audio_slow_threshold: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_queued_audio_duration_seconds: DEFAULT_MAX_QUEUED_AUDIO_SECONDS,
            low_water_mark_seconds: DEFAULT_LOW_WATER_SECONDS,
            low_water_sleep: DEFAULT_LOW_WATER_SLEEP,
            scheduler_tick: SCHEDULER_TICK,
            audio_slow_threshold: DEFAULT_AUDIO_SLOW_THRESHOLD,
        }
    }
}
