//! Shared constants for scheduling and buffering defaults.

use std::time::Duration;

/// Sleep quantum of the high-precision scheduler thread between delegate
/// polls. The design targets ~1ms worst-case jitter on a lightly loaded
/// host; 250us leaves headroom under that bound.
pub const SCHEDULER_TICK: Duration = Duration::from_micros(250);

/// Default amount of audio the feeder thread tries to keep queued.
pub const DEFAULT_MAX_QUEUED_AUDIO_SECONDS: f64 = 4.0;

/// Below this much queued audio, the feeder backs off instead of queueing.
pub const DEFAULT_LOW_WATER_SECONDS: f64 = 0.25;

/// How long the feeder sleeps when below the low-water mark, or while
/// waiting for the pipeline to drain at end of playback.
pub const DEFAULT_LOW_WATER_SLEEP: Duration = Duration::from_millis(500);

/// Consecutive audio-slow observations before the harness retunes the
/// video timer's playrate factor.
pub const DEFAULT_AUDIO_SLOW_THRESHOLD: u64 = 3;

/// PCM format synthetic test audio and the feeder are produced in.
pub const TEST_AUDIO_FORMAT: crate::format::AudioFormat = crate::format::AudioFormat::Stereo16;
