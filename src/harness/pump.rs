//! The A/V reconciliation state machine.
//!
//! Ports `PumpVideoFrame`: the single choke point through which both the
//! video timer (one ping per intended frame) and the audio pipeline's
//! completion callback (one "unqueue" per audio chunk finished) drive the
//! shared `av_equalizer` counter and decide whether, and how far, the
//! video frame index advances.

use std::time::{Duration, Instant};

use super::state::{segment_for_frame, VideoPlaymap, VideoSegmentStats};
use super::telemetry::FrameRecord;
use crate::scheduler::video_timer::VideoTimerDelegate;

/// Who invoked [`pump_video_frame`] for a given call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpVideoFrameSender {
    VideoTimer,
    AudioUnqueuer,
}

/// All state [`pump_video_frame`] reads and mutates, serialized behind a
/// single mutex shared with the audio-completion handler (both call sites
/// run under the same lock in the original, so there is never a second
/// lock guarding a disjoint subset of these fields here either).
pub struct PumpState {
    pub audio_chunk_iter: u64,
    pub video_frame_iter: u64,
    pub video_timer_iter: u64,
    pub av_equalizer: i64,
    pub audio_running_slow_accum: u64,
    pub first_call: bool,
    pub last_call: Instant,
    pub playback_start: Instant,
    pub audio_playrate_factor: f64,
    pub frame_rate_adjusted_on_frame_index: u64,
    pub segment_stats: Vec<VideoSegmentStats>,
    pub segment_stats_iter: usize,

    pub first_call_to_audio_chunk_completed: bool,
    pub last_call_to_audio_chunk_completed: Instant,
    pub audio_playback_duration_actual: Duration,
    pub audio_playback_duration_ideal: f64,
}

impl PumpState {
    pub fn new(num_segments: usize) -> Self {
        let now = Instant::now();
        Self {
            audio_chunk_iter: 0,
            video_frame_iter: 0,
            video_timer_iter: 0,
            av_equalizer: 0,
            audio_running_slow_accum: 0,
            first_call: false,
            last_call: now,
            playback_start: now,
            audio_playrate_factor: 1.0,
            frame_rate_adjusted_on_frame_index: 0,
            segment_stats: (0..num_segments).map(|_| VideoSegmentStats::default()).collect(),
            segment_stats_iter: 0,
            first_call_to_audio_chunk_completed: false,
            last_call_to_audio_chunk_completed: now,
            audio_playback_duration_actual: Duration::ZERO,
            audio_playback_duration_ideal: 0.0,
        }
    }
}

/// Immutable context `pump_video_frame` needs beyond `PumpState`.
pub struct PumpContext<'a> {
    pub playmap: &'a VideoPlaymap,
    pub total_frames: u64,
    pub video_timer: &'a VideoTimerDelegate,
    /// Consecutive audio-slow observations required before a retune.
    /// Matches the original's `> threshold` comparison exactly, so a
    /// threshold of 3 retunes on the 4th consecutive slow observation.
    pub audio_slow_threshold: u64,
    /// When non-1.0, overrides the computed playrate factor -- used so an
    /// adversarial test run reports the rate it intentionally configured
    /// rather than the (correct, 1.0) rate actually measured.
    pub adversarial_audio_playrate_factor: f64,
}

/// Advance (or reject) the shared pump state for one call from either the
/// video timer or the audio pipeline's completion callback. Returns a
/// [`FrameRecord`] to publish to the telemetry thread, or `None` if this
/// call didn't result in an actionable frame (primed the clock, was fully
/// absorbed by the av-equalizer, or landed past the end of the timeline).
pub fn pump_video_frame(
    state: &mut PumpState,
    ctx: &PumpContext,
    sender: PumpVideoFrameSender,
    num_pumps: i64,
) -> Option<FrameRecord> {
    let mut adjusted_framerate = false;

    match sender {
        PumpVideoFrameSender::VideoTimer => {
            state.video_timer_iter += 1;
            state.av_equalizer += num_pumps;
            if state.av_equalizer > 0 {
                state.video_frame_iter += num_pumps as u64;
            } else {
                return None;
            }
        }
        PumpVideoFrameSender::AudioUnqueuer => {
            state.av_equalizer -= num_pumps;

            if state.av_equalizer < 0 {
                // Audio has taken over the timing scheme. Consume the
                // overrun into video_frame_iter and hand control back to
                // the video timer by resyncing its phase immediately.
                let overrun = state.av_equalizer.unsigned_abs();
                state.video_frame_iter += overrun;
                state.av_equalizer = 0;
                ctx.video_timer.refresh_last_ping();
                state.audio_running_slow_accum = 0;
            } else if state.av_equalizer > 0 {
                state.audio_running_slow_accum += 1;

                if state.audio_running_slow_accum > ctx.audio_slow_threshold {
                    let mut playrate_factor = if state.audio_playback_duration_ideal > 0.0 {
                        state.audio_playback_duration_actual.as_secs_f64()
                            / state.audio_playback_duration_ideal
                    } else {
                        1.0
                    };
                    if ctx.adversarial_audio_playrate_factor != 1.0 {
                        playrate_factor = ctx.adversarial_audio_playrate_factor;
                    }
                    state.audio_playrate_factor = playrate_factor;
                    ctx.video_timer.set_playrate_factor(playrate_factor);
                    ctx.video_timer.refresh_last_ping();
                    state.audio_running_slow_accum = 0;
                }
                return None;
            } else {
                state.audio_running_slow_accum = 0;
                return None;
            }
        }
    }

    // Multi-rate playback: retune the timer period if videoFrameIter has
    // crossed into a new segment.
    if ctx.playmap.len() > 1 {
        let (segment_start, segment) = segment_for_frame(ctx.playmap, state.video_frame_iter);
        if state.frame_rate_adjusted_on_frame_index != segment_start {
            ctx.video_timer.set_base_period(segment.frame_duration_seconds());
            state.frame_rate_adjusted_on_frame_index = segment_start;
            adjusted_framerate = true;
        }
    }

    let now = Instant::now();

    if !state.first_call {
        state.first_call = true;
        state.last_call = now;
        state.playback_start = now;
        return None;
    }

    if state.video_frame_iter > ctx.total_frames {
        return None;
    }

    let delta = now.saturating_duration_since(state.last_call);
    let total = now.saturating_duration_since(state.playback_start);

    let record = FrameRecord {
        sender,
        av_equalizer: state.av_equalizer,
        // `audio_chunk_iter` is the chunk that was just dequeued; the one
        // currently playing -- which is what we want to report alongside
        // `video_frame_iter` -- is one further along.
        audio_chunk_iter: state.audio_chunk_iter + 1,
        adversarial_cache_accum: 0,
        video_frame_iter: state.video_frame_iter,
        delta,
        total,
    };

    state.last_call = now;

    let stats = &mut state.segment_stats[state.segment_stats_iter];
    stats.cumulative_delta += delta;
    stats.num_pumps_completed += 1;

    if state.video_frame_iter != 0 && state.video_frame_iter != 1 && state.video_frame_iter != ctx.total_frames {
        if delta > stats.max_delta {
            stats.max_delta = delta;
            stats.max_delta_frame_index = state.video_frame_iter;
        }
        if delta < stats.min_delta {
            stats.min_delta = delta;
            stats.min_delta_frame_index = state.video_frame_iter;
        }
    }

    if !adjusted_framerate {
        stats.timer_period = ctx.video_timer.timer_period();
    }
    if adjusted_framerate {
        state.segment_stats_iter += 1;
    }

    Some(record)
}
