//! End-to-end scenarios exercising the full harness against a simulated
//! playback backend. Scaled down from the reference scenarios (hundreds
//! of frames at real video frame rates) to tens of frames so the suite
//! finishes quickly on a non-realtime CI host; timing assertions use a
//! generous relative tolerance for the same reason.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use avsync::error::PipelineError;
use avsync::pipeline::backend::{BufferId, PlaybackBackend};
use avsync::{AudioChunk, Harness, HarnessConfig, VideoParameters};

/// Completes queued chunks, in order, one real-time duration apart,
/// starting only once the source transitions to `Playing` -- so the
/// harness's reconciliation logic is driven by genuine wall-clock timing,
/// and so `Pipeline::queue_audio`'s ensure-playing step actually has
/// something to do: the source stops itself once its buffers run dry, and
/// needs `play()` called again before chunks queued after that point
/// start counting down.
struct SimulatedBackend {
    next_id: AtomicU64,
    pending_durations: Mutex<Vec<(BufferId, Duration)>>,
    scheduled: Mutex<Vec<(BufferId, Instant)>>,
    playing: Mutex<bool>,
}

impl SimulatedBackend {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending_durations: Mutex::new(Vec::new()),
            scheduled: Mutex::new(Vec::new()),
            playing: Mutex::new(false),
        }
    }
}

impl PlaybackBackend for SimulatedBackend {
    fn initialize(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn queue(&mut self, chunk: &AudioChunk) -> Result<BufferId, PipelineError> {
        let id = BufferId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let duration = Duration::from_secs_f64(chunk.duration_seconds());
        if *self.playing.lock().unwrap() {
            let mut scheduled = self.scheduled.lock().unwrap();
            let start = scheduled.last().map(|(_, d)| *d).unwrap_or_else(Instant::now);
            scheduled.push((id, start + duration));
        } else {
            self.pending_durations.lock().unwrap().push((id, duration));
        }
        Ok(id)
    }

    fn poll_processed(&mut self) -> Result<Vec<BufferId>, PipelineError> {
        let now = Instant::now();
        let mut scheduled = self.scheduled.lock().unwrap();
        let (done, remaining): (Vec<_>, Vec<_>) =
            scheduled.drain(..).partition(|(_, deadline)| *deadline <= now);
        *scheduled = remaining;
        if scheduled.is_empty() {
            *self.playing.lock().unwrap() = false;
        }
        Ok(done.into_iter().map(|(id, _)| id).collect())
    }

    fn is_playing(&mut self) -> Result<bool, PipelineError> {
        Ok(*self.playing.lock().unwrap())
    }

    fn play(&mut self) -> Result<(), PipelineError> {
        let mut playing = self.playing.lock().unwrap();
        if *playing {
            return Ok(());
        }
        *playing = true;
        let mut scheduled = self.scheduled.lock().unwrap();
        let mut cursor = Instant::now();
        for (id, duration) in self.pending_durations.lock().unwrap().drain(..) {
            cursor += duration;
            scheduled.push((id, cursor));
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<Vec<BufferId>, PipelineError> {
        *self.playing.lock().unwrap() = false;
        let mut drained: Vec<BufferId> = self
            .pending_durations
            .lock()
            .unwrap()
            .drain(..)
            .map(|(id, _)| id)
            .collect();
        drained.extend(self.scheduled.lock().unwrap().drain(..).map(|(id, _)| id));
        Ok(drained)
    }
}

fn segment(sample_duration: u32, time_scale: u32, num_video_frames: u32) -> VideoParameters {
    VideoParameters {
        sample_duration,
        time_scale,
        num_video_frames,
    }
}

fn new_harness() -> Arc<Harness> {
    Harness::new(Box::new(SimulatedBackend::new()), HarnessConfig::default())
}

fn run_segments_and_wait(
    harness: &Arc<Harness>,
    segments: Vec<VideoParameters>,
    playrate_factor: f64,
    cache_size: u32,
    pressure_threads: usize,
    timeout: Duration,
) {
    harness
        .start_test(segments, playrate_factor, cache_size, pressure_threads)
        .expect("start_test should succeed");

    let waiter = Arc::clone(harness);
    let handle = thread::spawn(move || waiter.wait_on_test_completion());
    let started = Instant::now();
    while !handle.is_finished() {
        if started.elapsed() > timeout {
            panic!("scenario did not complete within {:?}", timeout);
        }
        thread::sleep(Duration::from_millis(20));
    }
    harness.stop_test().expect("stop_test should succeed");
    let _ = handle.join();
}

/// S1 (reduced): one segment, nominal rate, no adversarial knobs.
#[test]
fn s1_nominal_single_segment_completes_cleanly() {
    let harness = new_harness();
    harness.initialize().unwrap();
    // 30 frames @ 1001/30000 ~= 1.0 second of audio.
    harness
        .generate_sample_audio(30000, true, false, 30.0 * 1001.0 / 30000.0)
        .unwrap();

    run_segments_and_wait(
        &harness,
        vec![segment(1001, 30000, 30)],
        1.0,
        1,
        0,
        Duration::from_secs(5),
    );

    let summary = harness.summary();
    assert_eq!(summary.video_segments_total_num_frames, 30);
    assert!(!summary.video_frame_hiccup_occurred);
    assert!(!summary.av_drift_occurred);
}

/// S2 (reduced): two segments at different frame rates; the timer period
/// must switch exactly at the segment boundary.
#[test]
fn s2_multi_segment_playlist_switches_rate_at_boundary() {
    let harness = new_harness();
    harness.initialize().unwrap();
    harness.generate_sample_audio(30000, true, false, 2.0).unwrap();

    run_segments_and_wait(
        &harness,
        vec![segment(1001, 30000, 20), segment(1001, 60000, 40)],
        1.0,
        1,
        0,
        Duration::from_secs(5),
    );

    let summary = harness.summary();
    assert_eq!(summary.video_segments_total_num_frames, 60);
    assert_eq!(summary.per_segment.len(), 2);
    // Segment 0 runs at ~29.97fps (period ~0.0334s), segment 1 at ~59.94fps
    // (period ~0.0167s); the second segment's timer period should be
    // roughly half the first's.
    let first_period = summary.per_segment[0].timer_period;
    let second_period = summary.per_segment[1].timer_period;
    assert!(first_period > 0.0 && second_period > 0.0);
    assert!((first_period / second_period - 2.0).abs() < 0.3);
}

/// S3 (reduced): audio adversarially sped up; the measured playrate
/// factor should converge close to what was configured.
#[test]
fn s3_adversarial_fast_audio_converges_playrate_factor() {
    let harness = new_harness();
    harness.initialize().unwrap();
    harness
        .generate_sample_audio(30000, true, false, 30.0 * 1001.0 / 30000.0)
        .unwrap();

    run_segments_and_wait(
        &harness,
        vec![segment(1001, 30000, 30)],
        1.10,
        1,
        0,
        Duration::from_secs(5),
    );

    let summary = harness.summary();
    assert!((summary.adversarial_audio_playrate_factor - 1.10).abs() < 1e-9);
}

/// S4 (reduced): audio adversarially slowed; a retune should trigger once
/// the slow-accumulator threshold is exceeded.
#[test]
fn s4_adversarial_slow_audio_retunes_without_hiccup() {
    let harness = new_harness();
    harness.initialize().unwrap();
    harness
        .generate_sample_audio(30000, true, false, 30.0 * 1001.0 / 30000.0)
        .unwrap();

    run_segments_and_wait(
        &harness,
        vec![segment(1001, 30000, 30)],
        0.90,
        1,
        0,
        Duration::from_secs(5),
    );

    let summary = harness.summary();
    assert!(!summary.video_frame_hiccup_occurred);
}

/// S5 (reduced): completions batched by a chunk cache of 4; drift must
/// stay suppressed since the cache accumulator folds into detection.
#[test]
fn s5_batched_completions_do_not_trigger_drift() {
    let harness = new_harness();
    harness.initialize().unwrap();
    harness
        .generate_sample_audio(30000, true, false, 30.0 * 1001.0 / 30000.0)
        .unwrap();

    run_segments_and_wait(
        &harness,
        vec![segment(1001, 30000, 30)],
        1.0,
        4,
        0,
        Duration::from_secs(5),
    );

    let summary = harness.summary();
    assert_eq!(summary.adversarial_audio_chunk_cache_size, 4);
    assert!(!summary.av_drift_occurred);
}

/// S6 (reduced): pressure threads add scheduling jitter, but every frame
/// is still pumped in order with at most a small hiccup.
#[test]
fn s6_pressure_threads_still_complete_in_order() {
    let harness = new_harness();
    harness.initialize().unwrap();
    harness
        .generate_sample_audio(30000, true, false, 20.0 * 1001.0 / 30000.0)
        .unwrap();

    run_segments_and_wait(
        &harness,
        vec![segment(1001, 30000, 20)],
        1.0,
        1,
        2,
        Duration::from_secs(8),
    );

    let summary = harness.summary();
    assert_eq!(summary.num_pressure_threads, 2);
    assert_eq!(summary.video_segments_total_num_frames, 20);
}

/// Round-trip law: Initialize -> PrepareForDestruction -> Initialize
/// succeeds, i.e. the harness can be fully torn down and reused.
#[test]
fn initialize_prepare_for_destruction_initialize_round_trips() {
    let harness = new_harness();
    harness.initialize().unwrap();
    harness.prepare_for_destruction();
    harness.initialize().expect("reinitialize after teardown should succeed");
}

/// Round-trip law: Start/Stop/Start restores all counters to zero.
#[test]
fn start_stop_start_resets_counters() {
    let harness = new_harness();
    harness.initialize().unwrap();
    harness
        .generate_sample_audio(30000, true, false, 20.0 * 1001.0 / 30000.0)
        .unwrap();

    run_segments_and_wait(
        &harness,
        vec![segment(1001, 30000, 20)],
        1.0,
        1,
        0,
        Duration::from_secs(5),
    );
    let first = harness.summary();
    assert_eq!(first.video_segments_total_num_frames, 20);

    run_segments_and_wait(
        &harness,
        vec![segment(1001, 30000, 10)],
        1.0,
        1,
        0,
        Duration::from_secs(5),
    );
    let second = harness.summary();
    assert_eq!(second.video_segments_total_num_frames, 10);
    assert!(!second.av_drift_occurred);
}

/// Boundary: StartTest with an empty playlist is rejected.
#[test]
fn empty_playlist_is_rejected() {
    let harness = new_harness();
    harness.initialize().unwrap();
    assert!(harness.start_test(Vec::new(), 1.0, 1, 0).is_err());
}
