//! A/V reconciliation test harness.
//!
//! Drives a [`crate::pipeline::Pipeline`] (audio) and a
//! [`crate::scheduler::video_timer::VideoTimerDelegate`] (video) against
//! each other through [`pump::pump_video_frame`], feeding audio from a
//! background thread and reporting per-frame telemetry from another.
//!
//! - [`state`]: the data model -- video segments, the playmap, summary.
//! - [`pump`]: the reconciliation state machine itself.
//! - [`feeder`]: the audio-queueing thread.
//! - [`telemetry`]: the drift/hiccup accounting and data sink.
//! - [`pressure`]: adversarial CPU-burn threads for jitter testing.

pub mod feeder;
pub mod pressure;
pub mod pump;
pub mod state;
pub mod telemetry;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::event::Event;
use crate::format::{AudioChunk, AudioFormat};
use crate::pipeline::backend::PlaybackBackend;
use crate::pipeline::{CompletionListener, Pipeline};
use crate::scheduler::delegate::Delegate;
use crate::scheduler::video_timer::VideoTimerDelegate;
use crate::scheduler::Scheduler;

use feeder::FeederConfig;
use pressure::PressureThread;
use pump::{pump_video_frame, PumpContext, PumpState, PumpVideoFrameSender};
pub use state::{HarnessSummary, VideoParameters, VideoPlaymap};
use telemetry::{DataSink, DriftTracker, FrameRecord, SinkRecord, StdoutSink};

/// The audio format this harness's sample data is always interpreted as.
/// The original hardcodes the same assumption (`Audiblizer::AudioFormat_Stereo16`);
/// mono samples are carried as `Mono16` instead of being silently upmixed.
fn sample_format(stereo: bool) -> AudioFormat {
    if stereo {
        AudioFormat::Stereo16
    } else {
        AudioFormat::Mono16
    }
}

struct AudioSource {
    data: Arc<[u8]>,
    sample_rate: u32,
    format: AudioFormat,
}

struct RunState {
    feeder_running: Arc<AtomicBool>,
    feeder_handle: JoinHandle<()>,
    telemetry_handle: JoinHandle<()>,
    telemetry_sender: mpsc::Sender<FrameRecord>,
    pressure_threads: Vec<PressureThread>,
}

/// Weak-referencing completion listener installed on the pipeline, so the
/// pipeline's own `Arc` never keeps the harness alive (see
/// [`Harness::prepare_for_destruction`]).
struct HarnessCompletionListener(Weak<Harness>);

impl CompletionListener for HarnessCompletionListener {
    fn on_completed(&self, chunks: Vec<AudioChunk>) {
        if let Some(harness) = self.0.upgrade() {
            harness.audio_chunk_completed(chunks);
        }
    }
}

/// Drives a video timeline and an audio pipeline against each other,
/// reconciling drift between the two clocks one pump at a time.
pub struct Harness {
    pipeline: Arc<Pipeline>,
    scheduler: Scheduler,
    video_timer: Arc<VideoTimerDelegate>,
    config: HarnessConfig,

    initialized: AtomicBool,
    audio: Mutex<Option<AudioSource>>,

    playmap: Mutex<VideoPlaymap>,
    video_segments: Mutex<Vec<VideoParameters>>,
    total_frames: AtomicU64,

    pump_state: Mutex<PumpState>,
    drift_tracker: Arc<Mutex<DriftTracker>>,

    adversarial_audio_playrate_factor: Mutex<f64>,
    adversarial_audio_chunk_cache_size: AtomicU32,
    adversarial_audio_chunk_cache_accum: Mutex<u32>,

    sink: Mutex<Arc<dyn DataSink>>,
    run: Mutex<Option<RunState>>,
    test_completed: Arc<Event>,
}

impl Harness {
    /// Construct a harness wrapping the given playback device backend.
    /// The backend is not opened until [`Harness::initialize`].
    pub fn new(backend: Box<dyn PlaybackBackend>, config: HarnessConfig) -> Arc<Self> {
        let pipeline = Arc::new(Pipeline::new(backend));
        let scheduler = Scheduler::new(config.scheduler_tick);

        Arc::new_cyclic(|weak_self| {
            let ping_listener = weak_self.clone();
            let video_timer = Arc::new(VideoTimerDelegate::new(1001.0 / 30000.0, move || {
                if let Some(harness) = ping_listener.upgrade() {
                    harness.video_timer_ping();
                }
            }));

            pipeline.set_completion_listener(Arc::new(HarnessCompletionListener(weak_self.clone())));

            Harness {
                pipeline,
                scheduler,
                video_timer,
                config,
                initialized: AtomicBool::new(false),
                audio: Mutex::new(None),
                playmap: Mutex::new(VideoPlaymap::new()),
                video_segments: Mutex::new(Vec::new()),
                total_frames: AtomicU64::new(0),
                pump_state: Mutex::new(PumpState::new(0)),
                drift_tracker: Arc::new(Mutex::new(DriftTracker::default())),
                adversarial_audio_playrate_factor: Mutex::new(1.0),
                adversarial_audio_chunk_cache_size: AtomicU32::new(1),
                adversarial_audio_chunk_cache_accum: Mutex::new(0),
                sink: Mutex::new(Arc::new(StdoutSink)),
                run: Mutex::new(None),
                test_completed: Arc::new(Event::new(false, true)),
            }
        })
    }

    pub fn initialize(&self) -> Result<(), HarnessError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(HarnessError::AlreadyInitialized);
        }
        if let Err(e) = self.pipeline.initialize() {
            self.initialized.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        // Idempotent: a prior `prepare_for_destruction` already re-added
        // these via `stop_test`'s own restart bookkeeping.
        self.scheduler.remove_all_delegates();
        self.scheduler.add_delegate(Arc::clone(&self.pipeline) as Arc<dyn Delegate>);
        self.scheduler.add_delegate(Arc::clone(&self.video_timer) as Arc<dyn Delegate>);
        Ok(())
    }

    /// Install pre-decoded PCM samples for the feeder thread to loop over.
    /// Decoding from a file is an external concern this crate doesn't own;
    /// callers hand in raw interleaved 16-bit PCM.
    pub fn load_audio(&self, data: Arc<[u8]>, sample_rate: u32, stereo: bool) -> Result<(), HarnessError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(HarnessError::NotInitialized);
        }
        *self.audio.lock().unwrap() = Some(AudioSource {
            data,
            sample_rate,
            format: sample_format(stereo),
        });
        Ok(())
    }

    /// Generate a simple repeating-ramp (or silent) PCM buffer for tests
    /// and demos, rather than requiring a real sample file on disk.
    pub fn generate_sample_audio(
        &self,
        sample_rate: u32,
        stereo: bool,
        silence: bool,
        duration_seconds: f64,
    ) -> Result<(), HarnessError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(HarnessError::NotInitialized);
        }
        let data = generate_audio_sample(sample_rate, stereo, silence, duration_seconds);
        *self.audio.lock().unwrap() = Some(AudioSource {
            data,
            sample_rate,
            format: sample_format(stereo),
        });
        Ok(())
    }

    pub fn set_data_sink(&self, sink: Arc<dyn DataSink>) {
        *self.sink.lock().unwrap() = sink;
    }

    /// Begin a test run against `segments`, an ordered, non-empty playlist
    /// of video timeline segments.
    pub fn start_test(
        &self,
        segments: Vec<VideoParameters>,
        adversarial_audio_playrate_factor: f64,
        adversarial_audio_chunk_cache_size: u32,
        num_pressure_threads: usize,
    ) -> Result<(), HarnessError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(HarnessError::NotInitialized);
        }
        if segments.is_empty() {
            return Err(HarnessError::EmptyPlaylist);
        }
        if self.run.lock().unwrap().is_some() {
            return Err(HarnessError::AlreadyRunning);
        }

        let audio = {
            let guard = self.audio.lock().unwrap();
            match guard.as_ref() {
                Some(a) => AudioSource {
                    data: Arc::clone(&a.data),
                    sample_rate: a.sample_rate,
                    format: a.format,
                },
                None => return Err(HarnessError::NotInitialized),
            }
        };

        // Build the playmap: cumulative starting-frame-index -> segment.
        let mut playmap = VideoPlaymap::new();
        let mut total_frames: u64 = 0;
        for segment in &segments {
            playmap.insert(total_frames, *segment);
            total_frames += segment.num_video_frames as u64;
        }

        *self.playmap.lock().unwrap() = playmap.clone();
        *self.video_segments.lock().unwrap() = segments.clone();
        self.total_frames.store(total_frames, Ordering::SeqCst);
        *self.pump_state.lock().unwrap() = PumpState::new(segments.len());
        *self.drift_tracker.lock().unwrap() = DriftTracker::default();
        *self.adversarial_audio_playrate_factor.lock().unwrap() = adversarial_audio_playrate_factor.abs();
        self.adversarial_audio_chunk_cache_size
            .store(adversarial_audio_chunk_cache_size.max(1), Ordering::SeqCst);
        *self.adversarial_audio_chunk_cache_accum.lock().unwrap() = 0;
        self.test_completed.clear();

        let (first_key, first_segment) = *playmap.iter().next().expect("segments validated non-empty above");
        let _ = first_key;
        self.video_timer.set_base_period(first_segment.frame_duration_seconds());
        self.video_timer.set_playrate_factor(1.0);

        let pressure_threads = (0..num_pressure_threads).map(|_| PressureThread::spawn()).collect();

        self.scheduler.start()?;

        let feeder_running = Arc::new(AtomicBool::new(true));
        let feeder_cfg = FeederConfig {
            video_segments: segments,
            audio_sample_rate: audio.sample_rate,
            audio_format: audio.format,
            audio_data: audio.data,
            adversarial_audio_playrate_factor: adversarial_audio_playrate_factor.abs(),
            max_queued_audio_duration_seconds: self.config.max_queued_audio_duration_seconds,
            low_water_mark_seconds: self.config.low_water_mark_seconds,
            low_water_sleep: self.config.low_water_sleep,
        };
        let feeder_pipeline = Arc::clone(&self.pipeline);
        let feeder_flag = Arc::clone(&feeder_running);
        let feeder_completed = Arc::clone(&self.test_completed);
        let feeder_handle = thread::Builder::new()
            .name("avsync-feeder".to_string())
            .spawn(move || {
                feeder::run_feeder_thread(&feeder_flag, &feeder_pipeline, &feeder_cfg);
                feeder_completed.signal();
            })
            .expect("failed to spawn feeder thread");

        let (telemetry_sender, telemetry_receiver) = mpsc::channel();
        let telemetry_tracker = Arc::clone(&self.drift_tracker);
        let telemetry_sink = Arc::clone(&self.sink.lock().unwrap());
        let telemetry_handle = thread::Builder::new()
            .name("avsync-telemetry".to_string())
            .spawn(move || {
                telemetry::run_telemetry_thread(
                    telemetry_receiver,
                    &telemetry_tracker,
                    total_frames,
                    &*telemetry_sink,
                );
            })
            .expect("failed to spawn telemetry thread");

        *self.run.lock().unwrap() = Some(RunState {
            feeder_running,
            feeder_handle,
            telemetry_handle,
            telemetry_sender,
            pressure_threads,
        });

        info!("test started: {} total frames across {} segment(s)", total_frames, playmap.len());
        Ok(())
    }

    pub fn stop_test(&self) -> Result<(), HarnessError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(HarnessError::NotInitialized);
        }

        info!("stopping test");
        self.scheduler.stop();
        self.scheduler.remove_all_delegates();

        let run = self.run.lock().unwrap().take();
        if let Some(mut run) = run {
            let num_pressure_threads = run.pressure_threads.len();
            run.feeder_running.store(false, Ordering::SeqCst);
            let _ = run.feeder_handle.join();
            drop(run.telemetry_sender);
            let _ = run.telemetry_handle.join();
            for pressure in run.pressure_threads.iter_mut() {
                pressure.kill();
            }

            // Mirrors the original's `AudioQueueingThreadProc` tail: once
            // the feeder has drained and every thread has joined, compose
            // the end-of-run summary and route it through the same sink
            // per-frame records went through.
            let summary = self.build_summary(num_pressure_threads);
            self.sink.lock().unwrap().accept(SinkRecord::Summary(summary));
        }

        if let Err(e) = self.pipeline.stop() {
            warn!("pipeline stop failed: {}", e);
        }

        // A stopped test can be restarted; the scheduler's delegates were
        // removed above, so re-add them before the next `start_test`.
        self.scheduler.add_delegate(Arc::clone(&self.pipeline) as Arc<dyn Delegate>);
        self.scheduler.add_delegate(Arc::clone(&self.video_timer) as Arc<dyn Delegate>);

        Ok(())
    }

    pub fn wait_on_test_completion(&self) {
        self.test_completed.wait();
    }

    /// Stop any running test and mark the harness uninitialized, matching
    /// the original's `PrepareForDestruction` -- a subsequent `initialize()`
    /// is expected to succeed, reopening the backend from scratch.
    pub fn prepare_for_destruction(&self) {
        if !self.initialized.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.stop_test();
        self.pipeline.mark_uninitialized();
        self.initialized.store(false, Ordering::SeqCst);
    }

    pub fn summary(&self) -> HarnessSummary {
        let num_pressure_threads = self.run.lock().unwrap().as_ref().map(|r| r.pressure_threads.len()).unwrap_or(0);
        self.build_summary(num_pressure_threads)
    }

    fn build_summary(&self, num_pressure_threads: usize) -> HarnessSummary {
        let pump_state = self.pump_state.lock().unwrap();
        let tracker = self.drift_tracker.lock().unwrap();
        HarnessSummary {
            adversarial_audio_playrate_factor: *self.adversarial_audio_playrate_factor.lock().unwrap(),
            actual_audio_playrate_factor: pump_state.audio_playrate_factor,
            adversarial_audio_chunk_cache_size: self.adversarial_audio_chunk_cache_size.load(Ordering::SeqCst),
            num_pressure_threads,
            per_segment: pump_state.segment_stats.clone(),
            video_frame_hiccup_occurred: tracker.video_frame_hiccup(),
            max_video_frame_hiccup: tracker.max_video_frame_hiccup(),
            av_drift_occurred: tracker.av_drift(),
            av_drift_num_frames: tracker.av_drift_num_frames(),
            max_av_drift: tracker.max_av_drift(),
            video_segments_total_num_frames: self.total_frames.load(Ordering::SeqCst),
        }
    }

    fn video_timer_ping(&self) {
        let playmap = self.playmap.lock().unwrap();
        let total_frames = self.total_frames.load(Ordering::SeqCst);
        let threshold = self.config.audio_slow_threshold;
        let adversarial = *self.adversarial_audio_playrate_factor.lock().unwrap();

        let ctx = PumpContext {
            playmap: &playmap,
            total_frames,
            video_timer: &self.video_timer,
            audio_slow_threshold: threshold,
            adversarial_audio_playrate_factor: adversarial,
        };
        let mut state = self.pump_state.lock().unwrap();
        if let Some(record) = pump_video_frame(&mut state, &ctx, PumpVideoFrameSender::VideoTimer, 1) {
            self.publish(record);
        }
    }

    fn audio_chunk_completed(&self, chunks: Vec<AudioChunk>) {
        let mut cache_accum = self.adversarial_audio_chunk_cache_accum.lock().unwrap();
        *cache_accum += chunks.len() as u32;

        let ideal: f64 = chunks.iter().map(|c| c.duration_seconds()).sum();

        {
            let mut state = self.pump_state.lock().unwrap();
            if !state.first_call_to_audio_chunk_completed {
                state.first_call_to_audio_chunk_completed = true;
                state.last_call_to_audio_chunk_completed = std::time::Instant::now();
            } else {
                let now = std::time::Instant::now();
                state.audio_playback_duration_actual +=
                    now.saturating_duration_since(state.last_call_to_audio_chunk_completed);
                state.audio_playback_duration_ideal += ideal;
                state.last_call_to_audio_chunk_completed = now;
            }
        }

        let cache_size = self.adversarial_audio_chunk_cache_size.load(Ordering::SeqCst);
        if *cache_accum < cache_size {
            return;
        }
        let accum = *cache_accum;
        *cache_accum = 0;
        drop(cache_accum);

        let playmap = self.playmap.lock().unwrap();
        let total_frames = self.total_frames.load(Ordering::SeqCst);
        let threshold = self.config.audio_slow_threshold;
        let adversarial = *self.adversarial_audio_playrate_factor.lock().unwrap();

        let ctx = PumpContext {
            playmap: &playmap,
            total_frames,
            video_timer: &self.video_timer,
            audio_slow_threshold: threshold,
            adversarial_audio_playrate_factor: adversarial,
        };
        let record = {
            let mut state = self.pump_state.lock().unwrap();
            let record = pump_video_frame(&mut state, &ctx, PumpVideoFrameSender::AudioUnqueuer, accum as i64);
            state.audio_chunk_iter += accum as u64;
            record
        };
        if let Some(mut record) = record {
            // `accum` is the cache-batch size that just triggered this pump
            // (always >= adversarial_audio_chunk_cache_size); surfacing it
            // here is what lets a sink show how many completions were
            // batched together, and what DriftTracker folds back in so a
            // batched-completion run doesn't read as spurious drift.
            record.adversarial_cache_accum = accum;
            self.publish(record);
        }
    }

    fn publish(&self, record: FrameRecord) {
        if let Some(run) = self.run.lock().unwrap().as_ref() {
            if run.telemetry_sender.send(record).is_err() {
                warn!("telemetry thread gone, dropping frame record");
            }
        }
    }

}

impl Drop for Harness {
    fn drop(&mut self) {
        self.prepare_for_destruction();
    }
}

/// Port of `GenerateAudioSample`: a simple repeating descending ramp (or
/// silence), 16-bit PCM, one or two channels.
fn generate_audio_sample(sample_rate: u32, stereo: bool, silence: bool, duration_seconds: f64) -> Arc<[u8]> {
    let num_channels: usize = if stereo { 2 } else { 1 };
    let num_frames = ((sample_rate as f64 * duration_seconds) + 0.5) as usize;
    let num_samples = num_frames * num_channels;
    let mut samples = vec![0u16; num_samples];

    if !silence {
        if stereo {
            let mut i = 0;
            while i + 1 < num_samples {
                let value = 32768u16.wrapping_sub(((i as u64 % 100) as u16).wrapping_mul(660));
                samples[i] = value;
                samples[i + 1] = value;
                i += 2;
            }
        } else {
            for (i, sample) in samples.iter_mut().enumerate() {
                *sample = 32768u16.wrapping_sub(((i as u64 % 100) as u16).wrapping_mul(660));
            }
        }
    }

    let mut bytes = Vec::with_capacity(num_samples * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    Arc::from(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::pipeline::backend::BufferId;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;

    struct InstantBackend {
        next_id: StdAtomicU64,
        pending: Mutex<Vec<BufferId>>,
    }

    impl InstantBackend {
        fn new() -> Self {
            Self {
                next_id: StdAtomicU64::new(1),
                pending: Mutex::new(Vec::new()),
            }
        }
    }

    impl PlaybackBackend for InstantBackend {
        fn initialize(&mut self) -> Result<(), PipelineError> {
            Ok(())
        }
        fn queue(&mut self, _chunk: &AudioChunk) -> Result<BufferId, PipelineError> {
            let id = BufferId(self.next_id.fetch_add(1, Ordering::SeqCst));
            self.pending.lock().unwrap().push(id);
            Ok(id)
        }
        fn poll_processed(&mut self) -> Result<Vec<BufferId>, PipelineError> {
            Ok(std::mem::take(&mut *self.pending.lock().unwrap()))
        }
        fn is_playing(&mut self) -> Result<bool, PipelineError> {
            Ok(true)
        }
        fn play(&mut self) -> Result<(), PipelineError> {
            Ok(())
        }
        fn stop(&mut self) -> Result<Vec<BufferId>, PipelineError> {
            Ok(std::mem::take(&mut *self.pending.lock().unwrap()))
        }
    }

    #[test]
    fn sample_generation_produces_expected_byte_length() {
        let data = generate_audio_sample(1000, true, false, 1.0);
        assert_eq!(data.len(), 1000 * 2 * 2);
    }

    #[test]
    fn silence_is_all_zero_bytes() {
        let data = generate_audio_sample(100, true, true, 0.1);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn initialize_twice_errors() {
        let harness = Harness::new(Box::new(InstantBackend::new()), HarnessConfig::default());
        harness.initialize().unwrap();
        assert!(matches!(harness.initialize(), Err(HarnessError::AlreadyInitialized)));
    }

    #[test]
    fn start_test_without_audio_is_rejected() {
        let harness = Harness::new(Box::new(InstantBackend::new()), HarnessConfig::default());
        harness.initialize().unwrap();
        let segments = vec![VideoParameters {
            sample_duration: 1001,
            time_scale: 30000,
            num_video_frames: 10,
        }];
        assert!(harness.start_test(segments, 1.0, 1, 0).is_err());
    }

    #[test]
    fn full_run_completes_and_reports_a_summary() {
        let harness = Harness::new(Box::new(InstantBackend::new()), HarnessConfig::default());
        harness.initialize().unwrap();
        harness.generate_sample_audio(30000, true, false, 0.5).unwrap();

        let segments = vec![VideoParameters {
            sample_duration: 1001,
            time_scale: 30000,
            num_video_frames: 15,
        }];
        harness.start_test(segments, 1.0, 1, 0).unwrap();

        let waiter = Arc::clone(&harness);
        let handle = thread::spawn(move || waiter.wait_on_test_completion());
        for _ in 0..100 {
            if handle.is_finished() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        harness.stop_test().unwrap();
        let _ = handle.join();

        let summary = harness.summary();
        assert_eq!(summary.video_segments_total_num_frames, 15);
    }
}
