//! Standalone demo driving [`avsync::Harness`] against a simulated
//! playback device, since the real audio backend is an external
//! collaborator this crate only specifies a trait for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use clap::{Arg, ArgAction, Command};
use log::info;

use avsync::error::PipelineError;
use avsync::pipeline::backend::{BufferId, PlaybackBackend};
use avsync::{AudioChunk, Harness, HarnessConfig, VideoParameters};

fn build_cli() -> Command {
    Command::new("avsync-demo")
        .version("0.1.0")
        .about("Runs the A/V reconciliation harness against a simulated device")
        .arg(
            Arg::new("frames")
                .long("frames")
                .value_name("COUNT")
                .default_value("150")
                .help("Number of video frames to pump"),
        )
        .arg(
            Arg::new("frame-rate")
                .long("frame-rate")
                .value_name("FPS")
                .default_value("29.97")
                .help("Nominal video frame rate"),
        )
        .arg(
            Arg::new("sample-rate")
                .long("sample-rate")
                .value_name("HZ")
                .default_value("48000")
                .help("Synthetic audio sample rate"),
        )
        .arg(
            Arg::new("mono")
                .long("mono")
                .action(ArgAction::SetTrue)
                .help("Generate mono instead of stereo sample audio"),
        )
        .arg(
            Arg::new("playrate-factor")
                .long("adversarial-playrate-factor")
                .value_name("FACTOR")
                .default_value("1.0")
                .help("Adversarially scale the feeder's audio playrate"),
        )
        .arg(
            Arg::new("cache-size")
                .long("adversarial-cache-size")
                .value_name("N")
                .default_value("1")
                .help("Batch this many audio completions before reconciling"),
        )
        .arg(
            Arg::new("pressure-threads")
                .long("pressure-threads")
                .value_name("N")
                .default_value("0")
                .help("Spawn this many CPU-burn threads to add scheduling jitter"),
        )
}

/// Simulates a playback device by completing queued chunks, in order, one
/// real-time duration apart, starting only once the source is transitioned
/// to `Playing` -- rather than touching a real output device or decoder,
/// which is out of this crate's scope. Mirrors a real device's own
/// behavior: the source stops itself once its queued buffers run dry, so
/// queuing more chunks after a stall needs [`PlaybackBackend::play`] called
/// again, exactly what [`avsync::pipeline::Pipeline::queue_audio`] does.
struct SimulatedBackend {
    next_id: AtomicU64,
    // Chunks not yet assigned a completion deadline (queued while stopped).
    pending_durations: Mutex<Vec<(BufferId, Duration)>>,
    // Chunks already playing, in completion order.
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

fn main() {
    env_logger::init();
    let matches = build_cli().get_matches();

    let num_frames: u32 = matches
        .get_one::<String>("frames")
        .unwrap()
        .parse()
        .expect("--frames must be an integer");
    let frame_rate: f64 = matches
        .get_one::<String>("frame-rate")
        .unwrap()
        .parse()
        .expect("--frame-rate must be a number");
    let sample_rate: u32 = matches
        .get_one::<String>("sample-rate")
        .unwrap()
        .parse()
        .expect("--sample-rate must be an integer");
    let stereo = !matches.get_flag("mono");
    let playrate_factor: f64 = matches
        .get_one::<String>("playrate-factor")
        .unwrap()
        .parse()
        .expect("--adversarial-playrate-factor must be a number");
    let cache_size: u32 = matches
        .get_one::<String>("cache-size")
        .unwrap()
        .parse()
        .expect("--adversarial-cache-size must be an integer");
    let pressure_threads: usize = matches
        .get_one::<String>("pressure-threads")
        .unwrap()
        .parse()
        .expect("--pressure-threads must be an integer");

    // 1001/30000 is the standard NTSC-style time base; derive sample_duration
    // from the requested frame rate directly instead.
    let time_scale = 100_000u32;
    let sample_duration = (time_scale as f64 / frame_rate).round() as u32;
    let segment = VideoParameters {
        sample_duration,
        time_scale,
        num_video_frames: num_frames,
    };
    let duration_seconds = segment.frame_duration_seconds() * num_frames as f64;

    let harness = Harness::new(Box::new(SimulatedBackend::new()), HarnessConfig::default());
    harness.initialize().expect("harness initialize failed");
    harness
        .generate_sample_audio(sample_rate, stereo, false, duration_seconds)
        .expect("sample audio generation failed");

    info!(
        "starting demo run: {} frames @ {:.3}fps, sample_rate={}, stereo={}",
        num_frames, frame_rate, sample_rate, stereo
    );

    harness
        .start_test(vec![segment], playrate_factor, cache_size, pressure_threads)
        .expect("start_test failed");

    harness.wait_on_test_completion();
    let summary = harness.summary();
    harness.stop_test().expect("stop_test failed");

    println!("{}", summary);
}
