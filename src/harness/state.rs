//! Data model shared by the harness's pump state machine, feeder thread,
//! and telemetry thread.

use std::collections::BTreeMap;
use std::time::Duration;

/// One segment of a (possibly multi-rate) video timeline.
///
/// `sample_duration / time_scale` gives the duration of one frame in
/// seconds, e.g. `1001 / 30000` for 29.97fps NTSC-style video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoParameters {
    pub sample_duration: u32,
    pub time_scale: u32,
    pub num_video_frames: u32,
}

impl VideoParameters {
    pub fn frame_duration_seconds(&self) -> f64 {
        self.sample_duration as f64 / self.time_scale as f64
    }
}

/// Starting frame index (cumulative across all prior segments) mapped to
/// the segment that begins there. Looked up with `lower_bound`-then-step-back
/// semantics: the entry whose key is the largest one `<=` the frame index.
pub type VideoPlaymap = BTreeMap<u64, VideoParameters>;

/// Find the segment that owns `frame_index`, given a non-empty playmap.
pub fn segment_for_frame(playmap: &VideoPlaymap, frame_index: u64) -> (u64, VideoParameters) {
    match playmap.range(..=frame_index).next_back() {
        Some((&key, params)) => (key, *params),
        None => {
            let (&key, params) = playmap.iter().next().expect("playmap must not be empty");
            (key, *params)
        }
    }
}

/// Per-segment delta-timing and cadence accounting, accumulated while that
/// segment is the one driving pumps.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VideoSegmentStats {
    pub max_delta: Duration,
    pub max_delta_frame_index: u64,
    pub min_delta: Duration,
    pub min_delta_frame_index: u64,
    pub cumulative_delta: Duration,
    pub num_pumps_completed: u64,
    pub timer_period: f64,
}

impl VideoSegmentStats {
    pub fn average_delta_seconds(&self) -> f64 {
        if self.num_pumps_completed == 0 {
            return 0.0;
        }
        self.cumulative_delta.as_secs_f64() / self.num_pumps_completed as f64
    }
}

impl Default for VideoSegmentStats {
    fn default() -> Self {
        Self {
            max_delta: Duration::ZERO,
            max_delta_frame_index: 0,
            min_delta: Duration::from_secs(10_000),
            min_delta_frame_index: 0,
            cumulative_delta: Duration::ZERO,
            num_pumps_completed: 0,
            timer_period: 0.0,
        }
    }
}

/// End-of-run summary handed to the data sink once the feeder thread has
/// drained the pipeline and the test is fully stopped.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HarnessSummary {
    pub adversarial_audio_playrate_factor: f64,
    pub actual_audio_playrate_factor: f64,
    pub adversarial_audio_chunk_cache_size: u32,
    pub num_pressure_threads: usize,
    pub per_segment: Vec<VideoSegmentStats>,
    pub video_frame_hiccup_occurred: bool,
    pub max_video_frame_hiccup: u64,
    pub av_drift_occurred: bool,
    pub av_drift_num_frames: u64,
    pub max_av_drift: u64,
    pub video_segments_total_num_frames: u64,
}

impl HarnessSummary {
    pub fn av_drift_percent(&self) -> f64 {
        if self.video_segments_total_num_frames == 0 {
            return 0.0;
        }
        (self.av_drift_num_frames as f64 / self.video_segments_total_num_frames as f64) * 100.0
    }
}

impl std::fmt::Display for HarnessSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "*** TestStopped ***")?;
        if self.adversarial_audio_playrate_factor != 1.0 {
            writeln!(
                f,
                "Adversarial AudioPlayrateFactor:{}",
                self.adversarial_audio_playrate_factor
            )?;
        }
        if self.actual_audio_playrate_factor != 1.0 {
            writeln!(
                f,
                "Actual AudioPlayrateFactor:{}",
                self.actual_audio_playrate_factor
            )?;
        }
        if self.adversarial_audio_chunk_cache_size != 1 {
            writeln!(
                f,
                "Adversarial AudioChunkCacheSize:{}",
                self.adversarial_audio_chunk_cache_size
            )?;
        }
        if self.num_pressure_threads != 0 {
            writeln!(f, "Adversarial PressureThreads count:{}", self.num_pressure_threads)?;
        }
        for (i, segment) in self.per_segment.iter().enumerate() {
            writeln!(f, "VideoSegment:{}  VideoTimerPeriod:{}", i, segment.timer_period)?;
            writeln!(
                f,
                "VideoSegment:{}  Average Delta sec:{} - Max Delta sec:{} VFI:{:06} - Min Delta sec:{} VFI:{:06}",
                i,
                segment.average_delta_seconds(),
                segment.max_delta.as_secs_f64(),
                segment.max_delta_frame_index,
                segment.min_delta.as_secs_f64(),
                segment.min_delta_frame_index
            )?;
        }
        if self.video_frame_hiccup_occurred {
            writeln!(
                f,
                "*** VIDEO FRAME HICCUPS OCCURRED!!! MAX HICCUP: {} VIDEO FRAMES ***",
                self.max_video_frame_hiccup
            )?;
        } else {
            writeln!(f, "No video frame hiccups occurred")?;
        }
        if self.av_drift_occurred {
            writeln!(
                f,
                "*** AUDIO/VIDEO DRIFT OCCURRED!!! MAX DRIFT: {} VIDEO FRAMES - NUM FRAMES WITH DRIFT: {} - % FRAMES WITH DRIFT: {}% ***",
                self.max_av_drift, self.av_drift_num_frames, self.av_drift_percent()
            )?;
        } else {
            writeln!(f, "No audio/video drift occurred")?;
        }
        Ok(())
    }
}
