//! Drains pump events into hiccup/drift accounting and a pluggable sink.
//!
//! Ports `DataOutputThreadProc`: a dedicated thread pulls frame events off a
//! queue (here an mpsc channel rather than a mutex-guarded `std::queue`,
//! since nothing else needs to observe the queue directly) and folds them
//! into running hiccup/drift counters before handing each event, and the
//! final summary, to a [`DataSink`].

use std::io::Write;
use std::sync::mpsc::Receiver;
use std::sync::Mutex;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;

use super::pump::PumpVideoFrameSender;
use super::state::HarnessSummary;

/// One pumped (or skipped-but-reported) video frame, as seen by the
/// telemetry thread.
#[derive(Debug, Clone, Serialize)]
pub struct FrameRecord {
    pub sender: PumpVideoFrameSender,
    pub av_equalizer: i64,
    pub audio_chunk_iter: u64,
    pub adversarial_cache_accum: u32,
    pub video_frame_iter: u64,
    pub delta: Duration,
    pub total: Duration,
}

/// A record handed to a [`DataSink`]: either a per-frame event or the
/// end-of-run summary.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkRecord {
    Frame {
        record: FrameRecord,
        hiccup: bool,
        drift: bool,
    },
    Summary(HarnessSummary),
}

impl std::fmt::Display for SinkRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkRecord::Frame { record, hiccup, drift } => {
                write!(
                    f,
                    "Sender:{}   A/V Eq:{:04}   ACI:{:06}+{:02}   VFI:{:06}{}  delta sec:{}   total sec:{}",
                    if matches!(record.sender, PumpVideoFrameSender::VideoTimer) { "V" } else { "A" },
                    record.av_equalizer,
                    record.audio_chunk_iter,
                    record.adversarial_cache_accum,
                    record.video_frame_iter,
                    if *hiccup { "*" } else { " " },
                    record.delta.as_secs_f64(),
                    record.total.as_secs_f64(),
                )?;
                if *drift {
                    write!(f, "   *** DRIFT ***")?;
                }
                Ok(())
            }
            SinkRecord::Summary(summary) => write!(f, "{}", summary),
        }
    }
}

/// Receives telemetry records. Implementations must not block for long --
/// the telemetry thread calls this synchronously in its drain loop.
pub trait DataSink: Send + Sync {
    fn accept(&self, record: SinkRecord);
}

/// Writes every record to stdout via its `Display` impl.
pub struct StdoutSink;

impl DataSink for StdoutSink {
    fn accept(&self, record: SinkRecord) {
        println!("{}", record);
    }
}

/// Writes every record as one JSON object per line to an arbitrary writer,
/// for consumers that want structured telemetry instead of the
/// human-readable [`StdoutSink`] format.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> DataSink for JsonLinesSink<W> {
    fn accept(&self, record: SinkRecord) {
        let mut writer = self.writer.lock().unwrap();
        match serde_json::to_writer(&mut *writer, &record) {
            Ok(()) => {
                let _ = writeln!(writer);
            }
            Err(e) => warn!("failed to serialize telemetry record: {}", e),
        }
    }
}

/// Running hiccup/drift accounting, folded frame-by-frame.
#[derive(Default)]
pub struct DriftTracker {
    last_video_frame_iter: u64,
    video_frame_hiccup: bool,
    max_video_frame_hiccup: u64,
    av_drift: bool,
    av_drift_num_frames: u64,
    max_av_drift: u64,
}

impl DriftTracker {
    /// Fold one frame record into the running counters. Returns
    /// `(hiccup, drift)` for this specific frame.
    fn observe(&mut self, record: &FrameRecord) -> (bool, bool) {
        let mut hiccup = false;
        if self.last_video_frame_iter != 0 && self.last_video_frame_iter + 1 != record.video_frame_iter {
            self.video_frame_hiccup = true;
            hiccup = true;
            let jump = record.video_frame_iter.saturating_sub(self.last_video_frame_iter);
            if jump > self.max_video_frame_hiccup {
                self.max_video_frame_hiccup = jump;
            }
        }
        self.last_video_frame_iter = record.video_frame_iter;

        // `record.audio_chunk_iter` carries the "currently playing"
        // display offset (+1, see spec.md's open question) -- undo it
        // here so drift is measured against the real internal counter,
        // not its display-only shift. The cache accumulator is then
        // folded in so cached-completion adversarial runs don't
        // spuriously register drift while the magnitude tracked below
        // stays in raw audio/video terms.
        let true_audio_chunk_iter = record.audio_chunk_iter.saturating_sub(1);
        let observed = true_audio_chunk_iter + record.adversarial_cache_accum as u64;
        let mut drift = false;
        if (observed as i64 - record.video_frame_iter as i64).abs() > 1 {
            self.av_drift = true;
            self.av_drift_num_frames += 1;
            drift = true;

            let magnitude = (true_audio_chunk_iter as i64 - record.video_frame_iter as i64).unsigned_abs();
            if magnitude > self.max_av_drift {
                self.max_av_drift = magnitude;
            }
        }
        (hiccup, drift)
    }

    pub fn video_frame_hiccup(&self) -> bool {
        self.video_frame_hiccup
    }
    pub fn max_video_frame_hiccup(&self) -> u64 {
        self.max_video_frame_hiccup
    }
    pub fn av_drift(&self) -> bool {
        self.av_drift
    }
    pub fn av_drift_num_frames(&self) -> u64 {
        self.av_drift_num_frames
    }
    pub fn max_av_drift(&self) -> u64 {
        self.max_av_drift
    }
}

/// Worker loop: drains `records` and folds each into `tracker`, emitting a
/// [`SinkRecord::Frame`] per event to `sink`. Returns once the channel is
/// closed (the feeder thread drops its sender when the test stops).
pub fn run_telemetry_thread(
    records: Receiver<FrameRecord>,
    tracker: &Mutex<DriftTracker>,
    total_frames: u64,
    sink: &dyn DataSink,
) {
    info!("telemetry thread started");
    for record in records.iter() {
        if record.video_frame_iter > total_frames {
            continue;
        }
        let (hiccup, drift) = tracker.lock().unwrap().observe(&record);
        sink.accept(SinkRecord::Frame { record, hiccup, drift });
    }
    info!("telemetry thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(video_frame_iter: u64, audio_chunk_iter: u64) -> FrameRecord {
        FrameRecord {
            sender: PumpVideoFrameSender::VideoTimer,
            av_equalizer: 0,
            audio_chunk_iter,
            adversarial_cache_accum: 0,
            video_frame_iter,
            delta: Duration::from_millis(33),
            total: Duration::from_millis(33),
        }
    }

    #[test]
    fn sequential_frames_report_no_hiccup_or_drift() {
        let mut tracker = DriftTracker::default();
        for i in 1..=5u64 {
            let (hiccup, drift) = tracker.observe(&record(i, i));
            assert!(!hiccup);
            assert!(!drift);
        }
        assert!(!tracker.av_drift());
        assert!(!tracker.video_frame_hiccup());
    }

    #[test]
    fn skipped_frame_registers_as_hiccup() {
        let mut tracker = DriftTracker::default();
        tracker.observe(&record(1, 1));
        let (hiccup, _) = tracker.observe(&record(3, 3));
        assert!(hiccup);
        assert_eq!(tracker.max_video_frame_hiccup(), 2);
    }

    #[test]
    fn large_audio_video_gap_registers_as_drift() {
        // `record()`'s audio_chunk_iter mirrors FrameRecord's field, which
        // already carries the pump's "currently playing" +1 -- so an
        // observed value of 10 reflects a true internal counter of 9.
        let mut tracker = DriftTracker::default();
        tracker.observe(&record(1, 1));
        let (_, drift) = tracker.observe(&record(2, 10));
        assert!(drift);
        assert!(tracker.av_drift());
        assert_eq!(tracker.max_av_drift(), 7);
    }

    #[test]
    fn single_frame_lag_within_invariant_does_not_drift() {
        // True audio/video gap of exactly 1 (the invariant's allowed
        // bound) must not register as drift even once the telemetry
        // display offset is subtracted back out.
        let mut tracker = DriftTracker::default();
        tracker.observe(&record(1, 1));
        let (_, drift) = tracker.observe(&record(2, 2));
        assert!(!drift);
        assert!(!tracker.av_drift());
    }
}
