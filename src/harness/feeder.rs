//! Audio chunk production: the thread that keeps the pipeline fed with
//! PCM sized to exactly one video frame per chunk.
//!
//! Ports `AudioQueueingThreadProc`. Chunk sizes are derived from the video
//! timeline rather than an arbitrary fixed size so that one audio chunk
//! completing always corresponds to exactly one video frame having been
//! consumed -- which is what lets [`super::pump::pump_video_frame`] treat
//! "audio chunk dequeued" as "advance one video frame".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;

use crate::format::{AudioChunk, AudioFormat};
use crate::pipeline::Pipeline;

use super::state::VideoParameters;

pub struct FeederConfig {
    pub video_segments: Vec<VideoParameters>,
    pub audio_sample_rate: u32,
    pub audio_format: AudioFormat,
    pub audio_data: Arc<[u8]>,
    /// Scales the derived audio-frames-per-video-frame count, for
    /// adversarially simulating audio that plays faster or slower than its
    /// stated sample rate.
    pub adversarial_audio_playrate_factor: f64,
    pub max_queued_audio_duration_seconds: f64,
    pub low_water_mark_seconds: f64,
    pub low_water_sleep: Duration,
}

struct Cursor {
    segment_iter: usize,
    segment_frame_iter: u32,
    remainder: f64,
    byte_offset: usize,
}

/// Runs until `running` is cleared or the video timeline is exhausted, then
/// blocks until the pipeline has drained everything already queued.
pub fn run_feeder_thread(running: &AtomicBool, pipeline: &Pipeline, cfg: &FeederConfig) {
    info!("feeder thread started");
    let frame_byte_length = cfg.audio_format.frame_byte_length() as usize;
    let mut cursor = Cursor {
        segment_iter: 0,
        segment_frame_iter: 0,
        remainder: 0.0,
        byte_offset: 0,
    };

    while running.load(Ordering::SeqCst) {
        if cursor.segment_iter >= cfg.video_segments.len() {
            break;
        }

        let queued = pipeline.queued_audio_duration_seconds();
        let headroom = cfg.max_queued_audio_duration_seconds - queued;
        if headroom <= cfg.low_water_mark_seconds {
            thread::sleep(cfg.low_water_sleep);
            continue;
        }

        let chunks = build_chunks(cfg, &mut cursor, headroom, frame_byte_length);
        if !chunks.is_empty() {
            if let Err(e) = pipeline.queue_audio(chunks) {
                log::warn!("feeder thread failed to queue a batch: {}", e);
            }
        }
    }

    while pipeline.num_buffers_queued() > 0 {
        thread::sleep(Duration::from_millis(500));
    }
    info!("feeder thread stopped, pipeline drained");
}

fn build_chunks(
    cfg: &FeederConfig,
    cursor: &mut Cursor,
    headroom_seconds: f64,
    frame_byte_length: usize,
) -> Vec<AudioChunk> {
    let mut queueable_ms = (headroom_seconds * 1000.0) as i64;
    let mut chunks = Vec::new();

    while queueable_ms > 0 {
        if cursor.segment_frame_iter >= cfg.video_segments[cursor.segment_iter].num_video_frames {
            cursor.segment_frame_iter = 0;
            cursor.segment_iter += 1;
        }
        if cursor.segment_iter >= cfg.video_segments.len() {
            break;
        }

        let segment = &cfg.video_segments[cursor.segment_iter];
        let frames_remaining = segment.num_video_frames - cursor.segment_frame_iter;
        let frame_duration_ms = (segment.sample_duration as u64 * 1000) / segment.time_scale as u64;
        let segment_remaining_ms = frames_remaining as u64 * frame_duration_ms;

        let mut audio_frames_per_video_frame =
            segment.frame_duration_seconds() * cfg.audio_sample_rate as f64;
        audio_frames_per_video_frame *= cfg.adversarial_audio_playrate_factor;

        let current_chunk_ms = (queueable_ms as u64).min(segment_remaining_ms);
        let num_video_frames_to_queue = if frame_duration_ms == 0 {
            0
        } else {
            current_chunk_ms / frame_duration_ms
        };

        for _ in 0..num_video_frames_to_queue {
            cursor.remainder += audio_frames_per_video_frame.fract();
            let remainder_add = if cursor.remainder > 1.0 {
                cursor.remainder -= 1.0;
                1
            } else {
                0
            };

            let mut total_audio_frames = audio_frames_per_video_frame as u64 + remainder_add;
            let mut total_bytes = total_audio_frames as usize * frame_byte_length;

            // Never request more than the whole sample buffer holds; this
            // should never trigger in practice, so the remainder is left
            // untouched rather than compensated for.
            if total_bytes > cfg.audio_data.len() {
                total_audio_frames = (cfg.audio_data.len() / frame_byte_length) as u64;
                total_bytes = total_audio_frames as usize * frame_byte_length;
            }

            if cursor.byte_offset + total_bytes >= cfg.audio_data.len() {
                cursor.byte_offset = 0;
            }

            let slice = &cfg.audio_data[cursor.byte_offset..cursor.byte_offset + total_bytes];
            chunks.push(AudioChunk {
                format: cfg.audio_format,
                sample_rate: cfg.audio_sample_rate,
                data: Arc::from(slice),
            });

            cursor.byte_offset += total_bytes;
        }

        cursor.segment_frame_iter += num_video_frames_to_queue as u32;
        queueable_ms -= current_chunk_ms as i64;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::backend::{BufferId, PlaybackBackend};
    use crate::error::PipelineError;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex as StdMutex;

    struct CountingBackend {
        next_id: AtomicU64,
        resident: StdMutex<Vec<BufferId>>,
    }

    impl PlaybackBackend for CountingBackend {
        fn initialize(&mut self) -> Result<(), PipelineError> {
            Ok(())
        }
        fn queue(&mut self, _chunk: &AudioChunk) -> Result<BufferId, PipelineError> {
            let id = BufferId(self.next_id.fetch_add(1, Ordering::SeqCst));
            self.resident.lock().unwrap().push(id);
            Ok(id)
        }
        fn poll_processed(&mut self) -> Result<Vec<BufferId>, PipelineError> {
            Ok(std::mem::take(&mut *self.resident.lock().unwrap()))
        }
        fn is_playing(&mut self) -> Result<bool, PipelineError> {
            Ok(true)
        }
        fn play(&mut self) -> Result<(), PipelineError> {
            Ok(())
        }
        fn stop(&mut self) -> Result<Vec<BufferId>, PipelineError> {
            Ok(std::mem::take(&mut *self.resident.lock().unwrap()))
        }
    }

    #[test]
    fn feeder_drains_pipeline_before_returning() {
        let pipeline = Pipeline::new(Box::new(CountingBackend {
            next_id: AtomicU64::new(1),
            resident: StdMutex::new(Vec::new()),
        }));
        pipeline.initialize().unwrap();

        let cfg = FeederConfig {
            video_segments: vec![VideoParameters {
                sample_duration: 1001,
                time_scale: 30000,
                num_video_frames: 10,
            }],
            audio_sample_rate: 30000,
            audio_format: AudioFormat::Stereo16,
            audio_data: Arc::from(vec![0u8; 4 * 30000 * 2]),
            adversarial_audio_playrate_factor: 1.0,
            max_queued_audio_duration_seconds: 0.1,
            low_water_mark_seconds: 0.01,
            low_water_sleep: Duration::from_millis(1),
        };

        let running = AtomicBool::new(true);
        let runner = &running;
        let poller_running = AtomicBool::new(true);
        let poller_flag = &poller_running;
        thread::scope(|scope| {
            scope.spawn(|| {
                // Stand in for the harness's normal drive loop (scheduler
                // ticks / completion callbacks), which is what actually
                // retires buffers via `Pipeline::poll` in production.
                while poller_flag.load(Ordering::SeqCst) {
                    let _ = pipeline.poll();
                    thread::sleep(Duration::from_millis(1));
                }
            });
            scope.spawn(|| {
                run_feeder_thread(runner, &pipeline, &cfg);
            });
            thread::sleep(Duration::from_millis(20));
            runner.store(false, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            poller_flag.store(false, Ordering::SeqCst);
        });

        assert_eq!(pipeline.num_buffers_queued(), 0);
    }

    #[test]
    fn build_chunks_wraps_the_sample_buffer() {
        let mut cursor = Cursor {
            segment_iter: 0,
            segment_frame_iter: 0,
            remainder: 0.0,
            byte_offset: 0,
        };
        let cfg = FeederConfig {
            video_segments: vec![VideoParameters {
                sample_duration: 1001,
                time_scale: 30000,
                num_video_frames: 1000,
            }],
            audio_sample_rate: 30000,
            audio_format: AudioFormat::Stereo16,
            audio_data: Arc::from(vec![0u8; 4 * 2002]),
            adversarial_audio_playrate_factor: 1.0,
            max_queued_audio_duration_seconds: 10.0,
            low_water_mark_seconds: 0.0,
            low_water_sleep: Duration::from_millis(1),
        };

        let chunks = build_chunks(&cfg, &mut cursor, 1.0, 4);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            chunk.validate().unwrap();
        }
    }
}
