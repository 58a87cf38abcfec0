//! Audio buffer queueing and completion pipeline.
//!
//! Ports the original `Audiblizer`: chunks are queued onto a backend device
//! in submission order, and `poll()` drains whatever the backend reports as
//! finished, handing the whole batch to a completion listener in one call
//! if one is installed, or simply dropping the chunks otherwise.
//!
//! - [`backend`]: the device-facing trait this module queues against.

pub mod backend;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, error, warn};

use crate::error::PipelineError;
use crate::format::AudioChunk;
use crate::scheduler::delegate::{Delegate, LastPingCell};
use backend::{BufferId, PlaybackBackend};
use std::time::Instant;

/// How often the pipeline's scheduler delegate checks for completed
/// buffers. Matches the original `Audiblizer`'s own timer period, much
/// tighter than the video frame rate since buffer completions need to be
/// observed promptly for `av_equalizer` to track reality.
pub const POLL_PERIOD_SECONDS: f64 = 0.0001;

/// Receives batches of chunks the backend has finished playing.
///
/// Given the whole batch in one call, rather than one callback per chunk,
/// matching the original's per-poll delivery.
pub trait CompletionListener: Send {
    fn on_completed(&self, chunks: Vec<AudioChunk>);
}

struct QueuedBuffer {
    id: BufferId,
    chunk: AudioChunk,
}

/// Queues audio chunks onto a [`PlaybackBackend`] and tracks their
/// lifecycle until the backend reports them played.
pub struct Pipeline {
    backend: Mutex<Box<dyn PlaybackBackend>>,
    initialized: Mutex<bool>,
    outstanding: Mutex<Vec<QueuedBuffer>>,
    by_id: Mutex<HashMap<BufferId, usize>>,
    queued_duration_ms: Mutex<i64>,
    listener: Mutex<Option<Arc<dyn CompletionListener>>>,
    // Reused across polls to avoid per-call reallocation, matching the
    // original's `processedBuffers` scratch vector.
    poll_scratch: Mutex<Vec<BufferId>>,
    last_ping: LastPingCell,
}

impl Pipeline {
    pub fn new(backend: Box<dyn PlaybackBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
            initialized: Mutex::new(false),
            outstanding: Mutex::new(Vec::new()),
            by_id: Mutex::new(HashMap::new()),
            queued_duration_ms: Mutex::new(0),
            listener: Mutex::new(None),
            poll_scratch: Mutex::new(Vec::new()),
            last_ping: LastPingCell::new(),
        }
    }

    pub fn initialize(&self) -> Result<(), PipelineError> {
        let mut initialized = self.initialized.lock().unwrap();
        if *initialized {
            return Err(PipelineError::AlreadyInitialized);
        }
        self.backend.lock().unwrap().initialize()?;
        *initialized = true;
        Ok(())
    }

    pub fn set_completion_listener(&self, listener: Arc<dyn CompletionListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    /// Queue an ordered batch of chunks in one call, matching
    /// `AudiblizerTestHarness`'s per-iteration `QueueAudio(audioChunks)`.
    /// For each chunk: validate, allocate a backend buffer, upload, enqueue,
    /// and insert the bookkeeping record. A backend error or a chunk
    /// failing [`AudioChunk::validate`] aborts the batch at that element;
    /// already-inserted chunks remain queued (no transactional rollback).
    /// Returns the number of chunks successfully inserted before any
    /// failure (or all of them, on full success).
    ///
    /// After all insertions, if the backend isn't already `Playing`, this
    /// transitions it to `Playing` -- mirroring `Audiblizer.cpp`'s
    /// `alGetSourcei(AL_SOURCE_STATE)` then `alSourcePlay` sequence, so
    /// playback resumes after a buffer underrun instead of stalling
    /// silently while the feeder keeps queueing.
    pub fn queue_audio(&self, chunks: Vec<AudioChunk>) -> Result<usize, PipelineError> {
        if !*self.initialized.lock().unwrap() {
            return Err(PipelineError::NotInitialized);
        }

        let mut queued = 0;
        for chunk in chunks {
            self.queue_one(chunk)?;
            queued += 1;
        }

        let mut backend = self.backend.lock().unwrap();
        if !backend.is_playing()? {
            backend.play()?;
        }
        Ok(queued)
    }

    fn queue_one(&self, chunk: AudioChunk) -> Result<(), PipelineError> {
        chunk
            .validate()
            .map_err(PipelineError::InvalidChunk)?;

        let id = self.backend.lock().unwrap().queue(&chunk)?;
        let duration_ms = chunk.duration_millis() as i64;

        let mut outstanding = self.outstanding.lock().unwrap();
        let index = outstanding.len();
        outstanding.push(QueuedBuffer { id, chunk });
        self.by_id.lock().unwrap().insert(id, index);
        *self.queued_duration_ms.lock().unwrap() += duration_ms;
        Ok(())
    }

    pub fn num_buffers_queued(&self) -> usize {
        self.outstanding.lock().unwrap().len()
    }

    pub fn queued_audio_duration_seconds(&self) -> f64 {
        *self.queued_duration_ms.lock().unwrap() as f64 / 1000.0
    }

    /// Ask the backend which buffers have finished, retire them from
    /// bookkeeping, and hand the batch to the completion listener (or drop
    /// it, if none is installed).
    pub fn poll(&self) -> Result<usize, PipelineError> {
        if !*self.initialized.lock().unwrap() {
            return Err(PipelineError::NotInitialized);
        }

        let mut scratch = self.poll_scratch.lock().unwrap();
        scratch.clear();
        scratch.extend(self.backend.lock().unwrap().poll_processed()?);
        if scratch.is_empty() {
            return Ok(0);
        }

        let completed = self.retire(&scratch);
        let count = completed.len();
        drop(scratch);

        match self.listener.lock().unwrap().as_ref() {
            Some(listener) => listener.on_completed(completed),
            None => debug!("pipeline dropped {} completed chunk(s), no listener", count),
        }
        Ok(count)
    }

    fn retire(&self, ids: &[BufferId]) -> Vec<AudioChunk> {
        let mut outstanding = self.outstanding.lock().unwrap();
        let mut by_id = self.by_id.lock().unwrap();
        let mut total_ms = self.queued_duration_ms.lock().unwrap();

        let mut completed = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(index) = by_id.remove(id) else {
                warn!("backend reported unknown buffer id {:?} as processed", id);
                continue;
            };
            if index >= outstanding.len() {
                continue;
            }
            let removed = outstanding.remove(index);
            // Removing by index shifts everyone after it down by one; fix
            // up the remaining index map rather than rebuild it from scratch.
            for slot in by_id.values_mut() {
                if *slot > index {
                    *slot -= 1;
                }
            }
            *total_ms -= removed.chunk.duration_millis() as i64;
            completed.push(removed.chunk);
        }
        if *total_ms < 0 {
            *total_ms = 0;
        }
        completed
    }

    /// Stop playback and drop any still-outstanding chunks without
    /// notifying the completion listener, matching the original's
    /// unconditional-release `Stop()` semantics.
    pub fn stop(&self) -> Result<(), PipelineError> {
        if !*self.initialized.lock().unwrap() {
            return Err(PipelineError::NotInitialized);
        }
        self.backend.lock().unwrap().stop()?;
        self.outstanding.lock().unwrap().clear();
        self.by_id.lock().unwrap().clear();
        *self.queued_duration_ms.lock().unwrap() = 0;
        Ok(())
    }

    /// Marks the pipeline as uninitialized without touching the backend,
    /// so a subsequent `initialize()` succeeds. Used by the harness's
    /// `prepare_for_destruction`, which (unlike the original's per-cycle
    /// `make_shared<Audiblizer>()`) reuses one backend instance across
    /// initialize/teardown cycles rather than reconstructing it.
    pub(crate) fn mark_uninitialized(&self) {
        *self.initialized.lock().unwrap() = false;
    }
}

impl Delegate for Pipeline {
    fn timer_ping(&self) {
        if let Err(e) = self.poll() {
            error!("pipeline's scheduler-driven poll failed: {}", e);
        }
    }

    fn timer_period(&self) -> f64 {
        POLL_PERIOD_SECONDS
    }

    fn fire_once(&self) -> bool {
        false
    }

    fn last_ping(&self) -> Instant {
        self.last_ping.get()
    }

    fn set_last_ping(&self, when: Instant) {
        self.last_ping.set(when)
    }
}
